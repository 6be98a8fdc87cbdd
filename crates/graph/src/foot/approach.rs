use serde::{Deserialize, Serialize};
use wayfarer_core::geometry::polyline_length;
use wayfarer_core::{Coords, Section, SectionId, Segment};

/// Projection of an arbitrary point onto the closest section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ApproachedPoint {
    /// The point that was approached.
    pub coords: Coords,
    /// Closest point on the section.
    pub closest: Coords,
    pub section: SectionId,
    /// Index `i` of the segment `(coords[i], coords[i + 1])` holding `closest`.
    pub segment_index: usize,
    /// Distance from `coords` to `closest`.
    pub distance: f64,
}

impl ApproachedPoint {
    /// Walking lengths `(from s, to t)` through the approached point,
    /// each including the access leg between `coords` and `closest`.
    pub fn access_weights(&self, section: &Section) -> (f64, f64) {
        let i = self.segment_index;
        let line = &section.coords;
        let next = (i + 1).min(line.len().saturating_sub(1));

        let from_s = self.arc_position(section) + self.distance;
        let to_t = self.distance + self.closest.distance(&line[next]) + polyline_length(&line[next..]);
        (from_s, to_t)
    }

    /// Length along the section from its `s` end to `closest`.
    pub fn arc_position(&self, section: &Section) -> f64 {
        let line = &section.coords;
        let i = self.segment_index.min(line.len().saturating_sub(1));
        polyline_length(&line[..=i]) + line[i].distance(&self.closest)
    }
}

/// Segment of a section, cached for proximity scans.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IndexedSegment {
    pub section: SectionId,
    pub index: usize,
    pub segment: Segment,
}

/// Brute-force scan for the globally closest segment.
///
/// Returns `None` unless the closest distance is strictly below `max_dist`.
pub(crate) fn approach<'a>(
    segments: impl IntoIterator<Item = &'a IndexedSegment>,
    coords: Coords,
    max_dist: f64,
) -> Option<ApproachedPoint> {
    let mut best: Option<ApproachedPoint> = None;

    for seg in segments {
        let closest = seg.segment.closest_point(&coords);
        let distance = coords.distance(&closest);
        if best.map_or(true, |b| distance < b.distance) {
            best = Some(ApproachedPoint {
                coords,
                closest,
                section: seg.section,
                segment_index: seg.index,
                distance,
            });
        }
    }

    best.filter(|b| b.distance < max_dist)
}
