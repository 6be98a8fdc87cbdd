//! Planar geometry primitives.
//!
//! Coordinates are projected metres (a locally linear projection such as
//! Lambert-93), so distances are plain Euclidean norms.

use serde::{Deserialize, Serialize};

/// A projected point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Coords {
    pub x: f64,
    pub y: f64,
}

impl Coords {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Coords) -> f64 {
        ((other.x - self.x).powi(2) + (other.y - self.y).powi(2)).sqrt()
    }
}

impl From<(f64, f64)> for Coords {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// A straight portion of a polyline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: Coords,
    pub end: Coords,
}

impl Segment {
    pub const fn new(start: Coords, end: Coords) -> Self {
        Self { start, end }
    }

    pub fn length(&self) -> f64 {
        self.start.distance(&self.end)
    }

    /// Orthogonal projection of `p` clamped to the segment.
    pub fn closest_point(&self, p: &Coords) -> Coords {
        let dx = self.end.x - self.start.x;
        let dy = self.end.y - self.start.y;
        let len_sq = dx * dx + dy * dy;

        // Degenerate segment
        if len_sq == 0.0 {
            return self.start;
        }

        let t = (((p.x - self.start.x) * dx + (p.y - self.start.y) * dy) / len_sq).clamp(0.0, 1.0);
        Coords::new(self.start.x + t * dx, self.start.y + t * dy)
    }
}

/// Split a polyline into its consecutive segments.
pub fn segments_of(polyline: &[Coords]) -> Vec<Segment> {
    polyline
        .windows(2)
        .map(|pair| Segment::new(pair[0], pair[1]))
        .collect()
}

/// Cumulative length of a polyline.
pub fn polyline_length(polyline: &[Coords]) -> f64 {
    polyline.windows(2).map(|pair| pair[0].distance(&pair[1])).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_euclidean() {
        let a = Coords::new(0.0, 0.0);
        let b = Coords::new(3.0, 4.0);
        assert!((a.distance(&b) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn closest_point_inside_segment() {
        let seg = Segment::new(Coords::new(0.0, 0.0), Coords::new(10.0, 0.0));
        let p = seg.closest_point(&Coords::new(4.0, 3.0));
        assert_eq!(p, Coords::new(4.0, 0.0));
    }

    #[test]
    fn closest_point_clamps_to_endpoints() {
        let seg = Segment::new(Coords::new(0.0, 0.0), Coords::new(10.0, 0.0));
        assert_eq!(seg.closest_point(&Coords::new(-5.0, 2.0)), seg.start);
        assert_eq!(seg.closest_point(&Coords::new(15.0, -2.0)), seg.end);
    }

    #[test]
    fn degenerate_segment_projects_on_start() {
        let seg = Segment::new(Coords::new(1.0, 1.0), Coords::new(1.0, 1.0));
        assert_eq!(seg.closest_point(&Coords::new(7.0, 7.0)), Coords::new(1.0, 1.0));
    }

    #[test]
    fn polyline_helpers() {
        let line = [Coords::new(0.0, 0.0), Coords::new(3.0, 4.0), Coords::new(3.0, 10.0)];
        assert_eq!(segments_of(&line).len(), 2);
        assert!((polyline_length(&line) - 11.0).abs() < 1e-9);
        assert!(segments_of(&line[..1]).is_empty());
    }
}
