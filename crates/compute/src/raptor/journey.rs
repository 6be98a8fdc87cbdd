use serde::{Deserialize, Serialize};
use wayfarer_core::config::RoutingSection;
use wayfarer_core::{RouteId, StopId, Timestamp};

use crate::error::ComputeError;

/// One leg of a journey. `time` is the arrival time at the end of the leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JourneyStep {
    Departure {
        at: StopId,
        time: Timestamp,
    },
    Foot {
        from: StopId,
        to: StopId,
        length: f64,
        time: Timestamp,
    },
    Vehicle {
        boarded_at: StopId,
        alighted_at: StopId,
        route: RouteId,
        trip_index: usize,
        time: Timestamp,
    },
}

impl JourneyStep {
    pub fn time(&self) -> Timestamp {
        match self {
            JourneyStep::Departure { time, .. }
            | JourneyStep::Foot { time, .. }
            | JourneyStep::Vehicle { time, .. } => *time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Journey {
    pub steps: Vec<JourneyStep>,
}

impl Journey {
    pub fn arrival(&self) -> Option<Timestamp> {
        self.steps.last().map(JourneyStep::time)
    }

    pub fn departure(&self) -> Option<Timestamp> {
        self.steps.first().map(JourneyStep::time)
    }

    /// Number of vehicle legs.
    pub fn rides(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, JourneyStep::Vehicle { .. }))
            .count()
    }
}

/// The two journeys kept out of a scan result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JourneySelection {
    /// Earliest arrival.
    pub fastest: Journey,
    /// Fewest steps.
    pub shortest: Journey,
}

impl JourneySelection {
    /// Pick the fastest and the shortest journey; ties keep the first one seen.
    pub fn select(journeys: Vec<Journey>) -> Result<Self, ComputeError> {
        let mut fastest: Option<&Journey> = None;
        let mut shortest: Option<&Journey> = None;

        for journey in &journeys {
            let arrival = journey.arrival().unwrap_or(Timestamp::MAX);
            if fastest.map_or(true, |f| arrival < f.arrival().unwrap_or(Timestamp::MAX)) {
                fastest = Some(journey);
            }
            if shortest.map_or(true, |s| journey.steps.len() < s.steps.len()) {
                shortest = Some(journey);
            }
        }

        match (fastest, shortest) {
            (Some(fastest), Some(shortest)) => Ok(Self {
                fastest: fastest.clone(),
                shortest: shortest.clone(),
            }),
            _ => Err(ComputeError::NoJourneyFound),
        }
    }

    pub fn journeys(&self) -> [&Journey; 2] {
        [&self.fastest, &self.shortest]
    }
}

/// Tunables of a journey scan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    /// Metres per second.
    pub walk_speed: f64,
    /// Longer transfers are not walked.
    pub max_transfer_length: f64,
    pub max_rounds: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self::from(&RoutingSection::default())
    }
}

impl From<&RoutingSection> for RunSettings {
    fn from(section: &RoutingSection) -> Self {
        Self {
            walk_speed: section.walk_speed,
            max_transfer_length: section.max_transfer_length,
            max_rounds: section.max_rounds,
        }
    }
}

impl RunSettings {
    /// Walking duration of `length` metres, in milliseconds.
    pub fn walk_duration(&self, length: f64) -> Timestamp {
        let ms = (length / self.walk_speed * 1_000.0).round();
        if ms.is_finite() && ms < Timestamp::MAX as f64 {
            ms as Timestamp
        } else {
            Timestamp::MAX
        }
    }
}

/// Partial settings carried by a request, merged onto the defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSettingsOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub walk_speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_transfer_length: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rounds: Option<usize>,
}

impl RunSettingsOverride {
    /// Non-positive walking speeds are ignored.
    pub fn apply(&self, base: RunSettings) -> RunSettings {
        RunSettings {
            walk_speed: self.walk_speed.filter(|s| *s > 0.0).unwrap_or(base.walk_speed),
            max_transfer_length: self.max_transfer_length.unwrap_or(base.max_transfer_length),
            max_rounds: self.max_rounds.unwrap_or(base.max_rounds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn journey(steps: usize, arrival: Timestamp) -> Journey {
        let mut out = vec![JourneyStep::Departure { at: 1, time: 0 }];
        for i in 1..steps {
            let time = if i + 1 == steps { arrival } else { i as Timestamp };
            out.push(JourneyStep::Foot { from: 1, to: 2, length: 1.0, time });
        }
        Journey { steps: out }
    }

    #[test]
    fn selects_fastest_and_fewest_steps() {
        let journeys = vec![journey(4, 100), journey(2, 300), journey(6, 50)];
        let sel = JourneySelection::select(journeys).unwrap();
        assert_eq!(sel.fastest.arrival(), Some(50));
        assert_eq!(sel.shortest.steps.len(), 2);
    }

    #[test]
    fn ties_keep_first_seen() {
        let journeys = vec![journey(3, 100), journey(3, 100)];
        let first = journeys[0].clone();
        let mut second = journeys[1].clone();
        second.steps[0] = JourneyStep::Departure { at: 9, time: 0 };
        let sel = JourneySelection::select(vec![first.clone(), second]).unwrap();
        assert_eq!(sel.fastest, first);
        assert_eq!(sel.shortest, first);
    }

    #[test]
    fn empty_result_is_no_journey() {
        assert!(matches!(
            JourneySelection::select(vec![]),
            Err(ComputeError::NoJourneyFound)
        ));
    }

    #[test]
    fn override_merges_onto_defaults() {
        let base = RunSettings::default();
        let o = RunSettingsOverride { walk_speed: Some(-1.0), max_rounds: Some(2), ..Default::default() };
        let merged = o.apply(base);
        assert_eq!(merged.walk_speed, base.walk_speed);
        assert_eq!(merged.max_rounds, 2);
        assert_eq!(merged.max_transfer_length, base.max_transfer_length);
        assert_eq!(merged.walk_duration(90.0), 90_000);
    }
}
