use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type JobId = Uuid;

/// Closed set of job types handled by the compute workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JobKind {
    /// Journey computation between two locations.
    #[serde(rename = "compute")]
    Compute,
    /// One-to-one walking path.
    #[serde(rename = "computeFp")]
    ComputeFp,
    /// One-to-all walking distances to network stops.
    #[serde(rename = "computeFpOTA")]
    ComputeFpOta,
    /// Recomputation of every stop-to-stop walking route.
    #[serde(rename = "computeNSR")]
    ComputeNsr,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::Compute,
        JobKind::ComputeFp,
        JobKind::ComputeFpOta,
        JobKind::ComputeNsr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Compute => "compute",
            JobKind::ComputeFp => "computeFp",
            JobKind::ComputeFpOta => "computeFpOTA",
            JobKind::ComputeNsr => "computeNSR",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown job kind: {}", s))
    }
}

/// Compile-time binding of a job kind to its input and output types.
///
/// Payloads cross the broker as JSON; producers and processors go through
/// the contract so both sides agree on the shape.
pub trait JobContract {
    const KIND: JobKind;
    type Input: Serialize + DeserializeOwned + Send;
    type Output: Serialize + DeserializeOwned + Send;

    fn encode_input(input: &Self::Input) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(input)
    }

    fn decode_input(data: &serde_json::Value) -> Result<Self::Input, serde_json::Error> {
        Self::Input::deserialize(data)
    }

    fn encode_output(output: &Self::Output) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(output)
    }

    fn decode_output(value: &serde_json::Value) -> Result<Self::Output, serde_json::Error> {
        Self::Output::deserialize(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobOptions {
    /// A failure of this job fails its parent immediately.
    pub fail_parent_on_failure: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Blocked until every child reached a terminal state.
    WaitingChildren,
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::WaitingChildren => "waiting-children",
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub data: serde_json::Value,
    pub opts: JobOptions,
    pub parent: Option<JobId>,
    pub state: JobState,
    /// Times the job was claimed by a worker.
    pub attempts_started: u32,
    pub stalled_count: u32,
    pub return_value: Option<serde_json::Value>,
    pub failed_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A job claimed by a worker. Completion must present the same token.
#[derive(Debug, Clone)]
pub struct ActiveJob {
    pub id: JobId,
    pub kind: JobKind,
    pub data: serde_json::Value,
    pub token: Uuid,
    pub attempt: u32,
}

impl ActiveJob {
    pub fn input<C: JobContract>(&self) -> Result<C::Input, serde_json::Error> {
        C::decode_input(&self.data)
    }
}

/// Return value of a completed child job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildValue {
    pub id: JobId,
    pub kind: JobKind,
    pub value: serde_json::Value,
}

impl ChildValue {
    pub fn decode<C: JobContract>(&self) -> Option<Result<C::Output, serde_json::Error>> {
        (self.kind == C::KIND).then(|| C::decode_output(&self.value))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(serde_json::Value),
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl JobContract for Echo {
        const KIND: JobKind = JobKind::ComputeFp;
        type Input = (u32, String);
        type Output = u32;
    }

    #[test]
    fn kind_names_round_trip() {
        for kind in JobKind::ALL {
            assert_eq!(kind.as_str().parse::<JobKind>().unwrap(), kind);
            assert_eq!(serde_json::to_value(kind).unwrap(), kind.as_str());
        }
        assert!("computeEverything".parse::<JobKind>().is_err());
    }

    #[test]
    fn contract_decodes_payloads() {
        let data = Echo::encode_input(&(3, "x".into())).unwrap();
        let job = ActiveJob {
            id: Uuid::new_v4(),
            kind: JobKind::ComputeFp,
            data,
            token: Uuid::new_v4(),
            attempt: 1,
        };
        assert_eq!(job.input::<Echo>().unwrap(), (3, "x".to_string()));

        let child = ChildValue { id: job.id, kind: JobKind::ComputeFp, value: serde_json::json!(9) };
        assert_eq!(child.decode::<Echo>().unwrap().unwrap(), 9);

        let other = ChildValue { kind: JobKind::Compute, ..child };
        assert!(other.decode::<Echo>().is_none());
    }
}
