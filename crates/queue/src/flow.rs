//! Job trees submitted atomically: a parent runs only once its children settled.

use serde::{Deserialize, Serialize};

use crate::job::{JobContract, JobId, JobKind, JobOptions};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowJob {
    pub kind: JobKind,
    pub data: serde_json::Value,
    #[serde(default)]
    pub opts: JobOptions,
    #[serde(default)]
    pub children: Vec<FlowJob>,
}

impl FlowJob {
    /// A leaf job typed by its contract.
    pub fn new<C: JobContract>(input: &C::Input) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind: C::KIND,
            data: C::encode_input(input)?,
            opts: JobOptions::default(),
            children: Vec::new(),
        })
    }

    pub fn with_child(mut self, child: FlowJob) -> Self {
        self.children.push(child);
        self
    }

    pub fn fail_parent_on_failure(mut self, fail: bool) -> Self {
        self.opts.fail_parent_on_failure = fail;
        self
    }

    /// Total number of jobs in the tree, this one included.
    pub fn job_count(&self) -> usize {
        1 + self.children.iter().map(FlowJob::job_count).sum::<usize>()
    }
}

/// Ids assigned to a submitted flow, mirroring its shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobNode {
    pub id: JobId,
    pub kind: JobKind,
    pub children: Vec<JobNode>,
}

impl JobNode {
    pub fn children_of_kind(&self, kind: JobKind) -> impl Iterator<Item = &JobNode> {
        self.children.iter().filter(move |c| c.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ping;

    impl JobContract for Ping {
        const KIND: JobKind = JobKind::ComputeFp;
        type Input = u8;
        type Output = ();
    }

    #[test]
    fn builder_counts_tree() {
        let flow = FlowJob::new::<Ping>(&1)
            .unwrap()
            .with_child(FlowJob::new::<Ping>(&2).unwrap().fail_parent_on_failure(true))
            .with_child(FlowJob::new::<Ping>(&3).unwrap());
        assert_eq!(flow.job_count(), 3);
        assert!(flow.children[0].opts.fail_parent_on_failure);
        assert!(!flow.children[1].opts.fail_parent_on_failure);
        assert_eq!(flow.children[1].data, serde_json::json!(3));
    }
}
