//! Decomposition of journey requests into job flows.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use wayfarer_core::{Location, ResultId, Timestamp};
use wayfarer_queue::{FlowJob, JobContract, JobId, JobNode, JobOutcome, JobQueue, STALLED_REASON};

use crate::error::ComputeError;
use crate::jobs::{
    ComputeFpJob, ComputeFpOtaJob, ComputeInput, ComputeJob, ComputeNsrJob, FootPathInput, NsrInput,
    OneToAllInput, OneToAllOptions, SOURCE_ALIAS, TARGET_ALIAS,
};
use crate::raptor::RunSettingsOverride;

pub struct JobOrchestrator {
    queue: Arc<dyn JobQueue>,
}

impl JobOrchestrator {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    /// Flow of a journey request.
    ///
    /// Address endpoints get a one-to-all child the parent cannot run
    /// without; two addresses also get a best-effort direct walk.
    pub fn journey_flow(
        from: Location,
        to: Location,
        departure_time: Timestamp,
        settings: RunSettingsOverride,
    ) -> Result<FlowJob, ComputeError> {
        let mut flow = FlowJob::new::<ComputeJob>(&ComputeInput { from, to, departure_time, settings })?;

        for (location, alias) in [(from, SOURCE_ALIAS), (to, TARGET_ALIAS)] {
            if let Location::Address { coords, .. } = location {
                let input = OneToAllInput {
                    from: coords,
                    alias: Some(alias.to_string()),
                    options: OneToAllOptions { max_dist: None, target_ptn: true },
                };
                flow = flow.with_child(FlowJob::new::<ComputeFpOtaJob>(&input)?.fail_parent_on_failure(true));
            }
        }

        if from.is_address() && to.is_address() {
            let input = FootPathInput { from: from.coords(), to: to.coords() };
            flow = flow.with_child(FlowJob::new::<ComputeFpJob>(&input)?.fail_parent_on_failure(false));
        }

        Ok(flow)
    }

    pub async fn submit(
        &self,
        from: Location,
        to: Location,
        departure_time: Timestamp,
        settings: RunSettingsOverride,
    ) -> Result<JobNode, ComputeError> {
        let flow = Self::journey_flow(from, to, departure_time, settings)?;
        let jobs = flow.job_count();
        let node = self.queue.add_flow(flow).await?;
        info!(job = %node.id, %from, %to, jobs, "journey flow submitted");
        Ok(node)
    }

    pub async fn submit_non_scheduled_routes(&self, input: NsrInput) -> Result<JobNode, ComputeError> {
        let node = self.queue.add_flow(FlowJob::new::<ComputeNsrJob>(&input)?).await?;
        info!(job = %node.id, "non-scheduled route recomputation submitted");
        Ok(node)
    }

    /// Wait for a `compute` job and return the id of its persisted result.
    pub async fn result_of(&self, id: JobId, timeout: Duration) -> Result<ResultId, ComputeError> {
        self.output_of::<ComputeJob>(id, timeout).await
    }

    /// Wait for any job and decode its output through its contract.
    pub async fn output_of<C: JobContract>(&self, id: JobId, timeout: Duration) -> Result<C::Output, ComputeError> {
        match self.queue.wait_until_finished(id, timeout).await? {
            JobOutcome::Completed(value) => Ok(C::decode_output(&value)?),
            JobOutcome::Failed(reason) if reason == STALLED_REASON => {
                Err(ComputeError::StalledJob(id.to_string()))
            }
            JobOutcome::Failed(reason) => Err(ComputeError::JobFailed { id: id.to_string(), reason }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayfarer_core::Coords;
    use wayfarer_queue::{BrokerSettings, JobKind, MemoryQueue};

    fn stop(id: u64) -> Location {
        Location::Stop { id, coords: Coords::new(id as f64, 0.0) }
    }

    fn address(id: u64) -> Location {
        Location::Address { id, coords: Coords::new(0.0, id as f64) }
    }

    fn flow(from: Location, to: Location) -> FlowJob {
        JobOrchestrator::journey_flow(from, to, 0, RunSettingsOverride::default()).unwrap()
    }

    fn count(flow: &FlowJob, kind: JobKind) -> usize {
        flow.children.iter().filter(|c| c.kind == kind).count()
    }

    #[test]
    fn stops_only_have_no_children() {
        let f = flow(stop(1), stop(2));
        assert_eq!(f.kind, JobKind::Compute);
        assert!(f.children.is_empty());
    }

    #[test]
    fn address_source_gets_one_critical_one_to_all() {
        let f = flow(address(1), stop(2));
        assert_eq!(count(&f, JobKind::ComputeFpOta), 1);
        assert_eq!(count(&f, JobKind::ComputeFp), 0);

        let child = &f.children[0];
        assert!(child.opts.fail_parent_on_failure);
        let input = ComputeFpOtaJob::decode_input(&child.data).unwrap();
        assert_eq!(input.alias.as_deref(), Some(SOURCE_ALIAS));
        assert!(input.options.target_ptn);
        assert_eq!(input.from, address(1).coords());
    }

    #[test]
    fn address_target_is_aliased_pt() {
        let f = flow(stop(1), address(2));
        let input = ComputeFpOtaJob::decode_input(&f.children[0].data).unwrap();
        assert_eq!(input.alias.as_deref(), Some(TARGET_ALIAS));
    }

    #[test]
    fn two_addresses_add_a_best_effort_direct_walk() {
        let f = flow(address(1), address(2));
        assert_eq!(count(&f, JobKind::ComputeFpOta), 2);
        assert_eq!(count(&f, JobKind::ComputeFp), 1);

        let direct = f.children.iter().find(|c| c.kind == JobKind::ComputeFp).unwrap();
        assert!(!direct.opts.fail_parent_on_failure);
        assert_eq!(f.job_count(), 4);
    }

    #[tokio::test]
    async fn submitted_flow_mirrors_its_shape() {
        let queue = Arc::new(MemoryQueue::new(BrokerSettings::default()));
        let orchestrator = JobOrchestrator::new(queue.clone());
        let node = orchestrator
            .submit(address(1), stop(2), 0, RunSettingsOverride::default())
            .await
            .unwrap();

        assert_eq!(node.children_of_kind(JobKind::ComputeFpOta).count(), 1);
        let parent = queue.job(node.id).await.unwrap();
        assert_eq!(parent.state, wayfarer_queue::JobState::WaitingChildren);
    }
}
