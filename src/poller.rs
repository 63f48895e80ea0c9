use crate::{
    backend::{Backend, JobStatus},
    state::{ResultsPatch, SharedStudyState, StudyEvent},
    util::now_millis,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Skipped,
    Done {
        job_id: String,
        polls: u32,
        results_merged: bool,
    },
    Failed {
        job_id: String,
        polls: u32,
    },
    Aborted {
        job_id: Option<String>,
        reason: String,
    },
    Superseded {
        job_id: String,
    },
}

/// Polls until `done` or `error` with no retry ceiling. Stops early only when
/// the job is fenced off in the shared state.
pub struct SegmentationJobPoller<'a, B: Backend> {
    backend: &'a B,
    store: SharedStudyState,
    interval: Duration,
}

impl<'a, B: Backend> SegmentationJobPoller<'a, B> {
    pub fn new(backend: &'a B, store: SharedStudyState, interval: Duration) -> Self {
        Self {
            backend,
            store,
            interval,
        }
    }

    pub fn run(&self) -> JobOutcome {
        let Some(study_id) = self.store.study_id() else {
            info!("no study loaded; segmentation not started");
            return JobOutcome::Skipped;
        };
        if !self.store.dispatch(StudyEvent::JobRequested) {
            info!("segmentation already in flight for study {study_id}");
            return JobOutcome::Skipped;
        }

        let mut job_id = None;
        match self.drive(&study_id, &mut job_id) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!("segmentation attempt aborted: {:#}", err);
                self.store.dispatch(StudyEvent::JobAborted {
                    job_id: job_id.clone(),
                });
                JobOutcome::Aborted {
                    job_id,
                    reason: format!("{:#}", err),
                }
            }
        }
    }

    fn drive(&self, study_id: &str, job_slot: &mut Option<String>) -> Result<JobOutcome> {
        let started = self
            .backend
            .start_segmentation(study_id)
            .context("starting segmentation")?;
        let job_id = started.job_id;
        *job_slot = Some(job_id.clone());

        if !self.store.dispatch(StudyEvent::JobStarted {
            job_id: job_id.clone(),
        }) {
            return Ok(self.superseded(job_id));
        }
        info!("segmentation job {job_id} started for study {study_id}");

        let mut polls = 0u32;
        loop {
            if !self.store.is_polling(&job_id) {
                return Ok(self.superseded(job_id));
            }

            let status = self
                .backend
                .job_status(&job_id)
                .with_context(|| format!("polling job {job_id}"))?;
            polls += 1;

            match status.status {
                JobStatus::Pending => {
                    if !self.store.dispatch(StudyEvent::JobPolled {
                        job_id: job_id.clone(),
                    }) {
                        return Ok(self.superseded(job_id));
                    }
                    debug!("job {job_id} pending after {polls} checks");
                    std::thread::sleep(self.interval);
                }
                JobStatus::Done => {
                    if !self.store.dispatch(StudyEvent::JobCompleted {
                        job_id: job_id.clone(),
                        token: now_millis(),
                    }) {
                        return Ok(self.superseded(job_id));
                    }
                    info!("job {job_id} done after {polls} checks");
                    let results_merged = self.merge_results(&job_id);
                    return Ok(JobOutcome::Done {
                        job_id,
                        polls,
                        results_merged,
                    });
                }
                JobStatus::Error => {
                    if !self.store.dispatch(StudyEvent::JobFailed {
                        job_id: job_id.clone(),
                    }) {
                        return Ok(self.superseded(job_id));
                    }
                    warn!("job {job_id} reported error after {polls} checks");
                    return Ok(JobOutcome::Failed { job_id, polls });
                }
            }
        }
    }

    fn merge_results(&self, job_id: &str) -> bool {
        match self.backend.results(job_id) {
            Ok(doc) => self.store.dispatch(StudyEvent::ResultsFetched {
                job_id: job_id.to_string(),
                patch: ResultsPatch::from_job_results(&doc),
            }),
            Err(err) => {
                warn!("results for job {job_id} unavailable: {:#}", err);
                false
            }
        }
    }

    fn superseded(&self, job_id: String) -> JobOutcome {
        info!("job {job_id} is no longer current; stopping");
        JobOutcome::Superseded { job_id }
    }
}
