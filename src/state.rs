use crate::{
    backend::{ResultsOut, StudyInfo},
    predictions::coerce_number,
    urls::{cache_bust, image_url, overlay_url},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudyRecord {
    pub study_id: String,
    pub images: Vec<String>,
    pub images_with_masks: Vec<String>,
    pub file_names: Vec<String>,
    #[serde(default)]
    pub info: StudyInfo,
    #[serde(default)]
    pub last_job_id: Option<String>,
    #[serde(default)]
    pub masks_ready: bool,
    #[serde(default)]
    pub classifier_results: Option<Value>,
}

impl StudyRecord {
    pub fn seeded(base: &str, study_id: &str, file_names: Vec<String>) -> Self {
        let n = file_names.len();
        Self {
            study_id: study_id.to_string(),
            images: (1..=n).map(|i| image_url(base, study_id, i)).collect(),
            images_with_masks: (1..=n).map(|i| overlay_url(base, study_id, i)).collect(),
            file_names,
            ..Default::default()
        }
    }

    pub fn slice_count(&self) -> usize {
        self.images.len()
    }

    /// First non-null of `classifier_results`, `info.classifier_results`, `info.predictions`.
    pub fn predictions(&self) -> Option<&Value> {
        [
            self.classifier_results.as_ref(),
            self.info.get("classifier_results"),
            self.info.get("predictions"),
        ]
        .into_iter()
        .flatten()
        .find(|v| !v.is_null())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    #[default]
    Idle,
    Starting,
    Polling,
    Done,
    Error,
}

impl JobPhase {
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Starting | Self::Polling)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudyState {
    pub record: Option<StudyRecord>,
    pub phase: JobPhase,
    /// `last_job_id` from before the polled job started; restored if that job is abandoned.
    #[serde(default)]
    pub prior_job_id: Option<String>,
    /// Tokens only grow.
    pub last_bust_token: u64,
    pub revision: u64,
}

/// Fields produced by a results fetch. `None` means "not produced": the
/// previous value is kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultsPatch {
    pub total_volume: Option<f64>,
    pub pixel_spacing_mm: Option<Value>,
    pub slice_thickness_mm: Option<Value>,
    pub slice_areas_cc: Option<Vec<Value>>,
    pub classifier_results: Option<Value>,
}

impl ResultsPatch {
    /// Predictions fall back to "area > 0" per slice.
    pub fn from_job_results(doc: &ResultsOut) -> Self {
        let classifier_results = match &doc.classifier_results {
            Some(v @ Value::Array(_)) => Some(v.clone()),
            _ => doc.slice_areas_cc.as_ref().map(|areas| {
                Value::Array(
                    areas
                        .iter()
                        .map(|a| Value::Bool(coerce_number(a).is_some_and(|x| x > 0.0)))
                        .collect(),
                )
            }),
        };
        Self {
            total_volume: doc.total_volume_cc,
            pixel_spacing_mm: doc.pixel_spacing_mm.clone().filter(|v| !v.is_null()),
            slice_thickness_mm: doc.slice_thickness_mm.clone().filter(|v| !v.is_null()),
            slice_areas_cc: doc.slice_areas_cc.clone(),
            classifier_results,
        }
    }

    pub fn volume_only(doc: &ResultsOut) -> Self {
        Self {
            total_volume: doc.total_volume_cc,
            pixel_spacing_mm: doc.pixel_spacing_mm.clone().filter(|v| !v.is_null()),
            slice_thickness_mm: doc.slice_thickness_mm.clone().filter(|v| !v.is_null()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StudyEvent {
    Uploaded { record: StudyRecord },
    JobRequested,
    JobStarted { job_id: String },
    JobPolled { job_id: String },
    JobCompleted { job_id: String, token: u64 },
    JobFailed { job_id: String },
    JobAborted { job_id: Option<String> },
    JobCancelled,
    ResegmentApplied { token: u64 },
    ResultsFetched { job_id: String, patch: ResultsPatch },
    MetadataFetched { study_id: String, info: StudyInfo },
}

impl StudyEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::Uploaded { .. } => "uploaded",
            Self::JobRequested => "job_requested",
            Self::JobStarted { .. } => "job_started",
            Self::JobPolled { .. } => "job_polled",
            Self::JobCompleted { .. } => "job_completed",
            Self::JobFailed { .. } => "job_failed",
            Self::JobAborted { .. } => "job_aborted",
            Self::JobCancelled => "job_cancelled",
            Self::ResegmentApplied { .. } => "resegment_applied",
            Self::ResultsFetched { .. } => "results_fetched",
            Self::MetadataFetched { .. } => "metadata_fetched",
        }
    }
}

pub fn reduce(state: &StudyState, event: &StudyEvent) -> StudyState {
    transition(state, event).unwrap_or_else(|| state.clone())
}

pub fn transition(state: &StudyState, event: &StudyEvent) -> Option<StudyState> {
    let mut next = state.clone();

    match event {
        StudyEvent::Uploaded { record } => {
            next.record = Some(record.clone());
            next.phase = JobPhase::Idle;
            next.prior_job_id = None;
        }
        StudyEvent::JobRequested => {
            if state.record.is_none() || state.phase.is_in_flight() {
                return None;
            }
            next.phase = JobPhase::Starting;
        }
        StudyEvent::JobStarted { job_id } => {
            if state.phase != JobPhase::Starting {
                return None;
            }
            let record = next.record.as_mut()?;
            next.prior_job_id = record.last_job_id.replace(job_id.clone());
            next.phase = JobPhase::Polling;
        }
        StudyEvent::JobPolled { job_id } => {
            if !is_polling(state, job_id) {
                return None;
            }
        }
        StudyEvent::JobCompleted { job_id, token } => {
            if !is_polling(state, job_id) {
                return None;
            }
            let token = next_token(state, *token);
            let record = next.record.as_mut()?;
            bust_overlays(record, token);
            record.masks_ready = true;
            next.last_bust_token = token;
            next.prior_job_id = None;
            next.phase = JobPhase::Done;
        }
        StudyEvent::JobFailed { job_id } => {
            if !is_polling(state, job_id) {
                return None;
            }
            next.prior_job_id = None;
            next.phase = JobPhase::Error;
        }
        StudyEvent::JobAborted { job_id } => {
            let current = match job_id {
                Some(id) => is_polling(state, id),
                None => state.phase == JobPhase::Starting,
            };
            if !current {
                return None;
            }
            abandon_job(&mut next);
        }
        StudyEvent::JobCancelled => {
            if !state.phase.is_in_flight() {
                return None;
            }
            abandon_job(&mut next);
        }
        StudyEvent::ResegmentApplied { token } => {
            if state.phase != JobPhase::Starting {
                return None;
            }
            let token = next_token(state, *token);
            let record = next.record.as_mut()?;
            bust_overlays(record, token);
            next.last_bust_token = token;
            next.phase = JobPhase::Done;
        }
        StudyEvent::ResultsFetched { job_id, patch } => {
            let record = next.record.as_mut()?;
            if record.last_job_id.as_deref() != Some(job_id.as_str()) {
                return None;
            }
            merge_results(record, patch);
        }
        StudyEvent::MetadataFetched { study_id, info } => {
            let record = next.record.as_mut()?;
            if &record.study_id != study_id {
                return None;
            }
            for (k, v) in info {
                record.info.insert(k.clone(), v.clone());
            }
        }
    }

    next.revision = state.revision + 1;
    Some(next)
}

fn is_polling(state: &StudyState, job_id: &str) -> bool {
    state.phase == JobPhase::Polling
        && state
            .record
            .as_ref()
            .and_then(|r| r.last_job_id.as_deref())
            == Some(job_id)
}

fn abandon_job(next: &mut StudyState) {
    if next.phase == JobPhase::Polling {
        let prior = next.prior_job_id.take();
        if let Some(record) = next.record.as_mut() {
            record.last_job_id = prior;
        }
    }
    next.phase = JobPhase::Idle;
}

fn next_token(state: &StudyState, proposed: u64) -> u64 {
    proposed.max(state.last_bust_token.saturating_add(1))
}

fn bust_overlays(record: &mut StudyRecord, token: u64) {
    for url in record.images_with_masks.iter_mut() {
        *url = cache_bust(url, token);
    }
}

fn merge_results(record: &mut StudyRecord, patch: &ResultsPatch) {
    if let Some(v) = &patch.classifier_results {
        record.classifier_results = Some(v.clone());
    }
    if let Some(v) = patch.total_volume {
        record.info.insert("total_volume".into(), Value::from(v));
    }
    if let Some(v) = &patch.pixel_spacing_mm {
        record.info.insert("pixel_spacing_mm".into(), v.clone());
    }
    if let Some(v) = &patch.slice_thickness_mm {
        record.info.insert("slice_thickness_mm".into(), v.clone());
    }
    if let Some(v) = &patch.slice_areas_cc {
        record
            .info
            .insert("slice_areas_cc".into(), Value::Array(v.clone()));
    }
}

#[derive(Debug, Clone, Default)]
pub struct SharedStudyState {
    inner: Arc<Mutex<StudyState>>,
}

impl SharedStudyState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: StudyState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StudyState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Applies `event`; returns whether it was accepted.
    pub fn dispatch(&self, event: StudyEvent) -> bool {
        let mut guard = self.lock();
        match transition(&guard, &event) {
            Some(next) => {
                *guard = next;
                debug!(event = event.name(), revision = guard.revision, "state event applied");
                true
            }
            None => {
                info!(event = event.name(), phase = ?guard.phase, "state event rejected");
                false
            }
        }
    }

    pub fn snapshot(&self) -> StudyState {
        self.lock().clone()
    }

    pub fn record(&self) -> Option<StudyRecord> {
        self.lock().record.clone()
    }

    pub fn phase(&self) -> JobPhase {
        self.lock().phase
    }

    pub fn study_id(&self) -> Option<String> {
        self.lock().record.as_ref().map(|r| r.study_id.clone())
    }

    pub fn last_job_id(&self) -> Option<String> {
        self.lock()
            .record
            .as_ref()
            .and_then(|r| r.last_job_id.clone())
    }

    pub fn is_polling(&self, job_id: &str) -> bool {
        is_polling(&self.lock(), job_id)
    }
}
