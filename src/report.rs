use crate::{
    backend::StudyInfo,
    export::ExportOut,
    poller::JobOutcome,
    predictions::TumorIndexSet,
    selection::{SliceBrowser, SliceEntry},
    session::ResegmentOutcome,
    state::{JobPhase, StudyState},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub started: String,
    pub finished: String,
    pub study: Option<StudyReport>,
    pub job: Option<JobOutcome>,
    pub info_error: Option<String>,
    pub resegment: Option<ResegmentOutcome>,
    pub exports: Vec<ExportOut>,
    pub export_errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyReport {
    pub study_id: String,
    pub slice_count: usize,
    pub phase: JobPhase,
    pub last_job_id: Option<String>,
    pub masks_ready: bool,
    pub info: StudyInfo,
    pub tumor_set: TumorIndexSet,
    pub selected: TumorIndexSet,
    pub slices: Vec<SliceEntry>,
    pub overlays: Vec<String>,
}

impl StudyReport {
    pub fn from_state(state: &StudyState) -> Option<Self> {
        let record = state.record.as_ref()?;
        let browser = SliceBrowser::from_record(record);
        Some(Self {
            study_id: record.study_id.clone(),
            slice_count: record.slice_count(),
            phase: state.phase,
            last_job_id: record.last_job_id.clone(),
            masks_ready: record.masks_ready,
            info: record.info.clone(),
            tumor_set: browser.derived().tumor_set.clone(),
            selected: browser.selected().clone(),
            slices: browser.entries().to_vec(),
            overlays: record.images_with_masks.clone(),
        })
    }
}
