use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadOut {
    pub study_id: String,
    #[serde(default)]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartIn {
    pub study_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStartOut {
    pub job_id: String,
}

/// Job state as reported by the backend. Anything other than `done` or
/// `error` (the backend also reports `running`) counts as pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Done,
    Error,
    #[serde(other)]
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusOut {
    #[serde(default)]
    pub job_id: Option<String>,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultsOut {
    #[serde(default)]
    pub total_volume_cc: Option<f64>,
    #[serde(default)]
    pub pixel_spacing_mm: Option<Value>,
    #[serde(default)]
    pub slice_thickness_mm: Option<Value>,
    #[serde(default)]
    pub slice_areas_cc: Option<Vec<Value>>,
    #[serde(default)]
    pub classifier_results: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResegmentIn {
    pub study_id: String,
    pub slices: Vec<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResegmentOut {
    #[serde(default)]
    pub study_id: Option<String>,
    #[serde(default)]
    pub updated_slices: Vec<u32>,
}

pub type StudyInfo = BTreeMap<String, Value>;
