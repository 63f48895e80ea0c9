pub mod http;
pub mod types;

use anyhow::Result;
use std::path::{Path, PathBuf};

pub use types::{
    JobStartOut, JobStatus, JobStatusOut, ResegmentIn, ResegmentOut, ResultsOut, StartIn,
    StudyInfo, UploadOut,
};

/// The segmentation service. Every method is one request; any `Err` is a
/// transport failure (unreachable host, non-2xx status, undecodable body).
pub trait Backend {
    fn upload(&self, files: &[PathBuf]) -> Result<UploadOut>;
    fn start_segmentation(&self, study_id: &str) -> Result<JobStartOut>;
    fn job_status(&self, job_id: &str) -> Result<JobStatusOut>;
    fn results(&self, job_id: &str) -> Result<ResultsOut>;
    fn resegment(&self, study_id: &str, slices: &[u32]) -> Result<ResegmentOut>;
    fn study_info(&self, study_id: &str) -> Result<StudyInfo>;
    fn download(&self, url: &str, dest: &Path) -> Result<u64>;
}
