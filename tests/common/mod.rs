#![allow(dead_code)]

use anyhow::{anyhow, Result};
use segscope::backend::{
    Backend, JobStartOut, JobStatus, JobStatusOut, ResegmentOut, ResultsOut, StudyInfo, UploadOut,
};
use segscope::config::Config;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// In-memory backend answering from a script. `None` in an `Option<..>`
/// script slot means "fail in transport".
#[derive(Default)]
pub struct ScriptedBackend {
    pub upload: Option<UploadOut>,
    pub job_id: Option<String>,
    pub statuses: RefCell<VecDeque<JobStatus>>,
    pub results: Option<ResultsOut>,
    pub info: Option<StudyInfo>,
    pub resegment: Option<ResegmentOut>,
    /// Runs before each status response, with the 1-based check number.
    pub on_status: RefCell<Option<Box<dyn FnMut(u32)>>>,
    pub calls: RefCell<Vec<String>>,
    pub status_checks: RefCell<u32>,
}

impl ScriptedBackend {
    pub fn with_job(job_id: &str, statuses: &[JobStatus]) -> Self {
        Self {
            job_id: Some(job_id.to_string()),
            statuses: RefCell::new(statuses.iter().copied().collect()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls.borrow().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn log(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }
}

impl Backend for ScriptedBackend {
    fn upload(&self, files: &[PathBuf]) -> Result<UploadOut> {
        self.log(format!("upload {}", files.len()));
        self.upload.clone().ok_or_else(|| anyhow!("upload unreachable"))
    }

    fn start_segmentation(&self, study_id: &str) -> Result<JobStartOut> {
        self.log(format!("start {study_id}"));
        self.job_id
            .clone()
            .map(|job_id| JobStartOut { job_id })
            .ok_or_else(|| anyhow!("start unreachable"))
    }

    fn job_status(&self, job_id: &str) -> Result<JobStatusOut> {
        self.log(format!("status {job_id}"));
        let n = {
            let mut checks = self.status_checks.borrow_mut();
            *checks += 1;
            *checks
        };
        if let Some(hook) = self.on_status.borrow_mut().as_mut() {
            hook(n);
        }
        let status = self
            .statuses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("status script exhausted"))?;
        Ok(JobStatusOut {
            job_id: Some(job_id.to_string()),
            status,
        })
    }

    fn results(&self, job_id: &str) -> Result<ResultsOut> {
        self.log(format!("results {job_id}"));
        self.results.clone().ok_or_else(|| anyhow!("results unreachable"))
    }

    fn resegment(&self, study_id: &str, slices: &[u32]) -> Result<ResegmentOut> {
        self.log(format!("resegment {study_id} {slices:?}"));
        self.resegment.clone().ok_or_else(|| anyhow!("resegment unreachable"))
    }

    fn study_info(&self, study_id: &str) -> Result<StudyInfo> {
        self.log(format!("info {study_id}"));
        self.info.clone().ok_or_else(|| anyhow!("info unreachable"))
    }

    fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        self.log(format!("download {url}"));
        std::fs::write(dest, b"PK")?;
        Ok(2)
    }
}

pub fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.server.base_url = "http://api.test".into();
    cfg.polling.interval_ms = 0;
    cfg
}

pub fn upload_out(study_id: &str, n: usize) -> UploadOut {
    UploadOut {
        study_id: study_id.to_string(),
        files: (1..=n).map(|i| format!("IM{i:03}.dcm")).collect(),
    }
}
