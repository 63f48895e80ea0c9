use crate::{
    backend::Backend,
    config::Config,
    export::{download_export, effective_prefix, ExportKind, ExportOut},
    poller::{JobOutcome, SegmentationJobPoller},
    predictions::TumorIndexSet,
    selection::SliceBrowser,
    state::{ResultsPatch, SharedStudyState, StudyEvent, StudyRecord},
    util::{collect_input_files, now_millis},
};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// The one error shown for a failed metadata refresh.
pub const METADATA_FETCH_FAILED: &str = "Failed to fetch results";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResegmentOutcome {
    Skipped,
    Applied {
        slices: Vec<u32>,
        updated_slices: Vec<u32>,
        results_merged: bool,
    },
    Aborted {
        reason: String,
    },
}

pub struct Session<B: Backend> {
    cfg: Config,
    backend: B,
    store: SharedStudyState,
}

impl<B: Backend> Session<B> {
    pub fn new(cfg: &Config, backend: B) -> Self {
        Self::with_store(cfg, backend, SharedStudyState::new())
    }

    pub fn with_store(cfg: &Config, backend: B, store: SharedStudyState) -> Self {
        Self {
            cfg: cfg.clone(),
            backend,
            store,
        }
    }

    pub fn store(&self) -> &SharedStudyState {
        &self.store
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// `None` when no file matched.
    pub fn upload(&self, inputs: &[PathBuf]) -> Result<Option<StudyRecord>> {
        let files = collect_input_files(inputs, &self.cfg.upload.extensions)?;
        if files.is_empty() {
            warn!(
                "no input files with extensions {:?}; nothing uploaded",
                self.cfg.upload.extensions
            );
            return Ok(None);
        }

        info!("uploading {} files", files.len());
        let out = self.backend.upload(&files).context("uploading study")?;
        let record = StudyRecord::seeded(self.cfg.server.base(), &out.study_id, out.files);
        info!(
            "study {} uploaded with {} slices",
            record.study_id,
            record.slice_count()
        );
        self.store.dispatch(StudyEvent::Uploaded {
            record: record.clone(),
        });
        Ok(Some(record))
    }

    pub fn run_segmentation(&self) -> JobOutcome {
        let interval = Duration::from_millis(self.cfg.polling.interval_ms);
        SegmentationJobPoller::new(&self.backend, self.store.clone(), interval).run()
    }

    pub fn browser(&self) -> Option<SliceBrowser> {
        self.store.record().map(|r| SliceBrowser::from_record(&r))
    }

    pub fn resegment(&self, selection: &TumorIndexSet) -> ResegmentOutcome {
        let Some(study_id) = self.store.study_id() else {
            return ResegmentOutcome::Skipped;
        };
        if selection.is_empty() {
            info!("empty selection; nothing to resegment");
            return ResegmentOutcome::Skipped;
        }
        if !self.store.dispatch(StudyEvent::JobRequested) {
            info!("segmentation already in flight for study {study_id}");
            return ResegmentOutcome::Skipped;
        }

        let slices = selection.to_slice_numbers();
        info!("resegmenting {} slices of study {study_id}", slices.len());
        let out = match self.backend.resegment(&study_id, &slices) {
            Ok(out) => out,
            Err(err) => {
                warn!("resegment failed: {:#}", err);
                self.store.dispatch(StudyEvent::JobAborted { job_id: None });
                return ResegmentOutcome::Aborted {
                    reason: format!("{:#}", err),
                };
            }
        };

        self.store.dispatch(StudyEvent::ResegmentApplied {
            token: now_millis(),
        });

        let results_merged = match self.store.last_job_id() {
            Some(job_id) => match self.backend.results(&job_id) {
                Ok(doc) => self.store.dispatch(StudyEvent::ResultsFetched {
                    job_id,
                    patch: ResultsPatch::from_job_results(&doc),
                }),
                Err(err) => {
                    warn!("results refresh after resegment failed: {:#}", err);
                    false
                }
            },
            None => false,
        };

        ResegmentOutcome::Applied {
            slices,
            updated_slices: out.updated_slices,
            results_merged,
        }
    }

    /// Failures collapse into [`METADATA_FETCH_FAILED`].
    pub fn refresh_info(&self) -> Result<()> {
        let Some(study_id) = self.store.study_id() else {
            return Ok(());
        };
        self.fetch_info(&study_id).map_err(|err| {
            warn!("metadata refresh failed: {:#}", err);
            anyhow!(METADATA_FETCH_FAILED)
        })
    }

    fn fetch_info(&self, study_id: &str) -> Result<()> {
        let info = self
            .backend
            .study_info(study_id)
            .with_context(|| format!("fetching info for study {study_id}"))?;
        self.store.dispatch(StudyEvent::MetadataFetched {
            study_id: study_id.to_string(),
            info,
        });

        if let Some(job_id) = self.store.last_job_id() {
            let doc = self
                .backend
                .results(&job_id)
                .with_context(|| format!("fetching results for job {job_id}"))?;
            self.store.dispatch(StudyEvent::ResultsFetched {
                job_id,
                patch: ResultsPatch::volume_only(&doc),
            });
        }
        Ok(())
    }

    pub fn export(&self, kind: ExportKind, prefix: Option<&str>, out_dir: &Path) -> Result<ExportOut> {
        let record = self
            .store
            .record()
            .ok_or_else(|| anyhow!("no study loaded; upload first"))?;
        if kind.requires_masks() && !record.masks_ready {
            return Err(anyhow!(
                "{} export needs a completed segmentation",
                kind.file_name()
            ));
        }

        let explicit = prefix.or(Some(self.cfg.export.prefix.as_str()));
        let needs_default = explicit.is_none_or(|p| p.trim().is_empty());
        if needs_default && record.info.is_empty() {
            if let Err(err) = self.fetch_info(&record.study_id) {
                warn!("metadata for default prefix unavailable: {:#}", err);
            }
        }
        let info = self
            .store
            .record()
            .map(|r| r.info)
            .unwrap_or_default();
        let prefix = effective_prefix(explicit, &info);

        download_export(
            &self.backend,
            self.cfg.server.base(),
            &record.study_id,
            kind,
            &prefix,
            out_dir,
        )
    }
}
