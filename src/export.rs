use crate::{backend::Backend, backend::StudyInfo};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::info;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ExportKind {
    Pngs,
    ImagesNpz,
    Masks,
    MasksNpz,
    MasksMat,
    Overlays,
    VolumesXlsx,
}

impl ExportKind {
    pub const ALL: [ExportKind; 7] = [
        Self::Pngs,
        Self::ImagesNpz,
        Self::Masks,
        Self::MasksNpz,
        Self::MasksMat,
        Self::Overlays,
        Self::VolumesXlsx,
    ];

    pub fn requires_masks(self) -> bool {
        !matches!(self, Self::Pngs | Self::ImagesNpz)
    }

    pub fn file_name(self) -> &'static str {
        match self {
            Self::Pngs => "images.zip",
            Self::ImagesNpz => "images.npz",
            Self::Masks => "masks.zip",
            Self::MasksNpz => "masks.npz",
            Self::MasksMat => "masks.mat",
            Self::Overlays => "overlays.zip",
            Self::VolumesXlsx => "volumes.xlsx",
        }
    }

    pub fn url(self, base: &str, study_id: &str, prefix: &str) -> Result<String> {
        let (path, params): (&str, Vec<(&str, &str)>) = match self {
            Self::Pngs => ("images.zip", vec![("kind", "pngs")]),
            Self::Masks => ("images.zip", vec![("kind", "masks")]),
            Self::Overlays => ("images.zip", vec![("kind", "overlays")]),
            Self::ImagesNpz => ("images.npz", vec![]),
            Self::MasksNpz => ("masks", vec![("format", "npz")]),
            Self::MasksMat => ("masks", vec![("format", "mat")]),
            Self::VolumesXlsx => ("volumes.xlsx", vec![]),
        };
        let raw = format!("{}/export/{}/{}", base.trim_end_matches('/'), study_id, path);
        let mut url = Url::parse(&raw).with_context(|| format!("invalid export url: {raw}"))?;
        {
            let mut query = url.query_pairs_mut();
            for (k, v) in params {
                query.append_pair(k, v);
            }
            if !prefix.is_empty() {
                query.append_pair("prefix", prefix);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }
        Ok(url.into())
    }

    pub fn download_name(self, prefix: &str) -> String {
        if prefix.is_empty() {
            self.file_name().to_string()
        } else {
            format!("{}_{}", prefix, self.file_name())
        }
    }
}

/// `{study_date}_{patient_id}`, skipping missing or empty parts.
pub fn default_prefix(info: &StudyInfo) -> String {
    ["study_date", "patient_id"]
        .iter()
        .filter_map(|k| match info.get(*k) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("_")
}

pub fn effective_prefix(explicit: Option<&str>, info: &StudyInfo) -> String {
    match explicit.map(str::trim) {
        Some(p) if !p.is_empty() => p.to_string(),
        _ => default_prefix(info),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportOut {
    pub kind: ExportKind,
    pub url: String,
    pub path: PathBuf,
    pub bytes: u64,
}

pub fn download_export(
    backend: &dyn Backend,
    base: &str,
    study_id: &str,
    kind: ExportKind,
    prefix: &str,
    out_dir: &Path,
) -> Result<ExportOut> {
    crate::util::ensure_dir(out_dir)?;
    let url = kind.url(base, study_id, prefix)?;
    let path = out_dir.join(kind.download_name(prefix));
    let bytes = backend
        .download(&url, &path)
        .with_context(|| format!("downloading {}", kind.file_name()))?;
    info!("exported {} ({} bytes) to {}", kind.file_name(), bytes, path.display());
    Ok(ExportOut {
        kind,
        url,
        path,
        bytes,
    })
}
