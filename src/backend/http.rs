use super::{types::*, Backend};
use crate::{config::Config, util::now_millis};
use anyhow::{anyhow, Context, Result};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub struct HttpBackend {
    agent: ureq::Agent,
    base: String,
}

impl HttpBackend {
    pub fn new(cfg: &Config) -> Result<Self> {
        let base = cfg.server.base().to_string();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(anyhow!("server.base_url must be an http(s) URL: {base}"));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(cfg.server.timeout_seconds.max(1)))
            .build();
        Ok(Self { agent, base })
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn get_json<O: for<'de> serde::Deserialize<'de>>(&self, path: &str) -> Result<O> {
        let url = self.url(path);
        debug!("GET {url}");
        let resp = self
            .agent
            .get(&url)
            .call()
            .map_err(|e| anyhow!("GET {url}: {e}"))?;
        resp.into_json::<O>()
            .with_context(|| format!("decoding JSON from {url}"))
    }

    fn post_json<I: serde::Serialize, O: for<'de> serde::Deserialize<'de>>(
        &self,
        path: &str,
        body: &I,
    ) -> Result<O> {
        let url = self.url(path);
        debug!("POST {url}");
        let body = serde_json::to_value(body)?;
        let resp = self
            .agent
            .post(&url)
            .send_json(body)
            .map_err(|e| anyhow!("POST {url}: {e}"))?;
        resp.into_json::<O>()
            .with_context(|| format!("decoding JSON from {url}"))
    }
}

impl Backend for HttpBackend {
    fn upload(&self, files: &[PathBuf]) -> Result<UploadOut> {
        let mut parts = Vec::with_capacity(files.len());
        for path in files {
            let bytes = std::fs::read(path)
                .with_context(|| format!("reading upload: {}", path.display()))?;
            let name = path
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("upload.dcm")
                .to_string();
            parts.push((name, bytes));
        }

        let boundary = format!("----segscope{:x}", now_millis());
        let body = multipart_body(&boundary, "files", &parts);
        let url = self.url("/files/upload");
        debug!("POST {url} files={} bytes={}", parts.len(), body.len());
        let resp = self
            .agent
            .post(&url)
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={boundary}"),
            )
            .send_bytes(&body)
            .map_err(|e| anyhow!("POST {url}: {e}"))?;
        resp.into_json::<UploadOut>()
            .with_context(|| format!("decoding JSON from {url}"))
    }

    fn start_segmentation(&self, study_id: &str) -> Result<JobStartOut> {
        self.post_json(
            "/segment/start",
            &StartIn {
                study_id: study_id.to_string(),
            },
        )
    }

    fn job_status(&self, job_id: &str) -> Result<JobStatusOut> {
        self.get_json(&format!("/segment/{job_id}/status"))
    }

    fn results(&self, job_id: &str) -> Result<ResultsOut> {
        self.get_json(&format!("/results/{job_id}"))
    }

    fn resegment(&self, study_id: &str, slices: &[u32]) -> Result<ResegmentOut> {
        self.post_json(
            "/segment/resegment",
            &ResegmentIn {
                study_id: study_id.to_string(),
                slices: slices.to_vec(),
            },
        )
    }

    fn study_info(&self, study_id: &str) -> Result<StudyInfo> {
        self.get_json(&format!("/studies/{study_id}/info"))
    }

    fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        debug!("GET {url} -> {}", dest.display());
        let resp = self
            .agent
            .get(url)
            .call()
            .map_err(|e| anyhow!("GET {url}: {e}"))?;
        let partial = partial_path(dest);
        match write_stream(&mut resp.into_reader(), &partial) {
            Ok(written) => {
                std::fs::rename(&partial, dest)
                    .with_context(|| format!("rename {} -> {}", partial.display(), dest.display()))?;
                Ok(written)
            }
            Err(err) => {
                let _ = std::fs::remove_file(&partial);
                Err(err)
            }
        }
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

fn write_stream(reader: &mut dyn Read, path: &Path) -> Result<u64> {
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("create download file: {}", path.display()))?;
    let written =
        std::io::copy(reader, &mut file).with_context(|| format!("writing {}", path.display()))?;
    file.flush()?;
    Ok(written)
}

pub fn multipart_body(boundary: &str, field: &str, parts: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, bytes) in parts {
        let name = name.replace('"', "%22");
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{name}\"\r\n")
                .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/dicom\r\n\r\n");
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}
