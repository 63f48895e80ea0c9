use crate::{
    backend::{http::HttpBackend, Backend},
    config::Config,
    export::{download_export, effective_prefix, ExportKind},
    report::{RunReport, StudyReport},
    selection::derive_selection,
    session::Session,
    util::{ensure_dir, now_rfc3339},
};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "segscope")]
#[command(about = "Client for a DICOM tumor segmentation service (upload, segment, slices, export)")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./segscope.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override the backend base URL.
    #[arg(long)]
    pub base_url: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Upload a study, segment it, and report the slice selection.
    Run {
        /// DICOM files or directories containing them.
        #[arg(long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,
        /// Resegment the default selection after the job finishes.
        #[arg(long)]
        resegment: bool,
        #[arg(long, value_enum)]
        export: Vec<ExportKind>,
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Normalize a prediction payload offline.
    Slices {
        #[arg(long)]
        predictions: PathBuf,
        #[arg(long)]
        slice_count: usize,
    },
    /// Query a job's status once.
    Status {
        #[arg(long)]
        job: String,
    },
    /// Fetch a study's metadata.
    Info {
        #[arg(long)]
        study: String,
    },
    /// Download exports of an existing study.
    Export {
        #[arg(long)]
        study: String,
        #[arg(long, value_enum, required = true, num_args = 1..)]
        kind: Vec<ExportKind>,
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg_path = resolve_config_path(args.config.as_deref());
    let cfg = Config::load_or_default(&cfg_path)?.with_base_url_override(args.base_url.as_deref());
    let _guard = init_logging(&args, &cfg)?;

    match &args.cmd {
        Command::Run {
            input,
            resegment,
            export,
            prefix,
            out_dir,
        } => run(
            &cfg,
            input,
            *resegment,
            export,
            prefix.as_deref(),
            out_dir.as_deref(),
        ),
        Command::Slices {
            predictions,
            slice_count,
        } => slices(predictions, *slice_count),
        Command::Status { job } => status(&cfg, job),
        Command::Info { study } => study_info(&cfg, study),
        Command::Export {
            study,
            kind,
            prefix,
            out_dir,
        } => export(&cfg, study, kind, prefix.as_deref(), out_dir.as_deref()),
    }
}

fn resolve_config_path(user: Option<&Path>) -> PathBuf {
    if let Some(p) = user {
        return p.to_path_buf();
    }
    let default = PathBuf::from("segscope.toml");
    if default.exists() {
        default
    } else {
        PathBuf::from("segscope.example.toml")
    }
}

fn init_logging(args: &Args, cfg: &Config) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries the JSON reports; logs go to stderr.
    let stderr_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = match resolve_log_path(cfg) {
        Some(path) => {
            let parent = path.parent().unwrap_or_else(|| Path::new("."));
            ensure_dir(parent)?;
            let file = std::fs::File::create(&path)
                .with_context(|| format!("create log file: {}", path.display()))?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }
    Some(PathBuf::from(&cfg.export.out_dir).join("segscope.log"))
}

fn run(
    cfg: &Config,
    inputs: &[PathBuf],
    resegment: bool,
    exports: &[ExportKind],
    prefix: Option<&str>,
    out_override: Option<&Path>,
) -> Result<()> {
    let started = now_rfc3339();
    let backend = HttpBackend::new(cfg)?;
    let session = Session::new(cfg, backend);

    if session.upload(inputs)?.is_none() {
        return Err(anyhow!("no uploadable files under the given inputs"));
    }

    let job = session.run_segmentation();
    info!(?job, "segmentation finished");

    let info_error = session.refresh_info().err().map(|e| e.to_string());

    let resegment = if resegment {
        let selected = session
            .browser()
            .map(|b| b.selected().clone())
            .unwrap_or_default();
        Some(session.resegment(&selected))
    } else {
        None
    };

    let out_dir = out_override
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&cfg.export.out_dir));
    let mut done = Vec::new();
    let mut export_errors = Vec::new();
    for kind in exports {
        match session.export(*kind, prefix, &out_dir) {
            Ok(out) => done.push(out),
            Err(err) => {
                warn!("export {:?} skipped: {:#}", kind, err);
                export_errors.push(format!("{}: {:#}", kind.file_name(), err));
            }
        }
    }

    let report = RunReport {
        started,
        finished: now_rfc3339(),
        study: StudyReport::from_state(&session.store().snapshot()),
        job: Some(job),
        info_error,
        resegment,
        exports: done,
        export_errors,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn slices(predictions: &Path, slice_count: usize) -> Result<()> {
    let raw = std::fs::read_to_string(predictions)
        .with_context(|| format!("reading predictions: {}", predictions.display()))?;
    let payload: serde_json::Value = serde_json::from_str(&raw).with_context(|| "parsing JSON")?;
    let derived = derive_selection(slice_count, Some(&payload));
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "slice_count": slice_count,
            "tumor_set": derived.tumor_set,
            "selected": derived.selected,
            "resegment_slices": derived.selected.to_slice_numbers(),
        }))?
    );
    Ok(())
}

fn status(cfg: &Config, job_id: &str) -> Result<()> {
    let backend = HttpBackend::new(cfg)?;
    let out = backend.job_status(job_id)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "job_id": job_id,
            "status": out.status,
        }))?
    );
    Ok(())
}

fn study_info(cfg: &Config, study_id: &str) -> Result<()> {
    let backend = HttpBackend::new(cfg)?;
    let info = backend.study_info(study_id)?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

fn export(
    cfg: &Config,
    study_id: &str,
    kinds: &[ExportKind],
    prefix: Option<&str>,
    out_override: Option<&Path>,
) -> Result<()> {
    let backend = HttpBackend::new(cfg)?;
    let explicit = prefix.or(Some(cfg.export.prefix.as_str()));
    let info = if explicit.is_none_or(|p| p.trim().is_empty()) {
        backend.study_info(study_id).unwrap_or_else(|err| {
            warn!("metadata for default prefix unavailable: {:#}", err);
            Default::default()
        })
    } else {
        Default::default()
    };
    let prefix = effective_prefix(explicit, &info);
    let out_dir = out_override
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&cfg.export.out_dir));

    let mut outs = Vec::new();
    for kind in kinds {
        outs.push(download_export(
            &backend,
            backend.base_url(),
            study_id,
            *kind,
            &prefix,
            &out_dir,
        )?);
    }
    println!("{}", serde_json::to_string_pretty(&outs)?);
    Ok(())
}
