//! Batch orchestrator.
//!
//! Authorizes the media source, validates the output directory, resolves the
//! requested identifiers and dispatches each resolved item to the image or
//! video engine under a fixed concurrency cap. The cap exists because
//! unconstrained simultaneous decode/export sessions and filesystem writes
//! exhaust OS resources under large batches; new work is admitted only as a
//! prior item completes, never front-loaded.
//!
//! All mutable batch state (counters, message list) lives in the task running
//! [`BatchRunner::run`]; workers communicate only through `JoinSet` results,
//! and progress callbacks fire only from that task. Completion order is not
//! submission order and is not guaranteed.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{ConvertError, Result};
use crate::image::ImageConverter;
use crate::media::{Converted, MediaKind, MediaRef};
use crate::source::{Authorization, MediaSource};
use crate::video::VideoConverter;

/// Progress callback: monotonically increasing fraction plus one status line
/// per event.
pub type ProgressFn = Arc<dyn Fn(f64, &str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    Idle,
    Authorizing,
    ValidatingOutput,
    Fetching,
    Dispatching,
    Aggregating,
    Done,
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum simultaneous item conversions. Fixed, not adaptive.
    pub max_in_flight: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { max_in_flight: 6 }
    }
}

/// Per-item result, tagged with the item's identifier.
#[derive(Debug)]
pub struct ConversionOutcome {
    pub id: String,
    pub result: Result<Converted>,
}

/// Aggregate result of one batch. The summary line is always the first
/// message, followed by individual failure messages in completion order.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub messages: Vec<String>,
}

pub struct BatchRunner {
    source: Arc<dyn MediaSource>,
    images: ImageConverter,
    videos: VideoConverter,
    config: BatchConfig,
    progress: Option<ProgressFn>,
}

impl BatchRunner {
    pub fn new(
        source: Arc<dyn MediaSource>,
        images: ImageConverter,
        videos: VideoConverter,
    ) -> Self {
        Self {
            source,
            images,
            videos,
            config: BatchConfig::default(),
            progress: None,
        }
    }

    pub fn with_config(mut self, config: BatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Runs the whole batch. Batch-level precondition failures return `Err`;
    /// per-item failures are folded into the summary and never abort sibling
    /// items.
    pub async fn run(&self, ids: &[String], output_dir: &Path) -> Result<BatchSummary> {
        self.enter(BatchPhase::Authorizing);
        match self.source.authorization().await {
            Authorization::GrantedFull => {}
            Authorization::GrantedLimited => {
                warn!("media access granted for a limited selection only");
                self.report(0.0, "media access limited to a partial selection");
            }
            denied => {
                return Err(ConvertError::AuthorizationDenied(format!("{denied:?}")));
            }
        }

        self.enter(BatchPhase::ValidatingOutput);
        validate_output_dir(output_dir).await?;

        self.enter(BatchPhase::Fetching);
        let items = self.source.resolve(ids).await?;
        if items.is_empty() {
            return Err(ConvertError::AssetFetchFailed(
                "none of the requested items could be resolved".into(),
            ));
        }
        if items.len() < ids.len() {
            let line = format!("resolved {} of {} requested items", items.len(), ids.len());
            warn!("{line}");
            self.report(0.0, &line);
        }

        self.enter(BatchPhase::Dispatching);
        let dispatched = items.len();
        let cap = self.config.max_in_flight.max(1);
        let mut pending = items.into_iter();
        let mut in_flight: JoinSet<ConversionOutcome> = JoinSet::new();
        for item in pending.by_ref().take(cap) {
            self.spawn_item(&mut in_flight, item, output_dir);
        }

        self.enter(BatchPhase::Aggregating);
        let mut succeeded = 0usize;
        let mut failed = 0usize;
        let mut failures = Vec::new();
        let mut completed = 0usize;
        while let Some(joined) = in_flight.join_next().await {
            let outcome = joined.unwrap_or_else(|err| ConversionOutcome {
                id: "<task>".into(),
                result: Err(ConvertError::Unknown(format!(
                    "conversion task aborted: {err}"
                ))),
            });
            completed += 1;
            let fraction = completed as f64 / dispatched as f64;
            match &outcome.result {
                Ok(converted) => {
                    succeeded += 1;
                    self.report(
                        fraction,
                        &format!("converted {} -> {}", outcome.id, converted.path.display()),
                    );
                }
                Err(err) => {
                    failed += 1;
                    let line = format!("{}: {err}", outcome.id);
                    self.report(fraction, &line);
                    failures.push(line);
                }
            }
            // Admit the next item only as one completes.
            if let Some(item) = pending.next() {
                self.spawn_item(&mut in_flight, item, output_dir);
            }
        }

        self.enter(BatchPhase::Done);
        let summary_line = format!("{succeeded} succeeded, {failed} failed");
        self.report(1.0, &summary_line);
        let mut messages = vec![summary_line];
        messages.extend(failures);
        Ok(BatchSummary {
            succeeded,
            failed,
            messages,
        })
    }

    fn spawn_item(
        &self,
        in_flight: &mut JoinSet<ConversionOutcome>,
        item: MediaRef,
        output_dir: &Path,
    ) {
        let source = Arc::clone(&self.source);
        let images = self.images.clone();
        let videos = self.videos.clone();
        let output_dir = output_dir.to_path_buf();
        in_flight.spawn(async move {
            let result = match item.kind {
                MediaKind::Image => images.convert(source.as_ref(), &item, &output_dir).await,
                MediaKind::Video => videos.convert(source.as_ref(), &item, &output_dir).await,
            };
            ConversionOutcome {
                id: item.id,
                result,
            }
        });
    }

    fn enter(&self, phase: BatchPhase) {
        debug!(?phase, "batch phase");
    }

    fn report(&self, fraction: f64, line: &str) {
        info!(fraction, "{line}");
        if let Some(progress) = &self.progress {
            progress(fraction, line);
        }
    }
}

/// The output location must exist, be a directory and accept a probe write
/// before any work is dispatched.
async fn validate_output_dir(dir: &Path) -> Result<()> {
    let meta = tokio::fs::metadata(dir)
        .await
        .map_err(|e| ConvertError::OutputDirectoryInvalid(format!("{}: {e}", dir.display())))?;
    if !meta.is_dir() {
        return Err(ConvertError::OutputDirectoryInvalid(format!(
            "{} is not a directory",
            dir.display()
        )));
    }
    let probe = dir.join(".shotstamp-write-probe");
    tokio::fs::write(&probe, b"probe").await.map_err(|e| {
        ConvertError::OutputDirectoryInvalid(format!("{} is not writable: {e}", dir.display()))
    })?;
    let _ = tokio::fs::remove_file(&probe).await;
    Ok(())
}
