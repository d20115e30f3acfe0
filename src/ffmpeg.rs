//! FFmpeg/ffprobe process plumbing.
//!
//! Everything that talks to the system `ffmpeg`/`ffprobe` binaries lives here:
//! an argument builder for export runs, JSON probing of container metadata,
//! and the production [`ExportBackend`] the video engine drives. The JSON
//! parsing core is a pure function so it stays testable without the binaries.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::error::ConvertError;
use crate::media::Dimensions;
use crate::video::ExportBackend;

#[derive(Debug, Error)]
pub enum FfmpegError {
    #[error("`{0}` not found in system PATH")]
    NotInstalled(&'static str),

    #[error("`{tool}` exited with status {status}: {stderr}")]
    Failed {
        tool: &'static str,
        status: i32,
        stderr: String,
    },

    #[error("`{0}` was interrupted by a signal")]
    Interrupted(&'static str),

    #[error("Invalid output: {0}")]
    InvalidOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn spawn_error(tool: &'static str) -> impl FnOnce(std::io::Error) -> FfmpegError {
    move |e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            FfmpegError::NotInstalled(tool)
        } else {
            FfmpegError::Io(e)
        }
    }
}

/// Builder for one ffmpeg invocation. Always overwrites the destination and
/// keeps stderr for the error path.
pub struct FfmpegCommand {
    args: Vec<String>,
}

impl FfmpegCommand {
    pub fn new() -> Self {
        Self { args: Vec::new() }
    }

    pub fn input(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push("-i".to_string());
        self.args.push(path.as_ref().display().to_string());
        self
    }

    /// Copy every stream without re-encoding.
    pub fn stream_copy(self) -> Self {
        self.args(&["-map", "0", "-c", "copy"])
    }

    /// Drop the metadata ffmpeg would otherwise carry over implicitly, so the
    /// explicit `metadata` pairs are the complete output tag set.
    pub fn drop_source_metadata(self) -> Self {
        self.args(&["-map_metadata", "-1"])
    }

    pub fn metadata(mut self, key: &str, value: &str) -> Self {
        self.args.push("-metadata".to_string());
        self.args.push(format!("{key}={value}"));
        self
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    pub fn output(mut self, path: impl AsRef<Path>) -> Self {
        self.args.push(path.as_ref().display().to_string());
        self
    }

    /// Runs to completion, mapping the three terminal process states to
    /// success, failure and interruption.
    pub async fn run(self) -> Result<(), FfmpegError> {
        debug!(args = ?self.args, "running ffmpeg");
        let output = Command::new("ffmpeg")
            .args(["-y", "-v", "error", "-nostdin"])
            .args(&self.args)
            .output()
            .await
            .map_err(spawn_error("ffmpeg"))?;
        match output.status.code() {
            Some(0) => Ok(()),
            Some(status) => Err(FfmpegError::Failed {
                tool: "ffmpeg",
                status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
            None => Err(FfmpegError::Interrupted("ffmpeg")),
        }
    }
}

impl Default for FfmpegCommand {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// ffprobe
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct ProbeOutput {
    format: Option<ProbeFormat>,
    streams: Option<Vec<ProbeStream>>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    tags: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

/// What the crate needs to know about a video file.
#[derive(Debug, Clone, Default)]
pub struct VideoProbe {
    /// Container-level (format) tags as key/value pairs.
    pub tags: Vec<(String, String)>,
    pub dimensions: Option<Dimensions>,
    pub duration_secs: Option<f64>,
}

/// Probes format tags, dimensions and duration of a video file.
pub async fn probe_video(path: &Path) -> Result<VideoProbe, FfmpegError> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .output()
        .await
        .map_err(spawn_error("ffprobe"))?;
    match output.status.code() {
        Some(0) => parse_probe_json(&output.stdout),
        Some(status) => Err(FfmpegError::Failed {
            tool: "ffprobe",
            status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }),
        None => Err(FfmpegError::Interrupted("ffprobe")),
    }
}

/// Container-level tags only.
pub async fn probe_format_tags(path: &Path) -> Result<Vec<(String, String)>, FfmpegError> {
    Ok(probe_video(path).await?.tags)
}

fn parse_probe_json(raw: &[u8]) -> Result<VideoProbe, FfmpegError> {
    let parsed: ProbeOutput = serde_json::from_slice(raw)
        .map_err(|e| FfmpegError::InvalidOutput(format!("ffprobe JSON: {e}")))?;
    let format = parsed.format.unwrap_or_default();
    let duration_secs = format.duration.as_deref().and_then(|s| s.parse().ok());
    let tags = format.tags.unwrap_or_default().into_iter().collect();
    let dimensions = parsed
        .streams
        .unwrap_or_default()
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .and_then(|s| {
            Some(Dimensions {
                width: s.width?,
                height: s.height?,
            })
        });
    Ok(VideoProbe {
        tags,
        dimensions,
        duration_secs,
    })
}

// ---------------------------------------------------------------------------
// Production export backend
// ---------------------------------------------------------------------------

/// [`ExportBackend`] that shells out to ffmpeg for remuxing and to ffprobe
/// for tag reads.
pub struct FfmpegBackend;

#[async_trait]
impl ExportBackend for FfmpegBackend {
    async fn read_tags(&self, path: &Path) -> crate::error::Result<Vec<(String, String)>> {
        probe_format_tags(path).await.map_err(|e| {
            ConvertError::VideoExportFailed(format!("probing {}: {e}", path.display()))
        })
    }

    async fn remux(
        &self,
        input: &Path,
        output: &Path,
        tags: &[(String, String)],
    ) -> crate::error::Result<()> {
        let mut cmd = FfmpegCommand::new()
            .input(input)
            .stream_copy()
            .drop_source_metadata();
        for (key, value) in tags {
            cmd = cmd.metadata(key, value);
        }
        cmd.args(&["-movflags", "use_metadata_tags"])
            .output(output)
            .run()
            .await
            .map_err(|e| ConvertError::VideoExportFailed(e.to_string()))
    }
}
