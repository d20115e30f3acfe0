//! Video conversion engine.
//!
//! Two export tiers tried in fixed order. Tier 1 is a passthrough remux: the
//! original streams are copied into the output container with an explicitly
//! reconciled tag set, because export sessions do not guarantee metadata
//! propagation. Tier 2 copies the raw resource bytes directly and, only when
//! the copy's metadata misses the title or a needed location, runs a
//! corrective metadata-only remux to a sibling temporary path followed by an
//! atomic rename. The backend seam keeps the tier logic testable without
//! ffmpeg on the machine.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{ConvertError, Result};
use crate::finalize;
use crate::media::{CaptureMetadata, Converted, ExportStrategy, MediaRef};
use crate::naming;
use crate::source::MediaSource;

pub const TAG_TITLE: &str = "title";
pub const TAG_CREATION_TIME: &str = "creation_time";
pub const TAG_LOCATION: &str = "location";
pub const TAG_LOCATION_ALTITUDE: &str = "location.altitude";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoContainer {
    Mp4,
    Mov,
}

impl VideoContainer {
    pub fn extension(&self) -> &'static str {
        match self {
            VideoContainer::Mp4 => "mp4",
            VideoContainer::Mov => "mov",
        }
    }
}

impl FromStr for VideoContainer {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mp4" => Ok(VideoContainer::Mp4),
            "mov" => Ok(VideoContainer::Mov),
            other => Err(format!("unsupported container `{other}` (use mp4 or mov)")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VideoConfig {
    pub container: VideoContainer,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            container: VideoContainer::Mp4,
        }
    }
}

/// Export session seam. `remux` copies streams from `input` to `output` with
/// exactly the given container tags; `read_tags` returns a file's
/// container-level tags.
#[async_trait]
pub trait ExportBackend: Send + Sync {
    async fn read_tags(&self, path: &Path) -> Result<Vec<(String, String)>>;
    async fn remux(&self, input: &Path, output: &Path, tags: &[(String, String)]) -> Result<()>;
}

#[derive(Clone)]
pub struct VideoConverter {
    config: VideoConfig,
    backend: Arc<dyn ExportBackend>,
}

impl VideoConverter {
    pub fn new(config: VideoConfig, backend: Arc<dyn ExportBackend>) -> Self {
        Self { config, backend }
    }

    /// Converts one video item into `output_dir`. Tier 2 is attempted only
    /// when tier 1 fails; if both fail, the reported error carries the tier-2
    /// detail.
    pub async fn convert(
        &self,
        source: &dyn MediaSource,
        item: &MediaRef,
        output_dir: &Path,
    ) -> Result<Converted> {
        let meta = CaptureMetadata::for_item(item)?;
        let dest = naming::output_path(
            output_dir,
            &meta.captured_at,
            self.config.container.extension(),
        );
        debug!(id = %item.id, dest = %dest.display(), "converting video");

        let converted = match self.passthrough(source, item, &meta, &dest).await {
            Ok(converted) => converted,
            Err(primary) => {
                warn!(id = %item.id, error = %primary, "passthrough export failed, trying direct copy");
                self.direct_copy(source, item, &meta, &dest)
                    .await
                    .map_err(|fallback| {
                        ConvertError::VideoExportFailed(format!(
                            "{fallback} (passthrough: {primary})"
                        ))
                    })?
            }
        };
        finalize::stamp(&dest, &meta.captured_at)?;
        Ok(converted)
    }

    /// Tier 1: format-preserving stream copy with reconciled tags.
    async fn passthrough(
        &self,
        source: &dyn MediaSource,
        item: &MediaRef,
        meta: &CaptureMetadata,
        dest: &Path,
    ) -> Result<Converted> {
        let input = source.video_source_path(item).await?;
        let source_tags = self.backend.read_tags(&input).await?;
        let tags = reconcile_tags(&source_tags, meta);
        self.backend.remux(&input, dest, &tags).await?;

        // A zero-byte or missing result counts as tier failure.
        let len = tokio::fs::metadata(dest).await.map(|m| m.len()).unwrap_or(0);
        if len == 0 {
            return Err(ConvertError::VideoExportFailed(
                "export session produced an empty file".into(),
            ));
        }
        Ok(Converted {
            path: dest.to_path_buf(),
            strategy: ExportStrategy::Passthrough,
        })
    }

    /// Tier 2: raw resource copy, then a corrective metadata-only remux iff
    /// the copy's title differs from the stem or a carried location is
    /// missing. A faithful copy is left untouched.
    async fn direct_copy(
        &self,
        source: &dyn MediaSource,
        item: &MediaRef,
        meta: &CaptureMetadata,
        dest: &Path,
    ) -> Result<Converted> {
        let written = source.export_video_resource(item, dest).await?;
        if written == 0 {
            return Err(ConvertError::VideoExportFailed(
                "raw resource copy wrote no bytes".into(),
            ));
        }

        let tags = self.backend.read_tags(dest).await.unwrap_or_default();
        let location_missing = meta.location.is_some() && !has_location_tag(&tags);
        let title_correct = tags
            .iter()
            .any(|(k, v)| k.eq_ignore_ascii_case(TAG_TITLE) && v == &meta.title);
        if location_missing || !title_correct {
            self.corrective_pass(dest, meta, &tags).await?;
        }
        Ok(Converted {
            path: dest.to_path_buf(),
            strategy: ExportStrategy::DirectCopy,
        })
    }

    async fn corrective_pass(
        &self,
        dest: &Path,
        meta: &CaptureMetadata,
        tags: &[(String, String)],
    ) -> Result<()> {
        debug!(dest = %dest.display(), "corrective metadata re-export");
        let staging = dest.with_extension(format!("tmp.{}", self.config.container.extension()));
        let fixed = reconcile_tags(tags, meta);
        let corrected = self.backend.remux(dest, &staging, &fixed).await;
        if let Err(err) = corrected {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(ConvertError::VideoMetadataUpdateFailed(err.to_string()));
        }
        tokio::fs::rename(&staging, dest)
            .await
            .map_err(|e| ConvertError::VideoMetadataUpdateFailed(e.to_string()))
    }
}

/// Builds the output tag set: the source tags minus any title or creation
/// time, plus the stem as title, the capture instant as creation time, and a
/// location (with non-zero altitude) when the reference carries one and the
/// source has no coordinates. Title and creation time are always overridden
/// so the output's name, embedded title and embedded date stay in lockstep.
pub(crate) fn reconcile_tags(
    source_tags: &[(String, String)],
    meta: &CaptureMetadata,
) -> Vec<(String, String)> {
    let mut tags: Vec<(String, String)> = source_tags
        .iter()
        .filter(|(k, _)| {
            !k.eq_ignore_ascii_case(TAG_TITLE) && !k.eq_ignore_ascii_case(TAG_CREATION_TIME)
        })
        .cloned()
        .collect();
    tags.push((TAG_TITLE.to_string(), meta.title.clone()));
    tags.push((TAG_CREATION_TIME.to_string(), meta.captured_at.to_rfc3339()));

    if !has_location_tag(source_tags) {
        if let Some(point) = meta.location {
            tags.push((TAG_LOCATION.to_string(), naming::iso6709_point(&point)));
            if let Some(altitude) = point.altitude {
                if altitude != 0.0 {
                    tags.push((TAG_LOCATION_ALTITUDE.to_string(), format!("{altitude:+.3}")));
                }
            }
        }
    }
    tags
}

/// A location counts as present only when some location-keyed tag actually
/// carries coordinates; accuracy or authoring side-tags alone do not.
pub(crate) fn has_location_tag(tags: &[(String, String)]) -> bool {
    tags.iter().any(|(k, v)| {
        k.to_ascii_lowercase().contains(TAG_LOCATION) && naming::parse_iso6709(v).is_some()
    })
}
