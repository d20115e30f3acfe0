//! Media source seam and the filesystem-backed implementation.
//!
//! The converters and the batch runner only ever talk to [`MediaSource`], so
//! the host media library can be swapped for fakes in tests. [`LocalLibrary`]
//! resolves plain file paths: kind detection by magic numbers with an
//! extension fallback, image attributes from the embedded EXIF block and
//! video attributes from ffprobe.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Local};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::error::{ConvertError, Result};
use crate::exif;
use crate::ffmpeg;
use crate::media::{GeoPoint, MediaKind, MediaRef};
use crate::naming;
use crate::video::has_location_tag;

/// Outcome of the media source's read/write capability query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    GrantedFull,
    GrantedLimited,
    Denied,
    Restricted,
    NotDetermined,
}

#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn authorization(&self) -> Authorization;

    /// Resolves opaque identifiers to concrete references. Unresolvable
    /// identifiers are skipped, not errors; the caller decides what a
    /// shortfall means.
    async fn resolve(&self, ids: &[String]) -> Result<Vec<MediaRef>>;

    /// Highest-quality payload bytes of an image item.
    async fn image_payload(&self, item: &MediaRef) -> Result<Vec<u8>>;

    /// Path of the original video stream, as input for export sessions.
    async fn video_source_path(&self, item: &MediaRef) -> Result<PathBuf>;

    /// Copies the raw video resource to `dest` and returns the byte count.
    async fn export_video_resource(&self, item: &MediaRef, dest: &Path) -> Result<u64>;
}

#[derive(Debug, Clone, Default)]
pub struct LibraryConfig {
    /// Resolve identifiers relative to this directory and key authorization
    /// off its readability. `None` treats identifiers as free-standing paths.
    pub root: Option<PathBuf>,
    /// Fall back to the file modification time when no capture date is
    /// embedded. Off by default: a missing capture date is normally fatal for
    /// the item.
    pub mtime_fallback: bool,
}

/// Filesystem-backed media source.
pub struct LocalLibrary {
    config: LibraryConfig,
}

impl LocalLibrary {
    pub fn new(config: LibraryConfig) -> Self {
        Self { config }
    }

    fn locate(&self, id: &str) -> PathBuf {
        match &self.config.root {
            Some(root) => root.join(id),
            None => PathBuf::from(id),
        }
    }

    async fn resolve_one(&self, id: &str) -> Option<MediaRef> {
        let path = self.locate(id);
        let fs_meta = match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => m,
            Ok(_) => {
                warn!(id, "skipping: not a regular file");
                return None;
            }
            Err(err) => {
                warn!(id, %err, "skipping: unreadable");
                return None;
            }
        };
        let Some(kind) = sniff_kind(&path).await else {
            warn!(id, "skipping: not a recognized image or video");
            return None;
        };

        let mut item = MediaRef {
            id: id.to_string(),
            kind,
            captured_at: None,
            location: None,
            dimensions: None,
            duration_secs: None,
        };
        match kind {
            MediaKind::Image => {
                if let Ok(payload) = tokio::fs::read(&path).await {
                    let dict = exif::read_tag_dict(&payload);
                    item.captured_at = exif::capture_instant(&dict);
                    item.location = exif::gps_point(&dict);
                }
            }
            MediaKind::Video => match ffmpeg::probe_video(&path).await {
                Ok(probe) => {
                    item.captured_at = probe
                        .tags
                        .iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case("creation_time"))
                        .and_then(|(_, v)| parse_creation_time(v));
                    item.location = location_from_tags(&probe.tags);
                    item.dimensions = probe.dimensions;
                    item.duration_secs = probe.duration_secs;
                }
                Err(err) => debug!(id, %err, "ffprobe unavailable, no embedded video attributes"),
            },
        }
        if item.captured_at.is_none() && self.config.mtime_fallback {
            item.captured_at = fs_meta
                .modified()
                .ok()
                .map(|t| DateTime::<Local>::from(t));
            if item.captured_at.is_some() {
                debug!(id, "using file modification time as capture date");
            }
        }
        Some(item)
    }
}

#[async_trait]
impl MediaSource for LocalLibrary {
    async fn authorization(&self) -> Authorization {
        let Some(root) = &self.config.root else {
            return Authorization::GrantedFull;
        };
        match std::fs::read_dir(root) {
            Ok(_) => Authorization::GrantedFull,
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
                Authorization::Denied
            }
            Err(_) => Authorization::Restricted,
        }
    }

    async fn resolve(&self, ids: &[String]) -> Result<Vec<MediaRef>> {
        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(item) = self.resolve_one(id).await {
                items.push(item);
            }
        }
        Ok(items)
    }

    async fn image_payload(&self, item: &MediaRef) -> Result<Vec<u8>> {
        let path = self.locate(&item.id);
        tokio::fs::read(&path)
            .await
            .map_err(|e| ConvertError::PayloadFetchFailed(format!("{}: {e}", path.display())))
    }

    async fn video_source_path(&self, item: &MediaRef) -> Result<PathBuf> {
        let path = self.locate(&item.id);
        if !path.is_file() {
            return Err(ConvertError::AssetFetchFailed(format!(
                "{} is not a readable file",
                path.display()
            )));
        }
        Ok(path)
    }

    async fn export_video_resource(&self, item: &MediaRef, dest: &Path) -> Result<u64> {
        let path = self.locate(&item.id);
        tokio::fs::copy(&path, dest).await.map_err(|e| {
            ConvertError::VideoExportFailed(format!(
                "raw copy {} -> {}: {e}",
                path.display(),
                dest.display()
            ))
        })
    }
}

/// Magic-number detection with an extension-map fallback for files whose
/// headers `infer` does not know.
async fn sniff_kind(path: &Path) -> Option<MediaKind> {
    let mut head = [0u8; 8192];
    let mut file = tokio::fs::File::open(path).await.ok()?;
    let n = file.read(&mut head).await.ok()?;
    if let Some(detected) = infer::get(&head[..n]) {
        let mime = detected.mime_type();
        if mime.starts_with("image/") {
            return Some(MediaKind::Image);
        }
        if mime.starts_with("video/") {
            return Some(MediaKind::Video);
        }
    }
    kind_from_extension(path)
}

fn kind_from_extension(path: &Path) -> Option<MediaKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" | "png" | "gif" | "webp" | "tiff" | "tif" | "bmp" | "heic" | "heif" => {
            Some(MediaKind::Image)
        }
        "mp4" | "m4v" | "mov" | "avi" | "mkv" | "webm" => Some(MediaKind::Video),
        _ => None,
    }
}

fn parse_creation_time(raw: &str) -> Option<DateTime<Local>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Local))
}

fn location_from_tags(tags: &[(String, String)]) -> Option<GeoPoint> {
    if !has_location_tag(tags) {
        return None;
    }
    tags.iter()
        .filter(|(k, _)| k.to_ascii_lowercase().contains("location"))
        .find_map(|(_, v)| naming::parse_iso6709(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn extension_fallback_covers_both_kinds() {
        assert_eq!(
            kind_from_extension(Path::new("a.HEIC")),
            Some(MediaKind::Image)
        );
        assert_eq!(
            kind_from_extension(Path::new("b.mov")),
            Some(MediaKind::Video)
        );
        assert_eq!(kind_from_extension(Path::new("c.txt")), None);
        assert_eq!(kind_from_extension(Path::new("noext")), None);
    }

    #[test]
    fn creation_time_parses_ffprobe_form() {
        let parsed = parse_creation_time("2021-07-04T10:30:05.000000Z").unwrap();
        assert_eq!(
            parsed.with_timezone(&chrono::Utc),
            chrono::Utc.with_ymd_and_hms(2021, 7, 4, 10, 30, 5).unwrap()
        );
        assert!(parse_creation_time("yesterday").is_none());
    }

    #[test]
    fn location_tag_lookup_is_case_insensitive() {
        let tags = vec![(
            "com.apple.quicktime.location.ISO6709".to_string(),
            "+46.204400+006.143200/".to_string(),
        )];
        let point = location_from_tags(&tags).unwrap();
        assert!((point.latitude - 46.2044).abs() < 1e-6);
        assert!(location_from_tags(&[]).is_none());
    }

    #[tokio::test]
    async fn resolve_skips_unreadable_and_unrecognized() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"plain text").unwrap();
        let library = LocalLibrary::new(LibraryConfig {
            root: Some(dir.path().to_path_buf()),
            mtime_fallback: false,
        });
        let items = library
            .resolve(&["notes.txt".to_string(), "missing.jpg".to_string()])
            .await
            .unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn resolve_image_without_exif_uses_mtime_only_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let img = ::image::RgbImage::from_pixel(4, 4, ::image::Rgb([1, 2, 3]));
        let mut jpeg = Vec::new();
        let mut encoder = ::image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 85);
        encoder.encode_image(&img).unwrap();
        std::fs::write(dir.path().join("plain.jpg"), &jpeg).unwrap();

        let strict = LocalLibrary::new(LibraryConfig {
            root: Some(dir.path().to_path_buf()),
            mtime_fallback: false,
        });
        let items = strict.resolve(&["plain.jpg".to_string()]).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind, MediaKind::Image);
        assert!(items[0].captured_at.is_none());

        let lenient = LocalLibrary::new(LibraryConfig {
            root: Some(dir.path().to_path_buf()),
            mtime_fallback: true,
        });
        let items = lenient.resolve(&["plain.jpg".to_string()]).await.unwrap();
        assert!(items[0].captured_at.is_some());
    }

    #[tokio::test]
    async fn authorization_tracks_root_readability() {
        let dir = tempfile::tempdir().unwrap();
        let readable = LocalLibrary::new(LibraryConfig {
            root: Some(dir.path().to_path_buf()),
            mtime_fallback: false,
        });
        assert_eq!(readable.authorization().await, Authorization::GrantedFull);

        let missing = LocalLibrary::new(LibraryConfig {
            root: Some(dir.path().join("gone")),
            mtime_fallback: false,
        });
        assert_eq!(missing.authorization().await, Authorization::Restricted);

        let rootless = LocalLibrary::new(LibraryConfig::default());
        assert_eq!(rootless.authorization().await, Authorization::GrantedFull);
    }
}
