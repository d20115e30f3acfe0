//! Still-image conversion engine.
//!
//! Decodes whatever payload the source hands over, re-encodes it as JPEG at a
//! fixed quality and carries the embedded metadata across: the full source
//! dictionary is copied and only three fields are overridden (EXIF
//! DateTimeOriginal, IPTC ObjectName, TIFF ImageDescription). GPS and every
//! other group pass through untouched because the output dictionary starts
//! from the complete original.

use std::path::Path;

use tracing::debug;

use crate::error::{ConvertError, Result};
use crate::exif::{self, TAG_DATETIME_ORIGINAL, TAG_IMAGE_DESCRIPTION, TAG_IPTC_OBJECT_NAME};
use crate::finalize;
use crate::media::{CaptureMetadata, Converted, ExportStrategy, MediaRef};
use crate::metadata::{TagDict, TagEntry, GROUP_EXIF, GROUP_IPTC, GROUP_TIFF};
use crate::naming;
use crate::source::MediaSource;

#[derive(Debug, Clone, Copy)]
pub struct ImageConfig {
    /// JPEG re-encode quality, 1-100.
    pub jpeg_quality: u8,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self { jpeg_quality: 80 }
    }
}

#[derive(Debug, Clone)]
pub struct ImageConverter {
    config: ImageConfig,
}

impl ImageConverter {
    pub fn new(config: ImageConfig) -> Self {
        Self { config }
    }

    /// Converts one image item into `output_dir`, overwriting any existing
    /// file at the deterministic path, and stamps the result's file times.
    pub async fn convert(
        &self,
        source: &dyn MediaSource,
        item: &MediaRef,
        output_dir: &Path,
    ) -> Result<Converted> {
        let meta = CaptureMetadata::for_item(item)?;
        let payload = source.image_payload(item).await?;
        let dest = naming::output_path(output_dir, &meta.captured_at, "jpg");
        debug!(id = %item.id, dest = %dest.display(), "converting image");

        // Decode, re-encode and splice on the blocking pool; these are the
        // CPU-bound sections of the pipeline.
        let quality = self.config.jpeg_quality;
        let worker_meta = meta.clone();
        let encoded =
            tokio::task::spawn_blocking(move || encode_jpeg(&payload, &worker_meta, quality))
                .await
                .map_err(|e| ConvertError::Unknown(format!("image task failed: {e}")))??;

        tokio::fs::write(&dest, &encoded).await.map_err(|e| {
            ConvertError::EncodeFailed(format!("writing {}: {e}", dest.display()))
        })?;
        finalize::stamp(&dest, &meta.captured_at)?;
        Ok(Converted {
            path: dest,
            strategy: ExportStrategy::JpegReencode,
        })
    }
}

fn encode_jpeg(payload: &[u8], meta: &CaptureMetadata, quality: u8) -> Result<Vec<u8>> {
    let dict = apply_overrides(exif::read_tag_dict(payload), meta);

    let decoded = ::image::load_from_memory(payload)
        .map_err(|e| ConvertError::DecodeFailed(e.to_string()))?;
    let rgb = decoded.to_rgb8();
    let mut jpeg = Vec::new();
    let mut encoder = ::image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, quality);
    encoder
        .encode_image(&rgb)
        .map_err(|e| ConvertError::EncodeFailed(e.to_string()))?;

    exif::embed_tag_dict(jpeg, &dict)
}

/// Deep copy of the source dictionary plus the surgical overrides. Everything
/// not listed here survives the conversion unchanged.
fn apply_overrides(mut dict: TagDict, meta: &CaptureMetadata) -> TagDict {
    dict.insert(
        GROUP_EXIF,
        "DateTimeOriginal",
        TagEntry::text(
            TAG_DATETIME_ORIGINAL,
            naming::embedded_datetime(&meta.captured_at),
        ),
    );
    dict.insert(
        GROUP_TIFF,
        "ImageDescription",
        TagEntry::text(TAG_IMAGE_DESCRIPTION, meta.title.clone()),
    );
    dict.insert(
        GROUP_IPTC,
        "ObjectName",
        TagEntry::text(TAG_IPTC_OBJECT_NAME, meta.title.clone()),
    );
    dict
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{GeoPoint, MediaKind};
    use crate::metadata::{TagValue, GROUP_GPS};
    use crate::source::Authorization;
    use async_trait::async_trait;
    use chrono::{Local, TimeZone};
    use std::path::PathBuf;

    struct StubSource {
        payload: Vec<u8>,
    }

    #[async_trait]
    impl MediaSource for StubSource {
        async fn authorization(&self) -> Authorization {
            Authorization::GrantedFull
        }
        async fn resolve(&self, _ids: &[String]) -> Result<Vec<MediaRef>> {
            Ok(Vec::new())
        }
        async fn image_payload(&self, _item: &MediaRef) -> Result<Vec<u8>> {
            Ok(self.payload.clone())
        }
        async fn video_source_path(&self, _item: &MediaRef) -> Result<PathBuf> {
            Err(ConvertError::Unknown("not a video source".into()))
        }
        async fn export_video_resource(&self, _item: &MediaRef, _dest: &Path) -> Result<u64> {
            Err(ConvertError::Unknown("not a video source".into()))
        }
    }

    fn image_item(id: &str) -> MediaRef {
        MediaRef {
            id: id.into(),
            kind: MediaKind::Image,
            captured_at: Some(Local.with_ymd_and_hms(2021, 7, 4, 12, 30, 5).unwrap()),
            location: None,
            dimensions: None,
            duration_secs: None,
        }
    }

    fn payload_with_gps() -> Vec<u8> {
        let img = ::image::RgbImage::from_pixel(16, 16, ::image::Rgb([200, 50, 20]));
        let mut bare = Vec::new();
        let mut encoder = ::image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bare, 90);
        encoder.encode_image(&img).unwrap();

        let mut dict = TagDict::new();
        dict.insert(GROUP_GPS, "GPSLatitudeRef", TagEntry::text(0x0001, "N"));
        dict.insert(
            GROUP_GPS,
            "GPSLatitude",
            TagEntry {
                id: 0x0002,
                value: TagValue::Rationals(vec![(48_857_700, 1_000_000), (0, 1), (0, 1)]),
            },
        );
        dict.insert(GROUP_GPS, "GPSLongitudeRef", TagEntry::text(0x0003, "E"));
        dict.insert(
            GROUP_GPS,
            "GPSLongitude",
            TagEntry {
                id: 0x0004,
                value: TagValue::Rationals(vec![(2_295_000, 1_000_000), (0, 1), (0, 1)]),
            },
        );
        dict.insert(
            GROUP_IPTC,
            "ObjectName",
            TagEntry::text(TAG_IPTC_OBJECT_NAME, "old title"),
        );
        exif::embed_tag_dict(bare, &dict).unwrap()
    }

    #[tokio::test]
    async fn convert_names_titles_and_preserves_gps() {
        let dir = tempfile::tempdir().unwrap();
        let source = StubSource {
            payload: payload_with_gps(),
        };
        let converter = ImageConverter::new(ImageConfig::default());

        let converted = converter
            .convert(&source, &image_item("IMG_0001"), dir.path())
            .await
            .unwrap();
        assert_eq!(converted.strategy, ExportStrategy::JpegReencode);
        assert_eq!(
            converted.path.file_name().unwrap(),
            "2021-07-04_12-30-05.jpg"
        );

        let written = std::fs::read(&converted.path).unwrap();
        let dict = exif::read_tag_dict(&written);
        assert_eq!(
            dict.text(GROUP_IPTC, "ObjectName"),
            Some("2021-07-04_12-30-05")
        );
        assert_eq!(
            dict.text(GROUP_TIFF, "ImageDescription"),
            Some("2021-07-04_12-30-05")
        );
        assert_eq!(
            dict.text(GROUP_EXIF, "DateTimeOriginal"),
            Some("2021:07:04 12:30:05")
        );
        let point = exif::gps_point(&dict).unwrap();
        assert!((point.latitude - 48.8577).abs() < 1e-5);
        assert!((point.longitude - 2.295).abs() < 1e-5);
    }

    #[tokio::test]
    async fn second_run_overwrites_without_duplicating_titles() {
        let dir = tempfile::tempdir().unwrap();
        let source = StubSource {
            payload: payload_with_gps(),
        };
        let converter = ImageConverter::new(ImageConfig::default());
        let item = image_item("IMG_0001");

        let first = converter.convert(&source, &item, dir.path()).await.unwrap();
        let second = converter.convert(&source, &item, dir.path()).await.unwrap();
        assert_eq!(first.path, second.path);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        let dict = exif::read_tag_dict(&std::fs::read(&second.path).unwrap());
        assert_eq!(
            dict.text(GROUP_IPTC, "ObjectName"),
            Some("2021-07-04_12-30-05")
        );
    }

    #[tokio::test]
    async fn missing_capture_date_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let source = StubSource {
            payload: payload_with_gps(),
        };
        let converter = ImageConverter::new(ImageConfig::default());
        let mut item = image_item("IMG_0002");
        item.captured_at = None;

        let err = converter
            .convert(&source, &item, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::MissingCaptureDate(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn undecodable_payload_is_decode_failure() {
        let dir = tempfile::tempdir().unwrap();
        let source = StubSource {
            payload: b"not an image at all".to_vec(),
        };
        let converter = ImageConverter::new(ImageConfig::default());

        let err = converter
            .convert(&source, &image_item("IMG_0003"), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::DecodeFailed(_)));
    }

    #[test]
    fn overrides_leave_gps_alone() {
        let mut dict = TagDict::new();
        dict.insert(
            GROUP_GPS,
            "GPSLatitude",
            TagEntry {
                id: 0x0002,
                value: TagValue::Rationals(vec![(1, 1), (2, 1), (3, 1)]),
            },
        );
        let meta = CaptureMetadata {
            captured_at: Local.with_ymd_and_hms(2021, 1, 2, 3, 4, 5).unwrap(),
            location: Some(GeoPoint {
                latitude: 1.0,
                longitude: 2.0,
                altitude: None,
            }),
            title: "2021-01-02_03-04-05".into(),
        };
        let merged = apply_overrides(dict.clone(), &meta);
        assert_eq!(merged.get(GROUP_GPS, "GPSLatitude"), dict.get(GROUP_GPS, "GPSLatitude"));
        assert_eq!(merged.text(GROUP_IPTC, "ObjectName"), Some("2021-01-02_03-04-05"));
    }
}
