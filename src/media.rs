//! Core media model: references handed over by the media source and the
//! capture metadata the converters derive from them.

use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::{ConvertError, Result};
use crate::naming;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Image,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Geographic point in decimal degrees, WGS 84.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
}

/// A resolved item from the media source. Owned by the source; the converters
/// only read it, and it is valid for the duration of one conversion call.
#[derive(Debug, Clone)]
pub struct MediaRef {
    pub id: String,
    pub kind: MediaKind,
    pub captured_at: Option<DateTime<Local>>,
    pub location: Option<GeoPoint>,
    pub dimensions: Option<Dimensions>,
    pub duration_secs: Option<f64>,
}

/// What the converters actually need from an item: the capture instant, the
/// location to carry over, and the title (always the filename stem).
#[derive(Debug, Clone)]
pub struct CaptureMetadata {
    pub captured_at: DateTime<Local>,
    pub location: Option<GeoPoint>,
    pub title: String,
}

impl CaptureMetadata {
    /// The capture instant drives the output filename, so an item without one
    /// cannot be converted at all.
    pub fn for_item(item: &MediaRef) -> Result<Self> {
        let captured_at = item
            .captured_at
            .ok_or_else(|| ConvertError::MissingCaptureDate(item.id.clone()))?;
        Ok(Self {
            captured_at,
            location: item.location,
            title: naming::filename_stem(&captured_at),
        })
    }
}

/// Which export path produced an output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportStrategy {
    /// Image decoded and re-encoded as JPEG.
    JpegReencode,
    /// Video stream-copied through an export session.
    Passthrough,
    /// Raw video resource copied byte for byte.
    DirectCopy,
}

/// Successful per-item result.
#[derive(Debug, Clone)]
pub struct Converted {
    pub path: PathBuf,
    pub strategy: ExportStrategy,
}
