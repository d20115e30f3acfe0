//! shotstamp - batch media conversion with capture-time naming
//!
//! Converts photos to JPEG and videos to MP4/MOV, names every output after its
//! capture instant (`YYYY-MM-DD_HH-MM-SS.<ext>`), carries embedded metadata
//! across the conversion and stamps the output file times to match. Video
//! export shells out to the system `ffmpeg`/`ffprobe` binaries; image work is
//! done in-process.

pub mod batch;
pub mod error;
pub mod exif;
pub mod ffmpeg;
pub mod finalize;
pub mod image;
pub mod media;
pub mod metadata;
pub mod naming;
pub mod source;
pub mod video;

pub use self::batch::{BatchConfig, BatchPhase, BatchRunner, BatchSummary, ConversionOutcome};
pub use self::error::{ConvertError, Result};
pub use self::ffmpeg::{FfmpegBackend, FfmpegCommand, FfmpegError, VideoProbe};
pub use self::image::{ImageConfig, ImageConverter};
pub use self::media::{
    CaptureMetadata, Converted, Dimensions, ExportStrategy, GeoPoint, MediaKind, MediaRef,
};
pub use self::metadata::{TagDict, TagEntry, TagValue};
pub use self::source::{Authorization, LibraryConfig, LocalLibrary, MediaSource};
pub use self::video::{ExportBackend, VideoConfig, VideoContainer, VideoConverter};
