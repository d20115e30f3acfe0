//! Filename and timestamp formatting.
//!
//! All functions here are pure and use the local timezone of the running
//! process, so output names are deterministic within one run.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::media::GeoPoint;

/// `YYYY-MM-DD_HH-MM-SS`, zero-padded, 24-hour clock. Used both as the output
/// filename (sans extension) and as the title metadata of every output.
pub fn filename_stem(instant: &DateTime<Local>) -> String {
    instant.format("%Y-%m-%d_%H-%M-%S").to_string()
}

/// `YYYY:MM:DD HH:MM:SS`, the EXIF date convention.
pub fn embedded_datetime(instant: &DateTime<Local>) -> String {
    instant.format("%Y:%m:%d %H:%M:%S").to_string()
}

/// Deterministic output path: a pure function of capture instant and
/// extension. Two items sharing an instant and kind collide here by design.
pub fn output_path(dir: &Path, instant: &DateTime<Local>, extension: &str) -> PathBuf {
    dir.join(format!("{}.{}", filename_stem(instant), extension))
}

/// ISO 6709 geographic point string, `±DD.DDDDDD±DDD.DDDDDD/`, as used in
/// QuickTime/MP4 container-level location tags.
pub fn iso6709_point(point: &GeoPoint) -> String {
    format!("{:+010.6}{:+011.6}/", point.latitude, point.longitude)
}

/// Inverse of [`iso6709_point`], tolerant of an appended altitude and of the
/// unpadded forms some writers produce. Returns `None` when the string does
/// not carry at least latitude and longitude.
pub fn parse_iso6709(s: &str) -> Option<GeoPoint> {
    let s = s.trim().trim_end_matches('/');
    if s.is_empty() {
        return None;
    }
    let mut fields = Vec::new();
    let mut start = 0;
    for (i, c) in s.char_indices().skip(1) {
        if c == '+' || c == '-' {
            fields.push(&s[start..i]);
            start = i;
        }
    }
    fields.push(&s[start..]);
    if fields.len() < 2 {
        return None;
    }
    let latitude: f64 = fields[0].parse().ok()?;
    let longitude: f64 = fields[1].parse().ok()?;
    let altitude = fields.get(2).and_then(|f| f.parse().ok());
    Some(GeoPoint {
        latitude,
        longitude,
        altitude,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stem_is_zero_padded() {
        let instant = Local.with_ymd_and_hms(2022, 3, 9, 7, 4, 1).unwrap();
        assert_eq!(filename_stem(&instant), "2022-03-09_07-04-01");
    }

    #[test]
    fn embedded_datetime_uses_exif_convention() {
        let instant = Local.with_ymd_and_hms(2022, 11, 30, 23, 59, 58).unwrap();
        assert_eq!(embedded_datetime(&instant), "2022:11:30 23:59:58");
    }

    #[test]
    fn output_path_is_deterministic() {
        let instant = Local.with_ymd_and_hms(2021, 7, 4, 12, 30, 5).unwrap();
        let path = output_path(Path::new("/out"), &instant, "jpg");
        assert_eq!(path, Path::new("/out/2021-07-04_12-30-05.jpg"));
    }

    #[test]
    fn iso6709_shapes() {
        let paris = GeoPoint {
            latitude: 48.8577,
            longitude: 2.295,
            altitude: None,
        };
        assert_eq!(iso6709_point(&paris), "+48.857700+002.295000/");

        let cupertino = GeoPoint {
            latitude: 37.3323,
            longitude: -122.0312,
            altitude: None,
        };
        assert_eq!(iso6709_point(&cupertino), "+37.332300-122.031200/");
    }

    #[test]
    fn iso6709_round_trip() {
        let point = GeoPoint {
            latitude: -33.8568,
            longitude: 151.2153,
            altitude: None,
        };
        let parsed = parse_iso6709(&iso6709_point(&point)).unwrap();
        assert!((parsed.latitude - point.latitude).abs() < 1e-6);
        assert!((parsed.longitude - point.longitude).abs() < 1e-6);
        assert!(parsed.altitude.is_none());
    }

    #[test]
    fn iso6709_parses_altitude_and_rejects_garbage() {
        let parsed = parse_iso6709("+37.332300-122.031200+052.250/").unwrap();
        assert_eq!(parsed.altitude, Some(52.25));
        assert!(parse_iso6709("").is_none());
        assert!(parse_iso6709("not a location").is_none());
    }
}
