//! Boundary codecs between JPEG payloads and the generic tag dictionary.
//!
//! Reading uses kamadak-exif for the TIFF/EXIF/GPS/Interop groups and a small
//! APP13 walker for the IPTC group. Writing builds a fresh EXIF block with
//! little_exif and a Photoshop-3.0 APP13 resource by hand, then splices both
//! into the re-encoded JPEG with img-parts. An unreadable or absent metadata
//! block yields an empty dictionary, never an error: a camera JPEG without
//! EXIF is still convertible.
//!
//! The local module is named like the kamadak-exif crate, so crate paths below
//! are spelled `::exif`.

use std::io::Cursor;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use img_parts::jpeg::{Jpeg, JpegSegment};
use img_parts::{Bytes, ImageEXIF};
use little_exif::endian::Endian;
use little_exif::exif_tag::ExifTag;
use little_exif::exif_tag_format::ExifTagFormat;
use little_exif::filetype::FileExtension;
use little_exif::ifd::ExifTagGroup;
use little_exif::metadata::Metadata;
use tracing::debug;

use crate::error::{ConvertError, Result};
use crate::media::GeoPoint;
use crate::metadata::{
    ratio, TagDict, TagEntry, TagValue, GROUP_EXIF, GROUP_GPS, GROUP_INTEROP, GROUP_IPTC,
    GROUP_TIFF,
};

// Well-known tag ids used by the surgical overrides.
pub const TAG_IMAGE_DESCRIPTION: u16 = 0x010E;
pub const TAG_DATETIME_ORIGINAL: u16 = 0x9003;
pub const TAG_IPTC_OBJECT_NAME: u16 = 0x0205;

const MARKER_APP1: u8 = 0xE1;
const MARKER_APP13: u8 = 0xED;
const PHOTOSHOP_HEADER: &[u8] = b"Photoshop 3.0\0";
const PHOTOSHOP_8BIM: &[u8] = b"8BIM";
const IPTC_RESOURCE_ID: u16 = 0x0404;

// little_exif as_u8_vec(JPEG) prepends the APP1 marker, length and "Exif\0\0";
// img-parts set_exif wants only the TIFF data after that.
const APP1_EXIF_OVERHEAD: usize = 10;

/// Decodes every embedded metadata group of a JPEG payload. Non-JPEG payloads
/// contribute whatever kamadak-exif can pull out of the container (TIFF, HEIF)
/// and no IPTC.
pub fn read_tag_dict(payload: &[u8]) -> TagDict {
    let mut dict = TagDict::new();

    let mut cursor = Cursor::new(payload);
    match ::exif::Reader::new().read_from_container(&mut cursor) {
        Ok(parsed) => {
            for field in parsed.fields() {
                if field.ifd_num != ::exif::In::PRIMARY {
                    continue;
                }
                let group = match field.tag.0 {
                    ::exif::Context::Tiff => GROUP_TIFF,
                    ::exif::Context::Exif => GROUP_EXIF,
                    ::exif::Context::Gps => GROUP_GPS,
                    ::exif::Context::Interop => GROUP_INTEROP,
                    _ => continue,
                };
                let name = field.tag.to_string();
                dict.insert(
                    group,
                    &name,
                    TagEntry {
                        id: field.tag.1,
                        value: decode_value(field),
                    },
                );
            }
        }
        Err(err) => debug!("no EXIF block in payload: {err}"),
    }

    read_iptc(payload, &mut dict);
    dict
}

fn decode_value(field: &::exif::Field) -> TagValue {
    use ::exif::Value;
    match &field.value {
        Value::Ascii(lines) => TagValue::Text(
            lines
                .iter()
                .map(|l| String::from_utf8_lossy(l).into_owned())
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        Value::Byte(v) => TagValue::Bytes(v.clone()),
        Value::Undefined(v, _) => TagValue::Bytes(v.clone()),
        Value::Short(v) => TagValue::Shorts(v.clone()),
        Value::Long(v) => TagValue::Longs(v.clone()),
        Value::Rational(v) => TagValue::Rationals(v.iter().map(|r| (r.num, r.denom)).collect()),
        Value::SRational(v) => TagValue::SRationals(v.iter().map(|r| (r.num, r.denom)).collect()),
        other => TagValue::Text(other.display_as(field.tag).to_string()),
    }
}

/// Walks APP13 "Photoshop 3.0" segments for the IPTC-IIM resource (0x0404)
/// and lifts its record-2 datasets into the IPTC group.
fn read_iptc(payload: &[u8], dict: &mut TagDict) {
    let Ok(jpeg) = Jpeg::from_bytes(Bytes::copy_from_slice(payload)) else {
        return;
    };
    for segment in jpeg.segments() {
        if segment.marker() != MARKER_APP13 || !segment.contents().starts_with(PHOTOSHOP_HEADER) {
            continue;
        }
        let data = segment.contents();
        let mut pos = PHOTOSHOP_HEADER.len();
        while pos + 12 <= data.len() {
            if &data[pos..pos + 4] != PHOTOSHOP_8BIM {
                break;
            }
            let resource_id = u16::from_be_bytes([data[pos + 4], data[pos + 5]]);
            // Pascal name string: 1 length byte + name, padded to even.
            let name_len = data[pos + 6] as usize;
            let name_padded = if (name_len + 1) % 2 == 0 {
                name_len + 1
            } else {
                name_len + 2
            };
            let data_start = pos + 6 + name_padded;
            if data_start + 4 > data.len() {
                break;
            }
            let data_len = u32::from_be_bytes([
                data[data_start],
                data[data_start + 1],
                data[data_start + 2],
                data[data_start + 3],
            ]) as usize;
            let body_start = data_start + 4;
            let body_end = (body_start + data_len).min(data.len());
            if resource_id == IPTC_RESOURCE_ID {
                read_iptc_datasets(&data[body_start..body_end], dict);
            }
            pos = body_start + data_len + data_len % 2;
        }
    }
}

fn read_iptc_datasets(iptc: &[u8], dict: &mut TagDict) {
    let mut pos = 0;
    while pos + 5 <= iptc.len() {
        if iptc[pos] != 0x1C {
            break;
        }
        let record = iptc[pos + 1];
        let dataset = iptc[pos + 2];
        let len = u16::from_be_bytes([iptc[pos + 3], iptc[pos + 4]]) as usize;
        let end = pos + 5 + len;
        if end > iptc.len() {
            break;
        }
        if record == 2 && dataset != 0 {
            let name = iptc_dataset_name(dataset);
            let text = String::from_utf8_lossy(&iptc[pos + 5..end]).into_owned();
            let id = ((record as u16) << 8) | dataset as u16;
            // Repeatable datasets (Keywords) are folded into one field.
            let joined = match dict.text(GROUP_IPTC, &name) {
                Some(existing) => format!("{existing}; {text}"),
                None => text,
            };
            dict.insert(GROUP_IPTC, &name, TagEntry::text(id, joined));
        }
        pos = end;
    }
}

fn iptc_dataset_name(dataset: u8) -> String {
    match dataset {
        5 => "ObjectName".to_string(),
        25 => "Keywords".to_string(),
        120 => "Caption".to_string(),
        other => format!("Dataset2:{other}"),
    }
}

/// Embeds the dictionary into a freshly encoded JPEG: EXIF-side groups as an
/// APP1 block, the IPTC group as an APP13 resource.
pub fn embed_tag_dict(jpeg_bytes: Vec<u8>, dict: &TagDict) -> Result<Vec<u8>> {
    let mut jpeg = Jpeg::from_bytes(Bytes::from(jpeg_bytes))
        .map_err(|e| ConvertError::EncodeFailed(format!("re-encoded JPEG is malformed: {e}")))?;

    if let Some(tiff) = build_exif_block(dict)? {
        jpeg.set_exif(Some(Bytes::from(tiff)));
    }
    if let Some(app13) = build_iptc_segment(dict) {
        let segments = jpeg.segments_mut();
        let existing = segments
            .iter()
            .position(|s| s.marker() == MARKER_APP13 && s.contents().starts_with(PHOTOSHOP_HEADER));
        match existing {
            Some(pos) => segments[pos] = app13,
            None => {
                // After the EXIF APP1 when present, otherwise near the front.
                let insert_at = segments
                    .iter()
                    .position(|s| s.marker() == MARKER_APP1 && s.contents().starts_with(b"Exif\0\0"))
                    .map(|p| p + 1)
                    .unwrap_or(1)
                    .min(segments.len());
                segments.insert(insert_at, app13);
            }
        }
    }

    Ok(jpeg.encoder().bytes().to_vec())
}

fn build_exif_block(dict: &TagDict) -> Result<Option<Vec<u8>>> {
    let groups = [
        (GROUP_TIFF, ExifTagGroup::GENERIC),
        (GROUP_EXIF, ExifTagGroup::EXIF),
        (GROUP_GPS, ExifTagGroup::GPS),
        (GROUP_INTEROP, ExifTagGroup::INTEROP),
    ];
    let mut metadata = Metadata::new();
    let mut wrote = false;
    for (group_name, ifd) in groups {
        let Some(fields) = dict.group(group_name) else {
            continue;
        };
        for (name, entry) in fields {
            let (format, raw) = encode_value(&entry.value);
            match ExifTag::from_u16_with_data(entry.id, &format, &raw, &Endian::Little, &ifd) {
                Ok(tag) => {
                    metadata.set_tag(tag);
                    wrote = true;
                }
                Err(_) => debug!("skipping unencodable field {group_name}:{name}"),
            }
        }
    }
    if !wrote {
        return Ok(None);
    }
    let bytes = metadata
        .as_u8_vec(FileExtension::JPEG)
        .map_err(|e| ConvertError::EncodeFailed(format!("serializing EXIF block: {e}")))?;
    Ok((bytes.len() > APP1_EXIF_OVERHEAD).then(|| bytes[APP1_EXIF_OVERHEAD..].to_vec()))
}

fn encode_value(value: &TagValue) -> (ExifTagFormat, Vec<u8>) {
    match value {
        TagValue::Text(s) => {
            let mut raw = s.as_bytes().to_vec();
            raw.push(0);
            (ExifTagFormat::STRING, raw)
        }
        TagValue::Bytes(b) => (ExifTagFormat::INT8U, b.clone()),
        TagValue::Shorts(v) => (
            ExifTagFormat::INT16U,
            v.iter().flat_map(|n| n.to_le_bytes()).collect(),
        ),
        TagValue::Longs(v) => (
            ExifTagFormat::INT32U,
            v.iter().flat_map(|n| n.to_le_bytes()).collect(),
        ),
        TagValue::Rationals(v) => {
            let mut raw = Vec::with_capacity(v.len() * 8);
            for &(num, denom) in v {
                raw.extend_from_slice(&num.to_le_bytes());
                raw.extend_from_slice(&denom.to_le_bytes());
            }
            (ExifTagFormat::RATIONAL64U, raw)
        }
        TagValue::SRationals(v) => {
            let mut raw = Vec::with_capacity(v.len() * 8);
            for &(num, denom) in v {
                raw.extend_from_slice(&num.to_le_bytes());
                raw.extend_from_slice(&denom.to_le_bytes());
            }
            (ExifTagFormat::RATIONAL64S, raw)
        }
    }
}

fn build_iptc_segment(dict: &TagDict) -> Option<JpegSegment> {
    let fields = dict.group(GROUP_IPTC)?;

    let mut datasets = Vec::new();
    // Record version (2:0) is mandatory and must come first.
    datasets.extend_from_slice(&[0x1C, 0x02, 0x00, 0x00, 0x02, 0x00, 0x02]);
    for entry in fields.values() {
        let dataset = (entry.id & 0xFF) as u8;
        let Some(text) = entry.value.as_text() else {
            continue;
        };
        if dataset == 0 || text.is_empty() {
            continue;
        }
        let bytes = text.as_bytes();
        let len = bytes.len().min(2000);
        datasets.extend_from_slice(&[0x1C, 0x02, dataset]);
        datasets.extend_from_slice(&(len as u16).to_be_bytes());
        datasets.extend_from_slice(&bytes[..len]);
    }

    let mut contents = PHOTOSHOP_HEADER.to_vec();
    contents.extend_from_slice(PHOTOSHOP_8BIM);
    contents.extend_from_slice(&IPTC_RESOURCE_ID.to_be_bytes());
    contents.extend_from_slice(&[0x00, 0x00]); // empty pascal name, padded
    contents.extend_from_slice(&(datasets.len() as u32).to_be_bytes());
    contents.extend_from_slice(&datasets);
    if datasets.len() % 2 != 0 {
        contents.push(0x00);
    }
    Some(JpegSegment::new_with_contents(
        MARKER_APP13,
        Bytes::from(contents),
    ))
}

/// Reads the GPS group back into a decimal-degree point.
pub fn gps_point(dict: &TagDict) -> Option<GeoPoint> {
    let mut latitude = dms_to_decimal(&dict.get(GROUP_GPS, "GPSLatitude")?.value)?;
    let mut longitude = dms_to_decimal(&dict.get(GROUP_GPS, "GPSLongitude")?.value)?;
    if dict.text(GROUP_GPS, "GPSLatitudeRef").map(str::trim) == Some("S") {
        latitude = -latitude;
    }
    if dict.text(GROUP_GPS, "GPSLongitudeRef").map(str::trim) == Some("W") {
        longitude = -longitude;
    }
    let altitude = dict
        .get(GROUP_GPS, "GPSAltitude")
        .and_then(|e| e.value.first_rational());
    Some(GeoPoint {
        latitude,
        longitude,
        altitude,
    })
}

fn dms_to_decimal(value: &TagValue) -> Option<f64> {
    match value {
        TagValue::Rationals(v) if v.len() >= 3 => {
            Some(ratio(v[0].0, v[0].1) + ratio(v[1].0, v[1].1) / 60.0 + ratio(v[2].0, v[2].1) / 3600.0)
        }
        _ => None,
    }
}

/// Looks up the capture instant in descending order of trustworthiness:
/// DateTimeOriginal, then DateTimeDigitized, then the TIFF DateTime.
pub fn capture_instant(dict: &TagDict) -> Option<DateTime<Local>> {
    const CANDIDATES: [(&str, &str); 3] = [
        (GROUP_EXIF, "DateTimeOriginal"),
        (GROUP_EXIF, "DateTimeDigitized"),
        (GROUP_TIFF, "DateTime"),
    ];
    for (group, name) in CANDIDATES {
        let Some(text) = dict.text(group, name) else {
            continue;
        };
        if let Ok(naive) = NaiveDateTime::parse_from_str(text.trim(), "%Y:%m:%d %H:%M:%S") {
            if let Some(instant) = Local.from_local_datetime(&naive).earliest() {
                return Some(instant);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::GROUP_GPS;
    use chrono::TimeZone;

    fn bare_jpeg() -> Vec<u8> {
        let img = ::image::RgbImage::from_pixel(8, 8, ::image::Rgb([10, 200, 40]));
        let mut out = Vec::new();
        let mut encoder = ::image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 90);
        encoder.encode_image(&img).unwrap();
        out
    }

    fn gps_dict(lat: f64, lon: f64) -> TagDict {
        let mut dict = TagDict::new();
        let micro = |deg: f64| ((deg.abs() * 1_000_000.0).round() as u32, 1_000_000u32);
        dict.insert(
            GROUP_GPS,
            "GPSLatitudeRef",
            TagEntry::text(0x0001, if lat >= 0.0 { "N" } else { "S" }),
        );
        dict.insert(
            GROUP_GPS,
            "GPSLatitude",
            TagEntry {
                id: 0x0002,
                value: TagValue::Rationals(vec![micro(lat), (0, 1), (0, 1)]),
            },
        );
        dict.insert(
            GROUP_GPS,
            "GPSLongitudeRef",
            TagEntry::text(0x0003, if lon >= 0.0 { "E" } else { "W" }),
        );
        dict.insert(
            GROUP_GPS,
            "GPSLongitude",
            TagEntry {
                id: 0x0004,
                value: TagValue::Rationals(vec![micro(lon), (0, 1), (0, 1)]),
            },
        );
        dict
    }

    #[test]
    fn embed_and_read_round_trip() {
        let mut dict = gps_dict(37.3323, -122.0312);
        dict.insert(
            GROUP_EXIF,
            "DateTimeOriginal",
            TagEntry::text(TAG_DATETIME_ORIGINAL, "2021:07:04 12:30:05"),
        );
        dict.insert(
            GROUP_IPTC,
            "ObjectName",
            TagEntry::text(TAG_IPTC_OBJECT_NAME, "2021-07-04_12-30-05"),
        );

        let embedded = embed_tag_dict(bare_jpeg(), &dict).unwrap();
        let read_back = read_tag_dict(&embedded);

        assert_eq!(
            read_back.text(GROUP_EXIF, "DateTimeOriginal"),
            Some("2021:07:04 12:30:05")
        );
        assert_eq!(
            read_back.text(GROUP_IPTC, "ObjectName"),
            Some("2021-07-04_12-30-05")
        );
        let point = gps_point(&read_back).unwrap();
        assert!((point.latitude - 37.3323).abs() < 1e-5);
        assert!((point.longitude + 122.0312).abs() < 1e-5);
    }

    #[test]
    fn capture_instant_prefers_datetime_original() {
        let mut dict = TagDict::new();
        dict.insert(
            GROUP_TIFF,
            "DateTime",
            TagEntry::text(0x0132, "2020:01:01 00:00:00"),
        );
        dict.insert(
            GROUP_EXIF,
            "DateTimeOriginal",
            TagEntry::text(TAG_DATETIME_ORIGINAL, "2019:06:15 08:45:30"),
        );
        let instant = capture_instant(&dict).unwrap();
        assert_eq!(
            instant,
            Local.with_ymd_and_hms(2019, 6, 15, 8, 45, 30).unwrap()
        );
    }

    #[test]
    fn unreadable_payload_yields_empty_dict() {
        let dict = read_tag_dict(b"definitely not a jpeg");
        assert!(dict.is_empty());
    }

    #[test]
    fn southern_western_hemispheres_negate() {
        let dict = gps_dict(-33.8568, -70.6483);
        let point = gps_point(&dict).unwrap();
        assert!(point.latitude < 0.0);
        assert!(point.longitude < 0.0);
    }
}
