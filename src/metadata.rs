//! Generic embedded-metadata dictionary.
//!
//! Both conversion engines move metadata around as a mapping of group name
//! (EXIF, TIFF, GPS, IPTC, Interop) to field name to value. Format-specific
//! encoders and decoders translate to and from this shape at the I/O boundary
//! only (`exif` module for still images, `ffmpeg` for containers). `BTreeMap`
//! keeps iteration deterministic, which keeps re-runs byte-stable.

use std::collections::BTreeMap;

pub const GROUP_TIFF: &str = "TIFF";
pub const GROUP_EXIF: &str = "EXIF";
pub const GROUP_GPS: &str = "GPS";
pub const GROUP_IPTC: &str = "IPTC";
pub const GROUP_INTEROP: &str = "Interop";

/// A field value, shaped after the TIFF/EXIF value types so the read boundary
/// is lossless for the numeric forms that matter (GPS rationals especially).
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Text(String),
    Bytes(Vec<u8>),
    Shorts(Vec<u16>),
    Longs(Vec<u32>),
    Rationals(Vec<(u32, u32)>),
    SRationals(Vec<(i32, i32)>),
}

impl TagValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            TagValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// First rational as a float, for single-valued fields like GPSAltitude.
    pub fn first_rational(&self) -> Option<f64> {
        match self {
            TagValue::Rationals(v) => v.first().map(|&(n, d)| ratio(n, d)),
            TagValue::SRationals(v) => v
                .first()
                .map(|&(n, d)| if d == 0 { 0.0 } else { n as f64 / d as f64 }),
            _ => None,
        }
    }
}

pub(crate) fn ratio(num: u32, denom: u32) -> f64 {
    if denom == 0 {
        0.0
    } else {
        num as f64 / denom as f64
    }
}

/// One field: the numeric tag id within its group's IFD (or, for IPTC, the
/// record/dataset pair packed big-endian) plus the decoded value. The id is
/// what the boundary encoders need to write the field back out.
#[derive(Debug, Clone, PartialEq)]
pub struct TagEntry {
    pub id: u16,
    pub value: TagValue,
}

impl TagEntry {
    pub fn text(id: u16, value: impl Into<String>) -> Self {
        Self {
            id,
            value: TagValue::Text(value.into()),
        }
    }
}

/// Ordered group -> field -> entry mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagDict {
    groups: BTreeMap<String, BTreeMap<String, TagEntry>>,
}

impl TagDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a field. Replacement (not accumulation) is what
    /// keeps repeated conversions from growing duplicate title entries.
    pub fn insert(&mut self, group: &str, name: &str, entry: TagEntry) {
        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(name.to_string(), entry);
    }

    pub fn get(&self, group: &str, name: &str) -> Option<&TagEntry> {
        self.groups.get(group)?.get(name)
    }

    pub fn text(&self, group: &str, name: &str) -> Option<&str> {
        self.get(group, name)?.value.as_text()
    }

    pub fn remove(&mut self, group: &str, name: &str) -> Option<TagEntry> {
        let fields = self.groups.get_mut(group)?;
        let removed = fields.remove(name);
        if fields.is_empty() {
            self.groups.remove(group);
        }
        removed
    }

    pub fn group(&self, group: &str) -> Option<&BTreeMap<String, TagEntry>> {
        self.groups.get(group)
    }

    pub fn iter_groups(&self) -> impl Iterator<Item = (&str, &BTreeMap<String, TagEntry>)> {
        self.groups.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn field_count(&self) -> usize {
        self.groups.values().map(|g| g.len()).sum()
    }
}
