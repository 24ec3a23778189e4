//! RAW metadata records
//!
//! [`NativeMetadata`] is what the decoder hands back: every field optional,
//! since the abbreviated and full field sets (and older schemas) omit some of
//! them. [`Metadata`] is the facade's normalized view of the same record:
//!
//! - `thumb_format` code mapped to a [`ThumbFormat`] name
//! - `desc` with leading/trailing whitespace stripped
//! - `timestamp` converted from epoch seconds to a UTC date/time
//!
//! Each transform only runs when its field is present; absent stays absent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

// ============================================================================
// Native Record
// ============================================================================

/// Metadata exactly as produced by the native decoder
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeMetadata {
    // ---- Sizes ----
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_margin: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_margin: Option<u32>,

    // ---- Camera ----
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_make: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_model: Option<String>,

    // ---- Exposure ----
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iso_speed: Option<f32>,
    /// Shutter speed in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutter: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aperture: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focal_len: Option<f32>,
    /// Capture time, seconds since the Unix epoch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shot_order: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,

    // ---- Thumbnail ----
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumb_width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumb_height: Option<u32>,
    /// LibRaw thumbnail format code, see [`ThumbFormat`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumb_format: Option<i64>,

    // ---- Lens ----
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lens_make: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lens_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focal_len_35mm: Option<u32>,
}

// ============================================================================
// Thumbnail Format
// ============================================================================

/// Embedded thumbnail format, indexed by LibRaw's numeric code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThumbFormat {
    Unknown,
    Jpeg,
    Bitmap,
    Bitmap16,
    Layer,
    Rollei,
    H265,
}

impl ThumbFormat {
    /// Code table, position = numeric code
    pub const ALL: [ThumbFormat; 7] = [
        ThumbFormat::Unknown,
        ThumbFormat::Jpeg,
        ThumbFormat::Bitmap,
        ThumbFormat::Bitmap16,
        ThumbFormat::Layer,
        ThumbFormat::Rollei,
        ThumbFormat::H265,
    ];

    /// Map a numeric code; anything outside the table is `Unknown`
    pub fn from_code(code: i64) -> Self {
        usize::try_from(code)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .unwrap_or(ThumbFormat::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThumbFormat::Unknown => "unknown",
            ThumbFormat::Jpeg => "jpeg",
            ThumbFormat::Bitmap => "bitmap",
            ThumbFormat::Bitmap16 => "bitmap16",
            ThumbFormat::Layer => "layer",
            ThumbFormat::Rollei => "rollei",
            ThumbFormat::H265 => "h265",
        }
    }
}

impl fmt::Display for ThumbFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Normalized Record
// ============================================================================

/// Metadata as returned by [`crate::RawDecoder::metadata`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_margin: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_margin: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_make: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iso_speed: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutter: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aperture: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focal_len: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shot_order: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumb_width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumb_height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumb_format: Option<ThumbFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lens_make: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lens_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focal_len_35mm: Option<u32>,
}

impl From<NativeMetadata> for Metadata {
    fn from(native: NativeMetadata) -> Self {
        Metadata {
            width: native.width,
            height: native.height,
            raw_width: native.raw_width,
            raw_height: native.raw_height,
            top_margin: native.top_margin,
            left_margin: native.left_margin,
            camera_make: native.camera_make,
            camera_model: native.camera_model,
            iso_speed: native.iso_speed,
            shutter: native.shutter,
            aperture: native.aperture,
            focal_len: native.focal_len,
            timestamp: native.timestamp.and_then(epoch_to_datetime),
            shot_order: native.shot_order,
            desc: native.desc.map(|d| d.trim().to_string()),
            artist: native.artist,
            thumb_width: native.thumb_width,
            thumb_height: native.thumb_height,
            thumb_format: native.thumb_format.map(ThumbFormat::from_code),
            lens_make: native.lens_make,
            lens_model: native.lens_model,
            focal_len_35mm: native.focal_len_35mm,
        }
    }
}

/// Convert epoch seconds (fraction kept to the millisecond) to UTC
pub fn epoch_to_datetime(seconds: f64) -> Option<DateTime<Utc>> {
    let millis = (seconds * 1000.0).round();
    if !millis.is_finite() || millis.abs() > i64::MAX as f64 {
        warn!("Dropping unrepresentable timestamp {}", seconds);
        return None;
    }
    let converted = DateTime::from_timestamp_millis(millis as i64);
    if converted.is_none() {
        warn!("Dropping out-of-range timestamp {}", seconds);
    }
    converted
}

// ============================================================================
// Helper Methods on Metadata
// ============================================================================

impl Metadata {
    /// Get human-readable exposure summary
    pub fn exposure_summary(&self) -> Option<String> {
        if self.aperture.is_none() && self.shutter.is_none() && self.iso_speed.is_none() {
            return None;
        }

        let shutter = self.shutter.map(|s| {
            if s >= 1.0 {
                format!("{:.1}s", s)
            } else if s > 0.0 {
                format!("1/{:.0}s", 1.0 / s)
            } else {
                "?".to_string()
            }
        }).unwrap_or_else(|| "?".to_string());

        Some(format!("f/{:.1} {} ISO{:.0} {}mm",
            self.aperture.unwrap_or(0.0),
            shutter,
            self.iso_speed.unwrap_or(0.0),
            self.focal_len.unwrap_or(0.0)
        ))
    }
}
