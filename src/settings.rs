//! LibRaw output parameters
//!
//! Every field is optional: only the settings that are present get written to
//! LibRaw's `libraw_output_params_t`, everything else keeps LibRaw's default.
//! Field names match the LibRaw parameter names so a settings object can be
//! written as plain JSON.

use serde::{Deserialize, Serialize};

/// Output color space codes accepted by `output_color`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    /// Raw color space
    Raw = 0,
    /// sRGB (D65)
    SRGB = 1,
    /// Adobe RGB (1998) (D65)
    AdobeRGB = 2,
    /// Wide-gamut RGB (D50)
    WideGamutRGB = 3,
    /// Kodak ProPhoto RGB (D50)
    ProPhotoRGB = 4,
    /// XYZ
    XYZ = 5,
}

/// RAW processing settings passed to `open`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // ---- Arrays ----
    /// Rectangle used for white balance calculation [x, y, w, h]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub greybox: Option<[u32; 4]>,

    /// Output crop [x, y, w, h]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cropbox: Option<[u32; 4]>,

    /// Chromatic aberration correction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aber: Option<[f64; 4]>,

    /// Gamma curve; gamm[0] is the inverted power, gamm[1] the toe slope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gamm: Option<[f64; 6]>,

    /// Custom white balance multipliers [r, g, b, g2]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_mul: Option<[f32; 4]>,

    /// Per-channel black level override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_cblack: Option<[i32; 4]>,

    // ---- Floats ----
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bright: Option<f32>,

    /// Wavelet denoising threshold
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_bright_thr: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub adjust_maximum_thr: Option<f32>,

    /// Exposure shift in linear scale (requires `exp_correc`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp_shift: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp_preser: Option<f32>,

    // ---- Integers ----
    #[serde(skip_serializing_if = "Option::is_none")]
    pub half_size: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub four_color_rgb: Option<i32>,

    /// 0 = clip, 1 = unclip, 2 = blend, 3+ = rebuild
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlight: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_auto_wb: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_camera_wb: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_camera_matrix: Option<i32>,

    /// See [`ColorSpace`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_color: Option<i32>,

    /// Output bits per sample (8 or 16)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_bps: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tiff: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_flags: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_flip: Option<i32>,

    /// Demosaic algorithm: 0 = linear, 3 = AHD, 11 = DHT, 12 = AAHD
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_qual: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_black: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_sat: Option<i32>,

    /// Median filter passes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub med_passes: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_auto_bright: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_fuji_rotate: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub green_matching: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dcb_iterations: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dcb_enhance_fl: Option<i32>,

    /// FBDD noise reduction (0 = off, 1 = light, 2 = full)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fbdd_noiserd: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp_correc: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_auto_scale: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_interpolation: Option<i32>,

    // ---- Strings ----
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_profile: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera_profile: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bad_pixels: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dark_frame: Option<String>,
}

impl Settings {
    /// Fast preview preset - optimized for speed
    /// Use for: Quick culling, thumbnail generation, preview rendering
    pub fn fast_preview() -> Self {
        Self {
            use_camera_wb: Some(0),
            use_auto_wb: Some(0),
            output_bps: Some(8),
            output_color: Some(ColorSpace::SRGB as i32),
            no_auto_bright: Some(1),
            highlight: Some(0), // Clip (fastest)
            half_size: Some(1), // 2x2 downsampling
            user_qual: Some(0),
            ..Default::default()
        }
    }

    /// Maximum quality preset - for final processing and archival
    /// Linear 16-bit ProPhoto output with noise reduction and highlight rebuild
    pub fn maximum() -> Self {
        Self {
            use_camera_wb: Some(0),
            use_auto_wb: Some(0),
            output_bps: Some(16),
            output_color: Some(ColorSpace::ProPhotoRGB as i32),
            gamm: Some([1.0, 1.0, 0.0, 0.0, 0.0, 0.0]),
            no_auto_bright: Some(1),
            highlight: Some(3), // Rebuild
            threshold: Some(100.0),
            med_passes: Some(1),
            fbdd_noiserd: Some(2),
            four_color_rgb: Some(1),
            user_qual: Some(12), // AAHD
            ..Default::default()
        }
    }

    /// Look up a preset by name
    pub fn preset(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "fast" | "fast_preview" | "preview" => Some(Self::fast_preview()),
            "max" | "maximum" => Some(Self::maximum()),
            "default" | "none" => Some(Self::default()),
            _ => None,
        }
    }
}
