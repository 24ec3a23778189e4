//! LibRaw-backed native module via FFI
//!
//! One `libraw_data_t` handle per decoder. `open` applies the present
//! settings to the handle's output params, then runs `open_buffer`, `unpack`
//! and `dcraw_process`. The file buffer is kept alive alongside the handle
//! since LibRaw reads from it without copying.

use crate::error::{RawError, Result};
use crate::image::{ImageData, PixelBuffer};
use crate::metadata::NativeMetadata;
use crate::native::{ModuleLoader, NativeDecoder, NativeModule, SharedModule};
use crate::settings::Settings;
use async_trait::async_trait;
use rsraw_sys as sys;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::ptr::NonNull;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

static LIBRAW: OnceLock<Arc<SharedModule>> = OnceLock::new();

/// Process-wide LibRaw module handle, loaded on first use
pub fn shared_module() -> Arc<SharedModule> {
    Arc::clone(LIBRAW.get_or_init(|| Arc::new(SharedModule::new(LibRawLoader))))
}

// ============================================================================
// Module
// ============================================================================

/// Loads the statically linked LibRaw and checks it answers
pub struct LibRawLoader;

#[async_trait]
impl ModuleLoader for LibRawLoader {
    async fn load(&self) -> Result<Arc<dyn NativeModule>> {
        // SAFETY: both calls only read static library data
        let (version, camera_count) = unsafe {
            let version = sys::libraw_version();
            if version.is_null() {
                return Err(RawError::Init("libraw_version() returned null".to_string()));
            }
            (
                CStr::from_ptr(version).to_string_lossy().into_owned(),
                sys::libraw_cameraCount(),
            )
        };

        if camera_count <= 0 {
            return Err(RawError::Init(format!(
                "LibRaw {} reports no supported cameras", version
            )));
        }

        info!("📷 LibRaw {} loaded ({} cameras supported)", version, camera_count);

        Ok(Arc::new(LibRawModule))
    }
}

/// The loaded LibRaw library
pub struct LibRawModule;

impl NativeModule for LibRawModule {
    fn create_decoder(&self) -> Box<dyn NativeDecoder> {
        Box::new(LibRawDecoder::new())
    }
}

// ============================================================================
// Decoder
// ============================================================================

/// A LibRaw processor holding one opened RAW image
pub struct LibRawDecoder {
    handle: Option<NonNull<sys::libraw_data_t>>,
    /// Backing storage of the opened file, read by LibRaw in place
    buffer: Vec<u8>,
    /// Owners of the string params handed to LibRaw
    param_strings: ParamStrings,
    opened: bool,
}

// SAFETY: the handle is only touched through `&mut self`; LibRaw processors
// are not bound to the thread that created them.
unsafe impl Send for LibRawDecoder {}

impl LibRawDecoder {
    pub fn new() -> Self {
        Self {
            handle: None,
            buffer: Vec::new(),
            param_strings: ParamStrings::default(),
            opened: false,
        }
    }

    fn handle(&mut self) -> Result<*mut sys::libraw_data_t> {
        if let Some(handle) = self.handle {
            return Ok(handle.as_ptr());
        }
        // SAFETY: libraw_init has no preconditions; null signals failure
        let raw = unsafe { sys::libraw_init(0) };
        let handle = NonNull::new(raw)
            .ok_or_else(|| RawError::native("LibRaw not initialized"))?;
        self.handle = Some(handle);
        Ok(handle.as_ptr())
    }

    fn opened_handle(&self) -> Result<*mut sys::libraw_data_t> {
        match self.handle {
            Some(handle) if self.opened => Ok(handle.as_ptr()),
            _ => Err(RawError::native("LibRaw: no image opened")),
        }
    }
}

impl Default for LibRawDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LibRawDecoder {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            // SAFETY: handle came from libraw_init and is closed exactly once
            unsafe { sys::libraw_close(handle.as_ptr()) };
        }
    }
}

fn check(step: &str, ret: c_int) -> Result<()> {
    if ret == 0 {
        return Ok(());
    }
    // SAFETY: libraw_strerror returns a static string for any code
    let reason = unsafe {
        let msg = sys::libraw_strerror(ret);
        if msg.is_null() {
            String::new()
        } else {
            CStr::from_ptr(msg).to_string_lossy().into_owned()
        }
    };
    if reason.is_empty() {
        Err(RawError::native(format!("LibRaw: {}() failed with code {}", step, ret)))
    } else {
        Err(RawError::native(format!(
            "LibRaw: {}() failed with code {} ({})", step, ret, reason
        )))
    }
}

impl NativeDecoder for LibRawDecoder {
    fn open(&mut self, buffer: Vec<u8>, settings: &Settings) -> Result<()> {
        let lr = self.handle()?;
        self.opened = false;

        // SAFETY: lr is a live handle owned by self
        let params = unsafe { &mut (*lr).params };
        apply_settings(params, settings, &mut self.param_strings)?;

        let previous = std::mem::replace(&mut self.buffer, buffer);
        debug!("LibRaw: opening {} byte buffer", self.buffer.len());

        // SAFETY: self.buffer outlives every use LibRaw makes of it; it is only
        // replaced by the next open, after which LibRaw reads the new buffer
        unsafe {
            check(
                "open_buffer",
                sys::libraw_open_buffer(lr, self.buffer.as_ptr() as *const _, self.buffer.len() as _),
            )?;
            drop(previous);
            check("unpack", sys::libraw_unpack(lr))?;
            check("dcraw_process", sys::libraw_dcraw_process(lr))?;
        }

        self.opened = true;
        Ok(())
    }

    fn metadata(&mut self, full_output: bool) -> Result<NativeMetadata> {
        let lr = self.opened_handle()?;

        // SAFETY: lr is a live handle with an opened image
        unsafe {
            let sizes = &(*lr).sizes;
            let idata = &(*lr).idata;
            let other = &(*lr).other;
            let thumbnail = &(*lr).thumbnail;
            let lens = &(*lr).lens;

            let cstr = |ptr: *const c_char| -> String {
                CStr::from_ptr(ptr).to_string_lossy().to_string()
            };
            let non_empty = |s: String| if s.is_empty() { None } else { Some(s) };

            let mut meta = NativeMetadata {
                width: Some(sizes.width as u32),
                height: Some(sizes.height as u32),
                camera_make: Some(cstr(idata.make.as_ptr())),
                camera_model: Some(cstr(idata.model.as_ptr())),
                iso_speed: Some(other.iso_speed),
                shutter: Some(other.shutter),
                aperture: Some(other.aperture),
                focal_len: Some(other.focal_len),
                timestamp: Some(other.timestamp as f64),
                thumb_format: Some(thumbnail.tformat as i64),
                ..Default::default()
            };

            if full_output {
                meta.raw_width = Some(sizes.raw_width as u32);
                meta.raw_height = Some(sizes.raw_height as u32);
                meta.top_margin = Some(sizes.top_margin as u32);
                meta.left_margin = Some(sizes.left_margin as u32);
                meta.shot_order = Some(other.shot_order as u32);
                meta.desc = Some(cstr(other.desc.as_ptr()));
                meta.artist = Some(cstr(other.artist.as_ptr()));
                meta.thumb_width = Some(thumbnail.twidth as u32);
                meta.thumb_height = Some(thumbnail.theight as u32);
                meta.lens_make = non_empty(cstr(lens.LensMake.as_ptr()));
                meta.lens_model = non_empty(cstr(lens.Lens.as_ptr()));
                meta.focal_len_35mm = if lens.FocalLengthIn35mmFormat > 0 {
                    Some(lens.FocalLengthIn35mmFormat as u32)
                } else {
                    None
                };
            }

            Ok(meta)
        }
    }

    fn image_data(&mut self) -> Result<ImageData> {
        let lr = self.opened_handle()?;

        let mut errc: c_int = 0;
        // SAFETY: lr is a live handle with a processed image
        let raw = unsafe { sys::libraw_dcraw_make_mem_image(lr, &mut errc) };
        let image = MemImage(NonNull::new(raw).ok_or_else(|| {
            RawError::native(format!("LibRaw: dcraw_make_mem_image() failed with code {}", errc))
        })?);

        // SAFETY: the mem image is valid until MemImage drops; data_size bytes
        // follow the header
        let (width, height, colors, bits, bytes) = unsafe {
            let img = &*image.0.as_ptr();
            let bytes = std::slice::from_raw_parts(img.data.as_ptr(), img.data_size as usize);
            (img.width as u32, img.height as u32, img.colors as u32, img.bits as u32, bytes)
        };

        let data = match bits {
            8 => PixelBuffer::U8(bytes.to_vec()),
            16 => PixelBuffer::U16(
                bytes
                    .chunks_exact(2)
                    .map(|pair| u16::from_ne_bytes([pair[0], pair[1]]))
                    .collect(),
            ),
            _ => return Err(RawError::native("Unsupported bit depth")),
        };

        debug!("LibRaw: decoded {}x{}x{} at {} bits", width, height, colors, bits);

        Ok(ImageData { width, height, colors, bits, data })
    }
}

/// Owns a `dcraw_make_mem_image` result
struct MemImage(NonNull<sys::libraw_processed_image_t>);

impl Drop for MemImage {
    fn drop(&mut self) {
        // SAFETY: pointer came from libraw_dcraw_make_mem_image, freed once
        unsafe { sys::libraw_dcraw_clear_mem(self.0.as_ptr()) };
    }
}

// ============================================================================
// Settings
// ============================================================================

macro_rules! set_scalars {
    ($params:ident, $settings:ident, $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = $settings.$field {
                $params.$field = value as _;
            }
        )+
    };
}

macro_rules! set_arrays {
    ($params:ident, $settings:ident, $($field:ident),+ $(,)?) => {
        $(
            if let Some(values) = &$settings.$field {
                for (slot, value) in $params.$field.iter_mut().zip(values.iter()) {
                    *slot = *value as _;
                }
            }
        )+
    };
}

macro_rules! set_strings {
    ($params:ident, $settings:ident, $owned:ident, $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = &$settings.$field {
                let replacement = if value.is_empty() {
                    None
                } else {
                    Some(CString::new(value.as_str()).map_err(|_| {
                        RawError::native(format!("LibRaw: {} contains a NUL byte", stringify!($field)))
                    })?)
                };
                $params.$field = replacement
                    .as_ref()
                    .map_or(std::ptr::null_mut(), |s| s.as_ptr() as *mut c_char);
                $owned.$field = replacement;
            }
        )+
    };
}

/// String params currently pointed to by the handle, one slot per field.
/// A new value replaces the slot after the param points at it.
#[derive(Default)]
struct ParamStrings {
    output_profile: Option<CString>,
    camera_profile: Option<CString>,
    bad_pixels: Option<CString>,
    dark_frame: Option<CString>,
}

/// Write every present setting into LibRaw's output params
fn apply_settings(
    params: &mut sys::libraw_output_params_t,
    settings: &Settings,
    owned: &mut ParamStrings,
) -> Result<()> {
    set_arrays!(params, settings, greybox, cropbox, aber, gamm, user_mul, user_cblack);

    set_scalars!(
        params, settings,
        bright, threshold, auto_bright_thr, adjust_maximum_thr, exp_shift, exp_preser,
        half_size, four_color_rgb, highlight, use_auto_wb, use_camera_wb, use_camera_matrix,
        output_color, output_bps, output_tiff, output_flags, user_flip, user_qual,
        user_black, user_sat, med_passes, no_auto_bright, use_fuji_rotate, green_matching,
        dcb_iterations, dcb_enhance_fl, fbdd_noiserd, exp_correc, no_auto_scale,
        no_interpolation,
    );

    set_strings!(params, settings, owned, output_profile, camera_profile, bad_pixels, dark_frame);

    Ok(())
}
