//! Decoded image data

use crate::error::{RawError, Result};
use image::{DynamicImage, ImageBuffer, Luma, Rgb};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Element type of a transferable buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferKind {
    U8,
    U16,
}

impl BufferKind {
    pub fn bytes_per_element(&self) -> usize {
        match self {
            BufferKind::U8 => 1,
            BufferKind::U16 => 2,
        }
    }
}

/// Pixel samples, interleaved per pixel, row-major
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PixelBuffer {
    U8(Vec<u8>),
    U16(Vec<u16>),
}

impl PixelBuffer {
    pub fn kind(&self) -> BufferKind {
        match self {
            PixelBuffer::U8(_) => BufferKind::U8,
            PixelBuffer::U16(_) => BufferKind::U16,
        }
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        match self {
            PixelBuffer::U8(v) => v.len(),
            PixelBuffer::U16(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byte_len(&self) -> usize {
        self.len() * self.kind().bytes_per_element()
    }

    /// Address of the backing allocation
    pub fn as_ptr(&self) -> *const u8 {
        match self {
            PixelBuffer::U8(v) => v.as_ptr(),
            PixelBuffer::U16(v) => v.as_ptr() as *const u8,
        }
    }
}

/// A buffer handed across the worker boundary by ownership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub kind: BufferKind,
    pub byte_len: usize,
}

impl From<&PixelBuffer> for Transfer {
    fn from(buffer: &PixelBuffer) -> Self {
        Transfer {
            kind: buffer.kind(),
            byte_len: buffer.byte_len(),
        }
    }
}

/// Decoded image as returned by `image_data`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    /// Samples per pixel
    pub colors: u32,
    /// Bits per sample (8 or 16)
    pub bits: u32,
    pub data: PixelBuffer,
}

impl ImageData {
    /// Samples the dimensions call for
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.colors as usize
    }

    /// Buffers this result carries
    pub fn transfer_list(&self) -> Vec<Transfer> {
        vec![Transfer::from(&self.data)]
    }

    /// Convert to an `image` crate image (RGB or grayscale, 8 or 16 bit)
    pub fn to_dynamic_image(&self) -> Result<DynamicImage> {
        if self.data.len() != self.expected_len() {
            return Err(RawError::InvalidArguments(format!(
                "pixel buffer holds {} samples, {}x{}x{} expected",
                self.data.len(), self.width, self.height, self.colors
            )));
        }

        let (w, h) = (self.width, self.height);
        let mismatch = || RawError::Internal("Failed to create image from pixel data".to_string());

        let img = match (&self.data, self.colors) {
            (PixelBuffer::U8(v), 3) => DynamicImage::ImageRgb8(
                ImageBuffer::<Rgb<u8>, _>::from_raw(w, h, v.clone()).ok_or_else(mismatch)?,
            ),
            (PixelBuffer::U8(v), 1) => DynamicImage::ImageLuma8(
                ImageBuffer::<Luma<u8>, _>::from_raw(w, h, v.clone()).ok_or_else(mismatch)?,
            ),
            (PixelBuffer::U16(v), 3) => DynamicImage::ImageRgb16(
                ImageBuffer::<Rgb<u16>, _>::from_raw(w, h, v.clone()).ok_or_else(mismatch)?,
            ),
            (PixelBuffer::U16(v), 1) => DynamicImage::ImageLuma16(
                ImageBuffer::<Luma<u16>, _>::from_raw(w, h, v.clone()).ok_or_else(mismatch)?,
            ),
            (_, colors) => {
                return Err(RawError::InvalidArguments(format!(
                    "cannot export {} color channels", colors
                )))
            }
        };

        Ok(img)
    }

    /// Save as PNG
    pub fn save_png(&self, path: &Path) -> Result<()> {
        self.to_dynamic_image()?
            .save_with_format(path, image::ImageFormat::Png)
            .map_err(|e| RawError::Internal(format!("Failed to save image: {}", e)))
    }
}
