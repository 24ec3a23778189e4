//! Async decoder facade
//!
//! [`RawDecoder`] presents `open` / `metadata` / `image_data` over a native
//! decoder instance that is created in the background. Construction never
//! blocks and never fails: when a tokio runtime is running, loading starts
//! right away on a spawned task; otherwise it starts with the first call.
//! Every operation waits for the same per-facade readiness cell, so a load
//! failure surfaces (as [`RawError::Init`]) from each operation instead.
//!
//! ## Example
//!
//! ```rust,no_run
//! use soma_raw::{RawDecoder, Settings};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let decoder = RawDecoder::new();
//! let bytes = std::fs::read("photo.CR2")?;
//!
//! decoder.open(bytes, Settings::fast_preview()).await?;
//! let meta = decoder.metadata(true).await?;
//! println!("{:?} {:?}", meta.camera_make, meta.thumb_format);
//!
//! let image = decoder.image_data().await?;
//! println!("{}x{} @ {} bits", image.width, image.height, image.bits);
//! # Ok(())
//! # }
//! ```

use crate::error::{RawError, Result};
use crate::image::ImageData;
use crate::libraw;
use crate::metadata::Metadata;
use crate::native::{self, NativeDecoder, SharedModule};
use crate::settings::Settings;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

type SharedDecoder = Arc<Mutex<Box<dyn NativeDecoder>>>;

/// Async facade over one native decoder instance.
///
/// Clones share the same decoder instance.
#[derive(Clone)]
pub struct RawDecoder {
    module: Arc<SharedModule>,
    ready: Arc<OnceCell<Result<SharedDecoder>>>,
}

impl RawDecoder {
    /// Facade over the process-wide LibRaw module
    pub fn new() -> Self {
        Self::with_module(libraw::shared_module())
    }

    /// Facade over a specific module
    pub fn with_module(module: Arc<SharedModule>) -> Self {
        let decoder = Self {
            module,
            ready: Arc::new(OnceCell::new()),
        };

        if let Ok(handle) = Handle::try_current() {
            let eager = decoder.clone();
            handle.spawn(async move {
                let _ = eager.ready().await;
            });
        }

        decoder
    }

    async fn ready(&self) -> Result<SharedDecoder> {
        self.ready
            .get_or_init(|| async {
                debug!("Creating decoder instance");
                native::create_decoder(&self.module)
                    .await
                    .map(|d| Arc::new(Mutex::new(d)))
            })
            .await
            .clone()
    }

    /// Run a native call on the blocking pool with exclusive access to the decoder
    async fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn NativeDecoder) -> Result<T> + Send + 'static,
    {
        let decoder = self.ready().await?;
        let mut guard = decoder.lock_owned().await;
        tokio::task::spawn_blocking(move || f(&mut **guard))
            .await
            .map_err(|e| RawError::Internal(format!("decoder task failed: {}", e)))?
    }

    /// Open a RAW file from memory. Replaces any previously opened image.
    pub async fn open(&self, buffer: Vec<u8>, settings: Settings) -> Result<()> {
        self.call(move |d| d.open(buffer, &settings)).await
    }

    /// Normalized metadata of the opened image
    pub async fn metadata(&self, full_output: bool) -> Result<Metadata> {
        let native = self.call(move |d| d.metadata(full_output)).await?;
        Ok(Metadata::from(native))
    }

    /// Decoded pixels of the opened image, unmodified
    pub async fn image_data(&self) -> Result<ImageData> {
        self.call(|d| d.image_data()).await
    }
}

impl Default for RawDecoder {
    fn default() -> Self {
        Self::new()
    }
}
