//! Native module call surface
//!
//! The decoding library is an opaque collaborator reached through three
//! decoder methods (`open`, `metadata`, `image_data`). A module is produced
//! once by an async [`ModuleLoader`] and memoized in a [`SharedModule`], which
//! every facade and worker referencing it shares.

use crate::error::{RawError, Result};
use crate::image::ImageData;
use crate::metadata::NativeMetadata;
use crate::settings::Settings;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// A stateful decoder holding the currently opened RAW image.
pub trait NativeDecoder: Send {
    /// Parse `buffer` with `settings`, replacing any previously opened image.
    fn open(&mut self, buffer: Vec<u8>, settings: &Settings) -> Result<()>;

    /// Metadata of the opened image. `full_output = false` selects the
    /// abbreviated field set.
    fn metadata(&mut self, full_output: bool) -> Result<NativeMetadata>;

    /// Decoded pixels of the opened image.
    fn image_data(&mut self) -> Result<ImageData>;
}

/// A loaded native library: a factory for decoder instances.
pub trait NativeModule: Send + Sync {
    fn create_decoder(&self) -> Box<dyn NativeDecoder>;
}

/// Async factory producing the native module.
#[async_trait]
pub trait ModuleLoader: Send + Sync + 'static {
    async fn load(&self) -> Result<Arc<dyn NativeModule>>;
}

/// Lazily loaded, process-wide module handle.
///
/// The loader runs at most once. Callers racing before completion all wait on
/// the same in-flight load and observe the same outcome, including failure.
pub struct SharedModule {
    loader: Box<dyn ModuleLoader>,
    cell: OnceCell<Result<Arc<dyn NativeModule>>>,
    loads: AtomicUsize,
}

impl SharedModule {
    pub fn new(loader: impl ModuleLoader) -> Self {
        Self {
            loader: Box::new(loader),
            cell: OnceCell::new(),
            loads: AtomicUsize::new(0),
        }
    }

    /// Get the module, loading it on first use.
    pub async fn get(&self) -> Result<Arc<dyn NativeModule>> {
        self.cell
            .get_or_init(|| async {
                let attempt = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
                debug!("Loading native module (attempt {})", attempt);
                let loaded = self.loader.load().await.map_err(|e| match e {
                    RawError::Init(msg) => RawError::Init(msg),
                    other => RawError::Init(other.to_string()),
                });
                if loaded.is_ok() {
                    info!("Native module ready");
                }
                loaded
            })
            .await
            .clone()
    }

    /// Whether a load has completed (successfully or not)
    pub fn is_initialized(&self) -> bool {
        self.cell.initialized()
    }

    /// Number of times the loader has been invoked
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

/// Create a decoder from the shared module.
pub(crate) async fn create_decoder(module: &SharedModule) -> Result<Box<dyn NativeDecoder>> {
    let module = module.get().await?;
    Ok(module.create_decoder())
}
