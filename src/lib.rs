//! soma_raw - async LibRaw bindings for SOMA platform
//!
//! Exposes the LibRaw RAW decoder through two surfaces:
//! - [`RawDecoder`]: an async facade over a lazily created decoder instance
//! - [`RawWorker`]: a background worker thread driven by `{fn, args}` messages
//!
//! Both share one lazily loaded native module per process.

pub mod decoder;
pub mod error;
pub mod image;
pub mod libraw;
pub mod metadata;
pub mod metrics;
pub mod native;
pub mod settings;
pub mod worker;

pub use decoder::RawDecoder;
pub use error::{RawError, Result};
pub use self::image::{BufferKind, ImageData, PixelBuffer, Transfer};
pub use metadata::{Metadata, NativeMetadata, ThumbFormat};
pub use native::{ModuleLoader, NativeDecoder, NativeModule, SharedModule};
pub use settings::Settings;
pub use worker::{Argument, Output, RawWorker, WorkerHandle, WorkerMessage, WorkerReply};
