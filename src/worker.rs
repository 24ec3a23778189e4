//! Background worker proxy
//!
//! [`RawWorker`] runs one native decoder on a dedicated thread with its own
//! single-threaded tokio runtime. Callers talk to it only through messages:
//! a [`WorkerMessage`] names a decoder function (`open`, `metadata`,
//! `imageData`) and its arguments, and the worker answers each message with a
//! [`WorkerReply`], in arrival order.
//!
//! ## Lifecycle
//!
//! `uninitialized → initializing → ready`, once. Initialization starts as soon
//! as the worker starts; messages that arrive earlier wait for it instead of
//! failing. A failed initialization is answered as an error reply to every
//! message.
//!
//! ## Buffers
//!
//! Pixel buffers in a reply are moved to the caller, never copied. The reply's
//! `transfer` list names every buffer handed over that way.
//!
//! ## Failures
//!
//! A failing request produces `WorkerReply::Error { error }` carrying the
//! message text only. The worker keeps serving subsequent messages.

use crate::error::{RawError, Result};
use crate::image::{ImageData, Transfer};
use crate::libraw;
use crate::metadata::NativeMetadata;
use crate::metrics::{Metrics, MetricsSnapshot, Timer};
use crate::native::{self, NativeDecoder, SharedModule};
use crate::settings::Settings;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const THREAD_NAME: &str = "soma-raw-worker";

// ============================================================================
// Protocol
// ============================================================================

/// A positional argument of a worker request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Argument {
    Buffer(Vec<u8>),
    Settings(Settings),
    Flag(bool),
}

impl Argument {
    /// Truthiness of the argument; buffers and settings count as true
    pub fn as_flag(&self) -> bool {
        match self {
            Argument::Flag(b) => *b,
            Argument::Buffer(_) | Argument::Settings(_) => true,
        }
    }
}

/// Request: a decoder function name and its ordered arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerMessage {
    #[serde(rename = "fn")]
    pub function: String,
    #[serde(default)]
    pub args: Vec<Argument>,
}

impl WorkerMessage {
    pub fn new(function: impl Into<String>, args: Vec<Argument>) -> Self {
        Self {
            function: function.into(),
            args,
        }
    }

    pub fn open(buffer: Vec<u8>, settings: Settings) -> Self {
        Self::new("open", vec![Argument::Buffer(buffer), Argument::Settings(settings)])
    }

    pub fn metadata(full_output: bool) -> Self {
        Self::new("metadata", vec![Argument::Flag(full_output)])
    }

    pub fn image_data() -> Self {
        Self::new("imageData", Vec::new())
    }
}

/// Return value of a decoder function, as produced by the decoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Output {
    Opened,
    Metadata(NativeMetadata),
    Image(ImageData),
}

impl Output {
    /// Buffers carried by this value
    pub fn transfer_list(&self) -> Vec<Transfer> {
        match self {
            Output::Image(image) => image.transfer_list(),
            Output::Opened | Output::Metadata(_) => Vec::new(),
        }
    }
}

/// Response to one [`WorkerMessage`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerReply {
    Out { out: Output, transfer: Vec<Transfer> },
    Error { error: String },
}

impl WorkerReply {
    fn from_result(result: Result<Output>) -> Self {
        match result {
            Ok(out) => {
                let transfer = out.transfer_list();
                WorkerReply::Out { out, transfer }
            }
            Err(e) => WorkerReply::Error { error: e.to_string() },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, WorkerReply::Error { .. })
    }

    /// The output, or the error text as a native error
    pub fn into_result(self) -> Result<Output> {
        match self {
            WorkerReply::Out { out, .. } => Ok(out),
            WorkerReply::Error { error } => Err(RawError::Native(error)),
        }
    }
}

/// Invoke the decoder function a message names
pub fn dispatch(decoder: &mut dyn NativeDecoder, message: WorkerMessage) -> Result<Output> {
    let mut args = message.args.into_iter();

    match message.function.as_str() {
        "open" => {
            let buffer = match args.next() {
                Some(Argument::Buffer(buffer)) => buffer,
                _ => {
                    return Err(RawError::InvalidArguments(
                        "open expects a buffer as its first argument".to_string(),
                    ))
                }
            };
            let settings = match args.next() {
                Some(Argument::Settings(settings)) => settings,
                None => Settings::default(),
                Some(other) => {
                    return Err(RawError::InvalidArguments(format!(
                        "open expects settings as its second argument, got {:?}",
                        ArgumentKind::of(&other)
                    )))
                }
            };
            decoder.open(buffer, &settings)?;
            Ok(Output::Opened)
        }
        "metadata" => {
            let full_output = args.next().map(|a| a.as_flag()).unwrap_or(false);
            Ok(Output::Metadata(decoder.metadata(full_output)?))
        }
        "imageData" => Ok(Output::Image(decoder.image_data()?)),
        other => Err(RawError::UnknownFunction(other.to_string())),
    }
}

#[derive(Debug)]
enum ArgumentKind {
    Buffer,
    Settings,
    Flag,
}

impl ArgumentKind {
    fn of(arg: &Argument) -> Self {
        match arg {
            Argument::Buffer(_) => ArgumentKind::Buffer,
            Argument::Settings(_) => ArgumentKind::Settings,
            Argument::Flag(_) => ArgumentKind::Flag,
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

enum WorkerState {
    Initializing(JoinHandle<Result<Box<dyn NativeDecoder>>>),
    Ready(Box<dyn NativeDecoder>),
    Failed(RawError),
}

impl WorkerState {
    async fn ready(&mut self) -> Result<&mut dyn NativeDecoder> {
        if let WorkerState::Initializing(task) = self {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(RawError::Init(format!("initialization task failed: {}", e))),
            };
            *self = match outcome {
                Ok(decoder) => {
                    info!("Worker decoder ready");
                    WorkerState::Ready(decoder)
                }
                Err(e) => {
                    warn!("Worker initialization failed: {}", e);
                    WorkerState::Failed(e)
                }
            };
        }

        match self {
            WorkerState::Ready(decoder) => Ok(&mut **decoder),
            WorkerState::Failed(e) => Err(e.clone()),
            WorkerState::Initializing(_) => {
                Err(RawError::Internal("worker still initializing".to_string()))
            }
        }
    }
}

/// Message loop: one message at a time, in arrival order
async fn run(
    module: Arc<SharedModule>,
    mut inbox: UnboundedReceiver<WorkerMessage>,
    outbox: UnboundedSender<WorkerReply>,
    metrics: Arc<Metrics>,
) {
    let init = tokio::spawn(async move { native::create_decoder(&module).await });
    let mut state = WorkerState::Initializing(init);

    while let Some(message) = inbox.recv().await {
        let timer = Timer::new();
        let function = message.function.clone();
        debug!("Worker received: fn={}", function);

        let result = match state.ready().await {
            Ok(decoder) => dispatch(decoder, message),
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            warn!("Worker request {} failed: {}", function, e);
        }
        metrics.record_request(&function, result.is_ok(), timer.elapsed_ms());

        let reply = WorkerReply::from_result(result);
        if let WorkerReply::Out { transfer, .. } = &reply {
            for t in transfer {
                debug!("Transferring {:?} buffer ({} bytes)", t.kind, t.byte_len);
            }
        }

        if outbox.send(reply).is_err() {
            debug!("Reply receiver dropped, stopping worker");
            break;
        }
    }

    info!("Worker stopped");
}

/// Spawns worker threads
pub struct RawWorker;

impl RawWorker {
    /// Worker over the process-wide LibRaw module
    pub fn spawn() -> Result<WorkerHandle> {
        Self::spawn_with(libraw::shared_module())
    }

    /// Worker over a specific module
    pub fn spawn_with(module: Arc<SharedModule>) -> Result<WorkerHandle> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| RawError::Internal(format!("Failed to build worker runtime: {}", e)))?;

        let (inbox_tx, inbox_rx) = unbounded_channel();
        let (outbox_tx, outbox_rx) = unbounded_channel();
        let metrics = Metrics::new();
        let loop_metrics = Arc::clone(&metrics);

        let thread = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || runtime.block_on(run(module, inbox_rx, outbox_tx, loop_metrics)))
            .map_err(|e| RawError::Internal(format!("Failed to spawn worker thread: {}", e)))?;

        info!("Worker started on thread {}", THREAD_NAME);

        Ok(WorkerHandle {
            inbox: Some(inbox_tx),
            outbox: outbox_rx,
            metrics,
            thread: Some(thread),
        })
    }
}

/// Caller side of a running worker
pub struct WorkerHandle {
    inbox: Option<UnboundedSender<WorkerMessage>>,
    outbox: UnboundedReceiver<WorkerReply>,
    metrics: Arc<Metrics>,
    thread: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Queue a message without waiting for its reply
    pub fn post(&self, message: WorkerMessage) -> Result<()> {
        self.inbox
            .as_ref()
            .ok_or(RawError::WorkerClosed)?
            .send(message)
            .map_err(|_| RawError::WorkerClosed)
    }

    /// Next reply, in the order messages were posted
    pub async fn recv(&mut self) -> Result<WorkerReply> {
        self.outbox.recv().await.ok_or(RawError::WorkerClosed)
    }

    /// Post a message and wait for the next reply.
    ///
    /// Replies carry no request id; mixing `call` with outstanding `post`s
    /// pairs this call with the oldest pending reply.
    pub async fn call(&mut self, message: WorkerMessage) -> Result<WorkerReply> {
        self.post(message)?;
        self.recv().await
    }

    pub async fn open(&mut self, buffer: Vec<u8>, settings: Settings) -> Result<()> {
        match self.call(WorkerMessage::open(buffer, settings)).await?.into_result()? {
            Output::Opened => Ok(()),
            other => Err(unexpected("open", &other)),
        }
    }

    pub async fn metadata(&mut self, full_output: bool) -> Result<NativeMetadata> {
        match self.call(WorkerMessage::metadata(full_output)).await?.into_result()? {
            Output::Metadata(meta) => Ok(meta),
            other => Err(unexpected("metadata", &other)),
        }
    }

    pub async fn image_data(&mut self) -> Result<ImageData> {
        match self.call(WorkerMessage::image_data()).await?.into_result()? {
            Output::Image(image) => Ok(image),
            other => Err(unexpected("imageData", &other)),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Close the inbox and wait for the worker thread to finish.
    /// Messages already posted are still processed.
    pub fn shutdown(mut self) -> Result<()> {
        self.inbox.take();
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| RawError::Internal("worker thread panicked".to_string())),
            None => Ok(()),
        }
    }
}

fn unexpected(function: &str, output: &Output) -> RawError {
    RawError::Internal(format!("unexpected {} reply: {:?}", function, output))
}
