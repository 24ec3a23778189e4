//! Integration tests for the decoder facade and the worker proxy

use async_trait::async_trait;
use soma_raw::{
    Argument, ImageData, Metadata, ModuleLoader, NativeDecoder, NativeMetadata, NativeModule,
    Output, PixelBuffer, RawDecoder, RawError, RawWorker, Settings, SharedModule, ThumbFormat,
    WorkerMessage, WorkerReply,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Mock native module
// ============================================================================

/// Shared observations of everything the mock module did
#[derive(Default)]
struct Probe {
    loads: AtomicUsize,
    decoders: AtomicUsize,
    last_image_ptr: AtomicUsize,
    calls: Mutex<Vec<String>>,
    settings: Mutex<Vec<Settings>>,
}

impl Probe {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

struct MockLoader {
    probe: Arc<Probe>,
    delay: Duration,
    fail: bool,
    metadata: NativeMetadata,
}

#[async_trait]
impl ModuleLoader for MockLoader {
    async fn load(&self) -> soma_raw::Result<Arc<dyn NativeModule>> {
        self.probe.loads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(RawError::Init("libraw module missing".to_string()));
        }
        Ok(Arc::new(MockModule {
            probe: Arc::clone(&self.probe),
            metadata: self.metadata.clone(),
        }))
    }
}

struct MockModule {
    probe: Arc<Probe>,
    metadata: NativeMetadata,
}

impl NativeModule for MockModule {
    fn create_decoder(&self) -> Box<dyn NativeDecoder> {
        self.probe.decoders.fetch_add(1, Ordering::SeqCst);
        Box::new(MockDecoder {
            probe: Arc::clone(&self.probe),
            metadata: self.metadata.clone(),
            opened: false,
        })
    }
}

struct MockDecoder {
    probe: Arc<Probe>,
    metadata: NativeMetadata,
    opened: bool,
}

impl NativeDecoder for MockDecoder {
    fn open(&mut self, buffer: Vec<u8>, settings: &Settings) -> soma_raw::Result<()> {
        self.probe.calls.lock().unwrap().push("open".to_string());
        self.probe.settings.lock().unwrap().push(settings.clone());
        self.opened = false;
        if buffer.is_empty() {
            return Err(RawError::native("LibRaw: open_buffer() failed with code -2"));
        }
        self.opened = true;
        Ok(())
    }

    fn metadata(&mut self, full_output: bool) -> soma_raw::Result<NativeMetadata> {
        self.probe.calls.lock().unwrap().push(format!("metadata({})", full_output));
        if !self.opened {
            return Err(RawError::native("LibRaw: no image opened"));
        }
        let mut meta = self.metadata.clone();
        if !full_output {
            meta.desc = None;
            meta.artist = None;
        }
        Ok(meta)
    }

    fn image_data(&mut self) -> soma_raw::Result<ImageData> {
        self.probe.calls.lock().unwrap().push("imageData".to_string());
        if !self.opened {
            return Err(RawError::native("LibRaw: no image opened"));
        }
        let pixels = vec![42u16; 2 * 2 * 3];
        self.probe
            .last_image_ptr
            .store(pixels.as_ptr() as usize, Ordering::SeqCst);
        Ok(ImageData {
            width: 2,
            height: 2,
            colors: 3,
            bits: 16,
            data: PixelBuffer::U16(pixels),
        })
    }
}

fn sample_metadata() -> NativeMetadata {
    NativeMetadata {
        width: Some(6000),
        height: Some(4000),
        camera_make: Some("Canon".to_string()),
        camera_model: Some("EOS R5".to_string()),
        timestamp: Some(1_700_000_000.0),
        desc: Some(" Canon EOS  ".to_string()),
        artist: Some("someone".to_string()),
        thumb_format: Some(1),
        ..Default::default()
    }
}

fn mock_module(delay_ms: u64, fail: bool, metadata: NativeMetadata) -> (Arc<SharedModule>, Arc<Probe>) {
    let probe = Arc::new(Probe::default());
    let loader = MockLoader {
        probe: Arc::clone(&probe),
        delay: Duration::from_millis(delay_ms),
        fail,
        metadata,
    };
    (Arc::new(SharedModule::new(loader)), probe)
}

/// Bounded wait so a hang fails the test instead of stalling it
async fn within<T>(fut: impl std::future::Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(10), fut)
        .await
        .expect("operation timed out")
}

/// Wait until the mock module has created a decoder, without issuing any call
async fn decoder_created(probe: &Probe) {
    while probe.decoders.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ============================================================================
// Module singleton
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_loads_resolve_to_one_module() {
    let (module, probe) = mock_module(50, false, sample_metadata());

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let module = Arc::clone(&module);
            tokio::spawn(async move { module.get().await })
        })
        .collect();

    let mut loaded = Vec::new();
    for task in tasks {
        loaded.push(task.await.unwrap().unwrap());
    }

    assert_eq!(probe.loads.load(Ordering::SeqCst), 1);
    assert_eq!(module.load_count(), 1);
    for m in &loaded[1..] {
        assert!(Arc::ptr_eq(&loaded[0], m));
    }
}

#[tokio::test]
async fn test_facades_share_one_module_load() {
    let (module, probe) = mock_module(20, false, sample_metadata());

    let facades: Vec<_> = (0..4).map(|_| RawDecoder::with_module(Arc::clone(&module))).collect();
    for facade in &facades {
        within(facade.open(vec![1, 2, 3], Settings::default())).await.unwrap();
    }

    assert_eq!(probe.loads.load(Ordering::SeqCst), 1);
    // One decoder instance per facade
    assert_eq!(probe.decoders.load(Ordering::SeqCst), 4);
}

// ============================================================================
// Facade
// ============================================================================

#[test]
fn test_facade_constructed_outside_runtime() {
    let (module, probe) = mock_module(0, false, sample_metadata());

    let decoder = RawDecoder::with_module(module);
    assert_eq!(probe.loads.load(Ordering::SeqCst), 0);

    let runtime = tokio::runtime::Runtime::new().unwrap();
    let meta = runtime.block_on(async {
        decoder.open(vec![0xff; 8], Settings::default()).await?;
        decoder.metadata(false).await
    });

    assert_eq!(meta.unwrap().width, Some(6000));
    assert_eq!(probe.loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_facade_init_failure_is_deferred() {
    let (module, probe) = mock_module(0, true, sample_metadata());

    // Construction itself never fails
    let decoder = RawDecoder::with_module(module);

    let err = within(decoder.open(vec![1], Settings::default())).await.unwrap_err();
    assert_eq!(err, RawError::Init("libraw module missing".to_string()));

    let err = within(decoder.metadata(true)).await.unwrap_err();
    assert!(matches!(err, RawError::Init(_)));
    assert!(within(decoder.image_data()).await.is_err());

    assert_eq!(probe.loads.load(Ordering::SeqCst), 1);
    assert_eq!(probe.decoders.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_facade_initializes_at_construction() {
    let (module, probe) = mock_module(20, false, sample_metadata());

    let _decoder = RawDecoder::with_module(module);
    within(decoder_created(&probe)).await;

    assert_eq!(probe.loads.load(Ordering::SeqCst), 1);
    assert_eq!(probe.decoders.load(Ordering::SeqCst), 1);
    assert!(probe.calls().is_empty());
}

#[tokio::test]
async fn test_facade_normalizes_metadata() {
    let (module, _probe) = mock_module(0, false, sample_metadata());
    let decoder = RawDecoder::with_module(module);

    within(decoder.open(vec![1, 2, 3], Settings::default())).await.unwrap();
    let meta = within(decoder.metadata(true)).await.unwrap();

    assert_eq!(meta.thumb_format, Some(ThumbFormat::Jpeg));
    assert_eq!(meta.desc.as_deref(), Some("Canon EOS"));
    assert_eq!(meta.timestamp.map(|t| t.timestamp()), Some(1_700_000_000));
    assert_eq!(meta.camera_make.as_deref(), Some("Canon"));
}

#[tokio::test]
async fn test_facade_metadata_field_set_and_absent_fields() {
    let native = NativeMetadata {
        width: Some(10),
        thumb_format: Some(42),
        desc: Some("x".to_string()),
        ..Default::default()
    };
    let (module, probe) = mock_module(0, false, native);
    let decoder = RawDecoder::with_module(module);

    within(decoder.open(vec![1], Settings::default())).await.unwrap();

    let short = within(decoder.metadata(false)).await.unwrap();
    assert_eq!(short.thumb_format, Some(ThumbFormat::Unknown));
    assert!(short.desc.is_none());
    assert!(short.timestamp.is_none());

    let full = within(decoder.metadata(true)).await.unwrap();
    assert_eq!(full.desc.as_deref(), Some("x"));

    assert_eq!(probe.calls(), vec!["open", "metadata(false)", "metadata(true)"]);
}

#[tokio::test]
async fn test_facade_propagates_native_errors_verbatim() {
    let (module, _probe) = mock_module(0, false, sample_metadata());
    let decoder = RawDecoder::with_module(module);

    // Nothing opened yet: the native error comes back, no hang
    let err = within(decoder.image_data()).await.unwrap_err();
    assert_eq!(err.to_string(), "LibRaw: no image opened");

    let err = within(decoder.open(Vec::new(), Settings::default())).await.unwrap_err();
    assert_eq!(err, RawError::Native("LibRaw: open_buffer() failed with code -2".to_string()));
    assert_eq!(err.to_string(), "LibRaw: open_buffer() failed with code -2");
}

#[tokio::test]
async fn test_facade_image_data_unmodified() {
    let (module, probe) = mock_module(0, false, sample_metadata());
    let decoder = RawDecoder::with_module(module);

    within(decoder.open(vec![9; 4], Settings::maximum())).await.unwrap();
    let image = within(decoder.image_data()).await.unwrap();

    assert_eq!((image.width, image.height, image.colors, image.bits), (2, 2, 3, 16));
    assert_eq!(image.data, PixelBuffer::U16(vec![42; 12]));
    assert_eq!(probe.settings.lock().unwrap()[0], Settings::maximum());
}

#[tokio::test]
async fn test_facade_settings_from_json_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, r#"{ "half_size": 1, "user_qual": 3, "gamm": [0.45, 4.5, 0, 0, 0, 0] }"#).unwrap();

    let settings: Settings = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();

    let (module, probe) = mock_module(0, false, sample_metadata());
    let decoder = RawDecoder::with_module(module);
    within(decoder.open(vec![1], settings)).await.unwrap();

    let seen = probe.settings.lock().unwrap()[0].clone();
    assert_eq!(seen.half_size, Some(1));
    assert_eq!(seen.user_qual, Some(3));
    assert_eq!(seen.gamm, Some([0.45, 4.5, 0.0, 0.0, 0.0, 0.0]));
}

#[tokio::test]
async fn test_facade_sequential_calls_keep_order() {
    let (module, probe) = mock_module(10, false, sample_metadata());
    let decoder = RawDecoder::with_module(module);

    within(decoder.open(vec![1], Settings::default())).await.unwrap();
    within(decoder.metadata(false)).await.unwrap();
    within(decoder.image_data()).await.unwrap();

    assert_eq!(probe.calls(), vec!["open", "metadata(false)", "imageData"]);
}

// ============================================================================
// Worker proxy
// ============================================================================

#[tokio::test]
async fn test_worker_message_before_ready() {
    let (module, probe) = mock_module(150, false, sample_metadata());
    let mut worker = RawWorker::spawn_with(module).unwrap();

    // Posted while the module is still loading
    worker.post(WorkerMessage::open(vec![1, 2, 3], Settings::default())).unwrap();
    worker.post(WorkerMessage::metadata(true)).unwrap();

    let reply = within(worker.recv()).await.unwrap();
    assert!(matches!(reply, WorkerReply::Out { out: Output::Opened, .. }));

    match within(worker.recv()).await.unwrap() {
        WorkerReply::Out { out: Output::Metadata(meta), transfer } => {
            // Passed through without normalization
            assert_eq!(meta.thumb_format, Some(1));
            assert_eq!(meta.desc.as_deref(), Some(" Canon EOS  "));
            assert!(transfer.is_empty());
        }
        other => panic!("unexpected reply {:?}", other),
    }

    assert_eq!(probe.loads.load(Ordering::SeqCst), 1);
    worker.shutdown().unwrap();
}

#[tokio::test]
async fn test_worker_initializes_at_startup() {
    let (module, probe) = mock_module(20, false, sample_metadata());

    let worker = RawWorker::spawn_with(module).unwrap();
    within(decoder_created(&probe)).await;

    assert_eq!(probe.loads.load(Ordering::SeqCst), 1);
    assert_eq!(probe.decoders.load(Ordering::SeqCst), 1);
    assert!(probe.calls().is_empty());
    assert_eq!(worker.metrics().total_requests, 0);

    worker.shutdown().unwrap();
}

#[tokio::test]
async fn test_worker_transfers_image_buffer_without_copy() {
    let (module, probe) = mock_module(0, false, sample_metadata());
    let mut worker = RawWorker::spawn_with(module).unwrap();

    within(worker.open(vec![1; 16], Settings::default())).await.unwrap();

    match within(worker.call(WorkerMessage::image_data())).await.unwrap() {
        WorkerReply::Out { out: Output::Image(image), transfer } => {
            assert_eq!(transfer.len(), 1);
            assert_eq!(transfer[0].byte_len, 24);
            assert_eq!(
                image.data.as_ptr() as usize,
                probe.last_image_ptr.load(Ordering::SeqCst),
                "pixel buffer was copied"
            );
        }
        other => panic!("unexpected reply {:?}", other),
    }

    worker.shutdown().unwrap();
}

#[tokio::test]
async fn test_worker_survives_unknown_function() {
    let (module, _probe) = mock_module(0, false, sample_metadata());
    let mut worker = RawWorker::spawn_with(module).unwrap();

    let reply = within(worker.call(WorkerMessage::new("rotate", vec![Argument::Flag(true)])))
        .await
        .unwrap();
    assert_eq!(reply, WorkerReply::Error { error: "Unknown function: rotate".to_string() });

    within(worker.open(vec![1], Settings::default())).await.unwrap();
    let meta = within(worker.metadata(false)).await.unwrap();
    assert_eq!(meta.width, Some(6000));

    let snapshot = worker.metrics();
    assert_eq!(snapshot.total_requests, 3);
    assert_eq!(snapshot.failed_requests, 1);
    assert_eq!(snapshot.functions.unknown, 1);

    worker.shutdown().unwrap();
}

#[tokio::test]
async fn test_worker_survives_native_error() {
    let (module, _probe) = mock_module(0, false, sample_metadata());
    let mut worker = RawWorker::spawn_with(module).unwrap();

    let reply = within(worker.call(WorkerMessage::image_data())).await.unwrap();
    assert_eq!(reply, WorkerReply::Error { error: "LibRaw: no image opened".to_string() });

    let reply = within(worker.call(WorkerMessage::open(Vec::new(), Settings::default())))
        .await
        .unwrap();
    assert!(reply.is_error());

    within(worker.open(vec![5; 5], Settings::default())).await.unwrap();
    let image = within(worker.image_data()).await.unwrap();
    assert_eq!(image.width, 2);

    worker.shutdown().unwrap();
}

#[tokio::test]
async fn test_worker_processes_messages_in_order() {
    let (module, probe) = mock_module(30, false, sample_metadata());
    let mut worker = RawWorker::spawn_with(module).unwrap();

    worker.post(WorkerMessage::open(vec![1], Settings::default())).unwrap();
    worker.post(WorkerMessage::image_data()).unwrap();
    worker.post(WorkerMessage::new("metadata", Vec::new())).unwrap();

    let first = within(worker.recv()).await.unwrap().into_result().unwrap();
    let second = within(worker.recv()).await.unwrap().into_result().unwrap();
    let third = within(worker.recv()).await.unwrap().into_result().unwrap();

    assert_eq!(first, Output::Opened);
    assert!(matches!(second, Output::Image(_)));
    assert!(matches!(third, Output::Metadata(_)));
    assert_eq!(probe.calls(), vec!["open", "imageData", "metadata(false)"]);

    worker.shutdown().unwrap();
}

#[tokio::test]
async fn test_worker_init_failure_reported_per_message() {
    let (module, probe) = mock_module(10, true, sample_metadata());
    let mut worker = RawWorker::spawn_with(module).unwrap();

    for _ in 0..2 {
        let reply = within(worker.call(WorkerMessage::metadata(false))).await.unwrap();
        assert_eq!(
            reply,
            WorkerReply::Error { error: "libraw module missing".to_string() }
        );
    }

    assert_eq!(probe.loads.load(Ordering::SeqCst), 1);
    assert_eq!(worker.metrics().failed_requests, 2);
    worker.shutdown().unwrap();
}

// ============================================================================
// LibRaw
// ============================================================================

#[tokio::test]
async fn test_libraw_facade_rejects_garbage() {
    let decoder = RawDecoder::new();

    let err = within(decoder.metadata(false)).await.unwrap_err();
    assert_eq!(err.to_string(), "LibRaw: no image opened");

    let err = within(decoder.open(vec![0u8; 256], Settings::default())).await.unwrap_err();
    assert!(matches!(err, RawError::Native(_)));
    assert!(err.to_string().starts_with("LibRaw: open_buffer() failed"));
}

#[tokio::test]
async fn test_libraw_worker_error_replies() {
    let mut worker = RawWorker::spawn().unwrap();

    let reply = within(worker.call(WorkerMessage::metadata(true))).await.unwrap();
    assert_eq!(reply, WorkerReply::Error { error: "LibRaw: no image opened".to_string() });

    let reply = within(worker.call(WorkerMessage::open(vec![7u8; 128], Settings::fast_preview())))
        .await
        .unwrap();
    assert!(reply.is_error());

    let reply = within(worker.call(WorkerMessage::new("thumbnail", Vec::new()))).await.unwrap();
    assert!(reply.is_error());

    worker.shutdown().unwrap();
}

#[test]
fn test_metadata_roundtrip_through_json() {
    let meta = Metadata::from(sample_metadata());
    let json = serde_json::to_value(&meta).unwrap();
    assert_eq!(json["thumb_format"], "jpeg");
    assert_eq!(json["desc"], "Canon EOS");

    let back: Metadata = serde_json::from_value(json).unwrap();
    assert_eq!(back, meta);
}
