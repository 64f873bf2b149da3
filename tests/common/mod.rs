#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use crossbeam_channel::{unbounded, Receiver, Sender};
use face_bridge::bridge::{BridgeContext, CallerHandle, CommandResponse, CommandRouter, SessionPhase};
use face_bridge::common::{BridgeError, Config, Result};
use face_bridge::core::{
    Attachment, Bearing, Face, FaceBounds, FaceTemplate, HeadAngle, Point, SessionResult,
    SessionSettings,
};
use face_bridge::engine::{
    CaptureControl, CaptureObserver, CaptureOutcome, EngineFactory, FaceEngine, ScoreRange,
};
use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub const WAIT: Duration = Duration::from_secs(5);

pub struct CaptureRecord {
    pub settings: SessionSettings,
    pub observer: Option<Box<dyn CaptureObserver>>,
    pub cancelled: Arc<AtomicBool>,
}

struct CancelFlag(Arc<AtomicBool>);

impl CaptureControl for CancelFlag {
    fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Scriptable engine. Captures stay pending until a test completes them.
pub struct FakeEngine {
    pub faces: Mutex<Vec<Face>>,
    pub users: Mutex<Vec<String>>,
    pub score: f64,
    pub testing: AtomicBool,
    pub unloaded: AtomicBool,
    captures: Mutex<Vec<CaptureRecord>>,
    started_tx: Sender<()>,
    started_rx: Receiver<()>,
}

impl FakeEngine {
    pub fn new() -> Self {
        let (started_tx, started_rx) = unbounded();
        Self {
            faces: Mutex::new(Vec::new()),
            users: Mutex::new(Vec::new()),
            score: 0.75,
            testing: AtomicBool::new(false),
            unloaded: AtomicBool::new(false),
            captures: Mutex::new(Vec::new()),
            started_tx,
            started_rx,
        }
    }

    /// Blocks until the next capture starts.
    pub fn wait_for_capture(&self) {
        self.started_rx
            .recv_timeout(WAIT)
            .expect("capture was never started");
    }

    pub fn capture_count(&self) -> usize {
        self.captures.lock().unwrap().len()
    }

    pub fn latest_cancelled(&self) -> bool {
        self.captures
            .lock()
            .unwrap()
            .last()
            .map(|record| record.cancelled.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn latest_settings(&self) -> Option<SessionSettings> {
        self.captures.lock().unwrap().last().map(|record| record.settings.clone())
    }

    /// Completes the most recent capture that has not reported yet.
    pub fn complete_latest(&self, outcome: CaptureOutcome) {
        let observer = self
            .captures
            .lock()
            .unwrap()
            .iter_mut()
            .rev()
            .find_map(|record| record.observer.take())
            .expect("no pending capture");
        observer.complete(outcome);
    }

    /// Drops the most recent pending observer without completing it.
    pub fn abandon_latest(&self) {
        let observer = self
            .captures
            .lock()
            .unwrap()
            .iter_mut()
            .rev()
            .find_map(|record| record.observer.take())
            .expect("no pending capture");
        drop(observer);
    }
}

impl FaceEngine for FakeEngine {
    fn detect_faces(&self, _image: &DynamicImage, limit: usize) -> Result<Vec<Face>> {
        Ok(self.faces.lock().unwrap().iter().take(limit).cloned().collect())
    }

    fn extract_template(&self, _image: &DynamicImage, face: &Face) -> Result<FaceTemplate> {
        Ok(FaceTemplate { data: face.data.clone(), version: 1 })
    }

    fn compare(&self, first: &FaceTemplate, second: &FaceTemplate) -> Result<f64> {
        if first.version != second.version {
            return Err(BridgeError::Engine("version mismatch".into()));
        }
        Ok(self.score)
    }

    fn score_range(&self) -> ScoreRange {
        ScoreRange { authentication_threshold: 0.6, max: 1.0 }
    }

    fn registered_users(&self) -> Result<Vec<String>> {
        Ok(self.users.lock().unwrap().clone())
    }

    fn delete_user(&self, user_id: &str) -> Result<()> {
        self.users.lock().unwrap().retain(|user| user != user_id);
        Ok(())
    }

    fn start_capture(
        &self,
        settings: SessionSettings,
        observer: Box<dyn CaptureObserver>,
    ) -> Result<Box<dyn CaptureControl>> {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.captures.lock().unwrap().push(CaptureRecord {
            settings,
            observer: Some(observer),
            cancelled: Arc::clone(&cancelled),
        });
        self.started_tx.send(()).ok();
        Ok(Box::new(CancelFlag(cancelled)))
    }

    fn set_testing_mode(&self, enabled: bool) {
        self.testing.store(enabled, Ordering::SeqCst);
    }

    fn unload(&self) {
        self.unloaded.store(true, Ordering::SeqCst);
    }
}

/// Hands out one shared [`FakeEngine`]. Optionally waits on a gate or fails.
pub struct FakeFactory {
    pub engine: Arc<FakeEngine>,
    pub builds: AtomicUsize,
    fail: bool,
    gate: Option<Receiver<()>>,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            engine: Arc::new(FakeEngine::new()),
            builds: AtomicUsize::new(0),
            fail: false,
            gate: None,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            engine: Arc::new(FakeEngine::new()),
            builds: AtomicUsize::new(0),
            fail: true,
            gate: None,
        })
    }

    /// Construction blocks until the returned sender fires.
    pub fn gated() -> (Arc<Self>, Sender<()>) {
        let (gate_tx, gate_rx) = unbounded();
        let factory = Arc::new(Self {
            engine: Arc::new(FakeEngine::new()),
            builds: AtomicUsize::new(0),
            fail: false,
            gate: Some(gate_rx),
        });
        (factory, gate_tx)
    }
}

impl EngineFactory for FakeFactory {
    fn create(&self, _credential: Option<&str>) -> Result<Arc<dyn FaceEngine>> {
        if let Some(gate) = &self.gate {
            gate.recv_timeout(WAIT).ok();
        }
        self.builds.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(BridgeError::Engine("model files missing".into()));
        }
        let engine: Arc<dyn FaceEngine> = self.engine.clone();
        Ok(engine)
    }
}

pub fn router_with(factory: Arc<FakeFactory>, config: Config) -> Arc<CommandRouter> {
    let context = BridgeContext::new(config, factory).expect("bridge context");
    Arc::new(CommandRouter::new(context))
}

pub fn router(factory: Arc<FakeFactory>) -> Arc<CommandRouter> {
    let mut config = Config::default();
    config.dispatch.worker_threads = 2;
    router_with(factory, config)
}

pub fn caller(id: &str) -> (CallerHandle, Receiver<CommandResponse>) {
    let (tx, rx) = unbounded();
    let handle = CallerHandle::from_fn(id, move |response| {
        tx.send(response).ok();
    });
    (handle, rx)
}

pub fn recv(rx: &Receiver<CommandResponse>) -> CommandResponse {
    rx.recv_timeout(WAIT).expect("no response delivered")
}

/// Dispatches and waits for the single response.
pub fn call(router: &CommandRouter, action: &str, args: serde_json::Value) -> CommandResponse {
    let (handle, rx) = caller(action);
    router.dispatch(action, &args, handle);
    recv(&rx)
}

pub fn wait_until(mut condition: impl FnMut() -> bool, what: &str) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(5));
    }
}

pub fn wait_for_phase(router: &CommandRouter, phase: SessionPhase) {
    wait_until(|| router.context().coordinator.phase() == phase, "session phase");
}

pub fn sample_face(data: &[u8]) -> Face {
    Face {
        bounds: FaceBounds { x: 12.0, y: 20.5, width: 96.0, height: 110.25 },
        left_eye: Point { x: 40.0, y: 60.0 },
        right_eye: Point { x: 80.0, y: 61.5 },
        angle: HeadAngle { yaw: -3.5, pitch: 1.25, roll: 0.0 },
        quality: 0.92,
        data: data.to_vec(),
    }
}

pub fn completed_result() -> SessionResult {
    SessionResult::completed(vec![Attachment {
        face: sample_face(&[1, 2, 3]),
        template: Some(FaceTemplate { data: vec![9, 8, 7], version: 1 }),
        bearing: Bearing::Straight,
        image: None,
    }])
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0])))
        .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
        .unwrap();
    bytes
}

/// `data:image/png;base64,...` of a single transparent pixel.
pub fn transparent_pixel_uri() -> String {
    format!("data:image/png;base64,{}", BASE64.encode(png_bytes(1, 1)))
}
