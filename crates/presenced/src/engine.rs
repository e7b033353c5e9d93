//! The capture/recognition engine.
//!
//! Three long-lived contexts, wired at spawn time:
//!
//! - the capture loop (OS thread): reads camera frames on a fixed tick and
//!   publishes each into the single-slot handoff, never blocking on the
//!   worker;
//! - the recognition worker (OS thread): drains the slot, runs detection,
//!   embedding extraction, and gallery matching (or the enrollment state
//!   machine, depending on mode), and forwards result sets to the
//!   dispatcher;
//! - the dispatcher (OS thread, see [`crate::dispatch`]): owns all
//!   dispatch state and the persistence calls.
//!
//! Analysis always lags display by at least one tick; that is accepted.
//! Cancellation is cooperative: the stop flag is observed between cycles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use presence_core::analyzer::{AnalyzerError, FaceAnalyzer, OnnxFaceAnalyzer};
use presence_core::enroll::{CaptureSession, CaptureState, EnrollProgress, SAMPLES_REQUIRED};
use presence_core::gallery::{FirstWithinTolerance, Gallery, Matcher};
use presence_core::pose::PoseClassifier;
use presence_core::{AnnotatedResult, Embedding, RecognitionResult};
use presence_hw::{Camera, CameraError, Frame, FrameSource};

use crate::config::Config;
use crate::dispatch::{DispatchError, DispatchMsg, Dispatcher, EngineEvent};
use crate::handoff::FrameSlot;
use crate::network::NetworkGuard;
use crate::store::{Store, StoreError};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera: {0}")]
    Camera(#[from] CameraError),
    #[error("analyzer: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("{0} is in progress")]
    SessionBusy(&'static str),
}

/// Engine activity. Scanning and enrolling are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    Idle,
    Scanning,
    Enrolling,
}

impl EngineMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineMode::Idle => "idle",
            EngineMode::Scanning => "scanning",
            EngineMode::Enrolling => "enrolling",
        }
    }
}

/// State shared between the handle and the engine threads.
struct Shared {
    mode: Mutex<EngineMode>,
    stop: AtomicBool,
    /// Snapshot-swapped gallery: the worker clones the inner `Arc` per
    /// cycle, so a reload never mutates a pass in flight.
    gallery: RwLock<Arc<Gallery>>,
    /// Samples from the last completed enrollment, awaiting SaveEmployee.
    pending_samples: Mutex<Option<Vec<Embedding>>>,
    fallback: Arc<AtomicBool>,
}

/// Clone-safe handle to the engine.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<Shared>,
    store: Arc<Store>,
    dispatch_tx: mpsc::Sender<DispatchMsg>,
    results_rx: watch::Receiver<Vec<AnnotatedResult>>,
    progress_rx: watch::Receiver<EnrollProgress>,
    events_tx: broadcast::Sender<EngineEvent>,
}

impl EngineHandle {
    /// Switch to live scanning. Refuses while an enrollment is active.
    pub fn start_scan(&self) -> Result<(), EngineError> {
        let mut mode = self.shared.mode.lock().expect("mode lock poisoned");
        if *mode == EngineMode::Enrolling {
            return Err(EngineError::SessionBusy("enrollment"));
        }
        *mode = EngineMode::Scanning;
        drop(mode);

        // Session start: hydrate the marked-today cache.
        let _ = self.dispatch_tx.try_send(DispatchMsg::RefreshMarked);
        tracing::info!("scan session started");
        Ok(())
    }

    pub fn stop_scan(&self) {
        let mut mode = self.shared.mode.lock().expect("mode lock poisoned");
        if *mode == EngineMode::Scanning {
            *mode = EngineMode::Idle;
            tracing::info!("scan session stopped");
        }
    }

    /// Switch to enrollment capture. Refuses while scanning.
    pub fn begin_enrollment(&self) -> Result<(), EngineError> {
        let mut mode = self.shared.mode.lock().expect("mode lock poisoned");
        if *mode == EngineMode::Scanning {
            return Err(EngineError::SessionBusy("a scan session"));
        }
        *self
            .shared
            .pending_samples
            .lock()
            .expect("pending lock poisoned") = None;
        *mode = EngineMode::Enrolling;
        tracing::info!("enrollment capture started");
        Ok(())
    }

    pub fn cancel_enrollment(&self) {
        let mut mode = self.shared.mode.lock().expect("mode lock poisoned");
        if *mode == EngineMode::Enrolling {
            *mode = EngineMode::Idle;
            tracing::info!("enrollment capture cancelled");
        }
    }

    pub fn mode(&self) -> EngineMode {
        *self.shared.mode.lock().expect("mode lock poisoned")
    }

    /// Latest annotated result set, for overlay rendering.
    pub fn latest_results(&self) -> Vec<AnnotatedResult> {
        self.results_rx.borrow().clone()
    }

    pub fn enrollment_progress(&self) -> EnrollProgress {
        *self.progress_rx.borrow()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events_tx.subscribe()
    }

    /// Whether the manual-entry fallback is currently surfaced.
    pub fn pending_fallback(&self) -> bool {
        self.shared.fallback.load(Ordering::SeqCst)
    }

    /// Take the five samples from a completed enrollment, if any.
    pub fn take_pending_samples(&self) -> Option<Vec<Embedding>> {
        self.shared
            .pending_samples
            .lock()
            .expect("pending lock poisoned")
            .take()
    }

    /// Reload the gallery from the store. Returns the template count.
    pub fn reload_gallery(&self) -> Result<usize, EngineError> {
        let gallery = self.store.load_gallery()?;
        let len = gallery.len();
        *self.shared.gallery.write().expect("gallery lock poisoned") = Arc::new(gallery);
        Ok(len)
    }

    pub fn gallery_len(&self) -> usize {
        self.shared
            .gallery
            .read()
            .expect("gallery lock poisoned")
            .len()
    }

    /// Manual check-in, marshalled to the dispatch context.
    pub async fn manual_mark(
        &self,
        emp_code: &str,
    ) -> Result<crate::attendance::MarkOutcome, DispatchError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.dispatch_tx
            .send(DispatchMsg::ManualMark {
                emp_code: emp_code.to_string(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| DispatchError::ChannelClosed)?;
        reply_rx.await.map_err(|_| DispatchError::ChannelClosed)?
    }

    /// Signal all engine threads to exit after their current cycle.
    pub fn shutdown(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
    }
}

/// Open the camera, load the models and the gallery, and start the engine
/// threads. Fails fast if any resource is unavailable.
pub fn spawn_engine(config: &Config, store: Arc<Store>) -> Result<EngineHandle, EngineError> {
    let (camera, used_alternate) =
        Camera::open_with_fallback(&config.camera_device, &config.camera_alternate)?;
    tracing::info!(
        device = %camera.device_path,
        width = camera.width,
        height = camera.height,
        used_alternate,
        "camera ready"
    );

    let analyzer = OnnxFaceAnalyzer::load(
        &config.detector_model_path(),
        &config.embedder_model_path(),
    )?;

    spawn_with(
        Box::new(camera),
        Box::new(analyzer),
        store,
        config,
        NetworkGuard::new(config.office_ssid.clone()),
    )
}

/// Wire the threads around the given source and analyzer.
fn spawn_with(
    source: Box<dyn FrameSource>,
    analyzer: Box<dyn FaceAnalyzer>,
    store: Arc<Store>,
    config: &Config,
    guard: NetworkGuard,
) -> Result<EngineHandle, EngineError> {
    let gallery = store.load_gallery()?;

    let shared = Arc::new(Shared {
        mode: Mutex::new(EngineMode::Idle),
        stop: AtomicBool::new(false),
        gallery: RwLock::new(Arc::new(gallery)),
        pending_samples: Mutex::new(None),
        fallback: Arc::new(AtomicBool::new(false)),
    });

    let idle_progress = EnrollProgress {
        state: CaptureState::Idle,
        samples: 0,
        required: SAMPLES_REQUIRED,
    };

    let (results_tx, results_rx) = watch::channel(Vec::new());
    let (progress_tx, progress_rx) = watch::channel(idle_progress);
    let (events_tx, _) = broadcast::channel(64);
    let (dispatch_tx, dispatch_rx) = mpsc::channel(16);

    let dispatcher = Dispatcher::new(
        Arc::clone(&store),
        guard,
        config.dispatch_cooldown,
        config.unknown_streak_limit,
        results_tx,
        events_tx.clone(),
        Arc::clone(&shared.fallback),
    );
    std::thread::Builder::new()
        .name("presence-dispatch".into())
        .spawn(move || dispatcher.run(dispatch_rx))
        .expect("failed to spawn dispatcher thread");

    let slot = Arc::new(FrameSlot::new());

    let capture = CaptureLoop {
        source,
        slot: Arc::clone(&slot),
        shared: Arc::clone(&shared),
        events_tx: events_tx.clone(),
        tick: config.capture_tick,
        failure_limit: config.capture_failure_limit,
    };
    std::thread::Builder::new()
        .name("presence-capture".into())
        .spawn(move || capture.run())
        .expect("failed to spawn capture thread");

    let worker = Worker {
        analyzer,
        slot,
        shared: Arc::clone(&shared),
        dispatch_tx: dispatch_tx.clone(),
        events_tx: events_tx.clone(),
        progress_tx,
        matcher: FirstWithinTolerance::new(config.match_tolerance),
        classifier: PoseClassifier::new(config.pose),
        scan_scale: config.scan_scale,
        enroll_scale: config.enroll_scale,
        stability_frames: config.stability_frames,
        idle: config.worker_idle,
        idle_progress,
    };
    std::thread::Builder::new()
        .name("presence-worker".into())
        .spawn(move || worker.run())
        .expect("failed to spawn worker thread");

    Ok(EngineHandle {
        shared,
        store,
        dispatch_tx,
        results_rx,
        progress_rx,
        events_tx,
    })
}

/// Frame producer: tick, read, publish. Owns the camera; releases it by
/// dropping on exit, independent of worker timing.
struct CaptureLoop {
    source: Box<dyn FrameSource>,
    slot: Arc<FrameSlot>,
    shared: Arc<Shared>,
    events_tx: broadcast::Sender<EngineEvent>,
    tick: Duration,
    failure_limit: u32,
}

impl CaptureLoop {
    fn run(mut self) {
        tracing::info!("capture loop started");
        let mut failures = 0u32;

        loop {
            if self.shared.stop.load(Ordering::SeqCst) {
                break;
            }

            let mode = *self.shared.mode.lock().expect("mode lock poisoned");
            if mode == EngineMode::Idle {
                std::thread::sleep(self.tick);
                continue;
            }

            match self.source.read_frame() {
                Ok(frame) => {
                    failures = 0;
                    self.slot.publish(frame);
                }
                Err(e) => {
                    // Transient: skip this tick and retry on the next.
                    failures += 1;
                    tracing::warn!(error = %e, consecutive = failures, "frame read failed");
                    if failures >= self.failure_limit {
                        tracing::error!("camera lost, ending the active session");
                        let _ = self.events_tx.send(EngineEvent::CameraLost {
                            reason: e.to_string(),
                        });
                        *self.shared.mode.lock().expect("mode lock poisoned") = EngineMode::Idle;
                        failures = 0;
                    }
                }
            }

            std::thread::sleep(self.tick);
        }
        tracing::info!("capture loop exiting");
    }
}

/// Frame consumer: recognition in scan mode, pose-gated capture in
/// enrollment mode.
struct Worker {
    analyzer: Box<dyn FaceAnalyzer>,
    slot: Arc<FrameSlot>,
    shared: Arc<Shared>,
    dispatch_tx: mpsc::Sender<DispatchMsg>,
    events_tx: broadcast::Sender<EngineEvent>,
    progress_tx: watch::Sender<EnrollProgress>,
    matcher: FirstWithinTolerance,
    classifier: PoseClassifier,
    scan_scale: f32,
    enroll_scale: f32,
    stability_frames: u32,
    idle: Duration,
    idle_progress: EnrollProgress,
}

impl Worker {
    fn run(mut self) {
        tracing::info!("recognition worker started");
        let mut session: Option<CaptureSession> = None;

        loop {
            if self.shared.stop.load(Ordering::SeqCst) {
                break;
            }

            let mode = *self.shared.mode.lock().expect("mode lock poisoned");

            match mode {
                EngineMode::Idle | EngineMode::Scanning => {
                    if session.take().is_some() {
                        let _ = self.progress_tx.send(self.idle_progress);
                    }
                }
                EngineMode::Enrolling => {
                    if session.is_none() {
                        let mut s = CaptureSession::new(self.stability_frames);
                        s.begin();
                        let _ = self.progress_tx.send(s.progress());
                        session = Some(s);
                    }
                }
            }

            if mode == EngineMode::Idle {
                std::thread::sleep(self.idle);
                continue;
            }

            let Some(frame) = self.slot.take() else {
                std::thread::sleep(self.idle);
                continue;
            };

            match mode {
                EngineMode::Scanning => {
                    // Snapshot for the pass; a concurrent reload swaps the
                    // Arc without touching this clone.
                    let gallery = self
                        .shared
                        .gallery
                        .read()
                        .expect("gallery lock poisoned")
                        .clone();
                    match scan_cycle(
                        &frame,
                        self.analyzer.as_mut(),
                        &gallery,
                        &self.matcher,
                        self.scan_scale,
                    ) {
                        Ok(results) => {
                            if self
                                .dispatch_tx
                                .blocking_send(DispatchMsg::Cycle(results))
                                .is_err()
                            {
                                tracing::error!("dispatcher gone, worker exiting");
                                break;
                            }
                        }
                        // Absorb and move on: nothing short of the stop
                        // flag ends this loop.
                        Err(e) => {
                            tracing::warn!(error = %e, "recognition cycle failed, skipping frame");
                        }
                    }
                }
                EngineMode::Enrolling => {
                    if let Some(s) = session.as_mut() {
                        if let Err(e) = enroll_cycle(
                            &frame,
                            self.analyzer.as_mut(),
                            &self.classifier,
                            s,
                            self.enroll_scale,
                        ) {
                            tracing::warn!(error = %e, "enrollment cycle failed, skipping frame");
                        }
                        let _ = self.progress_tx.send(s.progress());

                        if s.is_done() {
                            let done = session.take();
                            let samples = done.and_then(CaptureSession::into_samples);
                            if let Some(samples) = samples {
                                let count = samples.len();
                                *self
                                    .shared
                                    .pending_samples
                                    .lock()
                                    .expect("pending lock poisoned") = Some(samples);
                                let _ = self
                                    .events_tx
                                    .send(EngineEvent::EnrollmentComplete { samples: count });
                                tracing::info!(samples = count, "enrollment capture complete");
                            }
                            *self.shared.mode.lock().expect("mode lock poisoned") =
                                EngineMode::Idle;
                        }
                    }
                }
                EngineMode::Idle => {}
            }
        }
        tracing::info!("recognition worker exiting");
    }
}

/// One recognition pass over one frame.
///
/// Downscales for speed, detects, embeds, and matches. Regions are mapped
/// back to full-frame coordinates before publication.
fn scan_cycle(
    frame: &Frame,
    analyzer: &mut dyn FaceAnalyzer,
    gallery: &Gallery,
    matcher: &FirstWithinTolerance,
    scale: f32,
) -> Result<Vec<RecognitionResult>, AnalyzerError> {
    let small = frame.downscaled(scale);
    let regions = analyzer.detect_faces(&small.data, small.width, small.height)?;

    let inv = if scale > 0.0 && scale < 1.0 {
        1.0 / scale
    } else {
        1.0
    };

    let mut results = Vec::with_capacity(regions.len());
    for region in regions {
        let embedding = analyzer.extract(&small.data, small.width, small.height, &region)?;
        let identity = matcher.resolve(&embedding, gallery).map(str::to_string);
        results.push(RecognitionResult {
            region: region.scaled(inv),
            identity,
        });
    }

    if !results.is_empty() {
        tracing::debug!(faces = results.len(), "recognition cycle");
    }
    Ok(results)
}

/// One enrollment pass over one frame.
///
/// A frame without a detectable face observes as "no pose", which resets
/// the stability run; that is the expected idle condition, not an error.
fn enroll_cycle(
    frame: &Frame,
    analyzer: &mut dyn FaceAnalyzer,
    classifier: &PoseClassifier,
    session: &mut CaptureSession,
    scale: f32,
) -> Result<(), AnalyzerError> {
    let small = frame.downscaled(scale);
    let regions = analyzer.detect_faces(&small.data, small.width, small.height)?;

    let pose = regions
        .first()
        .and_then(|r| r.landmarks.as_ref())
        .map(|lm| classifier.classify(lm));

    if session.observe(pose) {
        if let Some(region) = regions.first() {
            let sample = analyzer.extract(&small.data, small.width, small.height, region)?;
            session.record(sample);
        }
    }
    Ok(())
}
