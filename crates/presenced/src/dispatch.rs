//! Attendance dispatch: the single context that owns the cooldown table,
//! the unknown-streak tracker, and the marked-today cache, and that issues
//! every persistence call.
//!
//! Worker cycles and manual marks are marshalled here over a channel, so
//! no two callers ever race on dispatch for the same identity.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{Local, NaiveDateTime};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use presence_core::debounce::AttendanceDebouncer;
use presence_core::streak::{StreakSignal, UnknownStreakTracker};
use presence_core::{AnnotatedResult, RecognitionResult, ScanStatus};

use crate::attendance::{self, MarkOutcome};
use crate::network::NetworkGuard;
use crate::store::{MarkMethod, MarkedToday, Store, StoreError};

/// Events surfaced to daemon-level subscribers.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The unknown streak crossed its limit: offer manual entry.
    FallbackNeeded,
    /// The surfaced fallback state was cleared.
    FallbackCleared,
    /// An attendance record landed.
    Marked { emp_code: String, full_name: String },
    /// An enrollment capture collected all its samples.
    EnrollmentComplete { samples: usize },
    /// The camera failed repeatedly; the session is over.
    CameraLost { reason: String },
}

/// Messages accepted by the dispatcher.
pub enum DispatchMsg {
    /// One worker cycle's result set.
    Cycle(Vec<RecognitionResult>),
    /// Manual check-in request.
    ManualMark {
        emp_code: String,
        reply: oneshot::Sender<Result<MarkOutcome, DispatchError>>,
    },
    /// Re-hydrate the marked-today cache (sent at scan session start).
    RefreshMarked,
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("not connected to the office network")]
    OffNetwork,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("dispatcher unavailable")]
    ChannelClosed,
}

pub struct Dispatcher {
    store: Arc<Store>,
    guard: NetworkGuard,
    debouncer: AttendanceDebouncer,
    streak: UnknownStreakTracker,
    marked: MarkedToday,
    results_tx: watch::Sender<Vec<AnnotatedResult>>,
    events_tx: broadcast::Sender<EngineEvent>,
    /// Mirror of the surfaced-fallback state, readable from any context.
    fallback_flag: Arc<AtomicBool>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        guard: NetworkGuard,
        cooldown: std::time::Duration,
        unknown_streak_limit: u32,
        results_tx: watch::Sender<Vec<AnnotatedResult>>,
        events_tx: broadcast::Sender<EngineEvent>,
        fallback_flag: Arc<AtomicBool>,
    ) -> Self {
        Self {
            store,
            guard,
            debouncer: AttendanceDebouncer::new(cooldown),
            streak: UnknownStreakTracker::new(unknown_streak_limit),
            marked: MarkedToday::new(Local::now().date_naive()),
            results_tx,
            events_tx,
            fallback_flag,
        }
    }

    /// Blocking message loop; runs on its own thread until the engine's
    /// senders are gone.
    pub fn run(mut self, mut rx: mpsc::Receiver<DispatchMsg>) {
        tracing::info!("dispatcher started");
        while let Some(msg) = rx.blocking_recv() {
            match msg {
                DispatchMsg::Cycle(results) => {
                    let annotated =
                        self.annotate_cycle(results, Instant::now(), Local::now().naive_local());
                    let _ = self.results_tx.send(annotated);
                }
                DispatchMsg::ManualMark { emp_code, reply } => {
                    let _ = reply.send(self.manual_mark(&emp_code, Local::now().naive_local()));
                }
                DispatchMsg::RefreshMarked => {
                    self.marked = MarkedToday::new(Local::now().date_naive());
                    if let Err(e) = self.marked.refresh(&self.store) {
                        tracing::error!(error = %e, "failed to refresh marked-today cache");
                    }
                }
            }
        }
        tracing::info!("dispatcher exiting");
    }

    /// Annotate one cycle's results and advance the streak tracker.
    fn annotate_cycle(
        &mut self,
        results: Vec<RecognitionResult>,
        now: Instant,
        now_dt: NaiveDateTime,
    ) -> Vec<AnnotatedResult> {
        let any_known = results.iter().any(|r| r.identity.is_some());

        let mut annotated = Vec::with_capacity(results.len());
        for result in results {
            let entry = match result.identity {
                None => AnnotatedResult {
                    region: result.region,
                    identity: None,
                    display_name: None,
                    status: ScanStatus::Unknown,
                },
                Some(code) => {
                    let (status, display_name) = self.dispatch_known(&code, now, now_dt);
                    AnnotatedResult {
                        region: result.region,
                        identity: Some(code),
                        display_name,
                        status,
                    }
                }
            };
            annotated.push(entry);
        }

        match self.streak.observe_cycle(any_known) {
            Some(StreakSignal::FallbackNeeded) => {
                self.fallback_flag.store(true, Ordering::SeqCst);
                let _ = self.events_tx.send(EngineEvent::FallbackNeeded);
            }
            Some(StreakSignal::Cleared) => {
                self.fallback_flag.store(false, Ordering::SeqCst);
                let _ = self.events_tx.send(EngineEvent::FallbackCleared);
            }
            None => {}
        }

        annotated
    }

    /// Decide the outcome for one recognized identity.
    fn dispatch_known(
        &mut self,
        emp_code: &str,
        now: Instant,
        now_dt: NaiveDateTime,
    ) -> (ScanStatus, Option<String>) {
        if self.marked.contains(emp_code) {
            return (ScanStatus::AlreadyPresent, None);
        }
        if !self.debouncer.should_fire(emp_code, now) {
            return (ScanStatus::NewMatch, None);
        }

        match attendance::mark(&self.store, emp_code, MarkMethod::Face, now_dt) {
            Ok(MarkOutcome::Marked { full_name }) => {
                self.marked.insert(emp_code);
                let _ = self.events_tx.send(EngineEvent::Marked {
                    emp_code: emp_code.to_string(),
                    full_name: full_name.clone(),
                });
                (ScanStatus::JustMarked, Some(full_name))
            }
            Ok(MarkOutcome::AlreadyMarked) => {
                self.marked.insert(emp_code);
                (ScanStatus::AlreadyPresent, None)
            }
            Ok(MarkOutcome::NotFound) => {
                tracing::warn!(emp_code, "recognized identity has no employee record");
                (ScanStatus::Error, None)
            }
            Err(e) => {
                tracing::error!(emp_code, error = %e, "attendance dispatch failed");
                (ScanStatus::Error, None)
            }
        }
    }

    fn manual_mark(
        &mut self,
        emp_code: &str,
        now_dt: NaiveDateTime,
    ) -> Result<MarkOutcome, DispatchError> {
        if !self.guard.is_on_office_network() {
            tracing::warn!(emp_code, "manual mark refused: off the office network");
            return Err(DispatchError::OffNetwork);
        }

        let outcome = attendance::mark(&self.store, emp_code, MarkMethod::Manual, now_dt)?;
        if let MarkOutcome::Marked { full_name } = &outcome {
            self.marked.insert(emp_code);
            if self.streak.clear() {
                self.fallback_flag.store(false, Ordering::SeqCst);
                let _ = self.events_tx.send(EngineEvent::FallbackCleared);
            }
            let _ = self.events_tx.send(EngineEvent::Marked {
                emp_code: emp_code.to_string(),
                full_name: full_name.clone(),
            });
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NewEmployee;
    use chrono::NaiveDate;
    use presence_core::{Embedding, FaceRegion};
    use std::time::Duration;

    const COOLDOWN: Duration = Duration::from_secs(5);
    const STREAK_LIMIT: u32 = 31;

    fn region() -> FaceRegion {
        FaceRegion {
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
            confidence: 0.9,
            landmarks: None,
        }
    }

    fn result(identity: Option<&str>) -> RecognitionResult {
        RecognitionResult {
            region: region(),
            identity: identity.map(str::to_string),
        }
    }

    fn now_dt() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 8, 7)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    struct Rig {
        dispatcher: Dispatcher,
        events_rx: broadcast::Receiver<EngineEvent>,
        fallback: Arc<AtomicBool>,
        store: Arc<Store>,
    }

    fn rig() -> Rig {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store
            .add_employee(
                &NewEmployee {
                    code: "E001".into(),
                    full_name: "Asha Rao".into(),
                    joining_date: None,
                    shift_start: None,
                },
                &[Embedding::new(vec![1.0])],
            )
            .unwrap();

        let (results_tx, _results_rx) = watch::channel(Vec::new());
        let (events_tx, events_rx) = broadcast::channel(64);
        let fallback = Arc::new(AtomicBool::new(false));
        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            NetworkGuard::new(""),
            COOLDOWN,
            STREAK_LIMIT,
            results_tx,
            events_tx,
            Arc::clone(&fallback),
        );
        Rig {
            dispatcher,
            events_rx,
            fallback,
            store,
        }
    }

    #[test]
    fn unknown_face_is_annotated_unknown() {
        let mut rig = rig();
        let out = rig
            .dispatcher
            .annotate_cycle(vec![result(None)], Instant::now(), now_dt());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].status, ScanStatus::Unknown);
    }

    #[test]
    fn first_recognition_marks_and_reports_name() {
        let mut rig = rig();
        let out = rig
            .dispatcher
            .annotate_cycle(vec![result(Some("E001"))], Instant::now(), now_dt());
        assert_eq!(out[0].status, ScanStatus::JustMarked);
        assert_eq!(out[0].display_name.as_deref(), Some("Asha Rao"));
        assert!(rig.store.marked_on(now_dt().date()).unwrap().contains("E001"));
    }

    #[test]
    fn marked_identity_shows_already_present() {
        let mut rig = rig();
        let t0 = Instant::now();
        rig.dispatcher
            .annotate_cycle(vec![result(Some("E001"))], t0, now_dt());
        let out = rig.dispatcher.annotate_cycle(
            vec![result(Some("E001"))],
            t0 + Duration::from_secs(1),
            now_dt(),
        );
        assert_eq!(out[0].status, ScanStatus::AlreadyPresent);
    }

    #[test]
    fn cooldown_suppresses_redispatch_for_unmarked_identity() {
        // "E404" resolves but has no record, so it never enters the
        // marked cache: first sighting fires (and errors), the second is
        // inside the cooldown window.
        let mut rig = rig();
        let t0 = Instant::now();
        let first = rig
            .dispatcher
            .annotate_cycle(vec![result(Some("E404"))], t0, now_dt());
        assert_eq!(first[0].status, ScanStatus::Error);

        let second = rig.dispatcher.annotate_cycle(
            vec![result(Some("E404"))],
            t0 + Duration::from_secs(2),
            now_dt(),
        );
        assert_eq!(second[0].status, ScanStatus::NewMatch);

        // Exactly at the boundary the dispatch fires again.
        let third = rig
            .dispatcher
            .annotate_cycle(vec![result(Some("E404"))], t0 + COOLDOWN, now_dt());
        assert_eq!(third[0].status, ScanStatus::Error);
    }

    #[test]
    fn unknown_streak_surfaces_fallback_event() {
        let mut rig = rig();
        let t0 = Instant::now();
        for _ in 0..STREAK_LIMIT {
            rig.dispatcher.annotate_cycle(vec![result(None)], t0, now_dt());
        }
        assert!(rig.fallback.load(Ordering::SeqCst));
        assert!(matches!(
            rig.events_rx.try_recv().unwrap(),
            EngineEvent::FallbackNeeded
        ));
    }

    #[test]
    fn empty_cycles_count_toward_the_streak() {
        let mut rig = rig();
        let t0 = Instant::now();
        for _ in 0..STREAK_LIMIT {
            rig.dispatcher.annotate_cycle(Vec::new(), t0, now_dt());
        }
        assert!(rig.fallback.load(Ordering::SeqCst));
    }

    #[test]
    fn known_match_resets_streak_and_clears_fallback() {
        let mut rig = rig();
        let t0 = Instant::now();
        for _ in 0..STREAK_LIMIT {
            rig.dispatcher.annotate_cycle(vec![result(None)], t0, now_dt());
        }
        rig.dispatcher
            .annotate_cycle(vec![result(Some("E001"))], t0, now_dt());
        assert!(!rig.fallback.load(Ordering::SeqCst));
    }

    #[test]
    fn manual_mark_records_and_clears_fallback() {
        let mut rig = rig();
        let t0 = Instant::now();
        for _ in 0..STREAK_LIMIT {
            rig.dispatcher.annotate_cycle(vec![result(None)], t0, now_dt());
        }
        assert!(rig.fallback.load(Ordering::SeqCst));

        let outcome = rig.dispatcher.manual_mark("E001", now_dt()).unwrap();
        assert_eq!(
            outcome,
            MarkOutcome::Marked {
                full_name: "Asha Rao".into()
            }
        );
        assert!(!rig.fallback.load(Ordering::SeqCst));

        // And the identity is now cached as marked.
        let out = rig
            .dispatcher
            .annotate_cycle(vec![result(Some("E001"))], t0, now_dt());
        assert_eq!(out[0].status, ScanStatus::AlreadyPresent);
    }

    #[test]
    fn manual_mark_unknown_code_is_not_found() {
        let mut rig = rig();
        let outcome = rig.dispatcher.manual_mark("E404", now_dt()).unwrap();
        assert_eq!(outcome, MarkOutcome::NotFound);
    }
}
