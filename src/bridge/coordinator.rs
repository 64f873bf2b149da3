//! Owns the single session slot. At most one registration, authentication
//! or liveness session exists at a time, and its caller receives exactly one
//! response.

use crossbeam_channel::{after, bounded, select, Sender};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use crate::bridge::dispatch::{Delivery, WorkerPool};
use crate::bridge::environment::Environment;
use crate::bridge::handle::{CallerHandle, CommandResponse};
use crate::codec::{session_result, ImageEncoding};
use crate::common::{BridgeError, Result};
use crate::core::{SessionKind, SessionSettings};
use crate::engine::{CaptureControl, CaptureObserver, CaptureOutcome, FaceEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    AwaitingEnvironment,
    Active,
}

struct Occupant {
    id: u64,
    kind: SessionKind,
    caller: CallerHandle,
    phase: SessionPhase,
    control: Option<Box<dyn CaptureControl>>,
    started: Instant,
    // Dropping this stops the session's timeout watchdog.
    _watchdog: Option<Sender<()>>,
}

enum Ending {
    Capture(CaptureOutcome),
    Failed(BridgeError),
}

pub struct SessionCoordinator {
    slot: Mutex<Option<Occupant>>,
    next_id: AtomicU64,
    environment: Arc<Environment>,
    pool: Arc<WorkerPool>,
    delivery: Delivery,
    encoding: ImageEncoding,
    timeout: Option<Duration>,
}

impl SessionCoordinator {
    pub fn new(
        environment: Arc<Environment>,
        pool: Arc<WorkerPool>,
        delivery: Delivery,
        encoding: ImageEncoding,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            slot: Mutex::new(None),
            next_id: AtomicU64::new(1),
            environment,
            pool,
            delivery,
            encoding,
            timeout,
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Occupant>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self) -> SessionPhase {
        self.slot()
            .as_ref()
            .map(|occupant| occupant.phase)
            .unwrap_or(SessionPhase::Idle)
    }

    /// Claims the slot for `caller` and starts the session. On `Ok` the caller
    /// will be answered later; on `Err` nothing was started and answering is
    /// up to the invoker.
    pub fn start_session(
        self: &Arc<Self>,
        kind: SessionKind,
        settings: Result<SessionSettings>,
        credential: Option<String>,
        caller: CallerHandle,
    ) -> Result<u64> {
        let id = self.claim(kind, caller)?;

        let settings = match settings {
            Ok(settings) => settings,
            Err(e) => {
                self.release(id);
                return Err(e);
            }
        };

        tracing::info!("Session {} ({}) awaiting engine", id, kind);
        let coordinator = Arc::clone(self);
        self.environment.with_engine(
            credential,
            Box::new(move |engine| match engine {
                Ok(engine) => coordinator.activate(id, engine, settings),
                Err(e) => coordinator.finish(id, Ending::Failed(e)),
            }),
        );

        Ok(id)
    }

    /// Cancels the current session, answering its caller with an empty ack.
    /// Returns whether there was a session to cancel.
    pub fn cancel(&self) -> bool {
        let Some(occupant) = self.slot().take() else {
            return false;
        };

        tracing::info!("Session {} ({}) canceled", occupant.id, occupant.kind);
        if let Some(control) = &occupant.control {
            control.cancel();
        }
        self.delivery.post(occupant.caller, CommandResponse::ack());
        true
    }

    fn claim(self: &Arc<Self>, kind: SessionKind, caller: CallerHandle) -> Result<u64> {
        let phase = if self.environment.ready().is_some() {
            SessionPhase::Active
        } else {
            SessionPhase::AwaitingEnvironment
        };

        let mut slot = self.slot();
        if let Some(current) = slot.as_ref() {
            tracing::warn!(
                "Rejecting {} session while session {} ({}) is in progress",
                kind, current.id, current.kind
            );
            return Err(BridgeError::SessionRejected);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let watchdog = self.timeout.map(|timeout| self.arm_watchdog(id, timeout));
        *slot = Some(Occupant {
            id,
            kind,
            caller,
            phase,
            control: None,
            started: Instant::now(),
            _watchdog: watchdog,
        });
        Ok(id)
    }

    fn release(&self, id: u64) {
        let mut slot = self.slot();
        if slot.as_ref().map(|occupant| occupant.id) == Some(id) {
            *slot = None;
        }
    }

    fn activate(self: &Arc<Self>, id: u64, engine: Arc<dyn FaceEngine>, settings: SessionSettings) {
        {
            let mut slot = self.slot();
            match slot.as_mut() {
                Some(occupant) if occupant.id == id => occupant.phase = SessionPhase::Active,
                _ => {
                    tracing::debug!("Session {} ended before the engine was ready", id);
                    return;
                }
            }
        }

        tracing::info!("Session {} active", id);
        let handoff = Arc::new(AtomicU8::new(HANDOFF_STARTING));
        let observer = Box::new(SessionObserver {
            coordinator: Arc::downgrade(self),
            id,
            handoff: Arc::clone(&handoff),
            completed: false,
        });

        match engine.start_capture(settings, observer) {
            Ok(control) => {
                if handoff
                    .compare_exchange(HANDOFF_STARTING, HANDOFF_RUNNING, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    control.cancel();
                    self.finish(id, Ending::Failed(abandoned_capture()));
                    return;
                }

                let orphaned = {
                    let mut slot = self.slot();
                    match slot.as_mut() {
                        Some(occupant) if occupant.id == id => {
                            occupant.control = Some(control);
                            None
                        }
                        _ => Some(control),
                    }
                };
                if let Some(control) = orphaned {
                    control.cancel();
                }
            }
            Err(e) => self.finish(id, Ending::Failed(e)),
        }
    }

    fn finish(&self, id: u64, ending: Ending) {
        let occupant = {
            let mut slot = self.slot();
            if slot.as_ref().map(|occupant| occupant.id) == Some(id) {
                slot.take()
            } else {
                None
            }
        };
        let Some(occupant) = occupant else {
            tracing::debug!("Ignoring stale completion of session {}", id);
            return;
        };

        let elapsed = occupant.started.elapsed();
        let caller = occupant.caller;
        match ending {
            Ending::Capture(CaptureOutcome::Finished(result)) => {
                tracing::info!("Session {} ({}) completed in {:?}", id, occupant.kind, elapsed);
                let delivery = self.delivery.clone();
                let encoding = self.encoding;
                self.pool.spawn(move || {
                    let response = match session_result::encode(&result, &encoding) {
                        Ok(payload) => CommandResponse::ok(payload),
                        Err(e) => {
                            tracing::warn!("Failed to encode result of session {}: {}", id, e);
                            CommandResponse::from_error(&e)
                        }
                    };
                    delivery.post(caller, response);
                });
            }
            Ending::Capture(CaptureOutcome::Canceled) => {
                tracing::info!("Session {} ({}) canceled by the engine", id, occupant.kind);
                self.delivery.post(caller, CommandResponse::ack());
            }
            Ending::Failed(e) => {
                tracing::warn!("Session {} ({}) failed: {}", id, occupant.kind, e);
                if let Some(control) = &occupant.control {
                    control.cancel();
                }
                self.delivery.post(caller, CommandResponse::from_error(&e));
            }
        }
    }

    fn arm_watchdog(self: &Arc<Self>, id: u64, timeout: Duration) -> Sender<()> {
        let (stop, stopped) = bounded::<()>(0);
        let coordinator = Arc::downgrade(self);

        let spawned = std::thread::Builder::new()
            .name(format!("session-{}-watchdog", id))
            .spawn(move || {
                select! {
                    recv(stopped) -> _ => {}
                    recv(after(timeout)) -> _ => {
                        if let Some(coordinator) = coordinator.upgrade() {
                            coordinator.finish(
                                id,
                                Ending::Failed(BridgeError::Engine("Session timed out".into())),
                            );
                        }
                    }
                }
            });
        if let Err(e) = spawned {
            tracing::error!("Could not start watchdog for session {}: {}", id, e);
        }
        stop
    }
}

// Observer hand-off states. A drop while `STARTING` is left to `activate`,
// which still has the result of `start_capture` to report.
const HANDOFF_STARTING: u8 = 0;
const HANDOFF_RUNNING: u8 = 1;
const HANDOFF_DROPPED: u8 = 2;

fn abandoned_capture() -> BridgeError {
    BridgeError::Engine("Capture ended without a result".into())
}

struct SessionObserver {
    coordinator: Weak<SessionCoordinator>,
    id: u64,
    handoff: Arc<AtomicU8>,
    completed: bool,
}

impl CaptureObserver for SessionObserver {
    fn complete(mut self: Box<Self>, outcome: CaptureOutcome) {
        self.completed = true;
        if let Some(coordinator) = self.coordinator.upgrade() {
            coordinator.finish(self.id, Ending::Capture(outcome));
        }
    }
}

impl Drop for SessionObserver {
    /// A capture that dies without completing, by panic or otherwise, must
    /// still free the slot.
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let early = self
            .handoff
            .compare_exchange(HANDOFF_STARTING, HANDOFF_DROPPED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if early {
            return;
        }

        tracing::warn!("Capture for session {} ended without a result", self.id);
        if let Some(coordinator) = self.coordinator.upgrade() {
            coordinator.finish(self.id, Ending::Failed(abandoned_capture()));
        }
    }
}
