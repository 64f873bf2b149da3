//! Single-shot, on-demand construction of the shared face engine.

use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use crate::bridge::dispatch::WorkerPool;
use crate::common::{BridgeError, Result};
use crate::engine::{EngineFactory, FaceEngine};

/// Called once with the engine or the reason it could not be built.
pub type EngineWaiter = Box<dyn FnOnce(Result<Arc<dyn FaceEngine>>) + Send + 'static>;

enum State {
    Unloaded,
    /// `discard` is set when an unload arrives mid-construction.
    Loading { waiters: Vec<EngineWaiter>, discard: bool },
    Ready(Arc<dyn FaceEngine>),
}

pub struct Environment {
    state: Mutex<State>,
    /// Guarded by `state` so a flag change cannot slip past a construction.
    testing_mode: Mutex<bool>,
    factory: Arc<dyn EngineFactory>,
    pool: Arc<WorkerPool>,
}

impl Environment {
    pub fn new(factory: Arc<dyn EngineFactory>, pool: Arc<WorkerPool>) -> Self {
        Self {
            state: Mutex::new(State::Unloaded),
            testing_mode: Mutex::new(false),
            factory,
            pool,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ready(&self) -> Option<Arc<dyn FaceEngine>> {
        match &*self.state() {
            State::Ready(engine) => Some(Arc::clone(engine)),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(&*self.state(), State::Loading { .. })
    }

    /// Runs `waiter` with the engine, constructing it first if needed. A
    /// ready engine is handed over on the calling thread; otherwise the
    /// waiter runs on the worker that finished construction.
    pub fn with_engine(self: &Arc<Self>, credential: Option<String>, waiter: EngineWaiter) {
        let mut state = self.state();
        match &mut *state {
            State::Ready(engine) => {
                let engine = Arc::clone(engine);
                drop(state);
                waiter(Ok(engine));
                return;
            }
            State::Loading { waiters, discard } => {
                *discard = false;
                waiters.push(waiter);
                return;
            }
            State::Unloaded => {}
        }

        *state = State::Loading { waiters: vec![waiter], discard: false };
        drop(state);

        tracing::info!("Constructing face engine");
        let environment = Arc::clone(self);
        self.pool.spawn(move || environment.construct(credential));
    }

    fn construct(&self, credential: Option<String>) {
        let built = self.factory.create(credential.as_deref()).map_err(as_load_error);

        let (waiters, outcome) = {
            let mut state = self.state();
            let (waiters, discard) = match mem::replace(&mut *state, State::Unloaded) {
                State::Loading { waiters, discard } => (waiters, discard),
                other => {
                    *state = other;
                    tracing::error!("Engine construction finished outside of loading state");
                    return;
                }
            };

            let outcome = match built {
                Ok(engine) if discard => {
                    engine.unload();
                    Err("Engine was unloaded while loading".to_string())
                }
                Ok(engine) => {
                    engine.set_testing_mode(*self.testing_mode.lock().unwrap_or_else(PoisonError::into_inner));
                    *state = State::Ready(Arc::clone(&engine));
                    tracing::info!("Face engine ready");
                    Ok(engine)
                }
                Err(e) => {
                    tracing::warn!("{}", e);
                    Err(load_message(e))
                }
            };
            (waiters, outcome)
        };

        for waiter in waiters {
            waiter(outcome.clone().map_err(BridgeError::EnvironmentLoad));
        }
    }

    /// Stores the flag and forwards it to a ready engine. An engine built
    /// later picks it up at construction.
    pub fn set_testing_mode(&self, enabled: bool) {
        let state = self.state();
        *self.testing_mode.lock().unwrap_or_else(PoisonError::into_inner) = enabled;
        if let State::Ready(engine) = &*state {
            engine.set_testing_mode(enabled);
        }
    }

    pub fn testing_mode(&self) -> bool {
        *self.testing_mode.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops the engine. A construction in flight is discarded when it finishes.
    pub fn unload(&self) {
        let mut state = self.state();
        if let State::Loading { discard, .. } = &mut *state {
            *discard = true;
            return;
        }

        if let State::Ready(engine) = mem::replace(&mut *state, State::Unloaded) {
            drop(state);
            engine.unload();
            tracing::info!("Face engine unloaded");
        }
    }
}

fn as_load_error(error: BridgeError) -> BridgeError {
    match error {
        BridgeError::EnvironmentLoad(_) => error,
        other => BridgeError::EnvironmentLoad(other.to_string()),
    }
}

fn load_message(error: BridgeError) -> String {
    match error {
        BridgeError::EnvironmentLoad(message) => message,
        other => other.to_string(),
    }
}
