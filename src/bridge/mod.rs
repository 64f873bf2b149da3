//! Command bridge between callers and the face engine.

pub mod coordinator;
pub mod dispatch;
pub mod environment;
pub mod handle;
pub mod router;

use std::sync::Arc;
use crate::codec::ImageEncoding;
use crate::common::{Config, Result};
use crate::core::ImageScratch;
use crate::engine::EngineFactory;

pub use coordinator::{SessionCoordinator, SessionPhase};
pub use dispatch::{Delivery, WorkerPool};
pub use environment::Environment;
pub use handle::{CallerHandle, CommandResponse, ResultSink};
pub use router::{Command, CommandRouter};

/// Everything a handler needs, built once per bridge.
pub struct BridgeContext {
    pub config: Config,
    pub pool: Arc<WorkerPool>,
    pub delivery: Delivery,
    pub environment: Arc<Environment>,
    pub coordinator: Arc<SessionCoordinator>,
    pub encoding: ImageEncoding,
}

impl BridgeContext {
    pub fn new(config: Config, factory: Arc<dyn EngineFactory>) -> Result<Arc<Self>> {
        config.validate()?;

        let pool = Arc::new(WorkerPool::new(config.dispatch.worker_threads)?);
        let delivery = Delivery::start()?;
        let encoding = ImageEncoding::from(&config.images);
        let environment = Arc::new(Environment::new(factory, Arc::clone(&pool)));
        let coordinator = Arc::new(SessionCoordinator::new(
            Arc::clone(&environment),
            Arc::clone(&pool),
            delivery.clone(),
            encoding,
            config.dispatch.session_timeout(),
        ));

        tracing::info!(
            "Bridge ready with {} workers, session timeout {:?}",
            pool.size(),
            config.dispatch.session_timeout()
        );

        Ok(Arc::new(Self {
            config,
            pool,
            delivery,
            environment,
            coordinator,
            encoding,
        }))
    }

    /// Fresh scratch space for decoding session results, under
    /// `images.scratch_dir` when configured.
    pub fn image_scratch(&self) -> Result<ImageScratch> {
        match &self.config.images.scratch_dir {
            Some(parent) => ImageScratch::new_in(parent),
            None => ImageScratch::new(),
        }
    }
}
