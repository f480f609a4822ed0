//! Shared server context.
//!
//! One explicit dependency object constructed at startup and handed to every
//! component constructor. Single-instance semantics without ambient global
//! state: there is no `g_scheduler()` to reach for, only the context you
//! were given.

use std::sync::Arc;

use crate::admission::{AdmissionPolicy, AllowAll};
use crate::config::CoreConfig;
use crate::scheduler::Scheduler;

pub struct ServerContext {
    pub config: CoreConfig,
    pub scheduler: Scheduler,
    pub admission: Arc<dyn AdmissionPolicy>,
}

impl ServerContext {
    /// Build a context from validated configuration, starting the scheduler
    /// loop. Must be called within a tokio runtime.
    pub fn new(config: CoreConfig) -> Arc<Self> {
        Self::with_admission(config, Arc::new(AllowAll))
    }

    /// Same, with a concrete admission policy (e.g. a shared ban list).
    pub fn with_admission(config: CoreConfig, admission: Arc<dyn AdmissionPolicy>) -> Arc<Self> {
        let scheduler = Scheduler::start(config.scheduler.min_tick);
        Arc::new(Self {
            config,
            scheduler,
            admission,
        })
    }
}
