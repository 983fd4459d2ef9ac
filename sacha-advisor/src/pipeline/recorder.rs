//! Lifecycle recorder
//!
//! Status writes are awaited by the task that owns the request, because the guard and
//! later acknowledgments depend on their order. Side records (behavior flags, the step a
//! request stopped at) run as tracked background tasks; failures of either kind are
//! logged and never reach the caller.

use sqlx::SqlitePool;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::db::{behavior, request_logs};
use crate::models::{BehaviorEvent, RequestContext, StopStep, Transition};

#[derive(Clone)]
pub struct LifecycleRecorder {
    pool: SqlitePool,
    tracker: TaskTracker,
}

impl LifecycleRecorder {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            tracker: TaskTracker::new(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Record entry into `processing`; false if the write failed
    pub async fn begin(&self, ctx: &RequestContext) -> bool {
        match request_logs::insert_processing(&self.pool, ctx).await {
            Ok(()) => {
                debug!(session_id = %ctx.session_id, file_type = %ctx.file_type, "Request processing");
                true
            }
            Err(e) => {
                warn!(session_id = %ctx.session_id, error = %e, "Failed to record processing entry");
                false
            }
        }
    }

    /// Apply a guarded transition; true when this call moved the stored status
    ///
    /// When applied and the transition names a stop step, the step is recorded in the
    /// background.
    pub async fn transition(
        &self,
        session_id: &str,
        transition: &Transition,
        file_size_bytes: Option<u64>,
    ) -> bool {
        match request_logs::apply_transition(&self.pool, session_id, transition).await {
            Ok(true) => {
                info!(
                    session_id = %session_id,
                    status = %transition.target(),
                    processing_time_ms = transition.processing_time_ms(),
                    "Request status updated"
                );
                if let Some(step) = transition.step() {
                    self.spawn_step(session_id.to_string(), step, file_size_bytes);
                }
                true
            }
            Ok(false) => {
                debug!(
                    session_id = %session_id,
                    status = %transition.target(),
                    "Transition skipped, status already left {}",
                    transition.expected()
                );
                false
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Failed to record status transition");
                false
            }
        }
    }

    /// `completed_not_viewed` → `completed`
    pub async fn acknowledge(&self, session_id: &str) -> sacha_common::Result<bool> {
        request_logs::apply_transition(&self.pool, session_id, &Transition::Acknowledged).await
    }

    /// Set a behavior flag in the background
    pub fn record_behavior(&self, session_id: &str, event: BehaviorEvent) {
        let pool = self.pool.clone();
        let session_id = session_id.to_string();
        self.tracker.spawn(async move {
            if let Err(e) = behavior::record_event(&pool, &session_id, event).await {
                warn!(session_id = %session_id, event = event.column(), error = %e, "Failed to record behavior event");
            }
        });
    }

    fn spawn_step(&self, session_id: String, step: StopStep, file_size_bytes: Option<u64>) {
        let pool = self.pool.clone();
        self.tracker.spawn(async move {
            if let Err(e) = behavior::record_step(&pool, &session_id, step, file_size_bytes).await {
                warn!(session_id = %session_id, step = %step, error = %e, "Failed to record stop step");
            }
        });
    }

    /// Wait for every background record spawned so far
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
