//! Disconnect monitor
//!
//! Polls a [`ConnectionProbe`] while the main path works. On the first observed
//! disconnect it claims the request's [`TerminalLatch`] and records `abandoned_by_user`.
//! The main path claims the same latch before its own terminal write, so exactly one of
//! the two ever finalizes a request from this process; the guarded update in the database
//! backs this up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use super::LifecycleRecorder;
use crate::models::Transition;

/// Connection state reported by a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Connected,
    /// Closed; `since` is when the closure was first observed
    Disconnected { since: Instant },
}

#[derive(Debug, Clone, Error)]
#[error("Connection probe failed: {0}")]
pub struct ProbeError(pub String);

/// Reports whether the caller is still connected
pub trait ConnectionProbe: Send + Sync {
    fn check(&self) -> Result<Liveness, ProbeError>;
}

/// Held by the HTTP handler for as long as the caller waits for the response
///
/// Dropping it without [`ConnectionGuard::disarm`] (the handler future was dropped because
/// the client went away) marks the connection closed.
#[derive(Debug)]
pub struct ConnectionGuard {
    closed_at: Arc<OnceLock<Instant>>,
    armed: bool,
}

impl ConnectionGuard {
    pub fn new() -> (Self, GuardProbe) {
        let closed_at = Arc::new(OnceLock::new());
        (
            Self {
                closed_at: closed_at.clone(),
                armed: true,
            },
            GuardProbe { closed_at },
        )
    }

    /// Response handed back to the caller; dropping no longer means a disconnect
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.closed_at.set(Instant::now());
        }
    }
}

/// Probe side of a [`ConnectionGuard`]
#[derive(Debug, Clone)]
pub struct GuardProbe {
    closed_at: Arc<OnceLock<Instant>>,
}

impl ConnectionProbe for GuardProbe {
    fn check(&self) -> Result<Liveness, ProbeError> {
        Ok(match self.closed_at.get() {
            Some(since) => Liveness::Disconnected { since: *since },
            None => Liveness::Connected,
        })
    }
}

/// Probe for streaming responses: the caller is gone once the event receiver is dropped
#[derive(Debug)]
pub struct ChannelProbe<T> {
    sender: mpsc::Sender<T>,
    first_seen_closed: OnceLock<Instant>,
}

impl<T> ChannelProbe<T> {
    pub fn new(sender: mpsc::Sender<T>) -> Self {
        Self {
            sender,
            first_seen_closed: OnceLock::new(),
        }
    }
}

impl<T: Send> ConnectionProbe for ChannelProbe<T> {
    fn check(&self) -> Result<Liveness, ProbeError> {
        if self.sender.is_closed() {
            let since = *self.first_seen_closed.get_or_init(Instant::now);
            Ok(Liveness::Disconnected { since })
        } else {
            Ok(Liveness::Connected)
        }
    }
}

/// One-shot right to write a request's terminal status
#[derive(Debug, Clone, Default)]
pub struct TerminalLatch(Arc<AtomicBool>);

impl TerminalLatch {
    /// True for exactly one caller
    pub fn claim(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_claimed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// How a monitor task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// Cancelled by the main path before any disconnect was seen
    Cancelled,
    /// Recorded the request as abandoned by the user
    Abandoned,
    /// Saw a disconnect, but the main path had already claimed the terminal write
    Superseded,
    /// Probe failed; the monitor stopped without writing
    ProbeFailed,
}

/// Handle to a running monitor task; dropping it cancels the task
pub struct DisconnectMonitor {
    token: CancellationToken,
    handle: JoinHandle<MonitorOutcome>,
    _cancel_on_drop: DropGuard,
}

impl DisconnectMonitor {
    pub fn spawn(
        probe: Arc<dyn ConnectionProbe>,
        recorder: LifecycleRecorder,
        latch: TerminalLatch,
        session_id: String,
        started_at: Instant,
        file_size_bytes: u64,
        interval: Duration,
    ) -> Self {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => {
                        debug!(session_id = %session_id, "Disconnect monitor cancelled");
                        return MonitorOutcome::Cancelled;
                    }
                    _ = ticker.tick() => {}
                }

                match probe.check() {
                    Ok(Liveness::Connected) => continue,
                    Ok(Liveness::Disconnected { since }) => {
                        if cancelled.is_cancelled() {
                            return MonitorOutcome::Cancelled;
                        }
                        if !latch.claim() {
                            debug!(session_id = %session_id, "Disconnect seen after request finished");
                            return MonitorOutcome::Superseded;
                        }

                        let processing_time_ms = sacha_common::time::millis_between(started_at, since);
                        info!(
                            session_id = %session_id,
                            processing_time_ms,
                            "Client disconnected during processing"
                        );
                        recorder
                            .transition(
                                &session_id,
                                &Transition::AbandonedByUser { processing_time_ms },
                                Some(file_size_bytes),
                            )
                            .await;
                        return MonitorOutcome::Abandoned;
                    }
                    Err(e) => {
                        debug!(session_id = %session_id, error = %e, "Disconnect monitor stopping");
                        return MonitorOutcome::ProbeFailed;
                    }
                }
            }
        });

        Self {
            _cancel_on_drop: token.clone().drop_guard(),
            token,
            handle,
        }
    }

    /// Stop the monitor and wait for it; a write already under way completes first
    pub async fn cancel(mut self) -> MonitorOutcome {
        self.token.cancel();
        match (&mut self.handle).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Disconnect monitor task failed");
                MonitorOutcome::ProbeFailed
            }
        }
    }
}
