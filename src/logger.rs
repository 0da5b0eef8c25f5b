use {
    std::{error::Error, time::SystemTime},
    tracing::{debug, error, info, warn},
};

///
/// Informational lease lifecycle events.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseEvent<'a> {
    Obtained {
        lessee_id: &'a str,
        item_id: &'a str,
        expires_at: SystemTime,
    },
    ///
    /// Every candidate was held by someone else.
    ///
    NotObtained { lessee_id: &'a str, candidates: usize },
    Renewed {
        lessee_id: &'a str,
        item_id: &'a str,
        expires_at: SystemTime,
    },
    Lost { lessee_id: &'a str, item_id: &'a str },
    ///
    /// The heartbeat was stopped by its caller while the lease was still held.
    ///
    HeartbeatStopped { lessee_id: &'a str, item_id: &'a str },
}

///
/// Operation that failed with an infrastructure or decode error.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseFailure<'a> {
    Obtain {
        lessee_id: &'a str,
        item_id: Option<&'a str>,
    },
    Renew { lessee_id: &'a str, item_id: &'a str },
}

///
/// Sink for lease events, handed to the [`crate::locker::Locker`] at construction.
///
/// Pure side channel: nothing the logger does influences the lease protocol.
///
pub trait LeaseLogger: Send + Sync {
    fn log_info(&self, event: LeaseEvent<'_>);

    fn log_error(&self, failure: LeaseFailure<'_>, error: &(dyn Error + 'static));
}

///
/// Forwards lease events to `tracing`.
///
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLeaseLogger;

impl LeaseLogger for TracingLeaseLogger {
    fn log_info(&self, event: LeaseEvent<'_>) {
        match event {
            LeaseEvent::Obtained {
                lessee_id,
                item_id,
                expires_at,
            } => {
                info!(lessee_id, item_id, ?expires_at, "obtained lease");
            }
            LeaseEvent::NotObtained {
                lessee_id,
                candidates,
            } => {
                debug!(lessee_id, candidates, "no lease available");
            }
            LeaseEvent::Renewed {
                lessee_id,
                item_id,
                expires_at,
            } => {
                info!(lessee_id, item_id, ?expires_at, "renewed lease");
            }
            LeaseEvent::Lost { lessee_id, item_id } => {
                warn!(lessee_id, item_id, "lease lost to another lessee");
            }
            LeaseEvent::HeartbeatStopped { lessee_id, item_id } => {
                info!(lessee_id, item_id, "heartbeat stopped");
            }
        }
    }

    fn log_error(&self, failure: LeaseFailure<'_>, err: &(dyn Error + 'static)) {
        match failure {
            LeaseFailure::Obtain { lessee_id, item_id } => {
                error!(lessee_id, ?item_id, "failed to obtain lease: {err}");
            }
            LeaseFailure::Renew { lessee_id, item_id } => {
                error!(lessee_id, item_id, "failed to renew lease: {err}");
            }
        }
    }
}

///
/// Discards every event.
///
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLeaseLogger;

impl LeaseLogger for NoopLeaseLogger {
    fn log_info(&self, _event: LeaseEvent<'_>) {}

    fn log_error(&self, _failure: LeaseFailure<'_>, _error: &(dyn Error + 'static)) {}
}
