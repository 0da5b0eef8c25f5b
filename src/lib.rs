///
/// Lease requests and the leases they produce.
///
pub mod lease;

///
/// Contract of the backing store, the sole source of mutual exclusion.
///
pub mod store;

///
/// Obtains leases from a pool of items and keeps them alive.
///
pub mod locker;

///
/// Background heartbeat tied to a handle.
///
pub mod heartbeat;

///
/// Injected sink for lease events.
///
pub mod logger;

///
/// Utility function to manage various transient errors.
pub mod retry;

///
/// Lease store over etcd.
///
pub mod etcd;

///
/// In-process lease store.
pub mod memory;

pub use {
    heartbeat::{HeartbeatExit, LeaseLostNotify, ManagedHeartbeat},
    lease::{Attributes, BasicLeaseRequest, DecodeError, Lease, LeaseRequest},
    locker::{HeartbeatError, Locker, ObtainLeaseError, RenewError},
    store::{AcquireError, LeaseStore, LeasedItem},
};
