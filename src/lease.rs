use {
    serde::de::DeserializeOwned,
    std::{
        error::Error,
        fmt,
        marker::PhantomData,
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
        time::{Duration, SystemTime},
    },
};

///
/// Longest validity window a lease is granted, whatever its request asks for.
///
pub const MAX_LEASE_DURATION: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

///
/// Expiry of a lease requested at `now` for `duration`, capped at [`MAX_LEASE_DURATION`].
///
pub(crate) fn expiry_after(now: SystemTime, duration: Duration) -> SystemTime {
    now.checked_add(duration.min(MAX_LEASE_DURATION)).unwrap_or(now)
}

///
/// Raw attributes of a store item, as handed back by a [`crate::store::LeaseStore`].
///
/// An empty map means the item carries no payload fields.
///
pub type Attributes = serde_json::Map<String, serde_json::Value>;

///
/// Raised by [`LeaseRequest::decode_payload`] when the stored attributes cannot be
/// turned into the caller's payload.
///
#[derive(Debug, thiserror::Error)]
#[error("failed to decode lease payload: {0}")]
pub struct DecodeError(Box<dyn Error + Send + Sync + 'static>);

impl DecodeError {
    pub fn new<E>(err: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync + 'static>>,
    {
        Self(err.into())
    }

    pub fn into_inner(self) -> Box<dyn Error + Send + Sync + 'static> {
        self.0
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err)
    }
}

///
/// Describes who wants a lease, for how long, and how to read the leased item.
///
/// `lessee_id` must stay the same for the whole acquisition and heartbeat session.
/// `lease_duration` is asked again on every renewal, so it may change between heartbeats.
/// Durations longer than [`MAX_LEASE_DURATION`] are capped.
///
/// The payload must be `Sync`: a heartbeat running on another task holds a reference to the
/// lease while it waits on the store.
///
/// ```compile_fail
/// use std::{cell::Cell, time::Duration};
/// use rust_lease_locker::lease::{Attributes, DecodeError, LeaseRequest};
///
/// struct CellRequest;
///
/// impl LeaseRequest for CellRequest {
///     type Payload = Cell<u32>;
///
///     fn lessee_id(&self) -> &str {
///         "worker-1"
///     }
///
///     fn lease_duration(&self) -> Duration {
///         Duration::from_secs(30)
///     }
///
///     fn decode_payload(&self, _attributes: Attributes) -> Result<Cell<u32>, DecodeError> {
///         Ok(Cell::new(0))
///     }
/// }
/// ```
///
pub trait LeaseRequest: Send + Sync {
    type Payload: Send + Sync;

    ///
    /// Ownership marker written to the store.
    ///
    fn lessee_id(&self) -> &str;

    ///
    /// Validity window requested from "now".
    ///
    fn lease_duration(&self) -> Duration;

    ///
    /// Converts the store attributes into the caller's payload.
    ///
    /// Must accept an empty attribute map unless the payload genuinely cannot exist without
    /// attributes.
    ///
    fn decode_payload(&self, attributes: Attributes) -> Result<Self::Payload, DecodeError>;
}

///
/// A lease held on one store item.
///
/// Each successful acquire or renew produces a fresh `Lease`.
///
pub struct Lease<R: LeaseRequest> {
    pub item_id: String,
    pub payload: R::Payload,
    pub request: Arc<R>,
    pub expires_at: SystemTime,
}

impl<R: LeaseRequest> Lease<R> {
    pub fn lessee_id(&self) -> &str {
        self.request.lessee_id()
    }

    pub fn is_expired(&self) -> bool {
        SystemTime::now() >= self.expires_at
    }

    ///
    /// Time left before the lease expires, `None` once expired.
    ///
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .duration_since(SystemTime::now())
            .ok()
            .filter(|d| !d.is_zero())
    }
}

impl<R> fmt::Debug for Lease<R>
where
    R: LeaseRequest,
    R::Payload: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("item_id", &self.item_id)
            .field("lessee_id", &self.request.lessee_id())
            .field("payload", &self.payload)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

///
/// Ready-made [`LeaseRequest`] that decodes the item attributes with serde.
///
/// An item without attributes decodes to `P::default()`.
///
/// Examples
///
/// ```
/// use std::time::Duration;
/// use rust_lease_locker::lease::{Attributes, BasicLeaseRequest, LeaseRequest};
///
/// let request = BasicLeaseRequest::<Attributes>::new("worker-1", Duration::from_secs(30));
/// assert_eq!(request.lessee_id(), "worker-1");
///
/// // Following renewals will ask for a shorter lease.
/// request.set_lease_duration(Duration::from_secs(10));
/// assert_eq!(request.lease_duration(), Duration::from_secs(10));
/// ```
///
pub struct BasicLeaseRequest<P = Attributes> {
    lessee_id: String,
    lease_duration_nanos: AtomicU64,
    _phantom: PhantomData<fn() -> P>,
}

impl<P> BasicLeaseRequest<P> {
    pub fn new(lessee_id: impl Into<String>, lease_duration: Duration) -> Self {
        Self {
            lessee_id: lessee_id.into(),
            lease_duration_nanos: AtomicU64::new(duration_to_nanos(lease_duration)),
            _phantom: PhantomData,
        }
    }

    ///
    /// Changes the duration asked for by the next acquisition or renewal.
    ///
    pub fn set_lease_duration(&self, lease_duration: Duration) {
        self.lease_duration_nanos
            .store(duration_to_nanos(lease_duration), Ordering::Release);
    }
}

fn duration_to_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

impl<P> fmt::Debug for BasicLeaseRequest<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicLeaseRequest")
            .field("lessee_id", &self.lessee_id)
            .field(
                "lease_duration",
                &Duration::from_nanos(self.lease_duration_nanos.load(Ordering::Acquire)),
            )
            .finish()
    }
}

impl<P> LeaseRequest for BasicLeaseRequest<P>
where
    P: DeserializeOwned + Default + Send + Sync,
{
    type Payload = P;

    fn lessee_id(&self) -> &str {
        &self.lessee_id
    }

    fn lease_duration(&self) -> Duration {
        Duration::from_nanos(self.lease_duration_nanos.load(Ordering::Acquire))
    }

    fn decode_payload(&self, attributes: Attributes) -> Result<P, DecodeError> {
        if attributes.is_empty() {
            return Ok(P::default());
        }
        Ok(serde_json::from_value(serde_json::Value::Object(attributes))?)
    }
}
