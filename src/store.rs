use {
    crate::lease::Attributes,
    async_trait::async_trait,
    rand::seq::SliceRandom,
    std::{error::Error, sync::Arc, time::SystemTime},
};

///
/// Post-write state of an item after a successful acquire or renew.
///
#[derive(Debug, Clone, PartialEq)]
pub struct LeasedItem {
    pub item_id: String,
    ///
    /// Payload fields of the item, without the ownership fields.
    ///
    pub attributes: Attributes,
}

#[derive(Debug, thiserror::Error)]
pub enum AcquireError<E> {
    ///
    /// The conditional write was rejected: the item is missing or another lessee holds it.
    ///
    #[error("lease is held by another lessee")]
    Contention,
    #[error("lease store failure: {0}")]
    Store(E),
}

impl<E> AcquireError<E> {
    pub fn is_contention(&self) -> bool {
        matches!(self, AcquireError::Contention)
    }
}

///
/// Backing store of lease items.
///
/// The store is the sole source of mutual exclusion: [`LeaseStore::lease`] must commit
/// atomically, and only if the item exists AND (its expiry is in the past OR it is already
/// owned by `lessee_id`).
///
#[async_trait]
pub trait LeaseStore: Send + Sync {
    type Error: Error + Send + Sync + 'static;

    ///
    /// Lists the ids of every leasable item. An empty list is a valid answer.
    ///
    async fn list_lease_ids(&self) -> Result<Vec<String>, Self::Error>;

    ///
    /// Acquires or renews the lease on `item_id` for `lessee_id` until `until`.
    ///
    async fn lease(
        &self,
        item_id: &str,
        lessee_id: &str,
        until: SystemTime,
    ) -> Result<LeasedItem, AcquireError<Self::Error>>;
}

#[async_trait]
impl<S> LeaseStore for Arc<S>
where
    S: LeaseStore + ?Sized,
{
    type Error = S::Error;

    async fn list_lease_ids(&self) -> Result<Vec<String>, Self::Error> {
        (**self).list_lease_ids().await
    }

    async fn lease(
        &self,
        item_id: &str,
        lessee_id: &str,
        until: SystemTime,
    ) -> Result<LeasedItem, AcquireError<Self::Error>> {
        (**self).lease(item_id, lessee_id, until).await
    }
}

///
/// Ownership predicate every [`LeaseStore`] must apply atomically with its write.
///
/// Public so that stores implemented outside this crate grant leases under the same
/// condition as [`crate::etcd::EtcdLeaseStore`] and [`crate::memory::MemoryLeaseStore`].
///
/// An item that was never leased (`held_until` is `None`) is free. An item whose lease
/// expires exactly at `now` is still held.
///
pub fn lease_available(
    holder: Option<&str>,
    held_until: Option<SystemTime>,
    lessee_id: &str,
    now: SystemTime,
) -> bool {
    let expired = held_until.map_or(true, |until| until < now);
    expired || holder == Some(lessee_id)
}

///
/// Store decorator returning candidate ids in a random order on every listing.
///
/// The [`crate::locker::Locker`] always scans candidates in the order it receives them,
/// so lessees sharing one pool will all pile up on the first free item. Wrap the store
/// with this to spread them out.
///
pub struct ShuffledLeaseStore<S> {
    inner: S,
}

impl<S> ShuffledLeaseStore<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S> LeaseStore for ShuffledLeaseStore<S>
where
    S: LeaseStore,
{
    type Error = S::Error;

    async fn list_lease_ids(&self) -> Result<Vec<String>, Self::Error> {
        let mut ids = self.inner.list_lease_ids().await?;
        ids.shuffle(&mut rand::thread_rng());
        Ok(ids)
    }

    async fn lease(
        &self,
        item_id: &str,
        lessee_id: &str,
        until: SystemTime,
    ) -> Result<LeasedItem, AcquireError<Self::Error>> {
        self.inner.lease(item_id, lessee_id, until).await
    }
}
