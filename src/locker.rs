use {
    crate::{
        lease::{expiry_after, DecodeError, Lease, LeaseRequest, MAX_LEASE_DURATION},
        logger::{LeaseEvent, LeaseFailure, LeaseLogger, TracingLeaseLogger},
        store::{AcquireError, LeaseStore},
    },
    futures::FutureExt,
    std::{
        future::Future,
        sync::Arc,
        time::{Duration, SystemTime},
    },
    tokio::time::Instant,
    tracing::{trace, warn},
};

// Jiffy is interval between system timer interrupts, typically 10ms for linux systems.
const AT_LEAST_10_JIFFIES: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum ObtainLeaseError<E> {
    ///
    /// Every candidate item is held by another lessee, or there is no candidate at all.
    ///
    #[error("lease not obtained: every candidate is held by another lessee")]
    NotObtained,
    #[error("lease store failure: {0}")]
    Store(E),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl<E> ObtainLeaseError<E> {
    pub fn is_not_obtained(&self) -> bool {
        matches!(self, ObtainLeaseError::NotObtained)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RenewError<E> {
    #[error("lease lost to another lessee")]
    Lost,
    #[error("lease store failure: {0}")]
    Store(E),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

///
/// Terminal outcome of [`Locker::heartbeat`], other than caller cancellation.
///
#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError<E> {
    ///
    /// A renewal was rejected: another lessee owns the item now.
    ///
    #[error("lease on item `{item_id}` lost to another lessee")]
    Lost { item_id: String },
    ///
    /// The store failed for reasons unrelated to ownership. The lease may still be held
    /// until it expires.
    ///
    #[error("lease store failure during heartbeat: {0}")]
    Failed(E),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl<E> HeartbeatError<E> {
    pub fn is_lost(&self) -> bool {
        matches!(self, HeartbeatError::Lost { .. })
    }
}

///
/// Obtains and keeps leases on the items of a [`LeaseStore`].
///
/// The locker keeps no ownership state of its own: every attempt is decided by the store.
/// Cloning is cheap and clones share the same store and logger.
///
/// Examples
///
/// ```no_run
/// use std::{sync::Arc, time::Duration};
/// use rust_lease_locker::{lease::{Attributes, BasicLeaseRequest}, locker::Locker, memory::MemoryLeaseStore};
///
/// # async fn run() {
/// let locker = Locker::new(Arc::new(MemoryLeaseStore::with_items(["shard-0", "shard-1"])));
/// let request = Arc::new(BasicLeaseRequest::<Attributes>::new("worker-1", Duration::from_secs(30)));
///
/// let mut lease = locker
///     .wait_until_lease_obtained(request, Duration::from_secs(5), std::future::pending())
///     .await
///     .expect("never cancelled");
///
/// // Renew every 10s until the lease is lost or the store fails.
/// let err = locker
///     .heartbeat(&mut lease, Duration::from_secs(10), std::future::pending())
///     .await
///     .expect_err("never cancelled");
/// # }
/// ```
///
pub struct Locker<S> {
    store: Arc<S>,
    logger: Arc<dyn LeaseLogger>,
}

impl<S> Clone for Locker<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            logger: Arc::clone(&self.logger),
        }
    }
}

impl<S> Locker<S>
where
    S: LeaseStore,
{
    ///
    /// Creates a locker logging through `tracing`.
    ///
    pub fn new(store: Arc<S>) -> Self {
        Self::with_logger(store, Arc::new(TracingLeaseLogger))
    }

    pub fn with_logger(store: Arc<S>, logger: Arc<dyn LeaseLogger>) -> Self {
        Self { store, logger }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    ///
    /// Scans the candidate items in the order given by the store and returns the lease on
    /// the first one acquired.
    ///
    /// Items held by other lessees are skipped. Any store failure aborts the scan.
    ///
    pub async fn obtain_lease<R>(
        &self,
        request: Arc<R>,
    ) -> Result<Lease<R>, ObtainLeaseError<S::Error>>
    where
        R: LeaseRequest,
    {
        let lessee_id = request.lessee_id();
        let lease_ids = match self.store.list_lease_ids().await {
            Ok(lease_ids) => lease_ids,
            Err(e) => {
                self.logger.log_error(
                    LeaseFailure::Obtain {
                        lessee_id,
                        item_id: None,
                    },
                    &e,
                );
                return Err(ObtainLeaseError::Store(e));
            }
        };

        for item_id in lease_ids.iter() {
            let until = expiry_after(SystemTime::now(), request.lease_duration());
            let leased = match self.store.lease(item_id, lessee_id, until).await {
                Ok(leased) => leased,
                Err(AcquireError::Contention) => {
                    trace!("lease on {item_id} is held by another lessee, {lessee_id} skips it");
                    continue;
                }
                Err(AcquireError::Store(e)) => {
                    self.logger.log_error(
                        LeaseFailure::Obtain {
                            lessee_id,
                            item_id: Some(item_id.as_str()),
                        },
                        &e,
                    );
                    return Err(ObtainLeaseError::Store(e));
                }
            };

            let payload = match request.decode_payload(leased.attributes) {
                Ok(payload) => payload,
                Err(e) => {
                    self.logger.log_error(
                        LeaseFailure::Obtain {
                            lessee_id,
                            item_id: Some(item_id.as_str()),
                        },
                        &e,
                    );
                    return Err(e.into());
                }
            };
            self.logger.log_info(LeaseEvent::Obtained {
                lessee_id,
                item_id: &leased.item_id,
                expires_at: until,
            });
            return Ok(Lease {
                item_id: leased.item_id,
                payload,
                request: Arc::clone(&request),
                expires_at: until,
            });
        }

        self.logger.log_info(LeaseEvent::NotObtained {
            lessee_id,
            candidates: lease_ids.len(),
        });
        Err(ObtainLeaseError::NotObtained)
    }

    ///
    /// Calls [`Locker::obtain_lease`] until it succeeds, sleeping `poll_interval` after every
    /// failed scan, whatever the failure.
    ///
    /// Returns `None` once `cancel` completes. Cancellation is observed between scans and
    /// while sleeping, never in the middle of a scan.
    ///
    pub async fn wait_until_lease_obtained<R, C>(
        &self,
        request: Arc<R>,
        poll_interval: Duration,
        cancel: C,
    ) -> Option<Lease<R>>
    where
        R: LeaseRequest,
        C: Future<Output = ()>,
    {
        tokio::pin!(cancel);
        loop {
            if cancel.as_mut().now_or_never().is_some() {
                return None;
            }
            match self.obtain_lease(Arc::clone(&request)).await {
                Ok(lease) => return Some(lease),
                Err(e) => {
                    warn!(
                        "{} will retry to obtain a lease in {poll_interval:?}: {e}",
                        request.lessee_id()
                    );
                }
            }
            tokio::select! {
                _ = &mut cancel => return None,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    ///
    /// Renews `lease` once, returning the refreshed lease.
    ///
    /// The duration is asked again from the lease request.
    ///
    pub async fn renew_lease<R>(&self, lease: &Lease<R>) -> Result<Lease<R>, RenewError<S::Error>>
    where
        R: LeaseRequest,
    {
        let request = &lease.request;
        let lessee_id = request.lessee_id();
        let item_id = lease.item_id.as_str();
        let until = expiry_after(SystemTime::now(), request.lease_duration());

        let leased = match self.store.lease(item_id, lessee_id, until).await {
            Ok(leased) => leased,
            Err(AcquireError::Contention) => {
                self.logger
                    .log_info(LeaseEvent::Lost { lessee_id, item_id });
                return Err(RenewError::Lost);
            }
            Err(AcquireError::Store(e)) => {
                self.logger
                    .log_error(LeaseFailure::Renew { lessee_id, item_id }, &e);
                return Err(RenewError::Store(e));
            }
        };
        let payload = request.decode_payload(leased.attributes).map_err(|e| {
            self.logger
                .log_error(LeaseFailure::Renew { lessee_id, item_id }, &e);
            e
        })?;

        self.logger.log_info(LeaseEvent::Renewed {
            lessee_id,
            item_id,
            expires_at: until,
        });
        Ok(Lease {
            item_id: leased.item_id,
            payload,
            request: Arc::clone(request),
            expires_at: until,
        })
    }

    ///
    /// Renews `lease` every `interval` until the lease is lost, the store fails or `cancel`
    /// completes. The first renewal happens one `interval` after the call.
    ///
    /// `lease` is refreshed in place after each successful renewal, so it holds the latest
    /// lease whatever the outcome.
    ///
    /// `interval` must leave room for one missed tick plus store latency within the lease
    /// duration, otherwise the lease can expire between two renewals. This is not checked.
    ///
    /// `interval` is capped at [`MAX_LEASE_DURATION`].
    ///
    /// Returns `Ok(())` only when cancelled.
    ///
    pub async fn heartbeat<R, C>(
        &self,
        lease: &mut Lease<R>,
        interval: Duration,
        cancel: C,
    ) -> Result<(), HeartbeatError<S::Error>>
    where
        R: LeaseRequest,
        C: Future<Output = ()>,
    {
        tokio::pin!(cancel);
        let interval = interval.min(MAX_LEASE_DURATION);
        let mut next_renewal = Instant::now() + interval;
        loop {
            tokio::select! {
                biased;
                _ = &mut cancel => {
                    self.logger.log_info(LeaseEvent::HeartbeatStopped {
                        lessee_id: lease.lessee_id(),
                        item_id: &lease.item_id,
                    });
                    return Ok(());
                }
                _ = tokio::time::sleep_until(next_renewal) => {}
            }

            let late = next_renewal.elapsed();
            if late >= AT_LEAST_10_JIFFIES {
                warn!("heartbeat of lease {} is {late:?} late", lease.item_id);
            }

            match self.renew_lease(lease).await {
                Ok(renewed) => *lease = renewed,
                Err(RenewError::Lost) => {
                    return Err(HeartbeatError::Lost {
                        item_id: lease.item_id.clone(),
                    })
                }
                Err(RenewError::Store(e)) => return Err(HeartbeatError::Failed(e)),
                Err(RenewError::Decode(e)) => return Err(HeartbeatError::Decode(e)),
            }
            next_renewal += interval;
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            lease::{Attributes, BasicLeaseRequest},
            logger::NoopLeaseLogger,
            memory::MemoryLeaseStore,
        },
    };

    fn locker(store: Arc<MemoryLeaseStore>) -> Locker<MemoryLeaseStore> {
        Locker::with_logger(store, Arc::new(NoopLeaseLogger))
    }

    fn request(lessee_id: &str) -> Arc<BasicLeaseRequest<Attributes>> {
        Arc::new(BasicLeaseRequest::new(lessee_id, Duration::from_secs(30)))
    }

    #[tokio::test]
    async fn empty_pool_should_not_obtain_lease() {
        let locker = locker(Arc::new(MemoryLeaseStore::new()));

        let result = locker.obtain_lease(request("y")).await;

        assert!(matches!(result, Err(ObtainLeaseError::NotObtained)));
    }

    #[tokio::test]
    async fn obtain_should_stop_at_first_free_item() {
        let store = Arc::new(MemoryLeaseStore::with_items(["a", "b", "c"]));
        let locker = locker(Arc::clone(&store));

        let lease = locker.obtain_lease(request("y")).await.expect("lease");

        assert_eq!(lease.item_id, "a");
        assert_eq!(store.lease_calls().await, 1);
        assert!(store.holder("b").await.is_none());
    }

    #[tokio::test]
    async fn renew_should_produce_a_fresh_lease() {
        let store = Arc::new(MemoryLeaseStore::with_items(["a"]));
        let locker = locker(Arc::clone(&store));
        let lease = locker.obtain_lease(request("y")).await.expect("lease");

        let renewed = locker.renew_lease(&lease).await.expect("renewal");

        assert_eq!(renewed.item_id, lease.item_id);
        assert!(renewed.expires_at >= lease.expires_at);
        assert!(Arc::ptr_eq(&renewed.request, &lease.request));
    }

    #[tokio::test]
    async fn renew_should_report_lost_lease() {
        let store = Arc::new(MemoryLeaseStore::with_items(["a"]));
        let locker = locker(Arc::clone(&store));
        let lease = locker.obtain_lease(request("y")).await.expect("lease");
        store
            .set_holder("a", "x", SystemTime::now() + Duration::from_secs(30))
            .await;

        let result = locker.renew_lease(&lease).await;

        assert!(matches!(result, Err(RenewError::Lost)));
    }
}
