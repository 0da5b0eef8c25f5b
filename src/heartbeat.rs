use {
    crate::{
        lease::{Lease, LeaseRequest},
        locker::{HeartbeatError, Locker},
        store::LeaseStore,
    },
    futures::FutureExt,
    std::{
        future::Future,
        pin::Pin,
        task::{Context, Poll},
        time::Duration,
    },
    tokio::{
        sync::{broadcast, oneshot},
        task::{JoinError, JoinHandle},
    },
};

///
/// Last state of a heartbeat task.
///
pub struct HeartbeatExit<R: LeaseRequest, E> {
    ///
    /// The lease as of its last successful renewal.
    ///
    pub lease: Lease<R>,
    ///
    /// `Ok(())` if the heartbeat was stopped by its owner.
    ///
    pub result: Result<(), HeartbeatError<E>>,
}

///
/// Heartbeat running in the background, see [`Locker::spawn_heartbeat`].
///
/// Dropping this handle stops the renewals; the lease then expires on its own.
/// Awaiting it yields the heartbeat outcome once the lease is lost or the store fails.
///
pub struct ManagedHeartbeat<R: LeaseRequest, E> {
    // Dropping the sender wakes the heartbeat task up and makes it stop.
    tx_terminate: Option<oneshot::Sender<()>>,
    rx_lease_lost: broadcast::Receiver<()>,
    inner: JoinHandle<HeartbeatExit<R, E>>,
}

///
/// Notify when the background heartbeat stopped renewing its lease.
///
pub struct LeaseLostNotify {
    inner: broadcast::Receiver<()>,
}

impl LeaseLostNotify {
    ///
    /// Wait until the heartbeat stopped, whatever the reason.
    ///
    pub async fn recv(mut self) {
        let _ = self.inner.recv().await;
    }
}

impl Clone for LeaseLostNotify {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.resubscribe(),
        }
    }
}

impl<R: LeaseRequest, E> ManagedHeartbeat<R, E> {
    pub fn get_lease_lost_notify(&self) -> LeaseLostNotify {
        LeaseLostNotify {
            inner: self.rx_lease_lost.resubscribe(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    ///
    /// Stops renewing and gives back the last held lease.
    ///
    pub async fn stop(mut self) -> Result<HeartbeatExit<R, E>, JoinError> {
        drop(self.tx_terminate.take());
        self.await
    }
}

impl<R: LeaseRequest, E> Future for ManagedHeartbeat<R, E> {
    type Output = Result<HeartbeatExit<R, E>, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.poll_unpin(cx)
    }
}

impl<S> Locker<S>
where
    S: LeaseStore + 'static,
{
    ///
    /// Runs [`Locker::heartbeat`] on a new tokio task.
    ///
    pub fn spawn_heartbeat<R>(
        &self,
        lease: Lease<R>,
        interval: Duration,
    ) -> ManagedHeartbeat<R, S::Error>
    where
        R: LeaseRequest + 'static,
        R::Payload: 'static,
    {
        let (tx_terminate, rx_terminate) = oneshot::channel::<()>();
        let (tx_lease_lost, rx_lease_lost) = broadcast::channel(1);
        let locker = self.clone();
        let inner = tokio::spawn(async move {
            let mut lease = lease;
            let stop = async move {
                let _ = rx_terminate.await;
            };
            let result = locker.heartbeat(&mut lease, interval, stop).await;
            let _ = tx_lease_lost.send(());
            HeartbeatExit { lease, result }
        });
        ManagedHeartbeat {
            tx_terminate: Some(tx_terminate),
            rx_lease_lost,
            inner,
        }
    }
}
