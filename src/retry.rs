use {
    std::{error::Error, future::Future, time::Duration},
    tonic::Code,
    tracing::{error, warn},
};

///
/// Whether an etcd error comes from "outside" forces (unreachable cluster, overloaded
/// server, lost leader) and is worth trying again.
///
pub fn is_transient(err: &etcd_client::Error) -> bool {
    match err {
        etcd_client::Error::GRpcStatus(status) => match status.code() {
            Code::Unknown => status.source().is_none(),
            Code::DeadlineExceeded
            | Code::ResourceExhausted
            | Code::Internal
            | Code::Unavailable
            | Code::DataLoss => true,
            _ => false,
        },
        _ => false,
    }
}

///
/// Retry an etcd operation by capturing reusable args and a closure that computes the future to try.
///
/// Only transient errors (see [`is_transient`]) are retried, sleeping for the next duration of
/// `retry_strategy` in between. The last error is returned once the strategy is exhausted.
///
pub async fn retry_etcd<A, T, F, Fut>(
    etcd: etcd_client::Client,
    reusable_args: A,
    retry_strategy: impl IntoIterator<Item = Duration>,
    mut f: F,
) -> Result<T, etcd_client::Error>
where
    A: Clone + Send + 'static,
    Fut: Future<Output = Result<T, etcd_client::Error>> + Send + 'static,
    F: FnMut(etcd_client::Client, A) -> Fut,
    T: Send + 'static,
{
    let mut retry_strategy = retry_strategy.into_iter();
    loop {
        let e = match f(etcd.clone(), reusable_args.clone()).await {
            Ok(o) => return Ok(o),
            Err(e) => e,
        };
        if !is_transient(&e) {
            error!("etcd call failed: {e:?}");
            return Err(e);
        }
        match retry_strategy.next() {
            Some(delay) => {
                warn!("etcd call failed with transient error, retrying in {delay:?}: {e:?}");
                tokio::time::sleep(delay).await;
            }
            None => {
                error!("etcd call failed, out of retries: {e:?}");
                return Err(e);
            }
        }
    }
}

pub async fn retry_etcd_get(
    etcd: etcd_client::Client,
    key: String,
    opts: Option<etcd_client::GetOptions>,
    retry_strategy: impl IntoIterator<Item = Duration>,
) -> Result<etcd_client::GetResponse, etcd_client::Error> {
    retry_etcd(
        etcd,
        (key, opts),
        retry_strategy,
        move |etcd, (key, opts)| async move { etcd.kv_client().get(key, opts).await },
    )
    .await
}

pub async fn retry_etcd_txn(
    etcd: etcd_client::Client,
    txn: etcd_client::Txn,
    retry_strategy: impl IntoIterator<Item = Duration>,
) -> Result<etcd_client::TxnResponse, etcd_client::Error> {
    retry_etcd(
        etcd,
        (txn,),
        retry_strategy,
        move |etcd, (txn,)| async move { etcd.kv_client().txn(txn).await },
    )
    .await
}
