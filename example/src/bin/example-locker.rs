use std::{sync::Arc, time::Duration};

use rust_lease_locker::{
    etcd::{EtcdLeaseStore, EtcdLeaseStoreConfig},
    lease::{Attributes, BasicLeaseRequest},
    locker::Locker,
};
use serde::Deserialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default, Deserialize)]
struct ShardSlot {
    mongo_addresses: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let etcd = etcd_client::Client::connect(["http://localhost:2379"], None)
        .await
        .expect("failed to connect to etcd");

    let store = EtcdLeaseStore::new(etcd, EtcdLeaseStoreConfig::with_key_prefix("example-shards/"));
    for (slot, addr) in [("shard-0", "127.0.0.1:17017"), ("shard-1", "127.0.0.1:17018")] {
        let mut attributes = Attributes::new();
        attributes.insert("mongo_addresses".to_string(), json!(addr));
        store
            .put_item(slot, attributes)
            .await
            .expect("failed to create shard slot");
    }

    let locker = Locker::new(Arc::new(store));
    let lessee_id = format!("example-{}", std::process::id());
    let request = Arc::new(BasicLeaseRequest::<ShardSlot>::new(
        lessee_id,
        Duration::from_secs(6),
    ));

    // Run this binary three times: the third one waits until another one exits and its lease expires.
    let lease = locker
        .wait_until_lease_obtained(request, Duration::from_secs(2), async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;
    let Some(lease) = lease else {
        println!("Cancelled before obtaining a lease.");
        return;
    };
    println!(
        "Leased {} ({}), press ctrl-c to stop renewing",
        lease.item_id, lease.payload.mongo_addresses
    );

    let managed = locker.spawn_heartbeat(lease, Duration::from_secs(2));
    let lost = managed.get_lease_lost_notify();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            let exit = managed.stop().await.expect("heartbeat task failed");
            println!("Stopped renewing {}, it expires at {:?}", exit.lease.item_id, exit.lease.expires_at);
        }
        _ = lost.recv() => {
            let exit = managed.await.expect("heartbeat task failed");
            println!("Heartbeat of {} ended: {:?}", exit.lease.item_id, exit.result);
        }
    }
}
