use {
    crate::{
        lease::Attributes,
        retry::{retry_etcd_get, retry_etcd_txn},
        store::{lease_available, AcquireError, LeaseStore, LeasedItem},
    },
    async_trait::async_trait,
    etcd_client::{Compare, CompareOp, GetOptions, Txn, TxnOp},
    retry::delay::Exponential,
    serde::{Deserialize, Serialize},
    std::{
        iter::Take,
        time::{Duration, SystemTime, UNIX_EPOCH},
    },
    tracing::trace,
};

const LESSEE_ID_FIELD: &str = "lessee_id";
const LEASE_UNTIL_FIELD: &str = "lease_until";

///
/// Settings of an [`EtcdLeaseStore`].
///
/// Every field has a default, so a partial configuration deserializes fine.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EtcdLeaseStoreConfig {
    ///
    /// Prefix shared by the keys of every lease item of the pool.
    ///
    pub key_prefix: String,
    pub retry_initial_delay_ms: u64,
    pub retry_factor: f64,
    ///
    /// Number of retries of a transient etcd failure, not counting the first attempt.
    ///
    pub retry_max_attempts: usize,
}

impl Default for EtcdLeaseStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "leases/".to_string(),
            retry_initial_delay_ms: 10,
            retry_factor: 10.0,
            retry_max_attempts: 3,
        }
    }
}

impl EtcdLeaseStoreConfig {
    pub fn with_key_prefix(key_prefix: impl Into<String>) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            ..Default::default()
        }
    }

    fn retry_strategy(&self) -> Take<Exponential> {
        Exponential::from_millis_with_factor(self.retry_initial_delay_ms, self.retry_factor)
            .take(self.retry_max_attempts)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EtcdStoreError {
    #[error("etcd error: {0}")]
    Etcd(#[from] etcd_client::Error),
    #[error("lease item `{key}` is not a valid JSON object: {source}")]
    CorruptItem {
        key: String,
        source: serde_json::Error,
    },
    #[error("lease item key is not valid utf-8: {0:?}")]
    InvalidKey(Vec<u8>),
    #[error("field `{0}` is reserved for lease ownership")]
    ReservedField(&'static str),
}

///
/// Value stored under each lease item key.
///
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lessee_id: Option<String>,
    ///
    /// Unix epoch nanoseconds.
    ///
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lease_until: Option<i64>,
    #[serde(flatten)]
    attributes: Attributes,
}

fn to_unix_nanos(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn from_unix_nanos(nanos: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_nanos(u64::try_from(nanos).unwrap_or(0))
}

///
/// [`LeaseStore`] over etcd.
///
/// Each lease item is a JSON object stored under `<key_prefix><item_id>`, holding the
/// `lessee_id` and `lease_until` ownership fields next to any payload fields.
///
/// A lease is granted by reading the item, checking the ownership condition and writing it
/// back in a transaction guarded by the item's `mod_revision`: any write in between turns
/// into a contention.
///
/// Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use rust_lease_locker::{etcd::{EtcdLeaseStore, EtcdLeaseStoreConfig}, locker::Locker};
///
/// # async fn run() {
/// let etcd = etcd_client::Client::connect(["http://localhost:2379"], None)
///     .await
///     .expect("failed to connect to etcd");
/// let store = EtcdLeaseStore::new(etcd, EtcdLeaseStoreConfig::with_key_prefix("shards/"));
/// store.put_item("shard-0", Default::default()).await.expect("failed to create item");
///
/// let locker = Locker::new(Arc::new(store));
/// # }
/// ```
///
#[derive(Clone)]
pub struct EtcdLeaseStore {
    etcd: etcd_client::Client,
    config: EtcdLeaseStoreConfig,
}

impl EtcdLeaseStore {
    pub fn new(etcd: etcd_client::Client, config: EtcdLeaseStoreConfig) -> Self {
        Self { etcd, config }
    }

    pub fn config(&self) -> &EtcdLeaseStoreConfig {
        &self.config
    }

    fn item_key(&self, item_id: &str) -> String {
        format!("{}{}", self.config.key_prefix, item_id)
    }

    async fn read_item(&self, key: &str) -> Result<Option<(i64, StoredItem)>, EtcdStoreError> {
        let resp = retry_etcd_get(
            self.etcd.clone(),
            key.to_string(),
            None,
            self.config.retry_strategy(),
        )
        .await?;

        let Some(kv) = resp.kvs().first() else {
            return Ok(None);
        };
        let item = serde_json::from_slice::<StoredItem>(kv.value()).map_err(|source| {
            EtcdStoreError::CorruptItem {
                key: key.to_string(),
                source,
            }
        })?;
        Ok(Some((kv.mod_revision(), item)))
    }

    ///
    /// Creates a never-leased item holding `attributes`.
    ///
    /// Returns `false` if the item already exists, in which case it is left untouched.
    ///
    pub async fn put_item(
        &self,
        item_id: &str,
        attributes: Attributes,
    ) -> Result<bool, EtcdStoreError> {
        for reserved in [LESSEE_ID_FIELD, LEASE_UNTIL_FIELD] {
            if attributes.contains_key(reserved) {
                return Err(EtcdStoreError::ReservedField(reserved));
            }
        }
        let key = self.item_key(item_id);
        let item = StoredItem {
            attributes,
            ..Default::default()
        };
        let value = serde_json::to_vec(&item).map_err(|source| EtcdStoreError::CorruptItem {
            key: key.clone(),
            source,
        })?;

        let txn = Txn::new()
            .when(vec![Compare::version(key.as_str(), CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(key.as_str(), value, None)]);
        let resp = retry_etcd_txn(self.etcd.clone(), txn, self.config.retry_strategy()).await?;
        Ok(resp.succeeded())
    }
}

#[async_trait]
impl LeaseStore for EtcdLeaseStore {
    type Error = EtcdStoreError;

    async fn list_lease_ids(&self) -> Result<Vec<String>, EtcdStoreError> {
        let opts = GetOptions::new().with_prefix().with_keys_only();
        let resp = retry_etcd_get(
            self.etcd.clone(),
            self.config.key_prefix.clone(),
            Some(opts),
            self.config.retry_strategy(),
        )
        .await?;

        resp.kvs()
            .iter()
            .map(|kv| {
                let key = std::str::from_utf8(kv.key())
                    .map_err(|_| EtcdStoreError::InvalidKey(kv.key().to_vec()))?;
                let item_id = key.strip_prefix(&self.config.key_prefix).unwrap_or(key);
                Ok(item_id.to_string())
            })
            .collect()
    }

    async fn lease(
        &self,
        item_id: &str,
        lessee_id: &str,
        until: SystemTime,
    ) -> Result<LeasedItem, AcquireError<EtcdStoreError>> {
        let key = self.item_key(item_id);
        let Some((mod_revision, mut item)) =
            self.read_item(&key).await.map_err(AcquireError::Store)?
        else {
            trace!("lease item {key} does not exist");
            return Err(AcquireError::Contention);
        };

        let held_until = item.lease_until.map(from_unix_nanos);
        if !lease_available(
            item.lessee_id.as_deref(),
            held_until,
            lessee_id,
            SystemTime::now(),
        ) {
            return Err(AcquireError::Contention);
        }

        let until_nanos = to_unix_nanos(until);
        item.lessee_id = Some(lessee_id.to_string());
        item.lease_until = Some(until_nanos);
        let value = serde_json::to_vec(&item).map_err(|source| {
            AcquireError::Store(EtcdStoreError::CorruptItem {
                key: key.clone(),
                source,
            })
        })?;

        let txn = Txn::new()
            .when(vec![Compare::mod_revision(
                key.as_str(),
                CompareOp::Equal,
                mod_revision,
            )])
            .and_then(vec![TxnOp::put(key.as_str(), value, None)]);
        let resp = retry_etcd_txn(self.etcd.clone(), txn, self.config.retry_strategy())
            .await
            .map_err(|e| AcquireError::Store(e.into()))?;

        if !resp.succeeded() {
            // A retried transaction fails its guard if the first attempt did commit.
            let current = self.read_item(&key).await.map_err(AcquireError::Store)?;
            let landed = matches!(
                current,
                Some((_, ref stored))
                    if stored.lessee_id.as_deref() == Some(lessee_id)
                        && stored.lease_until == Some(until_nanos)
            );
            if !landed {
                trace!("lease item {key} changed under {lessee_id}");
                return Err(AcquireError::Contention);
            }
        }

        Ok(LeasedItem {
            item_id: item_id.to_string(),
            attributes: item.attributes,
        })
    }
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn stored_item_should_keep_payload_fields_apart() {
        let raw = json!({
            "lessee_id": "lessee1",
            "lease_until": 1_700_000_000_000_000_000i64,
            "mongo_addresses": "127.0.0.1:17017",
        });

        let item: StoredItem = serde_json::from_value(raw).expect("failed to parse item");

        assert_eq!(item.lessee_id.as_deref(), Some("lessee1"));
        assert_eq!(item.lease_until, Some(1_700_000_000_000_000_000));
        assert_eq!(item.attributes.len(), 1);
        assert_eq!(item.attributes["mongo_addresses"], json!("127.0.0.1:17017"));
    }

    #[test]
    fn never_leased_item_should_serialize_without_ownership_fields() {
        let mut attributes = Attributes::new();
        attributes.insert("slot".to_string(), json!(3));
        let item = StoredItem {
            attributes,
            ..Default::default()
        };

        let value = serde_json::to_value(&item).expect("failed to serialize item");

        assert_eq!(value, json!({ "slot": 3 }));
    }

    #[test]
    fn non_object_value_should_not_parse() {
        assert!(serde_json::from_slice::<StoredItem>(b"\"just a string\"").is_err());
    }

    #[test]
    fn unix_nanos_should_keep_nanosecond_precision() {
        let t = UNIX_EPOCH + Duration::new(1_700_000_000, 123);

        assert_eq!(from_unix_nanos(to_unix_nanos(t)), t);
        assert_eq!(from_unix_nanos(-5), UNIX_EPOCH);
    }

    #[test]
    fn partial_config_should_fill_defaults() {
        let config: EtcdLeaseStoreConfig =
            serde_json::from_value(json!({ "key_prefix": "shards/" })).expect("valid config");

        assert_eq!(config.key_prefix, "shards/");
        assert_eq!(config.retry_max_attempts, 3);
        assert_eq!(config.retry_strategy().count(), 3);
    }
}
