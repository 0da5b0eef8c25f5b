use {
    crate::{
        lease::Attributes,
        store::{lease_available, AcquireError, LeaseStore, LeasedItem},
    },
    async_trait::async_trait,
    std::{collections::HashMap, time::SystemTime},
    tokio::sync::Mutex,
};

#[derive(Debug, thiserror::Error)]
pub enum MemoryStoreError {
    #[error("memory lease store is unavailable")]
    Unavailable,
}

#[derive(Debug, Default)]
struct MemoryItem {
    lessee_id: Option<String>,
    lease_until: Option<SystemTime>,
    attributes: Attributes,
}

#[derive(Debug, Default)]
struct State {
    // Insertion order, which is the listing order.
    order: Vec<String>,
    items: HashMap<String, MemoryItem>,
    unavailable: bool,
    lease_calls: usize,
}

impl State {
    fn insert(&mut self, item_id: String, attributes: Attributes) -> bool {
        if self.items.contains_key(&item_id) {
            return false;
        }
        self.order.push(item_id.clone());
        self.items.insert(
            item_id,
            MemoryItem {
                attributes,
                ..Default::default()
            },
        );
        true
    }
}

///
/// In-process lease store.
///
/// Every operation runs under one lock, which makes the conditional write trivially atomic.
/// Useful in tests and for processes that only compete with themselves.
///
/// Examples
///
/// ```
/// use std::time::{Duration, SystemTime};
/// use rust_lease_locker::{memory::MemoryLeaseStore, store::LeaseStore};
///
/// # block_on(async {
/// let store = MemoryLeaseStore::with_items(["a", "b"]);
/// let until = SystemTime::now() + Duration::from_secs(30);
///
/// store.lease("a", "x", until).await.expect("a is free");
/// assert!(store.lease("a", "y", until).await.unwrap_err().is_contention());
/// # });
/// # fn block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
///
#[derive(Debug, Default)]
pub struct MemoryLeaseStore {
    state: Mutex<State>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    ///
    /// Creates a store holding one attribute-less item per id, listed in the given order.
    ///
    pub fn with_items<I, K>(item_ids: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let mut state = State::default();
        for item_id in item_ids {
            state.insert(item_id.into(), Attributes::new());
        }
        Self {
            state: Mutex::new(state),
        }
    }

    ///
    /// Adds a leasable item. Returns `false` if the item already exists.
    ///
    pub async fn insert_item(&self, item_id: impl Into<String>, attributes: Attributes) -> bool {
        self.state.lock().await.insert(item_id.into(), attributes)
    }

    ///
    /// Overwrites the ownership of an item, bypassing the lease condition.
    /// Returns `false` if the item does not exist.
    ///
    pub async fn set_holder(
        &self,
        item_id: &str,
        lessee_id: impl Into<String>,
        until: SystemTime,
    ) -> bool {
        let mut state = self.state.lock().await;
        match state.items.get_mut(item_id) {
            Some(item) => {
                item.lessee_id = Some(lessee_id.into());
                item.lease_until = Some(until);
                true
            }
            None => false,
        }
    }

    ///
    /// Current holder of an item and its expiry, if it was ever leased.
    ///
    pub async fn holder(&self, item_id: &str) -> Option<(String, SystemTime)> {
        let state = self.state.lock().await;
        let item = state.items.get(item_id)?;
        item.lessee_id.clone().zip(item.lease_until)
    }

    ///
    /// While set, every operation fails with [`MemoryStoreError::Unavailable`].
    ///
    pub async fn fail_with_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    ///
    /// Number of acquire or renew attempts received so far.
    ///
    pub async fn lease_calls(&self) -> usize {
        self.state.lock().await.lease_calls
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    type Error = MemoryStoreError;

    async fn list_lease_ids(&self) -> Result<Vec<String>, MemoryStoreError> {
        let state = self.state.lock().await;
        if state.unavailable {
            return Err(MemoryStoreError::Unavailable);
        }
        Ok(state.order.clone())
    }

    async fn lease(
        &self,
        item_id: &str,
        lessee_id: &str,
        until: SystemTime,
    ) -> Result<LeasedItem, AcquireError<MemoryStoreError>> {
        let mut state = self.state.lock().await;
        state.lease_calls += 1;
        if state.unavailable {
            return Err(AcquireError::Store(MemoryStoreError::Unavailable));
        }
        let item = state
            .items
            .get_mut(item_id)
            .ok_or(AcquireError::Contention)?;

        let now = SystemTime::now();
        if !lease_available(item.lessee_id.as_deref(), item.lease_until, lessee_id, now) {
            return Err(AcquireError::Contention);
        }
        item.lessee_id = Some(lessee_id.to_string());
        item.lease_until = Some(until);

        Ok(LeasedItem {
            item_id: item_id.to_string(),
            attributes: item.attributes.clone(),
        })
    }
}
