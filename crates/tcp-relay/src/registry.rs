//! [`ConnectionRegistry`]: the set of bridges that still hold sockets.
//!
//! A bridge is inserted right after its inbound socket is accepted and
//! removes itself at the end of [`Bridge::close`]. The registry holds the
//! only long-lived strong reference to a bridge; bridges point back at it
//! weakly so there is no cycle.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use crate::bridge::{Bridge, BridgeId};

type Bridges = HashMap<BridgeId, Arc<Bridge>>;

/// Shared handle to the set of live bridges.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<Bridges>>,
}

/// Non-owning handle held by each bridge.
#[derive(Debug, Clone, Default)]
pub struct WeakRegistry {
    inner: Weak<Mutex<Bridges>>,
}

impl WeakRegistry {
    pub fn upgrade(&self) -> Option<ConnectionRegistry> {
        self.inner.upgrade().map(|inner| ConnectionRegistry { inner })
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn downgrade(&self) -> WeakRegistry {
        WeakRegistry {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Bridges> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, bridge: Arc<Bridge>) {
        self.lock().insert(bridge.id(), bridge);
    }

    /// Returns `true` if `id` was registered.
    pub fn remove(&self, id: BridgeId) -> bool {
        self.lock().remove(&id).is_some()
    }

    pub fn contains(&self, id: BridgeId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Clone out the current members. The lock is not held afterwards.
    pub fn bridges(&self) -> Vec<Arc<Bridge>> {
        self.lock().values().cloned().collect()
    }

    /// Close every registered bridge. Returns how many this call closed.
    pub async fn close_all(&self) -> usize {
        let mut closed = 0;
        for bridge in self.bridges() {
            if bridge.close().await {
                closed += 1;
            }
        }
        closed
    }
}
