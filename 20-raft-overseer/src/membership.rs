use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::atomic::{AtomicU64, Ordering},
};

use tokio::sync::Mutex;

pub type ClientId = u64;

/// Cluster-wide bookkeeping shared by every connection task: the identity
/// counter and the set of logged-in members (the "socket clique").
pub struct Membership {
    next_id: AtomicU64,
    members: Mutex<HashMap<ClientId, SocketAddr>>,
}

impl Membership {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            members: Mutex::new(HashMap::new()),
        }
    }

    /// Identities start at 1 and are never handed out twice.
    pub fn allocate_id(&self) -> ClientId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn register(&self, id: ClientId, peer: SocketAddr) {
        let mut members = self.members.lock().await;
        members.insert(id, peer);
    }

    pub async fn remove(&self, id: ClientId) -> Option<SocketAddr> {
        let mut members = self.members.lock().await;
        members.remove(&id)
    }

    pub async fn contains(&self, id: ClientId) -> bool {
        self.members.lock().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.members.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn snapshot(&self) -> Vec<(ClientId, SocketAddr)> {
        let members = self.members.lock().await;
        let mut snapshot: Vec<_> = members.iter().map(|(id, peer)| (*id, *peer)).collect();
        snapshot.sort_unstable_by_key(|(id, _)| *id);
        snapshot
    }
}

impl Default for Membership {
    fn default() -> Self {
        Self::new()
    }
}
