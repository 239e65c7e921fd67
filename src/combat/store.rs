//! In-memory store of live combats
//!
//! The map lock is only held to find, insert or remove an entry. Each combat
//! sits behind its own mutex so unrelated combats never contend.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use super::state::Combat;

/// Handle to one live combat
pub type SharedCombat = Arc<Mutex<Combat>>;

#[derive(Debug, Default)]
pub struct CombatStore {
    combats: RwLock<HashMap<String, SharedCombat>>,
}

impl CombatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a combat under its id, returning the shared handle
    pub async fn insert(&self, combat: Combat) -> SharedCombat {
        let id = combat.id.clone();
        let shared = Arc::new(Mutex::new(combat));
        self.combats.write().await.insert(id, shared.clone());
        shared
    }

    pub async fn get(&self, id: &str) -> Option<SharedCombat> {
        self.combats.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> Option<SharedCombat> {
        self.combats.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.combats.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.combats.read().await.is_empty()
    }

    /// Snapshots of every active combat belonging to a session
    pub async fn for_session(&self, session_id: &str) -> Vec<Combat> {
        let handles: Vec<SharedCombat> = self.combats.read().await.values().cloned().collect();

        let mut combats = Vec::new();
        for handle in handles {
            let combat = handle.lock().await;
            if combat.is_active && combat.session_id == session_id {
                combats.push(combat.clone());
            }
        }
        combats.sort_by_key(|c| c.started_at);
        combats
    }
}
