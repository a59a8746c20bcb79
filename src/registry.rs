use std::collections::HashMap;

use crate::rtc::ConnectionState;

/// One tracked peer: the connection handle plus the last state label its
/// state-change signal reported.
pub struct PeerEntry<C> {
    pub conn: C,
    pub state: ConnectionState,
}

/// Sole owner of peer connection entries. Everything else refers to entries
/// by peer id through this map; at most one live entry per id.
pub struct PeerRegistry<C> {
    entries: HashMap<String, PeerEntry<C>>,
}

impl<C> PeerRegistry<C> {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    /// Returns the existing entry for `peer_id`, or builds one via `make`.
    pub fn get_or_create(
        &mut self,
        peer_id: &str,
        make: impl FnOnce() -> C,
    ) -> &mut PeerEntry<C> {
        self.entries
            .entry(peer_id.to_string())
            .or_insert_with(|| PeerEntry { conn: make(), state: ConnectionState::New })
    }

    pub fn get(&self, peer_id: &str) -> Option<&PeerEntry<C>> {
        self.entries.get(peer_id)
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.entries.contains_key(peer_id)
    }

    /// Records the observed state; false when the peer is unknown (e.g. a
    /// racing callback from a connection already torn down).
    pub fn set_state(&mut self, peer_id: &str, state: ConnectionState) -> bool {
        match self.entries.get_mut(peer_id) {
            Some(entry) => {
                entry.state = state;
                true
            }
            None => false,
        }
    }

    /// No-op when absent.
    pub fn remove(&mut self, peer_id: &str) -> Option<PeerEntry<C>> {
        self.entries.remove(peer_id)
    }

    /// Removes every entry matching the predicate; the shutdown path calls
    /// this with an always-true predicate and closes what comes back.
    pub fn remove_all_matching(
        &mut self,
        pred: impl Fn(&str, &PeerEntry<C>) -> bool,
    ) -> Vec<(String, PeerEntry<C>)> {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(id, entry)| pred(id, entry))
            .map(|(id, _)| id.clone())
            .collect();
        keys.into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|e| (id, e)))
            .collect()
    }

    /// Derived query over connection states (listener-count display).
    pub fn active_count(&self, pred: impl Fn(ConnectionState) -> bool) -> usize {
        self.entries.values().filter(|e| pred(e.state)).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<C> Default for PeerRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
