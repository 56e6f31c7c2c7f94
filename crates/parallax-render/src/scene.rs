//! Scene store: owns the decoded splat arrays and the render-visible
//! visibility order.
//!
//! The store is the single point of synchronization between the render
//! path and the background sorter: sort results are published through
//! [`SceneStore::submit_order`], which rejects permutations whose length
//! no longer matches the live set (a reload happened mid-sort).

use std::sync::Arc;

use glam::Vec3;
use parking_lot::Mutex;
use parallax_data::SplatSet;
use tracing::{debug, info};

struct State {
    set: Option<Arc<SplatSet>>,
    /// Positions retained separately from the interleaved records so a
    /// sort pass touches a dense, read-only array.
    positions: Arc<Vec<Vec3>>,
    /// Back-to-front visibility order; identity until the first sort
    /// pass publishes.
    order: Arc<Vec<u32>>,
}

pub struct SceneStore {
    state: Mutex<State>,
}

impl Default for SceneStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                set: None,
                positions: Arc::new(Vec::new()),
                order: Arc::new(Vec::new()),
            }),
        }
    }

    /// Install a new splat set. Returns `false` without side effects when
    /// the identity token matches the active set (idempotent reload).
    ///
    /// On replacement the visibility order is reset to the identity
    /// permutation so a first frame can render before any sort pass
    /// completes; any in-flight sort result for the previous set will be
    /// rejected by the count check in [`submit_order`].
    ///
    /// [`submit_order`]: SceneStore::submit_order
    pub fn load(&self, set: Arc<SplatSet>) -> bool {
        let mut state = self.state.lock();
        if state.set.as_ref().map(|s| s.id()) == Some(set.id()) {
            debug!(id = ?set.id(), "skipping reload of identical splat set");
            return false;
        }

        let positions: Vec<Vec3> = set.splats().iter().map(|s| Vec3::from(s.pos)).collect();
        let identity: Vec<u32> = (0..set.len() as u32).collect();
        info!(count = set.len(), sh = set.has_sh(), "scene loaded");

        state.positions = Arc::new(positions);
        state.order = Arc::new(identity);
        state.set = Some(set);
        true
    }

    pub fn set(&self) -> Option<Arc<SplatSet>> {
        self.state.lock().set.clone()
    }

    pub fn count(&self) -> usize {
        self.state.lock().positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn memory_bytes(&self) -> usize {
        self.state.lock().set.as_ref().map_or(0, |s| s.memory_bytes())
    }

    /// Read-only position snapshot for a sort pass.
    pub fn positions(&self) -> Arc<Vec<Vec3>> {
        self.state.lock().positions.clone()
    }

    /// Latest published visibility order.
    pub fn order(&self) -> Arc<Vec<u32>> {
        self.state.lock().order.clone()
    }

    /// Publish a completed sort result. The permutation is installed only
    /// if its length still matches the live splat count; otherwise it
    /// came from a superseded load and is discarded.
    pub fn submit_order(&self, order: Vec<u32>) -> bool {
        let mut state = self.state.lock();
        if order.len() != state.positions.len() {
            debug!(
                got = order.len(),
                live = state.positions.len(),
                "discarding stale sort result"
            );
            return false;
        }
        state.order = Arc::new(order);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parallax_data::Splat;

    fn set_of(n: usize) -> Arc<SplatSet> {
        let splats = (0..n)
            .map(|i| Splat::sphere([i as f32, 0.0, 0.0], 0.1, [1.0; 3], 1.0))
            .collect();
        Arc::new(SplatSet::new(splats, None))
    }

    #[test]
    fn load_initializes_identity_order() {
        let store = SceneStore::new();
        assert!(store.load(set_of(4)));
        assert_eq!(*store.order(), vec![0, 1, 2, 3]);
        assert_eq!(store.count(), 4);
    }

    #[test]
    fn reloading_same_identity_is_a_noop() {
        let store = SceneStore::new();
        let set = set_of(3);
        assert!(store.load(set.clone()));
        store.submit_order(vec![2, 1, 0]);
        // Same token: no replacement, sorted order survives.
        assert!(!store.load(set));
        assert_eq!(*store.order(), vec![2, 1, 0]);
    }

    #[test]
    fn different_set_replaces_and_resets_order() {
        let store = SceneStore::new();
        store.load(set_of(3));
        store.submit_order(vec![2, 1, 0]);
        assert!(store.load(set_of(2)));
        assert_eq!(*store.order(), vec![0, 1]);
    }

    #[test]
    fn stale_order_is_rejected() {
        let store = SceneStore::new();
        store.load(set_of(3));
        // A sort result captured before a reload to a different count.
        assert!(!store.submit_order(vec![1, 0]));
        assert_eq!(*store.order(), vec![0, 1, 2]);
    }

    #[test]
    fn positions_snapshot_survives_reload() {
        let store = SceneStore::new();
        store.load(set_of(3));
        let snapshot = store.positions();
        store.load(set_of(1));
        // The old snapshot is untouched by the reload.
        assert_eq!(snapshot.len(), 3);
        assert_eq!(store.positions().len(), 1);
    }
}
