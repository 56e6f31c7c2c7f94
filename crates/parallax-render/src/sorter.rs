//! Back-to-front depth ordering.
//!
//! The sort kernel is pure; the runner executes it on a background
//! thread with at most one job in flight. A request made while a job is
//! running is dropped rather than queued, which caps latency under
//! continuous camera motion at one in-flight job and accepts a visually
//! stale order instead of a backlog.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use glam::Vec3;

/// Permutation of splat indices ordered by descending signed depth
/// `(position - eye) · forward`, i.e. farthest first, as required for
/// back-to-front alpha compositing. Ties have no specified order.
pub fn sort_back_to_front(positions: &[Vec3], eye: Vec3, forward: Vec3) -> Vec<u32> {
    let depths: Vec<f32> = positions.iter().map(|p| (*p - eye).dot(forward)).collect();
    let mut order: Vec<u32> = (0..positions.len() as u32).collect();
    order.sort_unstable_by(|&a, &b| depths[b as usize].total_cmp(&depths[a as usize]));
    order
}

/// Single-in-flight background sort runner.
#[derive(Clone, Default)]
pub struct DepthSorter {
    busy: Arc<AtomicBool>,
}

impl DepthSorter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Kick off a sort pass over a position snapshot. Returns `false`
    /// when a job is already in flight (the request is dropped, not
    /// queued). `publish` receives the finished permutation; staleness
    /// against the live scene is the publisher's concern
    /// (`SceneStore::submit_order` re-checks the count).
    pub fn request<F>(&self, positions: Arc<Vec<Vec3>>, eye: Vec3, forward: Vec3, publish: F) -> bool
    where
        F: FnOnce(Vec<u32>) + Send + 'static,
    {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let busy = Arc::clone(&self.busy);
        thread::spawn(move || {
            let order = sort_back_to_front(&positions, eye, forward);
            publish(order);
            busy.store(false, Ordering::Release);
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn empty_input_yields_empty_permutation() {
        assert!(sort_back_to_front(&[], Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z).is_empty());
    }

    #[test]
    fn orders_farthest_first_from_eye_on_z() {
        // End-to-end scenario B: eye (0,0,5) looking at the origin,
        // splats at z = 0, 1, 2. Depths along forward are 5, 4, 3, so
        // z = 0 comes first.
        let positions = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(0.0, 0.0, 2.0),
        ];
        let order = sort_back_to_front(&positions, Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z);
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn result_is_a_permutation_with_non_increasing_depths() {
        let positions: Vec<Vec3> = (0..100)
            .map(|i| {
                let f = i as f32;
                Vec3::new((f * 0.37).sin() * 5.0, (f * 0.73).cos() * 5.0, f * 0.11 - 3.0)
            })
            .collect();
        let eye = Vec3::new(1.0, -2.0, 8.0);
        let forward = (Vec3::ZERO - eye).normalize();
        let order = sort_back_to_front(&positions, eye, forward);

        let mut seen = vec![false; positions.len()];
        for &i in &order {
            assert!(!seen[i as usize]);
            seen[i as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));

        let depths: Vec<f32> = order
            .iter()
            .map(|&i| (positions[i as usize] - eye).dot(forward))
            .collect();
        assert!(depths.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn background_job_publishes_result() {
        let sorter = DepthSorter::new();
        let positions = Arc::new(vec![Vec3::ZERO, Vec3::new(0.0, 0.0, 1.0)]);
        let (tx, rx) = mpsc::channel();
        assert!(sorter.request(positions, Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z, move |o| {
            tx.send(o).ok();
        }));
        let order = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn concurrent_request_is_dropped_not_queued() {
        let sorter = DepthSorter::new();
        let positions = Arc::new(vec![Vec3::ZERO]);
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel();

        // First job blocks in its publish callback, holding the slot.
        assert!(sorter.request(positions.clone(), Vec3::Z, Vec3::NEG_Z, move |o| {
            gate_rx.recv().ok();
            done_tx.send(o).ok();
        }));
        // While it runs, further requests are no-ops.
        assert!(!sorter.request(positions.clone(), Vec3::Z, Vec3::NEG_Z, |_| {}));
        assert!(sorter.is_busy());

        gate_tx.send(()).unwrap();
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // Slot frees up once the job finishes.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !sorter.request(positions.clone(), Vec3::Z, Vec3::NEG_Z, |_| {}) {
            assert!(std::time::Instant::now() < deadline, "sorter never freed");
            thread::yield_now();
        }
    }
}
