//! Engine glue: scene lifecycle, per-frame sort scheduling, frame
//! production.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use glam::Vec3;
use parallax_data::{decode, DecodeError, SplatSet};
use parallax_render::camera::{Camera, CameraPose};
use parallax_render::compositor::{self, Frame, GradingConfig};
use parallax_render::sorter::sort_back_to_front;
use parallax_render::{DepthSorter, SceneStore};
use tracing::{info, warn};

pub struct Engine {
    scene: Arc<SceneStore>,
    sorter: DepthSorter,
    pub background: Vec3,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            scene: Arc::new(SceneStore::new()),
            sorter: DepthSorter::new(),
            background: Vec3::ZERO,
        }
    }

    /// Decode a container from memory and install it. A decode failure
    /// leaves the previously loaded scene untouched.
    pub fn load_bytes(&self, bytes: &[u8]) -> Result<usize, DecodeError> {
        let set = decode(bytes)?;
        let count = set.len();
        self.scene.load(Arc::new(set));
        Ok(count)
    }

    pub fn load_path(&self, path: &Path) -> Result<usize> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read container: {}", path.display()))?;
        let count = self
            .load_bytes(&bytes)
            .with_context(|| format!("failed to decode container: {}", path.display()))?;
        info!(path = %path.display(), count, "container loaded");
        Ok(count)
    }

    /// Install an already-decoded set (used by tests and generation).
    pub fn load_set(&self, set: Arc<SplatSet>) -> bool {
        self.scene.load(set)
    }

    pub fn point_count(&self) -> usize {
        self.scene.count()
    }

    pub fn memory_bytes(&self) -> usize {
        self.scene.memory_bytes()
    }

    pub fn scene(&self) -> &Arc<SceneStore> {
        &self.scene
    }

    /// Interactive frame: kick one background sort request (dropped when
    /// a pass is already running), then composite with the latest
    /// published order. The first frames after a load use the identity
    /// order until the sorter catches up.
    pub fn render(&self, pose: CameraPose, width: u32, height: u32, grading: &GradingConfig) -> Frame {
        let camera = Camera::new(pose);

        let positions = self.scene.positions();
        if !positions.is_empty() {
            let scene = Arc::clone(&self.scene);
            self.sorter
                .request(positions, pose.eye, pose.forward(), move |order| {
                    if !scene.submit_order(order) {
                        warn!("sort result discarded, scene changed mid-pass");
                    }
                });
        }

        self.composite(&camera, width, height, grading)
    }

    /// Offline frame: sort synchronously for the exact pose so the
    /// compositing order is never stale. Used by the export path.
    pub fn render_offline(
        &self,
        pose: CameraPose,
        width: u32,
        height: u32,
        grading: &GradingConfig,
    ) -> Frame {
        let camera = Camera::new(pose);
        let positions = self.scene.positions();
        if !positions.is_empty() {
            let order = sort_back_to_front(&positions, pose.eye, pose.forward());
            self.scene.submit_order(order);
        }
        self.composite(&camera, width, height, grading)
    }

    fn composite(&self, camera: &Camera, width: u32, height: u32, grading: &GradingConfig) -> Frame {
        match self.scene.set() {
            Some(set) => compositor::render(
                &set,
                &self.scene.order(),
                camera,
                width,
                height,
                grading,
                self.background,
            ),
            None => Frame::new(width, height, self.background),
        }
    }
}
