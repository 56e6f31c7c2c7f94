//! Offline export: render a camera path frame by frame and deliver each
//! frame to a sink with a strictly increasing presentation timestamp.

use std::path::PathBuf;

use anyhow::{Context, Result};
use parallax_render::camera::CameraPose;
use parallax_render::compositor::{Frame, GradingConfig};
use tracing::info;

use crate::engine::Engine;

/// Destination for exported frames. Timestamps are microseconds from the
/// start of the export and strictly increase across calls.
pub trait FrameSink {
    fn submit(&mut self, frame: &Frame, timestamp_us: u64) -> Result<()>;

    /// Called once after the last frame.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Numbered PNG files in a directory.
pub struct PngSequenceSink {
    dir: PathBuf,
    index: u32,
}

impl PngSequenceSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create export directory '{}'", dir.display()))?;
        Ok(Self { dir, index: 0 })
    }
}

impl FrameSink for PngSequenceSink {
    fn submit(&mut self, frame: &Frame, _timestamp_us: u64) -> Result<()> {
        let path = self.dir.join(format!("frame_{:05}.png", self.index));
        let image = image::RgbaImage::from_raw(frame.width, frame.height, frame.to_rgba8())
            .context("frame buffer size mismatch")?;
        image
            .save(&path)
            .with_context(|| format!("failed to write '{}'", path.display()))?;
        self.index += 1;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct ExportConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub frame_count: u32,
    pub grading: GradingConfig,
}

/// Render `frame_count` frames sequentially at a fixed interval.
/// `pose_at` maps elapsed seconds to a camera pose. Each frame is sorted
/// for its own pose before compositing.
pub fn export<P, S>(engine: &Engine, mut pose_at: P, config: &ExportConfig, sink: &mut S) -> Result<()>
where
    P: FnMut(f32) -> CameraPose,
    S: FrameSink,
{
    let interval_us = (1_000_000 / config.fps.max(1) as u64).max(1);
    info!(
        frames = config.frame_count,
        fps = config.fps,
        size = format_args!("{}x{}", config.width, config.height),
        "export started"
    );

    for i in 0..config.frame_count {
        let t = i as f32 / config.fps.max(1) as f32;
        let frame = engine.render_offline(pose_at(t), config.width, config.height, &config.grading);
        sink.submit(&frame, i as u64 * interval_us)?;
    }

    sink.finish()?;
    info!(frames = config.frame_count, "export finished");
    Ok(())
}
