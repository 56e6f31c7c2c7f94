//! Viewer engine: scene lifecycle, frame production, out-of-process
//! generation and offline export.

pub mod engine;
pub mod export;
pub mod generate;

pub use engine::Engine;
pub use export::{export, ExportConfig, FrameSink, PngSequenceSink};
pub use generate::{generate, GeneratorConfig};
