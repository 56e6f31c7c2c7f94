//! Out-of-process splat generation: hand an input image to an external
//! image-to-splat program and pick up the container it writes.
//!
//! The generator is a black box; success is judged solely by its exit
//! status, and its output is located as the newest container file in
//! the output directory (the program is free to name it).

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::SystemTime;

use anyhow::{bail, Context, Result};
use tracing::info;

/// File extensions accepted as generator output.
const CONTAINER_EXTENSIONS: &[&str] = &["ply", "splat"];

#[derive(Clone, Debug)]
pub struct GeneratorConfig {
    /// Generator executable, resolved through PATH when relative.
    pub program: PathBuf,
    /// Extra arguments inserted before the input/output pair.
    pub extra_args: Vec<String>,
}

impl GeneratorConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
        }
    }

    pub fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("--help")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

/// Run the generator on one image. Returns the path of the newest
/// container file found in `out_dir` afterwards.
pub fn generate(config: &GeneratorConfig, input_image: &Path, out_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create output directory '{}'", out_dir.display()))?;

    info!(
        program = %config.program.display(),
        input = %input_image.display(),
        "running splat generator"
    );
    let status = Command::new(&config.program)
        .args(&config.extra_args)
        .arg(input_image)
        .arg(out_dir)
        .status()
        .with_context(|| format!("failed to launch generator '{}'", config.program.display()))?;

    if !status.success() {
        bail!(
            "generator '{}' exited with {status} for '{}'",
            config.program.display(),
            input_image.display()
        );
    }

    newest_container(out_dir)?
        .with_context(|| format!("generator produced no container in '{}'", out_dir.display()))
}

/// Newest container file in a directory by modification time.
pub fn newest_container(dir: &Path) -> Result<Option<PathBuf>> {
    let mut newest: Option<(SystemTime, PathBuf)> = None;
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to list output directory '{}'", dir.display()))?;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let is_container = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| CONTAINER_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if !is_container {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if newest.as_ref().is_none_or(|(t, _)| modified > *t) {
            newest = Some((modified, path));
        }
    }
    Ok(newest.map(|(_, p)| p))
}
