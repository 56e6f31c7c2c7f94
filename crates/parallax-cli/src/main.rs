use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use glam::Vec3;
use parallax_data::{decode, parse_header};
use parallax_engine::{export, Engine, ExportConfig, GeneratorConfig, PngSequenceSink};
use parallax_render::camera::CameraPose;
use parallax_render::GradingConfig;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "parallax")]
#[command(about = "Gaussian splat viewer engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect a splat container
    Info {
        /// Container file (.ply / .splat)
        input: PathBuf,

        /// Fail on truncated bodies instead of decoding what fits
        #[arg(long, default_value = "false")]
        strict: bool,
    },

    /// Render an orbit around the scene to a PNG sequence
    Export {
        /// Container file
        input: PathBuf,

        /// Output directory for frames
        #[arg(short, long, default_value = "frames")]
        output: PathBuf,

        /// Frame width
        #[arg(long, default_value = "1280")]
        width: u32,

        /// Frame height
        #[arg(long, default_value = "720")]
        height: u32,

        /// Frames per second
        #[arg(long, default_value = "30")]
        fps: u32,

        /// Export duration in seconds
        #[arg(long, default_value = "4.0")]
        duration: f32,

        /// Orbit radius around the scene origin
        #[arg(long, default_value = "5.0")]
        radius: f32,

        /// Grading settings JSON (exposure, vignette_strength, gamma)
        #[arg(long)]
        settings: Option<PathBuf>,
    },

    /// Run the image-to-splat generator on an input image
    Generate {
        /// Input image
        input: PathBuf,

        /// Output directory for the generated container
        #[arg(short, long, default_value = "generated")]
        output: PathBuf,

        /// Generator executable
        #[arg(long, default_value = "splat-gen")]
        program: String,

        /// Decode the generated container afterwards as a sanity check
        #[arg(long, default_value = "false")]
        check: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Info { input, strict } => {
            let bytes = std::fs::read(&input)
                .with_context(|| format!("failed to read '{}'", input.display()))?;

            let (header, body) = parse_header(&bytes)?;
            if strict {
                header.require_complete_body(body.len())?;
            }

            let set = decode(&bytes)?;
            println!("File:      {}", input.display());
            println!("Mode:      {:?}", header.mode);
            println!("Declared:  {} points, {} bytes/record", header.count, header.declared_stride());
            println!("Decoded:   {} points", set.len());
            println!("Harmonics: {}", if set.has_sh() { "bands 1-3" } else { "none" });
            println!("Memory:    {:.2} MB", set.memory_bytes() as f64 / 1e6);
        }

        Commands::Export {
            input,
            output,
            width,
            height,
            fps,
            duration,
            radius,
            settings,
        } => {
            let grading = match settings {
                Some(path) => {
                    let bytes = std::fs::read(&path)
                        .with_context(|| format!("failed to read settings '{}'", path.display()))?;
                    serde_json::from_slice(&bytes)
                        .with_context(|| format!("failed to parse settings '{}'", path.display()))?
                }
                None => GradingConfig::default(),
            };

            let engine = Engine::new();
            let count = engine.load_path(&input)?;
            println!("Loaded {} points from {}", count, input.display());

            let config = ExportConfig {
                width,
                height,
                fps,
                frame_count: (duration * fps as f32).ceil().max(1.0) as u32,
                grading,
            };
            let mut sink = PngSequenceSink::new(&output)?;
            // One full turn over the export duration.
            let angular = std::f32::consts::TAU / duration.max(1e-3);
            export(
                &engine,
                |t| {
                    let eye = Vec3::new(
                        (t * angular).sin() * radius,
                        radius * 0.3,
                        (t * angular).cos() * radius,
                    );
                    CameraPose::looking_at(eye, Vec3::ZERO)
                },
                &config,
                &mut sink,
            )?;
            println!("Wrote {} frames to {}", config.frame_count, output.display());
        }

        Commands::Generate {
            input,
            output,
            program,
            check,
        } => {
            let config = GeneratorConfig::new(&program);
            let container = parallax_engine::generate(&config, &input, &output)?;
            println!("Generated {}", container.display());

            if check {
                let engine = Engine::new();
                let count = engine.load_path(&container)?;
                println!("Decoded {} points", count);
            }
        }
    }

    Ok(())
}
