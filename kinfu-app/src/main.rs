//! KinFu Application
//!
//! Command line front end for the capture pipeline:
//! - `pack` reads a point cloud file and packs it into particle textures
//! - `replay` plays a point cloud file back through a capture loop

mod pack;
mod replay;

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

/// KinFu - depth camera point cloud capture and packing
#[derive(Parser, Debug)]
#[command(name = "kinfu")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pack a point cloud file into intensity and position/scale textures
    Pack(PackArgs),
    /// Replay a point cloud file as a simulated capture device
    Replay(ReplayArgs),
}

#[derive(ClapArgs, Debug)]
struct PackArgs {
    /// Point cloud file to read
    file: PathBuf,

    /// Particle size written to the alpha channel of the position texture
    #[arg(long, default_value_t = 0.01)]
    particle_size: f32,

    /// Fixed far plane for intensity; defaults to the furthest point
    #[arg(long)]
    far: Option<f32>,

    /// Repeat the last point into unused texels instead of zeroing them
    #[arg(long)]
    clamp_to_last: bool,

    /// Skip rows with fewer than three fields instead of failing
    #[arg(long)]
    lenient: bool,

    /// Directory to write `intensity.exr` and `position_scale.exr` into
    #[arg(short, long)]
    out: Option<PathBuf>,
}

#[derive(ClapArgs, Debug)]
struct ReplayArgs {
    /// Point cloud file to replay
    file: PathBuf,

    /// Capture configuration as JSON
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of frames to capture before stopping
    #[arg(long, default_value_t = 5)]
    ticks: usize,

    /// Drive capture from a tokio loop instead of a polling thread
    #[arg(long)]
    cooperative: bool,

    /// Skip rows with fewer than three fields instead of failing
    #[arg(long)]
    lenient: bool,
}

fn init_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(&args.log_level);

    let result = match &args.command {
        Command::Pack(pack_args) => pack::run(pack_args),
        Command::Replay(replay_args) => replay::run(replay_args),
    };

    if let Err(e) = result {
        eprintln!("Application error: {}", e);
        std::process::exit(1);
    }
}
