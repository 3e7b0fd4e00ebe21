//! Command-line interface: classify the speaker's gender in one audio file.
//!
//! Prints the ranked labels as a JSON array on stdout. Diagnostics, logs and
//! the `--verbose` performance summary go to stderr.

#![recursion_limit = "256"]

use anyhow::{Context, Result};
use burn::tensor::backend::Backend;
use burn_ndarray::{NdArray, NdArrayDevice};
use clap::{CommandFactory, Parser, ValueEnum};
use detect_gender::audio::io::AudioIo;
use detect_gender::config::{load_config, Config};
use detect_gender::perf;
use detect_gender::pipeline::AudioClassificationPipeline;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

#[cfg(feature = "backend-wgpu")]
use burn_wgpu::graphics::AutoGraphicsApi;
#[cfg(feature = "backend-wgpu")]
use burn_wgpu::{init_setup, Wgpu, WgpuDevice};

/// Supported compute backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
enum BackendChoice {
    /// Use the WGPU backend (GPU acceleration when available).
    Wgpu,
    /// Use the ndarray backend (CPU).
    Ndarray,
}

#[cfg(feature = "backend-wgpu")]
const DEFAULT_BACKEND: BackendChoice = BackendChoice::Wgpu;
#[cfg(not(feature = "backend-wgpu"))]
const DEFAULT_BACKEND: BackendChoice = BackendChoice::Ndarray;

/// Top-level CLI options.
#[derive(Parser)]
#[command(name = "detect-gender", version)]
#[command(about = "Classify the speaker's gender in an audio file", long_about = None)]
struct Cli {
    /// Audio file to classify (exactly one).
    #[arg(value_name = "AUDIO_PATH")]
    audio_paths: Vec<PathBuf>,
    /// Pipeline configuration YAML (defaults to the built-in gender model).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Number of labels to print.
    #[arg(long)]
    top_k: Option<NonZeroUsize>,
    /// Compute backend to use.
    #[arg(long, value_enum, default_value_t = DEFAULT_BACKEND)]
    backend: BackendChoice,
    /// Log progress and print a performance summary on stderr.
    #[arg(long, short)]
    verbose: bool,
}

/// Arguments for a single classification run.
struct ClassifyArgs {
    audio_path: PathBuf,
    config: Option<PathBuf>,
    top_k: Option<NonZeroUsize>,
}

fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Help and version go to stdout and succeed; every other parse error is a usage error.
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            std::process::exit(code);
        }
    };
    init_logging(cli.verbose);

    let audio_path = match <[PathBuf; 1]>::try_from(cli.audio_paths) {
        Ok([path]) => path,
        Err(paths) => {
            eprintln!(
                "error: expected exactly one audio file path, got {}\n\n{}",
                paths.len(),
                Cli::command().render_usage()
            );
            std::process::exit(1);
        }
    };
    let args = ClassifyArgs {
        audio_path,
        config: cli.config,
        top_k: cli.top_k,
    };

    match cli.backend {
        BackendChoice::Wgpu => {
            #[cfg(feature = "backend-wgpu")]
            {
                let device = WgpuDevice::default();
                init_setup::<AutoGraphicsApi>(&device, Default::default());
                run_classify::<Wgpu>(args, &device)?;
            }
            #[cfg(not(feature = "backend-wgpu"))]
            {
                let _ = args;
                anyhow::bail!("WGPU backend not enabled; build with --features backend-wgpu");
            }
        }
        BackendChoice::Ndarray => {
            let device = NdArrayDevice::default();
            run_classify::<NdArray<f32>>(args, &device)?;
        }
    }

    if cli.verbose {
        eprintln!("{}", perf::report());
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Stderr)
        .init();
}

/// Decode, load the model, classify and print JSON.
fn run_classify<B: Backend>(args: ClassifyArgs, device: &B::Device) -> Result<()> {
    // Decode first so a bad input fails before any model download.
    let (samples, sample_rate) = AudioIo::read_mono(&args.audio_path)?;
    log::info!(
        "Decoded {} samples at {sample_rate} Hz from {}",
        samples.len(),
        args.audio_path.display()
    );

    let mut config = resolve_config(args.config.as_deref())?;
    if let Some(top_k) = args.top_k {
        config.top_k = top_k.get();
    }
    let pipeline = AudioClassificationPipeline::<B>::from_config(&config, device)
        .context("Failed to load the classification model")?;

    let results = pipeline.classify_samples(&samples, sample_rate)?;
    println!("{}", serde_json::to_string(&results)?);
    Ok(())
}

fn resolve_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => load_config(path),
        None => Config::builtin(),
    }
}
