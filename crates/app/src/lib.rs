use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{info, warn};

use superimage_core::backend::{Device, OrtEngineLoader};
use superimage_core::batch::{batch_output_path, run_batch, ProgressSink};
use superimage_core::catalog::ModelCatalog;
use superimage_core::config::{
    config_path, data_dir, initialize_data_dir, models_dir, AppConfig,
};
use superimage_core::resolver::WeightResolver;
use superimage_core::session::{SessionOptions, UpscaleRequest, UpscaleSession};

const DEFAULT_LOG_FILTER: &str = "info";
// ort logs every provider probe at info; keep that out of normal runs.
const NOISE_FILTER: &str = "ort=error";

#[derive(Parser)]
#[command(name = "superimage", about = "Real-ESRGAN image upscaling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        global = true,
        help = "Increase log verbosity (-v: debug, -vv: trace)"
    )]
    verbose: u8,

    #[arg(
        long = "log-filter",
        value_name = "FILTER",
        global = true,
        help = "Explicit tracing filter (overrides RUST_LOG and -v)"
    )]
    log_filter: Option<String>,

    #[arg(long, global = true, help = "Data directory (config and model cache)")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Upscale a single image
    Upscale(UpscaleArgs),
    /// Upscale a set of images into an output directory
    Batch(BatchArgs),
    /// List available models and their cache status
    Models,
}

#[derive(Args)]
struct UpscaleArgs {
    #[arg(help = "Path to the input image")]
    input: PathBuf,

    #[arg(short = 'o', long, help = "Output path (default: <stem>_upscaled<ext> in the configured output directory)")]
    output: Option<PathBuf>,

    #[command(flatten)]
    overrides: SettingsOverrides,
}

#[derive(Args)]
struct BatchArgs {
    #[arg(required = true, help = "Input images to upscale")]
    inputs: Vec<PathBuf>,

    #[arg(short = 'o', long = "output-dir", help = "Output directory (default from config)")]
    output_dir: Option<PathBuf>,

    #[command(flatten)]
    overrides: SettingsOverrides,
}

/// CLI flags that override the persisted configuration for one run.
#[derive(Args)]
struct SettingsOverrides {
    #[arg(short = 'm', long, help = "Model name (see `superimage models`)")]
    model: Option<String>,

    #[arg(short = 's', long, help = "Final upscale factor applied to the output")]
    outscale: Option<f32>,

    #[arg(long, help = "Tile size in pixels (0 processes the whole image at once)")]
    tile: Option<u32>,

    #[arg(long, help = "Overlap padding around each tile in pixels")]
    tile_pad: Option<u32>,

    #[arg(long, help = "Reflection padding applied to the whole image")]
    pre_pad: Option<u32>,

    #[arg(long, help = "Inference device: cuda or cpu")]
    device: Option<String>,
}

pub fn run_from_env() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_filter.as_deref());

    let resolved_data_dir = data_dir(cli.data_dir.as_deref());
    if let Err(e) = initialize_data_dir(&resolved_data_dir) {
        warn!(error = %e, "Failed to initialize data directory");
    }

    let cfg_path = config_path(&resolved_data_dir);
    let config = match AppConfig::load_from_path(&cfg_path) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load config file, using defaults");
            AppConfig::default()
        }
    };

    info!(
        data_dir = %resolved_data_dir.display(),
        config_path = %cfg_path.display(),
        "Runtime startup"
    );

    match cli.command {
        Commands::Upscale(args) => cmd_upscale(args, &config, &resolved_data_dir),
        Commands::Batch(args) => cmd_batch(args, &config, &resolved_data_dir),
        Commands::Models => cmd_models(&resolved_data_dir),
    }
}

fn init_logging(verbose: u8, cli_log_filter: Option<&str>) {
    let filter = select_log_filter(
        NOISE_FILTER,
        std::env::var("RUST_LOG").ok().as_deref(),
        verbose,
        cli_log_filter,
    );

    let env_filter = tracing_subscriber::EnvFilter::try_new(&filter).unwrap_or_else(|error| {
        eprintln!(
            "Invalid log filter '{filter}': {error}. Falling back to '{DEFAULT_LOG_FILTER}'."
        );
        tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)
    });

    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter)
        .finish();

    if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!(
            "Failed to initialize tracing subscriber: {error}. Continuing without structured tracing."
        );
    }
}

/// Filter precedence: explicit --log-filter, then -v/-vv, then RUST_LOG,
/// then the default. The ort noise filter is only prepended when the
/// selection was implicit.
fn select_log_filter(
    noise_filter: &str,
    rust_log_env: Option<&str>,
    verbose: u8,
    cli_log_filter: Option<&str>,
) -> String {
    if let Some(filter) = cli_log_filter {
        return filter.to_string();
    }
    if verbose >= 2 {
        return "trace".to_string();
    }
    if verbose == 1 {
        return "debug".to_string();
    }

    let user_filter = rust_log_env.unwrap_or(DEFAULT_LOG_FILTER);
    if noise_filter.trim().is_empty() {
        user_filter.to_string()
    } else {
        format!("{noise_filter},{user_filter}")
    }
}

/// Merge the persisted config with per-run CLI overrides.
fn effective_settings(config: &AppConfig, overrides: &SettingsOverrides) -> Result<Settings> {
    let mut merged = config.clone();
    if let Some(model) = &overrides.model {
        merged.model = model.clone();
    }
    if let Some(outscale) = overrides.outscale {
        merged.upscale.outscale = outscale;
    }
    if let Some(tile) = overrides.tile {
        merged.upscale.tile = tile;
    }
    if let Some(tile_pad) = overrides.tile_pad {
        merged.upscale.tile_pad = tile_pad;
    }
    if let Some(pre_pad) = overrides.pre_pad {
        merged.upscale.pre_pad = pre_pad;
    }
    if let Some(device) = &overrides.device {
        merged.device = device.clone();
    }
    merged.validate()?;

    Ok(Settings {
        model: merged.model,
        output_dir: merged.output_dir,
        tile: merged.upscale.tile,
        tile_pad: merged.upscale.tile_pad,
        pre_pad: merged.upscale.pre_pad,
        outscale: merged.upscale.outscale,
        device: Device::from_str_lossy(&merged.device),
    })
}

struct Settings {
    model: String,
    output_dir: PathBuf,
    tile: u32,
    tile_pad: u32,
    pre_pad: u32,
    outscale: f32,
    device: Device,
}

fn build_session(settings: &Settings, data_dir: &std::path::Path) -> Result<UpscaleSession> {
    let catalog = ModelCatalog::builtin();
    if catalog.get(&settings.model).is_none() {
        bail!(
            "unknown model '{}' (available: {})",
            settings.model,
            catalog.names().join(", ")
        );
    }

    let resolver = WeightResolver::new(models_dir(data_dir), catalog);
    Ok(UpscaleSession::new(
        SessionOptions {
            model: settings.model.clone(),
            tile: settings.tile,
            tile_pad: settings.tile_pad,
            pre_pad: settings.pre_pad,
            device: settings.device,
        },
        resolver,
        Box::new(OrtEngineLoader::new(settings.device)),
    ))
}

fn cmd_upscale(args: UpscaleArgs, config: &AppConfig, data_dir: &std::path::Path) -> Result<()> {
    let settings = effective_settings(config, &args.overrides)?;
    let output = args
        .output
        .unwrap_or_else(|| batch_output_path(&settings.output_dir, &args.input));

    let session = build_session(&settings, data_dir)?;
    let request = UpscaleRequest {
        input: args.input.clone(),
        output: output.clone(),
        outscale: settings.outscale,
    };

    let result = session.run(&request);
    session.dispose();
    result.with_context(|| format!("failed to upscale {}", args.input.display()))?;

    println!("✓ {} -> {}", args.input.display(), output.display());
    Ok(())
}

fn cmd_batch(args: BatchArgs, config: &AppConfig, data_dir: &std::path::Path) -> Result<()> {
    let settings = effective_settings(config, &args.overrides)?;
    let output_dir = args.output_dir.unwrap_or_else(|| settings.output_dir.clone());

    let session = build_session(&settings, data_dir)?;
    let result = run_batch(
        session,
        &args.inputs,
        &output_dir,
        settings.outscale,
        &CliProgress,
    )
    .context("batch processing failed")?;

    for name in &result.failed {
        eprintln!("✗ {name}");
    }
    println!(
        "✓ {}/{} images upscaled into {}",
        result.success_count,
        result.total_count,
        output_dir.display()
    );

    if !result.failed.is_empty() {
        bail!(
            "{} of {} images failed",
            result.failed.len(),
            result.total_count
        );
    }
    Ok(())
}

fn cmd_models(data_dir: &std::path::Path) -> Result<()> {
    let catalog = ModelCatalog::builtin();
    let resolver = WeightResolver::new(models_dir(data_dir), catalog);

    for descriptor in resolver.catalog().list() {
        let status = if resolver.is_cached(&descriptor.name) {
            "cached"
        } else {
            "not downloaded"
        };
        println!(
            "{:<28} x{} ({} blocks)  [{}]  {}",
            descriptor.name, descriptor.scale, descriptor.num_blocks, status, descriptor.description
        );
    }
    Ok(())
}

/// Progress sink that mirrors batch progress onto stderr.
struct CliProgress;

impl ProgressSink for CliProgress {
    fn progress(&self, percent: u8, message: &str) {
        eprintln!("[{percent:3}%] {message}");
    }
}


#[cfg(test)]
mod settings_tests {
    use super::*;

    fn no_overrides() -> SettingsOverrides {
        SettingsOverrides {
            model: None,
            outscale: None,
            tile: None,
            tile_pad: None,
            pre_pad: None,
            device: None,
        }
    }

    #[test]
    fn defaults_pass_through_without_overrides() {
        let settings = effective_settings(&AppConfig::default(), &no_overrides()).unwrap();
        assert_eq!(settings.model, "RealESRGAN_x4plus");
        assert_eq!(settings.tile, 400);
        assert_eq!(settings.tile_pad, 10);
        assert_eq!(settings.pre_pad, 0);
        assert_eq!(settings.outscale, 4.0);
        assert_eq!(settings.device, Device::Cuda);
    }

    #[test]
    fn cli_overrides_win_over_config() {
        let overrides = SettingsOverrides {
            model: Some("RealESRGAN_x4plus_anime_6B".to_string()),
            outscale: Some(2.0),
            tile: Some(0),
            tile_pad: None,
            pre_pad: Some(5),
            device: Some("cpu".to_string()),
        };
        let settings = effective_settings(&AppConfig::default(), &overrides).unwrap();
        assert_eq!(settings.model, "RealESRGAN_x4plus_anime_6B");
        assert_eq!(settings.outscale, 2.0);
        assert_eq!(settings.tile, 0);
        assert_eq!(settings.tile_pad, 10);
        assert_eq!(settings.pre_pad, 5);
        assert_eq!(settings.device, Device::Cpu);
    }

    #[test]
    fn invalid_override_is_rejected() {
        let overrides = SettingsOverrides {
            outscale: Some(0.25),
            ..no_overrides()
        };
        assert!(effective_settings(&AppConfig::default(), &overrides).is_err());
    }

    #[test]
    fn unknown_model_fails_at_session_build() {
        let overrides = SettingsOverrides {
            model: Some("NotAModel".to_string()),
            ..no_overrides()
        };
        let settings = effective_settings(&AppConfig::default(), &overrides).unwrap();
        let err = build_session(&settings, std::path::Path::new("/tmp/superimage-test"))
            .expect_err("unknown model must be rejected");
        assert!(err.to_string().contains("NotAModel"));
        assert!(err.to_string().contains("RealESRGAN_x4plus"));
    }
}
