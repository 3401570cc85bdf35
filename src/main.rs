mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands, PatternArgs};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;

use wavemark::inputs;
use wm_av::{audio, ToolRegistry};
use wm_core::config::Config;
use wm_core::{BatchResult, DeliveryFormat};
use wm_pipeline::{BatchEvents, JobScheduler, WatermarkPipeline};

struct RunOptions {
    primaries: Vec<PathBuf>,
    watermarks: Vec<PathBuf>,
    output: PathBuf,
    pattern: PatternArgs,
    format: Option<DeliveryFormat>,
    jobs: Option<usize>,
    no_convert: bool,
    keep_intermediate: bool,
}

async fn run_batch(opts: RunOptions, config_path: Option<&Path>) -> Result<BatchResult> {
    let mut config = Config::load_or_default(config_path);
    config.watermark = opts.pattern.apply(&config.watermark);
    if let Some(format) = opts.format {
        config.delivery.format = format;
    }
    if opts.no_convert {
        config.batch.auto_convert = false;
    }
    if opts.keep_intermediate {
        config.batch.keep_intermediate = true;
    }
    if let Some(jobs) = opts.jobs {
        config.batch.max_concurrency = jobs;
        config.batch.background_processing = true;
    }

    let primaries = inputs::collect_audio_files(&opts.primaries)?;
    let watermarks = inputs::collect_audio_files(&opts.watermarks)?;
    let pairs = inputs::cartesian_pairs(&primaries, &watermarks);
    tracing::info!(
        "Found {} primary and {} watermark tracks ({} pairs)",
        primaries.len(),
        watermarks.len(),
        pairs.len()
    );

    if !pairs.is_empty() && !opts.output.exists() {
        std::fs::create_dir_all(&opts.output).with_context(|| {
            format!("Failed to create output folder {}", opts.output.display())
        })?;
    }

    let tools = Arc::new(ToolRegistry::discover(&config.tools));
    let pipeline = WatermarkPipeline::from_config(&config, tools).with_seed(opts.pattern.seed);

    let events = BatchEvents::noop()
        .on_current_pair(|primary, watermark| {
            tracing::info!("Processing {primary} + {watermark}");
        })
        .on_progress(|completed, total| {
            eprintln!("[{completed}/{total}]");
        });
    let scheduler = Arc::new(
        JobScheduler::new(Arc::new(pipeline), config.batch.effective_concurrency())
            .with_events(events),
    );
    scheduler.queue(pairs, config.watermark.clone(), &opts.output)?;

    let interrupt = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::warn!("Interrupt received, cancelling batch");
                    scheduler.cancel();
                }
                Err(e) => tracing::error!("Failed to install Ctrl+C handler: {}", e),
            }
        })
    };

    let result = scheduler.start().await;
    interrupt.abort();
    Ok(result?)
}

fn run(opts: RunOptions, config_path: Option<&Path>) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(run_batch(opts, config_path))?;

    println!("Delivered: {}", result.success_count);
    if !result.errors.is_empty() {
        println!("Failed: {}", result.failure_count());
        for error in &result.errors {
            println!("  ✗ {}", error);
        }
    }

    if result.cancelled {
        anyhow::bail!("Batch cancelled");
    }
    if !result.is_clean() {
        anyhow::bail!("{} pair(s) failed", result.failure_count());
    }
    Ok(())
}

fn plan(
    primary_duration: f64,
    watermark_duration: f64,
    pattern: &PatternArgs,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = Config::load_or_default(config_path);
    let settings = pattern.apply(&config.watermark);
    let mut rng = match pattern.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let (composition, gain) = wm_compose::build(
        settings.pattern,
        primary_duration,
        watermark_duration,
        &settings,
        &mut rng,
    )?;

    let plan = serde_json::json!({
        "settings": settings,
        "insertions": composition.insertion_count(),
        "composition": composition,
        "gain": gain,
    });
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn peaks(file: &Path, buckets: usize) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let info = audio::probe_audio(file)?;
    let peaks = audio::extract_peaks(file, buckets, &CancellationToken::new())?;

    let out = serde_json::json!({
        "file": file,
        "duration_secs": info.duration_secs,
        "sample_rate": info.sample_rate,
        "channels": info.channels,
        "peaks": peaks,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = Config::load_or_default(config_path);
    let tools = ToolRegistry::discover(&config.tools).check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let (Some(path), Some(source)) = (&tool.path, tool.source) {
            print!(" - {} [{}]", path.display(), source);
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Delivery transcoding needs ffmpeg.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let contents = std::fs::read_to_string(p)
                .with_context(|| format!("Failed to read {}", p.display()))?;
            let config = Config::from_json(&contents)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    println!("  Pattern: {}", config.watermark.pattern);
    println!("  Volume: {}", config.watermark.volume);
    println!("  Delivery: {}", config.delivery.format);
    println!("  Concurrency: {}", config.batch.effective_concurrency());
    println!("  Auto-convert: {}", config.batch.auto_convert);

    let warnings = config.validate();
    if !warnings.is_empty() {
        println!("\nWarnings:");
        for warning in &warnings {
            println!("  ! {}", warning);
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "wavemark=trace,wm_core=debug,wm_av=debug,wm_compose=debug,wm_pipeline=debug"
                .to_string()
        } else {
            "wavemark=info,wm_core=info,wm_av=info,wm_compose=info,wm_pipeline=info".to_string()
        }
    });

    // Logs go to stderr so JSON output on stdout stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            primaries,
            watermarks,
            output,
            pattern,
            format,
            jobs,
            no_convert,
            keep_intermediate,
        } => run(
            RunOptions {
                primaries,
                watermarks,
                output,
                pattern,
                format,
                jobs,
                no_convert,
                keep_intermediate,
            },
            cli.config.as_deref(),
        ),
        Commands::Plan {
            primary_duration,
            watermark_duration,
            pattern,
        } => plan(
            primary_duration,
            watermark_duration,
            &pattern,
            cli.config.as_deref(),
        ),
        Commands::Peaks { file, buckets } => peaks(&file, buckets),
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("wavemark {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
