use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use tracing_subscriber::EnvFilter;
use vidsite::config::{self, SiteConfig};
use vidsite::inventory::{self, InventoryOptions};
use vidsite::output;
use vidsite::pipeline;
use vidsite::probe::{FfprobeProber, Prober};
use vidsite::render::{self, Templates};
use vidsite::storage::S3Store;

#[derive(Parser)]
#[command(name = "vidsite")]
#[command(about = "Publish a bucket of videos as a static website")]
#[command(long_about = "\
Publish a bucket of videos as a static website

Every .mp4 and .mov object in the bucket is downloaded, probed with ffprobe,
tagged with its dimensions and made public. Each video gets a page rendered
from your templates, and an index page lists them all:

  bucket/
  ├── index.html                   # Index of every published video
  ├── pages/
  │   ├── cat.html                 # One page per video, named after the file
  │   └── beach.html
  ├── cat.mp4                      # Videos stay where they are
  └── 2019/trip/beach.mov

Templates (video.html and index.html) live in the templates folder. Run
'vidsite gen-templates' to start from the stock ones and 'vidsite init' to
write a config.toml.

Configuration is read from config.toml in the config directory, falling back
to TEMPLATES_FOLDER, BUCKET_NAME, S3_REGION and LOCAL_VIDEO_PATH.")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml
    #[arg(long, default_value = ".", global = true)]
    config_dir: PathBuf,

    /// Log debug detail to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Probe, tag, render and publish every video, then the index
    Run {
        /// Fail if any video was skipped or could not be made public
        #[arg(long)]
        strict: bool,
        /// Write the run summary as JSON to this path
        #[arg(long)]
        summary_json: Option<PathBuf>,
    },
    /// Validate config, probe tool and templates, and show what a run would do
    Check,
    /// Write a config.toml by answering a few questions
    Init {
        /// Overwrite an existing config.toml
        #[arg(long)]
        force: bool,
    },
    /// Print a stock config.toml with all options documented
    GenConfig,
    /// Write the stock video and index templates into the templates folder
    GenTemplates {
        /// Overwrite existing templates
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Run {
            strict,
            summary_json,
        } => {
            let site_config = config::load_config(&cli.config_dir, env_lookup)?;
            let runtime = tokio::runtime::Runtime::new()?;

            let (tx, rx) = mpsc::channel();
            let printer = std::thread::spawn(move || output::print_asset_events(rx));
            let result = pipeline::run(&site_config, runtime.handle().clone(), Some(tx));
            printer.join().map_err(|_| "progress printer panicked")?;
            let report = result?;

            output::print_run_summary(&report.summary, &report.index_key);
            if let Some(path) = summary_json {
                let json = serde_json::to_string_pretty(&report.summary)?;
                std::fs::write(&path, json)?;
            }
            if strict && !report.summary.is_clean() {
                return Err(format!(
                    "{} skipped, {} not public",
                    report.summary.skipped_total(),
                    report.summary.published_not_public
                )
                .into());
            }
        }
        Command::Check => {
            let site_config = config::load_config(&cli.config_dir, env_lookup)?;
            let runtime = tokio::runtime::Runtime::new()?;
            check(&site_config, runtime.handle().clone())?;
        }
        Command::Init { force } => {
            let target = cli.config_dir.join(config::CONFIG_FILE);
            if target.exists() && !force {
                return Err(format!(
                    "{} already exists (use --force to replace it)",
                    target.display()
                )
                .into());
            }
            let defaults = draft_config(&cli.config_dir)?;
            let answers = config::prompt_config(
                &mut std::io::stdin().lock(),
                &mut std::io::stdout(),
                &defaults,
            )?;
            let path = config::write_config_file(&cli.config_dir, &answers.to_toml()?)?;
            println!("Wrote {}", path.display());
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
        Command::GenTemplates { force } => {
            let site_config = draft_config(&cli.config_dir)?;
            let written = render::write_stock_templates(&site_config.templates_dir, force)?;
            if written.is_empty() {
                println!(
                    "Templates already present in {} (use --force to replace them)",
                    site_config.templates_dir.display()
                );
            }
            for path in written {
                println!("Wrote {}", path.display());
            }
        }
    }

    Ok(())
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Log to stderr so progress output on stdout stays clean.
///
/// `RUST_LOG` wins over the defaults.
fn init_logging(verbose: bool) {
    let default = if verbose {
        "vidsite=debug,warn"
    } else {
        "vidsite=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Config as far as it resolves, without requiring the bucket settings.
///
/// `init` and `gen-templates` run before a complete config exists.
fn draft_config(dir: &Path) -> Result<SiteConfig, config::ConfigError> {
    let base = config::merge_toml(config::stock_defaults_value()?, config::env_overlay(env_lookup));
    let merged = match config::load_raw_config(dir)? {
        Some(overlay) => config::merge_toml(base, overlay),
        None => base,
    };
    Ok(merged.try_into()?)
}

/// Everything a run checks before mutating anything, then the plan.
fn check(
    site_config: &SiteConfig,
    runtime: tokio::runtime::Handle,
) -> Result<(), Box<dyn std::error::Error>> {
    let prober = FfprobeProber::new(
        &site_config.probe.ffprobe,
        site_config.probe_timeout(),
        runtime.clone(),
    );
    prober.check_available()?;
    Templates::from_dir(&site_config.templates_dir)?.check()?;

    let store = S3Store::connect(site_config.store_config(), runtime);
    let options = InventoryOptions {
        region: &site_config.bucket.region,
        public_base_url: site_config.bucket.public_base_url.as_deref(),
        pages_prefix: &site_config.pages_prefix,
        index_document: &site_config.index_document,
    };
    let assets = inventory::list_assets(&store, &site_config.retry_policy(), &options)?;
    let plans = pipeline::plan_assets(&assets, &site_config.staging_dir);
    output::print_check_output(
        &site_config.bucket.name,
        &assets,
        &plans,
        &site_config.pages_prefix,
    );
    Ok(())
}
