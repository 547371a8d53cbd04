//! Encounter CLI - match encounter screenshots against reference images.

use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::Result;
use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use encounter_core::{HashAlgorithm, Keep, SortKey};
use tracing_subscriber::EnvFilter;

mod commands;
mod exit_codes;
mod utils;

use exit_codes::ExitCode;

const EXIT_CODES_HELP: &str = "\
Exit codes:
  0   Success
  1   General error
  64  Usage or configuration error
  65  No match found (--require-match) or reference check failed
  66  Input image or database could not be read
  69  Network error while fetching
  74  Output could not be written";

#[derive(Parser)]
#[command(name = "encounter")]
#[command(author, version, about = "Match encounter screenshots against reference images", long_about = None)]
#[command(after_help = EXIT_CODES_HELP)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Only print errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Print debug logs to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// When to use colored output
    #[arg(long, global = true, value_enum, default_value_t = ColorChoice::Auto)]
    color: ColorChoice,

    /// Match configuration file (JSON). Defaults to $ENCOUNTER_CONFIG
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ColorChoice {
    Auto,
    Always,
    Never,
}

/// Output format for command results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Crop options; any option given overrides the config file.
#[derive(Args, Debug, Default, Clone)]
pub struct CropArgs {
    /// Fraction of the height to keep (0-1]
    #[arg(long, value_name = "F")]
    pub top_fraction: Option<f32>,

    /// Fraction of the width to keep, centered (0-1]
    #[arg(long, value_name = "F")]
    pub center_fraction: Option<f32>,

    /// Horizontal shift of the center as a fraction of the width [-1, 1]
    #[arg(long, value_name = "F", allow_hyphen_values = true)]
    pub h_offset: Option<f32>,

    /// Pixels added to (negative: removed from) each horizontal side
    #[arg(long, value_name = "PX", allow_hyphen_values = true)]
    pub pad_px: Option<i32>,

    /// Keep the top or bottom band
    #[arg(long, value_parser = parse_keep)]
    pub keep: Option<Keep>,
}

impl CropArgs {
    pub fn is_set(&self) -> bool {
        self.top_fraction.is_some()
            || self.center_fraction.is_some()
            || self.h_offset.is_some()
            || self.pad_px.is_some()
            || self.keep.is_some()
    }
}

/// Where references come from.
#[derive(Args, Debug, Clone)]
#[command(group(ArgGroup::new("source").required(true).args(["refs", "db"])))]
pub struct RefsArgs {
    /// Directory of reference images (id = file stem)
    #[arg(long, value_name = "DIR")]
    pub refs: Option<PathBuf>,

    /// JSON encounter database mapping ids to {"image": ...}
    #[arg(long, value_name = "FILE")]
    pub db: Option<PathBuf>,

    /// Root that database image paths are relative to (default: the database's directory)
    #[arg(long, value_name = "DIR", requires = "db")]
    pub resources: Option<PathBuf>,

    /// Only database entries available on this day, e.g. "Day 10+"
    #[arg(long, value_name = "DAY", requires = "db")]
    pub day: Option<String>,

    /// Precomputed feature index (see `encounter index`)
    #[arg(long, value_name = "FILE")]
    pub index: Option<PathBuf>,
}

/// Matching overrides shared by `compare`.
#[derive(Args, Debug, Default, Clone)]
pub struct MatchArgs {
    /// Maximum perceptual hash distance to verify a reference
    #[arg(long, value_name = "N")]
    pub phash_threshold: Option<u32>,

    /// Verify only the K nearest references by hash distance
    #[arg(long, value_name = "K")]
    pub top_k: Option<usize>,

    /// Template scales, comma separated (e.g. 0.8,1.0,1.2)
    #[arg(long, value_delimiter = ',', value_name = "S")]
    pub scales: Option<Vec<f32>>,

    /// Shrink both images by this factor before template matching (0-1]
    #[arg(long, value_name = "F")]
    pub downscale: Option<f32>,

    /// Template score needed to accept a match [-1, 1]
    #[arg(long, value_name = "F")]
    pub template_threshold: Option<f32>,

    /// ORB keypoint budget per image
    #[arg(long, value_name = "N")]
    pub max_features: Option<usize>,

    /// Ratio test threshold (0-1]
    #[arg(long, value_name = "F")]
    pub ratio_threshold: Option<f32>,

    /// Ranking signal
    #[arg(long, value_parser = parse_sort_key)]
    pub sort_by: Option<SortKey>,

    /// Perceptual hash algorithm
    #[arg(long, value_parser = parse_hash_algorithm)]
    pub hash_algorithm: Option<HashAlgorithm>,

    /// Skip MSE and SSIM
    #[arg(long)]
    pub no_metrics: bool,

    /// Score references one at a time
    #[arg(long)]
    pub serial: bool,
}

fn parse_keep(s: &str) -> std::result::Result<Keep, String> {
    s.parse().map_err(|e: encounter_core::MatchError| e.to_string())
}

fn parse_sort_key(s: &str) -> std::result::Result<SortKey, String> {
    s.parse().map_err(|e: encounter_core::MatchError| e.to_string())
}

fn parse_hash_algorithm(s: &str) -> std::result::Result<HashAlgorithm, String> {
    s.parse().map_err(|e: encounter_core::MatchError| e.to_string())
}

#[derive(Subcommand)]
enum Commands {
    /// Crop a screenshot with fractional coordinates
    Crop {
        /// Input image
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output image (format from extension)
        #[arg(short, long, value_name = "OUTPUT")]
        output: PathBuf,

        #[command(flatten)]
        crop: CropArgs,
    },

    /// Split an image into left, middle and right thirds
    Split {
        /// Input image
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output prefix; writes <PREFIX>_left.<ext>, _mid, _right (default: input path without extension)
        #[arg(short = 'p', long, value_name = "PREFIX")]
        out_prefix: Option<PathBuf>,
    },

    /// Print perceptual hashes
    Hash {
        /// Images to hash
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,

        /// Perceptual hash algorithm
        #[arg(long, value_parser = parse_hash_algorithm)]
        algorithm: Option<HashAlgorithm>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Rank references against a query screenshot
    Compare {
        /// Query image
        #[arg(value_name = "QUERY")]
        query: PathBuf,

        #[command(flatten)]
        refs: RefsArgs,

        #[command(flatten)]
        crop: CropArgs,

        #[command(flatten)]
        matching: MatchArgs,

        /// Write the JSON report to this file
        #[arg(short, long, value_name = "FILE")]
        out: Option<PathBuf>,

        /// Output format for stdout
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Rows shown in the text summary
        #[arg(long, default_value_t = 5, value_name = "N")]
        show: usize,

        /// Exit with code 65 when no reference passes the acceptance thresholds
        #[arg(long)]
        require_match: bool,
    },

    /// Identify the monsters in the three encounter slots
    Recognize {
        /// Screenshot (cropped to the slot band, or use the crop options)
        #[arg(value_name = "SCREENSHOT")]
        screenshot: PathBuf,

        #[command(flatten)]
        refs: RefsArgs,

        #[command(flatten)]
        crop: CropArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Precompute hashes and ORB descriptors for a reference set
    Index {
        #[command(flatten)]
        refs: RefsArgs,

        /// Index file to write
        #[arg(short, long, value_name = "FILE")]
        out: PathBuf,
    },

    /// Check that every reference image exists and decodes
    Check {
        #[command(flatten)]
        refs: RefsArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Re-encode images (e.g. PNG to WebP)
    Convert {
        /// Files or directories to convert
        #[arg(value_name = "PATH", required = true)]
        inputs: Vec<PathBuf>,

        /// Target extension
        #[arg(long, default_value = "webp", value_name = "EXT")]
        to: String,

        /// Output directory (default: next to each source)
        #[arg(long, value_name = "DIR")]
        out_dir: Option<PathBuf>,

        /// Show what would be converted without writing anything
        #[arg(short = 'n', long)]
        dry_run: bool,
    },

    /// Download an image and save it in the format implied by OUTPUT
    Fetch {
        /// Image URL
        #[arg(value_name = "URL")]
        url: String,

        /// Destination file
        #[arg(short, long, value_name = "OUTPUT")]
        output: PathBuf,

        /// Request timeout in seconds
        #[arg(long, default_value_t = 30, value_name = "SECS")]
        timeout: u64,

        /// Maximum retries for transient failures
        #[arg(long, default_value_t = 3, value_name = "N")]
        retries: u32,
    },
}

fn init_logging(quiet: bool, verbose: bool, ansi: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else if quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(ansi)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let quiet = cli.quiet;
    let config = cli.config;

    match cli.command {
        Commands::Crop { input, output, crop } => {
            commands::crop::execute(input, output, crop, config.as_deref(), quiet)
        }
        Commands::Split { input, out_prefix } => commands::split::execute(input, out_prefix, quiet),
        Commands::Hash {
            files,
            algorithm,
            format,
        } => commands::hash::execute(files, algorithm, config.as_deref(), format),
        Commands::Compare {
            query,
            refs,
            crop,
            matching,
            out,
            format,
            show,
            require_match,
        } => commands::compare::execute(commands::compare::CompareOptions {
            query,
            refs,
            crop,
            matching,
            out,
            format,
            show,
            require_match,
            config,
            quiet,
        }),
        Commands::Recognize {
            screenshot,
            refs,
            crop,
            format,
        } => commands::recognize::execute(screenshot, refs, crop, config.as_deref(), format, quiet),
        Commands::Index { refs, out } => commands::index::execute(refs, out, config.as_deref(), quiet),
        Commands::Check { refs, format } => commands::check::execute(refs, format, quiet),
        Commands::Convert {
            inputs,
            to,
            out_dir,
            dry_run,
        } => commands::convert::execute(inputs, to, out_dir, dry_run, quiet),
        Commands::Fetch {
            url,
            output,
            timeout,
            retries,
        } => commands::fetch::execute(url, output, timeout, retries, quiet).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let color = match cli.color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none(),
    };
    colored::control::set_override(color);
    init_logging(cli.quiet, cli.verbose, color && std::io::stderr().is_terminal());

    if let Err(err) = run(cli).await {
        let exit = ExitCode::from_anyhow(&err);
        if let Some(message) = &exit.message {
            eprintln!("{} {}", "error:".red().bold(), message);
        }
        std::process::exit(exit.code);
    }
}
