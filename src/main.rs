//! `veracity` CLI - analyze text, images and video for signs of deception

mod cmd;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use veracity::analyze::ReportFormat;
use veracity::{Config, Submission};

#[derive(Parser)]
#[command(name = "veracity")]
#[command(about = "Deception analysis for text, images and video")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.config/veracity/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (overridden by `RUST_LOG`)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Report format on stdout or in `--output`
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Json,
    Markdown,
}

impl From<OutputFormat> for ReportFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Json => ReportFormat::Json,
            OutputFormat::Markdown => ReportFormat::Markdown,
        }
    }
}

#[derive(clap::Args, Clone, Debug)]
struct OutputArgs {
    /// Report format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Write the report to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Do not store the result
    #[arg(long)]
    no_save: bool,
}

impl From<OutputArgs> for cmd::analyze::OutputOptions {
    fn from(args: OutputArgs) -> Self {
        Self {
            format: args.format.into(),
            output: args.output,
            save: !args.no_save,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a video: audio transcript, sampled frames and an overall assessment
    Video {
        /// Video file (mp4, mov, m4v, avi, mkv, webm)
        path: PathBuf,

        /// Number of frames to sample (default from config, normally 7)
        #[arg(long)]
        frames: Option<usize>,

        #[command(flatten)]
        out: OutputArgs,
    },

    /// Analyze a piece of text (`-` reads stdin)
    Text {
        content: String,

        #[command(flatten)]
        out: OutputArgs,
    },

    /// Analyze a single image
    Image {
        path: PathBuf,

        #[command(flatten)]
        out: OutputArgs,
    },

    /// Print a stored result
    Show {
        /// Result id printed by a previous run
        id: String,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// Print the effective configuration (API key redacted)
    Config,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // stderr keeps stdout clean for reports
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Video { path, frames, out } => {
            let submission = Submission::Video {
                path,
                frame_count: frames,
            };
            cmd::analyze::cmd_analyze(&config, submission, out.into()).await?;
        }
        Commands::Text { content, out } => {
            let content = cmd::analyze::read_text_arg(content)?;
            cmd::analyze::cmd_analyze(&config, Submission::Text(content), out.into()).await?;
        }
        Commands::Image { path, out } => {
            cmd::analyze::cmd_analyze(&config, Submission::Image(path), out.into()).await?;
        }
        Commands::Show { id, format } => {
            cmd::show::cmd_show(&config, &id, format.into()).await?;
        }
        Commands::Config => {
            cmd::config::cmd_config(&config, cli.config.as_deref());
        }
    }

    Ok(())
}
