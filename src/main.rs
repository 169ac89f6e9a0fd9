use anyhow::Result;
use clap::{Parser, Subcommand};
use flowr::transport;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "flowr")]
#[command(author, version, about = "Flowr - conversational website builder", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat that builds a single-file website
    Chat {
        /// Initial message to send
        message: Option<String>,

        /// Gemini model to use (e.g., gemini-2.0-flash-exp)
        #[arg(short, long)]
        model: Option<String>,

        /// Replay assistant turns from FILE instead of calling Gemini
        /// (turns separated by a line containing only ---8<---)
        #[arg(long)]
        script: Option<PathBuf>,

        /// Characters per fragment when replaying a script
        #[arg(long, default_value = "16")]
        chunk_size: usize,

        /// Where to write the rendered document (overrides config)
        #[arg(long)]
        preview: Option<PathBuf>,
    },

    /// Parse a saved assistant turn and print its segments as JSON
    Parse {
        /// File holding the raw turn text
        file: PathBuf,

        /// Characters per fragment fed to the parser
        #[arg(long, default_value = "16")]
        chunk_size: usize,

        /// Print the ordered segment list instead of the whole view
        #[arg(long)]
        segments: bool,
    },

    /// Write a config file with the default settings
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "flowr=debug"
    } else {
        "flowr=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Chat {
            message,
            model,
            script,
            chunk_size,
            preview,
        } => {
            transport::cli::run_chat(transport::cli::ChatOptions {
                message,
                model,
                script,
                chunk_size,
                preview,
            })
            .await?;
        }
        Commands::Parse {
            file,
            chunk_size,
            segments,
        } => {
            transport::cli::run_parse(&file, chunk_size, segments)?;
        }
        Commands::Init { force } => {
            transport::cli::run_init(force)?;
        }
    }

    Ok(())
}
