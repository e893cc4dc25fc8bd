use anyhow::Result;
use clap::{Parser, Subcommand};
use granthx::commands::{ask, configure, index_input, serve_http, upload_file};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "granthx")]
#[command(about = "Ask questions about your documents, web pages, videos and spreadsheets")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the configuration file, or print the current settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Index a URL, a file path or a piece of text
    Index {
        /// Web page or YouTube URL, path to a .pdf/.csv/.tsv file, or literal text
        input: String,
    },
    /// Index a local file by its extension
    Upload {
        /// File to index
        path: PathBuf,
    },
    /// Ask a question about the indexed content
    Chat {
        /// The question
        query: String,
        /// Print the answer as it is generated
        #[arg(long)]
        stream: bool,
    },
    /// Start the HTTP server
    Serve {
        /// Port to listen on, overriding the configuration and PORT
        #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { show } => {
            configure(show)?;
        }
        Commands::Index { input } => {
            index_input(&input).await?;
        }
        Commands::Upload { path } => {
            upload_file(&path).await?;
        }
        Commands::Chat { query, stream } => {
            ask(&query, stream).await?;
        }
        Commands::Serve { port } => {
            serve_http(port).await?;
        }
    }

    Ok(())
}
