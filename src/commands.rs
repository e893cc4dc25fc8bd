use anyhow::{Context, Result};
use console::style;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::chat::{ChatCompletionsClient, ChatService, GenerationProvider};
use crate::config::{Config, load_config, show_config};
use crate::database::{VectorStore, store_from_config};
use crate::embeddings::{EmbeddingProvider, provider_from_config};
use crate::extract::InputDescriptor;
use crate::indexer::{IndexReceipt, Indexer};
use crate::retriever::Retriever;
use crate::server::{self, AppState};

/// Embedding model and vector store shared by indexing and retrieval
struct Backends {
    embeddings: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
}

impl Backends {
    async fn open(config: &Config) -> Result<Self> {
        let embeddings =
            provider_from_config(config).context("Failed to create embedding provider")?;
        let store = store_from_config(config)
            .await
            .context("Failed to open vector store")?;
        Ok(Self { embeddings, store })
    }
}

fn generator(config: &Config) -> Result<Arc<dyn GenerationProvider>> {
    let client =
        ChatCompletionsClient::new(&config.generation).context("Failed to create chat client")?;
    Ok(Arc::new(client))
}

/// Print the configuration, or write it to disk so it can be edited
#[inline]
pub fn configure(show: bool) -> Result<()> {
    let config = load_config()?;

    if show {
        show_config(&config);
        return Ok(());
    }

    config.save()?;
    println!(
        "{} {}",
        style("✓ Configuration written to").green(),
        config.config_file_path().display()
    );
    println!("Edit the file and run 'granthx config --show' to review it.");
    Ok(())
}

async fn ingest(descriptor: InputDescriptor) -> Result<IndexReceipt> {
    let config = load_config()?;
    let backends = Backends::open(&config).await?;
    let indexer = Indexer::from_config(&config, backends.embeddings, backends.store);

    info!("Indexing {}", descriptor.describe());
    let receipt = indexer.ingest(&descriptor).await?;

    println!(
        "{} {} document(s), {} chunk(s) into collection '{}'",
        style("✓ Indexed").green(),
        receipt.documents_processed,
        receipt.chunks_created,
        indexer.collection()
    );
    Ok(receipt)
}

/// Index a URL, a file path or literal text
#[inline]
pub async fn index_input(input: &str) -> Result<IndexReceipt> {
    ingest(InputDescriptor::Raw(input.to_string())).await
}

/// Index a local file by its extension
#[inline]
pub async fn upload_file(path: &Path) -> Result<IndexReceipt> {
    if !path.is_file() {
        anyhow::bail!("{} is not a file", path.display());
    }
    ingest(InputDescriptor::File(path.to_path_buf())).await
}

/// Answer a question from the indexed content, printing tokens as they arrive when streaming
#[inline]
pub async fn ask(query: &str, stream: bool) -> Result<()> {
    let config = load_config()?;
    let backends = Backends::open(&config).await?;
    let retriever = Retriever::from_config(&config, backends.embeddings, backends.store);
    let service = ChatService::from_config(&config, retriever, generator(&config)?);
    let options = service.defaults().clone().streaming(stream);

    if stream {
        let mut stdout = std::io::stdout();
        let mut sink = |token: &str| {
            let _ = write!(stdout, "{token}");
            let _ = stdout.flush();
        };
        service.chat(query, &options, Some(&mut sink)).await?;
        println!();
    } else {
        let turn = service.chat(query, &options, None).await?;
        println!("{}", turn.answer);
    }

    Ok(())
}

/// Run the HTTP server
#[inline]
pub async fn serve_http(port: Option<u16>) -> Result<()> {
    let mut config = load_config()?;
    if let Some(port) = port {
        config.server.port = port;
    }

    let backends = Backends::open(&config).await?;
    let state = AppState::from_config(
        &config,
        backends.embeddings,
        backends.store,
        generator(&config)?,
    );

    eprintln!(
        "{} http://{}:{}",
        style("🚀 granthX listening on").bold().green(),
        config.server.host,
        config.server.port
    );
    server::serve(&config.server, state).await?;
    Ok(())
}
