use anyhow::{Context, Result, anyhow};
use console::style;
use tracing::{info, warn};

use crate::chat::{ChatParametersOverride, ChatQueryRequest, ChatService};
use crate::config::{self, Config};
use crate::database::{ChromaStore, MetadataFilter, MetadataValue, VectorStore};

/// Parse a `key=value` filter argument
#[inline]
pub fn parse_filter(raw: &str) -> std::result::Result<(String, MetadataValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {:?}", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("filter key cannot be empty in {:?}", raw));
    }
    let value = value.parse::<MetadataValue>().unwrap_or_else(|never| match never {});
    Ok((key.to_string(), value))
}

/// Show at most the last four characters of a secret
fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}

async fn connect_store(config: &Config) -> Result<ChromaStore> {
    ChromaStore::connect(
        &config.chroma,
        &config.chat.allowed_metadata_keys,
        config.gemini.request_timeout(),
    )
    .await
    .with_context(|| {
        format!(
            "Failed to connect to Chroma at {}:{}",
            config.chroma.host, config.chroma.port
        )
    })
}

/// Answer a question against the configured collection
#[inline]
pub async fn ask(
    query: String,
    filters: Vec<(String, MetadataValue)>,
    overrides: ChatParametersOverride,
    json: bool,
) -> Result<()> {
    let config = config::current().context("Failed to load configuration")?;
    let service = ChatService::from_config(&config)
        .await
        .context("Failed to initialize chat service")?;

    let mut request = ChatQueryRequest::new(query).with_overrides(overrides);
    if !filters.is_empty() {
        request = request.with_filters(filters.into_iter().collect::<MetadataFilter>());
    }

    let interrupted = async {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("Unable to listen for Ctrl-C; the request cannot be interrupted");
            std::future::pending::<()>().await;
        }
    };

    let answer = match service.answer_until(&request, interrupted).await {
        Ok(answer) => answer,
        Err(e) => {
            eprintln!("{} {}", style("✗").red(), e.public_message());
            return Err(anyhow!(e));
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
        return Ok(());
    }

    println!("{}", answer.answer);
    println!();

    if answer.sources.is_empty() {
        println!("{}", style("No sources were retrieved.").yellow());
    } else {
        println!("{}", style("Sources:").bold().yellow());
        for (index, source) in answer.sources.iter().enumerate() {
            let distance = source
                .distance
                .map_or_else(|| "unknown".to_string(), |d| format!("{:.4}", d));
            println!(
                "  {}. {} {}",
                index + 1,
                style(&source.id).cyan(),
                style(format!("(distance {})", distance)).dim()
            );
        }
    }

    let usage = answer.usage;
    println!();
    println!(
        "{}",
        style(format!(
            "embedding {:.0}ms · retrieval {:.0}ms · generation {:.0}ms · total {:.0}ms{}",
            usage.embedding_ms,
            usage.retrieval_ms,
            usage.generation_ms,
            usage.total_ms,
            usage
                .total_tokens
                .map(|t| format!(" · {} tokens", t))
                .unwrap_or_default()
        ))
        .dim()
    );
    println!("{}", style(format!("request {}", answer.request_id)).dim());

    Ok(())
}

/// Print the resolved configuration with secrets masked
#[inline]
pub fn show_config() -> Result<()> {
    let config = config::current().context("Failed to load configuration")?;

    println!("{}", style("📋 Current Configuration").bold().cyan());
    println!();

    println!("{}", style("Gemini Settings:").bold().yellow());
    let api_key = if config.gemini.api_key.trim().is_empty() {
        style("not set".to_string()).red()
    } else {
        style(mask_secret(&config.gemini.api_key)).cyan()
    };
    println!("  API key: {}", api_key);
    println!("  API URL: {}", style(&config.gemini.api_base_url).cyan());
    println!(
        "  Embedding model: {}",
        style(&config.gemini.embedding_model).cyan()
    );
    println!(
        "  Request timeout: {}",
        style(format!("{}s", config.gemini.request_timeout_seconds)).cyan()
    );
    println!(
        "  Retries: {} attempts, {}s base backoff",
        style(config.gemini.max_attempts).cyan(),
        style(config.gemini.retry_backoff_seconds).cyan()
    );

    println!();
    println!("{}", style("Chroma Settings:").bold().yellow());
    match config.chroma.base_url() {
        Ok(url) => println!("  URL: {}", style(url).cyan()),
        Err(e) => println!("  URL: {} ({})", style("Invalid").red(), e),
    }
    println!(
        "  Collection: {}",
        style(&config.chroma.collection_name).cyan()
    );
    println!(
        "  Tenant/database: {}/{}",
        style(&config.chroma.tenant).cyan(),
        style(&config.chroma.database).cyan()
    );
    if let Some(token) = config.chroma.auth_token.as_deref() {
        println!("  Auth token: {}", style(mask_secret(token)).cyan());
    }

    println!();
    println!("{}", style("Chat Settings:").bold().yellow());
    let chat = &config.chat;
    println!("  Model: {}", style(&chat.model).cyan());
    println!("  Temperature: {}", style(chat.temperature).cyan());
    println!("  Top K: {}", style(chat.top_k).cyan());
    println!("  Max output tokens: {}", style(chat.max_output_tokens).cyan());
    println!(
        "  Max context documents: {}",
        style(chat.max_context_documents).cyan()
    );
    println!(
        "  Allowed metadata keys: {}",
        style(chat.allowed_metadata_keys.join(", ")).cyan()
    );
    match chat.expanded_system_prompt_path() {
        Some(path) => println!("  System prompt: {}", style(path.display()).cyan()),
        None => println!("  System prompt: {}", style("built-in default").dim()),
    }

    println!();
    println!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

/// Check that Chroma answers and that Gemini credentials are present
#[inline]
pub async fn health() -> Result<()> {
    let config = config::current().context("Failed to load configuration")?;

    println!("{}", style("🩺 Health Check").bold().cyan());
    println!();

    let mut healthy = true;

    match config.gemini.require_api_key() {
        Ok(_) => println!("  {} Gemini API key configured", style("✓").green()),
        Err(e) => {
            healthy = false;
            println!("  {} {}", style("✗").red(), e);
        }
    }

    match connect_store(&config).await {
        Ok(store) => {
            match store.heartbeat().await {
                Ok(()) => println!("  {} Chroma reachable", style("✓").green()),
                Err(e) => {
                    healthy = false;
                    println!("  {} Chroma heartbeat failed: {}", style("✗").red(), e);
                }
            }
            match store.count().await {
                Ok(count) => println!(
                    "  {} Collection {} holds {} documents",
                    style("✓").green(),
                    style(store.collection_name()).cyan(),
                    count
                ),
                Err(e) => {
                    healthy = false;
                    println!("  {} Could not count documents: {}", style("✗").red(), e);
                }
            }
        }
        Err(e) => {
            healthy = false;
            println!("  {} {:#}", style("✗").red(), e);
        }
    }

    if healthy {
        info!("Health check passed");
        Ok(())
    } else {
        Err(anyhow!("Health check failed"))
    }
}

/// Print one stored document
#[inline]
pub async fn get_document(id: &str) -> Result<()> {
    let config = config::current().context("Failed to load configuration")?;
    let store = connect_store(&config).await?;

    let Some(document) = store
        .get(id)
        .await
        .with_context(|| format!("Failed to fetch document {}", id))?
    else {
        println!("{}", style(format!("Document not found: {}", id)).yellow());
        return Ok(());
    };

    println!("{} {}", style("📄").bold(), style(&document.id).bold().cyan());
    for (key, value) in &document.metadata {
        println!("   {}: {}", key, value);
    }
    if let Some(embedding) = &document.embedding {
        println!(
            "   {}",
            style(format!("embedding: {} dimensions", embedding.len())).dim()
        );
    }
    println!();
    println!("{}", document.text);

    Ok(())
}

/// Remove one stored document
#[inline]
pub async fn delete_document(id: &str) -> Result<()> {
    let config = config::current().context("Failed to load configuration")?;
    let store = connect_store(&config).await?;

    store
        .delete(id)
        .await
        .with_context(|| format!("Failed to delete document {}", id))?;

    info!("Deleted document {}", id);
    println!("{}", style(format!("✓ Deleted document {}", id)).green());
    Ok(())
}
