use clap::{Parser, Subcommand};
use rag_chat::Result;
use rag_chat::chat::ChatParametersOverride;
use rag_chat::commands::{ask, delete_document, get_document, health, parse_filter, show_config};
use rag_chat::database::MetadataValue;

#[derive(Parser)]
#[command(name = "rag-chat")]
#[command(about = "Retrieval-augmented question answering over a Chroma collection with Gemini")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question grounded in the indexed documents
    Ask {
        /// Question text
        query: String,
        /// Metadata equality filter, e.g. --filter scope=public (repeatable)
        #[arg(long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, MetadataValue)>,
        /// Sampling temperature override (0 to 2)
        #[arg(long)]
        temperature: Option<f32>,
        /// Number of documents to retrieve (1 to 50)
        #[arg(long)]
        top_k: Option<u32>,
        /// Maximum tokens in the answer (1 to 8192)
        #[arg(long)]
        max_output_tokens: Option<u32>,
        /// Print the full answer record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the resolved configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Check connectivity to Chroma and Gemini credentials
    Health,
    /// Print a stored document
    Get {
        /// Document ID
        id: String,
    },
    /// Delete a stored document
    Delete {
        /// Document ID
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Ask {
            query,
            filters,
            temperature,
            top_k,
            max_output_tokens,
            json,
        } => {
            let overrides = ChatParametersOverride {
                temperature,
                top_k,
                max_output_tokens,
            };
            ask(query, filters, overrides, json).await?;
        }
        Commands::Config { show } => {
            if !show {
                eprintln!("Configuration is read from config.toml and the environment; use --show to inspect it.");
            }
            show_config()?;
        }
        Commands::Health => {
            health().await?;
        }
        Commands::Get { id } => {
            get_document(&id).await?;
        }
        Commands::Delete { id } => {
            delete_document(&id).await?;
        }
    }

    Ok(())
}
