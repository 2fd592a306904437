//! Prompt assembly
//!
//! The layout is fixed so identical inputs always produce byte-identical prompts:
//!
//! ```text
//! <system prompt>
//!
//! Context:
//! [Document 1 | id=doc-1 | distance=0.1000]
//! <document text>
//!
//! User question: <query>
//! Answer:
//! ```

use itertools::Itertools;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::database::QueryMatch;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer the user's question \
using the provided context. If the context is insufficient, say you do not have enough information.";

/// Rendered in place of a distance the store did not report
pub const DISTANCE_PLACEHOLDER: &str = "unknown";

pub const EMPTY_CONTEXT: &str = "(no relevant documents retrieved)";

fn render_distance(distance: Option<f32>) -> String {
    distance.map_or_else(
        || DISTANCE_PLACEHOLDER.to_string(),
        |value| format!("{:.4}", value),
    )
}

/// Build the prompt sent to the generation model
#[inline]
pub fn build_prompt(system_prompt: &str, query: &str, matches: &[QueryMatch]) -> String {
    let context = if matches.is_empty() {
        EMPTY_CONTEXT.to_string()
    } else {
        matches
            .iter()
            .enumerate()
            .map(|(index, found)| {
                format!(
                    "[Document {} | id={} | distance={}]\n{}",
                    index + 1,
                    found.id,
                    render_distance(found.distance),
                    found.text.trim()
                )
            })
            .join("\n\n")
    };

    let system_prompt = system_prompt.trim();
    if system_prompt.is_empty() {
        format!("Context:\n{}\n\nUser question: {}\nAnswer:", context, query)
    } else {
        format!(
            "{}\n\nContext:\n{}\n\nUser question: {}\nAnswer:",
            system_prompt, context, query
        )
    }
}

/// Read a custom system prompt, falling back to the default on any problem
#[inline]
pub fn load_system_prompt(path: Option<&Path>) -> String {
    let Some(path) = path else {
        return DEFAULT_SYSTEM_PROMPT.to_string();
    };

    if path.is_dir() {
        warn!("System prompt path is a directory, ignoring: {}", path.display());
        return DEFAULT_SYSTEM_PROMPT.to_string();
    }

    match fs::read_to_string(path) {
        Ok(content) if !content.trim().is_empty() => {
            debug!("Loaded system prompt from {}", path.display());
            content.trim().to_string()
        }
        Ok(_) => {
            warn!("System prompt file is empty, using default: {}", path.display());
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("System prompt file not found: {}", path.display());
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
        Err(e) => {
            warn!("Unable to read system prompt file {}: {}", path.display(), e);
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
    }
}
