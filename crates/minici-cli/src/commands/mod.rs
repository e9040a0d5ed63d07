//! CLI command implementations.

pub mod run;
pub mod serve;

use anyhow::{Context, Result};
use minici_config::parse_pipeline;
use std::collections::HashMap;

pub fn validate(path: &str) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path))?;
    match parse_pipeline(&content) {
        Ok(pipeline) => {
            println!(
                "Configuration is valid: pipeline '{}' with {} stage(s)",
                pipeline.name,
                pipeline.stages.len()
            );
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Parse `KEY=VALUE` pairs given on the command line.
pub fn parse_params(pairs: &[String]) -> Result<HashMap<String, String>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => anyhow::bail!("Invalid parameter '{}', expected KEY=VALUE", pair),
        })
        .collect()
}
