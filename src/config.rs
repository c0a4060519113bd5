use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Runtime settings, read from `NOTION_*` environment variables
/// (`__` separates nesting levels, e.g. `NOTION_LLM__BASE_URL`).
///
/// Flags on the CLI only scope a single run (limits, target URLs); every
/// tunable lives here so the binaries stay env-driven.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Help-center index the crawl starts from.
    pub root_url: String,
    /// Directory holding the raw and processed dataset files.
    pub data_dir: PathBuf,
    /// Target chunk size in characters.
    pub chunk_size: usize,
    /// Slack allowed on top of `chunk_size` before a chunk is closed.
    pub chunk_size_buffer: usize,
    pub llm: LlmSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// OpenAI-compatible API root, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Upper bound on in-flight per-article requests.
    pub concurrency: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            root_url: "https://www.notion.so/help".to_string(),
            data_dir: PathBuf::from("data"),
            chunk_size: 750,
            chunk_size_buffer: 30,
            llm: LlmSettings::default(),
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        LlmSettings {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 30,
            max_retries: 3,
            concurrency: 4,
        }
    }
}

impl Settings {
    /// Hard ceiling on chunk text length for the structural strategy.
    pub fn chunk_budget(&self) -> usize {
        self.chunk_size + self.chunk_size_buffer
    }
}

pub fn load() -> Result<Settings> {
    let cfg = config::Config::builder()
        .add_source(config::Environment::with_prefix("NOTION").separator("__"))
        .build()
        .context("Failed to read environment configuration")?;
    cfg.try_deserialize()
        .context("Invalid NOTION__* environment configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_pipeline() {
        let s = Settings::default();
        assert_eq!(s.chunk_size, 750);
        assert_eq!(s.chunk_size_buffer, 30);
        assert_eq!(s.chunk_budget(), 780);
        assert!(s.root_url.ends_with("/help"));
        assert_eq!(s.llm.max_retries, 3);
    }
}
