use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One scraped help-center page. Immutable once written; keyed by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    /// Canonical URL (scheme + host + path, no query or fragment).
    pub url: String,
    pub title: String,
    pub html: String,
    /// SHA-256 hex of the fetched body.
    pub checksum: String,
    pub status: u16,
    pub fetched_at: DateTime<Utc>,
}

/// A contiguous segment of one article, sized for retrieval.
///
/// `article_id` is a lookup reference only; the chunk store can always be
/// regenerated from the raw article store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub article_id: String,
    /// 0-based, contiguous within the article.
    pub sequence_index: usize,
    pub text: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub url: String,
    pub char_count: usize,
}

impl Chunk {
    pub fn new(article_id: &str, url: &str, sequence_index: usize, text: String) -> Self {
        let char_count = text.chars().count();
        Chunk {
            id: format!("{article_id}#{sequence_index}"),
            article_id: article_id.to_string(),
            sequence_index,
            text,
            metadata: ChunkMetadata {
                url: url.to_string(),
                char_count,
            },
        }
    }
}

/// Crawl accounting persisted alongside the raw dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeSummary {
    pub root_url: String,
    pub visited_count: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub failed: Vec<FailedPage>,
    pub skipped_urls: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedPage {
    pub url: String,
    pub reason: String,
}

/// Chunk-build accounting persisted alongside each processed dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRunSummary {
    pub strategy: String,
    pub total_count: usize,
    pub success_count: usize,
    pub skipped_count: usize,
    pub chunk_count: usize,
    pub skipped: Vec<SkippedArticle>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedArticle {
    pub id: String,
    pub reason: String,
}

/// The raw dataset file: every successfully scraped article, keyed by id.
#[derive(Debug, Serialize, Deserialize)]
pub struct ArticleSet {
    pub metadata: ScrapeSummary,
    pub articles: BTreeMap<String, Article>,
}

/// A processed dataset file: ordered chunks per article id, one file per
/// strategy.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChunkSet {
    pub metadata: ChunkRunSummary,
    pub chunks: BTreeMap<String, Vec<Chunk>>,
}

impl ArticleSet {
    pub fn path(data_dir: &Path) -> PathBuf {
        data_dir.join("raw").join("articles.json")
    }

    pub fn write(&self, data_dir: &Path) -> Result<PathBuf> {
        let path = Self::path(data_dir);
        write_json(&path, self)?;
        write_json(&path.with_file_name("metadata.json"), &self.metadata)?;
        Ok(path)
    }

    pub fn read(data_dir: &Path) -> Result<Self> {
        read_json(&Self::path(data_dir))
    }
}

impl ChunkSet {
    pub fn path(data_dir: &Path, strategy: &str) -> PathBuf {
        data_dir.join("processed").join(strategy).join("chunks.json")
    }

    pub fn write(&self, data_dir: &Path) -> Result<PathBuf> {
        let path = Self::path(data_dir, &self.metadata.strategy);
        write_json(&path, self)?;
        write_json(&path.with_file_name("metadata.json"), &self.metadata)?;
        Ok(path)
    }

    pub fn read(data_dir: &Path, strategy: &str) -> Result<Self> {
        read_json(&Self::path(data_dir, strategy))
    }
}

/// Serialize to a temp file, then rename over the target: a dataset file is
/// always a complete collection, never a half-written one.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("No parent directory for {}", path.display()))?;
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(value)?)
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Stable article id: the canonical URL path below `/help`, with `/`
/// flattened to `-`. The help index itself gets the id `help`.
pub fn article_id_from_url(url: &str) -> String {
    let path = url.splitn(4, '/').nth(3).unwrap_or("");
    let slug = path
        .strip_prefix("help")
        .map(|rest| rest.trim_matches('/'))
        .unwrap_or_else(|| path.trim_matches('/'));
    if slug.is_empty() {
        "help".to_string()
    } else {
        slug.replace('/', "-")
    }
}

pub fn checksum(body: &str) -> String {
    format!("{:x}", Sha256::digest(body.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn article_ids_come_from_the_help_path() {
        assert_eq!(
            article_id_from_url("https://www.notion.so/help/what-is-a-block"),
            "what-is-a-block"
        );
        assert_eq!(article_id_from_url("https://www.notion.so/help"), "help");
        // Nested sections keep their full path, so ids never collide
        assert_eq!(
            article_id_from_url("https://www.notion.so/help/guides/teamspaces/"),
            "guides-teamspaces"
        );
    }

    #[test]
    fn chunk_ids_embed_article_and_index() {
        let c = Chunk::new("what-is-a-block", "https://notion.so/help/what-is-a-block", 2, "Blocks are units.".into());
        assert_eq!(c.id, "what-is-a-block#2");
        assert_eq!(c.article_id, "what-is-a-block");
        assert_eq!(c.sequence_index, 2);
        assert_eq!(c.metadata.char_count, c.text.chars().count());
    }
}
