pub mod article;
pub mod html;
pub mod llm;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{mpsc, Semaphore};
use tracing::warn;

use crate::dataset::{Article, Chunk, ChunkRunSummary, ChunkSet, SkippedArticle};
use crate::error::BuildError;

/// One text-bearing structural node from an article body.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Heading(u8),
    Paragraph,
    /// One or more consecutive `<li>` items, kept inseparable.
    ListBlock,
}

impl NodeKind {
    pub fn is_heading(&self) -> bool {
        matches!(self, NodeKind::Heading(_))
    }
}

/// A chunking strategy. Both strategies take a full scraped page and return
/// the ordered chunk texts for it, so they can be swapped without touching
/// anything downstream.
#[async_trait]
pub trait ChunkBuilder: Send + Sync {
    fn strategy(&self) -> &'static str;

    async fn build(&self, article: &Article) -> Result<Vec<Chunk>, BuildError>;
}

/// Attach ids and contiguous sequence indexes to raw chunk texts.
pub(crate) fn assemble(article: &Article, texts: Vec<String>) -> Vec<Chunk> {
    texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| Chunk::new(&article.id, &article.url, i, text))
        .collect()
}

/// Run a builder over the article set, bounded by `concurrency` in-flight
/// articles. Chunk ordering is computed per article, so completion order
/// across articles never changes the output. Per-article failures are
/// recorded and excluded; they never abort the batch.
pub async fn build_chunk_set(
    builder: Arc<dyn ChunkBuilder>,
    articles: Vec<Article>,
    concurrency: usize,
) -> Result<ChunkSet> {
    let started_at = Utc::now();
    let t0 = Instant::now();
    let total = articles.len();
    let strategy = builder.strategy().to_string();

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let concurrency = concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));

    // Channel: workers send per-article results, the main loop accounts them.
    let (tx, mut rx) = mpsc::channel::<(String, Result<Vec<Chunk>, BuildError>)>(concurrency * 2);

    for article in articles {
        let builder = Arc::clone(&builder);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();

        tokio::spawn(async move {
            let _permit = sem.acquire().await.expect("semaphore closed");
            let result = builder.build(&article).await;
            let _ = tx.send((article.id, result)).await;
        });
    }

    // Drop our copy of tx so rx closes when all spawned tasks finish
    drop(tx);

    let mut chunks: BTreeMap<String, Vec<Chunk>> = BTreeMap::new();
    let mut skipped: Vec<SkippedArticle> = Vec::new();

    while let Some((id, result)) = rx.recv().await {
        match result {
            Ok(list) => {
                chunks.insert(id, list);
            }
            Err(e) => {
                warn!("Skipping article {}: {}", id, e);
                skipped.push(SkippedArticle {
                    id,
                    reason: e.to_string(),
                });
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    skipped.sort_by(|a, b| a.id.cmp(&b.id));
    let chunk_count = chunks.values().map(Vec::len).sum();

    let metadata = ChunkRunSummary {
        strategy,
        total_count: total,
        success_count: chunks.len(),
        skipped_count: skipped.len(),
        chunk_count,
        skipped,
        started_at,
        finished_at: Utc::now(),
        elapsed_secs: t0.elapsed().as_secs_f64(),
    };

    Ok(ChunkSet { metadata, chunks })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    pub(crate) fn article(id: &str, html: &str) -> Article {
        Article {
            id: id.to_string(),
            url: format!("https://notion.so/help/{id}"),
            title: id.to_string(),
            html: html.to_string(),
            checksum: crate::dataset::checksum(html),
            status: 200,
            fetched_at: Utc::now(),
        }
    }

    /// Fails every article whose id starts with "bad", as a builder whose
    /// retries were exhausted would.
    struct FlakyBuilder;

    #[async_trait]
    impl ChunkBuilder for FlakyBuilder {
        fn strategy(&self) -> &'static str {
            "flaky"
        }

        async fn build(&self, article: &Article) -> Result<Vec<Chunk>, BuildError> {
            if article.id.starts_with("bad") {
                return Err(BuildError::Transient("HTTP 429".into()));
            }
            Ok(assemble(article, vec![article.title.clone()]))
        }
    }

    #[tokio::test]
    async fn failed_articles_are_recorded_not_fatal() {
        let articles = vec![
            article("alpha", "<p>a</p>"),
            article("bad-timeout", "<p>b</p>"),
            article("gamma", "<p>c</p>"),
        ];
        let set = build_chunk_set(Arc::new(FlakyBuilder), articles, 2)
            .await
            .unwrap();

        assert_eq!(set.metadata.total_count, 3);
        assert_eq!(set.metadata.success_count, 2);
        assert_eq!(set.metadata.skipped_count, 1);
        assert_eq!(set.metadata.skipped[0].id, "bad-timeout");
        assert!(set.metadata.skipped[0].reason.contains("429"));
        assert!(set.chunks.contains_key("alpha"));
        assert!(set.chunks.contains_key("gamma"));
        assert!(!set.chunks.contains_key("bad-timeout"));
    }

    #[tokio::test]
    async fn assembled_chunks_have_contiguous_indexes() {
        let a = article("alpha", "");
        let chunks = assemble(&a, vec!["one".into(), "two".into(), "three".into()]);
        let indexes: Vec<usize> = chunks.iter().map(|c| c.sequence_index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
        assert_eq!(chunks[1].id, "alpha#1");
        assert!(chunks.iter().all(|c| c.article_id == "alpha"));
    }
}
