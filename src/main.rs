mod config;
mod dataset;
mod error;
mod parser;
mod scraper;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use dataset::{Article, ArticleSet, ChunkSet};
use parser::html::HtmlChunker;
use parser::llm::LlmChunker;
use parser::ChunkBuilder;

#[derive(Parser)]
#[command(name = "notion_rag", about = "Notion help-center scraper and chunk builder")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl the help center and write the raw article dataset
    Scrape {
        /// Max pages to visit (default: the whole help tree)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Build retrieval chunks from the raw article dataset
    Chunk {
        /// Chunking strategy
        #[arg(short, long, value_enum, default_value_t = Strategy::Html)]
        strategy: Strategy,
        /// Max articles to chunk (default: all)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Restrict the run to these article URLs or ids (repeatable)
        #[arg(long = "url")]
        urls: Vec<String>,
    },
    /// Scrape + chunk (structural strategy) in one pipeline
    Run {
        /// Max pages to scrape
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Show dataset statistics
    Stats,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Strategy {
    Html,
    Llm,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = config::load()?;

    let result = match cli.command {
        Commands::Scrape { limit } => {
            let set = scraper::crawl(&settings, limit).await?;
            let stats = scraper::ScrapeStats::of(&set.metadata);
            let path = set.write(&settings.data_dir)?;
            print_scrape_result(&stats, &set, &path);
            Ok(())
        }
        Commands::Chunk {
            strategy,
            limit,
            urls,
        } => chunk_command(&settings, strategy, limit, &urls).await,
        Commands::Run { limit } => {
            // Phase 1: Scrape
            let t_scrape = Instant::now();
            let set = scraper::crawl(&settings, limit).await?;
            let stats = scraper::ScrapeStats::of(&set.metadata);
            let path = set.write(&settings.data_dir)?;
            print_scrape_result(&stats, &set, &path);
            println!("Scrape phase took {:.1}s", t_scrape.elapsed().as_secs_f64());

            // Phase 2: Chunk with the structural strategy
            chunk_command(&settings, Strategy::Html, None, &[]).await
        }
        Commands::Stats => stats_command(&settings),
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn print_scrape_result(stats: &scraper::ScrapeStats, set: &ArticleSet, path: &std::path::Path) {
    println!(
        "Scraped {} pages ({} ok, {} failed, {} links skipped) -> {}",
        stats.visited,
        stats.ok,
        stats.errors,
        stats.skipped,
        path.display()
    );
    for failure in &set.metadata.failed {
        println!("  failed {}: {}", failure.url, failure.reason);
    }
}

async fn chunk_command(
    settings: &config::Settings,
    strategy: Strategy,
    limit: Option<usize>,
    urls: &[String],
) -> Result<()> {
    let raw = ArticleSet::read(&settings.data_dir)
        .context("No raw article dataset. Run 'scrape' first.")?;

    // BTreeMap keys give a stable id order regardless of crawl order
    let mut articles: Vec<Article> = raw.articles.into_values().collect();
    if !urls.is_empty() {
        let wanted: HashSet<&str> = urls.iter().map(String::as_str).collect();
        articles.retain(|a| wanted.contains(a.url.as_str()) || wanted.contains(a.id.as_str()));
    }
    if let Some(limit) = limit {
        articles.truncate(limit);
    }
    if articles.is_empty() {
        println!("No articles to chunk.");
        return Ok(());
    }

    let (builder, concurrency): (Arc<dyn ChunkBuilder>, usize) = match strategy {
        Strategy::Html => (Arc::new(HtmlChunker::from_settings(settings)), 1),
        Strategy::Llm => (
            Arc::new(LlmChunker::new(settings)?),
            settings.llm.concurrency,
        ),
    };

    println!(
        "Building chunks for {} articles ({} strategy)...",
        articles.len(),
        builder.strategy()
    );
    let set = parser::build_chunk_set(builder, articles, concurrency).await?;
    let path = set.write(&settings.data_dir)?;

    println!(
        "Done: {} articles chunked, {} skipped, {} chunks -> {}",
        set.metadata.success_count,
        set.metadata.skipped_count,
        set.metadata.chunk_count,
        path.display()
    );
    for skip in &set.metadata.skipped {
        println!("  skipped {}: {}", skip.id, skip.reason);
    }
    Ok(())
}

fn stats_command(settings: &config::Settings) -> Result<()> {
    match ArticleSet::read(&settings.data_dir) {
        Ok(raw) => {
            println!("Raw articles:   {}", raw.articles.len());
            println!("Crawl failures: {}", raw.metadata.failed_count);
        }
        Err(_) => println!("Raw articles:   none (run 'scrape' first)"),
    }

    for strategy in ["html", "llm"] {
        match ChunkSet::read(&settings.data_dir, strategy) {
            Ok(set) => println!(
                "Chunks ({:4}):  {} across {} articles, {} skipped",
                strategy,
                set.metadata.chunk_count,
                set.metadata.success_count,
                set.metadata.skipped_count
            ),
            Err(_) => println!("Chunks ({strategy:4}):  none"),
        }
    }
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
