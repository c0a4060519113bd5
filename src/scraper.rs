use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{info, warn};

use crate::config::Settings;
use crate::dataset::{article_id_from_url, checksum, Article, ArticleSet, FailedPage, ScrapeSummary};

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 1000;
const FETCH_TIMEOUT_SECS: u64 = 10;
const USER_AGENT: &str = concat!("notion_rag/", env!("CARGO_PKG_VERSION"));

static HELP_PATH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^/help(/|$)").unwrap());

/// Crawl stats returned after completion.
pub struct ScrapeStats {
    pub visited: usize,
    pub ok: usize,
    pub errors: usize,
    pub skipped: usize,
}

impl ScrapeStats {
    pub fn of(summary: &ScrapeSummary) -> Self {
        ScrapeStats {
            visited: summary.visited_count,
            ok: summary.success_count,
            errors: summary.failed_count,
            skipped: summary.skipped_count,
        }
    }
}

/// Breadth-first crawl of the help-center tree from the configured root.
///
/// Pages are deduplicated by canonical URL. A page that still fails after
/// the retry budget is recorded and the crawl moves on; only an unreachable
/// index page aborts the run.
pub async fn crawl(settings: &Settings, limit: Option<usize>) -> Result<ArticleSet> {
    let started_at = Utc::now();
    let t0 = Instant::now();

    let root = reqwest::Url::parse(&settings.root_url)
        .with_context(|| format!("Invalid root URL: {}", settings.root_url))?;
    let root_host = host_of(&root)
        .with_context(|| format!("Root URL has no host: {}", settings.root_url))?;
    let root_url = canonical_url(&root, root.as_str())
        .context("Failed to canonicalize the root URL")?;
    if !is_help_url(&root_url, &root_host) {
        bail!("Root URL is not a help-center URL: {}", settings.root_url);
    }

    let client = Client::builder()
        .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
        .user_agent(USER_AGENT)
        .build()?;

    let mut queue: VecDeque<String> = VecDeque::new();
    let mut queued: HashSet<String> = HashSet::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut skipped: HashSet<String> = HashSet::new();
    let mut failed: Vec<FailedPage> = Vec::new();
    let mut articles: BTreeMap<String, Article> = BTreeMap::new();

    queued.insert(root_url.clone());
    queue.push_back(root_url.clone());

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner().template("{spinner} {pos} pages visited, {msg} queued")?,
    );

    while let Some(url) = queue.pop_front() {
        if limit.is_some_and(|n| visited.len() >= n) {
            break;
        }
        visited.insert(url.clone());
        info!("Visiting {}", url);

        let (status, body) = match fetch_with_retry(&client, &url).await {
            Ok(page) => page,
            Err(e) if url == root_url => {
                bail!("Index page unreachable: {}: {}", url, e)
            }
            Err(e) => {
                warn!("Giving up on {}: {}", url, e);
                failed.push(FailedPage {
                    url,
                    reason: e.to_string(),
                });
                pb.inc(1);
                continue;
            }
        };

        for href in extract_hrefs(&body) {
            match canonical_url(&root, &href) {
                Some(link) => {
                    if visited.contains(&link) || queued.contains(&link) || skipped.contains(&link)
                    {
                        continue;
                    }
                    if is_help_url(&link, &root_host) {
                        queued.insert(link.clone());
                        queue.push_back(link);
                    } else {
                        skipped.insert(link);
                    }
                }
                None => {
                    skipped.insert(href);
                }
            }
        }

        let id = article_id_from_url(&url);
        articles.insert(
            id.clone(),
            Article {
                id,
                title: extract_title(&body),
                checksum: checksum(&body),
                status,
                html: body,
                fetched_at: Utc::now(),
                url,
            },
        );

        pb.set_message(queue.len().to_string());
        pb.inc(1);
    }
    pb.finish_and_clear();

    let finished_at = Utc::now();
    let mut skipped_urls: Vec<String> = skipped.into_iter().collect();
    skipped_urls.sort();

    let summary = ScrapeSummary {
        root_url,
        visited_count: visited.len(),
        success_count: articles.len(),
        failed_count: failed.len(),
        skipped_count: skipped_urls.len(),
        failed,
        skipped_urls,
        started_at,
        finished_at,
        elapsed_secs: t0.elapsed().as_secs_f64(),
    };
    info!(
        "Crawl finished: {} visited, {} ok, {} failed",
        summary.visited_count, summary.success_count, summary.failed_count
    );

    Ok(ArticleSet {
        metadata: summary,
        articles,
    })
}

async fn fetch_with_retry(client: &Client, url: &str) -> Result<(u16, String)> {
    let mut attempt = 1;
    loop {
        match fetch_once(client, url).await {
            Ok(page) => return Ok(page),
            Err(e) if attempt < MAX_RETRIES => {
                let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt - 1));
                warn!(
                    "Fetch failed for {} (attempt {}/{}): {}. Backing off {:.1}s",
                    url,
                    attempt,
                    MAX_RETRIES,
                    e,
                    backoff.as_secs_f64()
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn fetch_once(client: &Client, url: &str) -> Result<(u16, String)> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        bail!("HTTP {}", status);
    }
    Ok((status.as_u16(), response.text().await?))
}

/// Reduce a link target to `https://host/path`, dropping query and fragment.
/// Relative targets resolve against `base`. A leading `www.` is folded away
/// so both spellings of a page dedupe to one entry.
pub fn canonical_url(base: &reqwest::Url, href: &str) -> Option<String> {
    let joined = base.join(href.trim()).ok()?;
    if !matches!(joined.scheme(), "http" | "https") {
        return None;
    }
    let host = host_of(&joined)?;
    let path = joined.path().trim_end_matches('/');
    let path = if path.is_empty() { "/" } else { path };
    Some(format!("https://{host}{path}"))
}

/// A canonical URL names a help article iff it stays on the root host, its
/// path sits under /help, and it is not a notion-academy page.
pub fn is_help_url(url: &str, root_host: &str) -> bool {
    let Ok(parsed) = reqwest::Url::parse(url) else {
        return false;
    };
    let Some(host) = host_of(&parsed) else {
        return false;
    };
    let path = parsed.path();
    host == root_host && HELP_PATH_RE.is_match(path) && !path.contains("notion-academy")
}

fn host_of(url: &reqwest::Url) -> Option<String> {
    let host = url.host_str()?;
    Some(host.strip_prefix("www.").unwrap_or(host).to_string())
}

fn extract_hrefs(html: &str) -> Vec<String> {
    let doc = Html::parse_document(html);
    let anchors = Selector::parse("a[href]").unwrap();
    doc.select(&anchors)
        .filter_map(|a| a.value().attr("href"))
        .map(str::to_string)
        .collect()
}

fn extract_title(html: &str) -> String {
    let doc = Html::parse_document(html);
    for selector in ["title", "h1"] {
        let sel = Selector::parse(selector).unwrap();
        if let Some(el) = doc.select(&sel).next() {
            let text = el.text().collect::<String>().trim().to_string();
            if !text.is_empty() {
                return text;
            }
        }
    }
    String::new()
}

// ── Tests ──
