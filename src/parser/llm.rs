use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::warn;

use super::{article, assemble, html, ChunkBuilder, Node, NodeKind};
use crate::config::{LlmSettings, Settings};
use crate::dataset::{Article, Chunk};
use crate::error::BuildError;

const API_KEY_VAR: &str = "OPENAI_API_KEY";

const PROMPT_TEMPLATE: &str = "\
Parse the given HTML content, extract the text content, and return a list of chunks.
Follow these rules:
- Group related text from the same area of the page into the same chunk.
- Ignore any non-text content such as images, videos, and other media.
- Remove any remaining HTML tags and attributes.
- Keep the text properly formatted, without extra spaces or newlines.
- Each chunk must stay under {chunk_size_limit} characters.
- Exception: list items belong together in a single chunk and may exceed the limit.
- Reply in JSON with a single key `results` whose value is a list of strings.";

/// LLM-assisted chunking against an OpenAI-compatible chat-completions
/// endpoint. Trades reproducibility for semantically grouped chunks; the
/// reply is held to a strict schema and rejected otherwise.
pub struct LlmChunker {
    client: Client,
    api_key: String,
    llm: LlmSettings,
    prompt: String,
}

impl LlmChunker {
    /// Reads the credential up front; a missing key fails here, before any
    /// network traffic.
    pub fn new(settings: &Settings) -> Result<Self, BuildError> {
        let api_key = std::env::var(API_KEY_VAR).map_err(|_| {
            BuildError::Setup(format!("{API_KEY_VAR} environment variable must be set"))
        })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.llm.timeout_secs))
            .build()
            .map_err(|e| BuildError::Setup(format!("Failed to build HTTP client: {e}")))?;

        Ok(LlmChunker {
            client,
            api_key,
            llm: settings.llm.clone(),
            prompt: render_prompt(settings.chunk_budget()),
        })
    }

    async fn segment_with_retry(&self, text: &str) -> Result<Vec<String>, BuildError> {
        let mut attempt = 0;
        loop {
            match self.segment(text).await {
                Err(e) if e.is_transient() && attempt < self.llm.max_retries => {
                    attempt += 1;
                    let backoff = Duration::from_secs(2u64.pow(attempt - 1));
                    warn!(
                        "Segmentation request failed (attempt {}/{}): {}. Backing off {:.0}s",
                        attempt,
                        self.llm.max_retries,
                        e,
                        backoff.as_secs_f64()
                    );
                    sleep(backoff).await;
                }
                other => return other,
            }
        }
    }

    async fn segment(&self, text: &str) -> Result<Vec<String>, BuildError> {
        let request = ChatRequest {
            model: &self.llm.model,
            response_format: ResponseFormat {
                kind: "json_object",
            },
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.prompt,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.llm.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(BuildError::Transient(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BuildError::Upstream {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let reply: ChatResponse = response.json().await?;
        let content = reply
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| BuildError::MalformedReply("no choices in reply".into()))?;

        parse_segments(content)
    }
}

#[async_trait]
impl ChunkBuilder for LlmChunker {
    fn strategy(&self) -> &'static str {
        "llm"
    }

    async fn build(&self, article: &Article) -> Result<Vec<Chunk>, BuildError> {
        let mut texts = Vec::new();
        for body in article::extract_article_bodies(&article.html)? {
            // Pre-clean: send only the text-bearing structure, not the raw
            // page markup with its rails and attributes.
            let nodes = html::collect_nodes(&body);
            if nodes.is_empty() {
                continue;
            }
            texts.extend(self.segment_with_retry(&render_nodes(&nodes)).await?);
        }
        Ok(assemble(article, texts))
    }
}

fn render_prompt(chunk_size_limit: usize) -> String {
    PROMPT_TEMPLATE.replace("{chunk_size_limit}", &chunk_size_limit.to_string())
}

/// Minimal markup for the model: enough structure to segment on, nothing
/// else.
fn render_nodes(nodes: &[Node]) -> String {
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        match node.kind {
            NodeKind::Heading(level) => out.push(format!("<h{level}>{}</h{level}>", node.text)),
            NodeKind::Paragraph => out.push(format!("<p>{}</p>", node.text)),
            NodeKind::ListBlock => {
                for item in node.text.lines() {
                    out.push(format!("<li>{item}</li>"));
                }
            }
        }
    }
    out.join("\n")
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    response_format: ResponseFormat,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReplyMessage,
}

#[derive(Deserialize)]
struct ChatReplyMessage {
    content: String,
}

/// Strict schema for the reply content. Anything that does not deserialize
/// to a non-empty list of non-empty strings is rejected.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SegmentPayload {
    results: Vec<String>,
}

fn parse_segments(content: &str) -> Result<Vec<String>, BuildError> {
    let payload: SegmentPayload =
        serde_json::from_str(content).map_err(|e| BuildError::MalformedReply(e.to_string()))?;

    let results: Vec<String> = payload
        .results
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if results.is_empty() {
        return Err(BuildError::MalformedReply(
            "reply contained no usable segments".into(),
        ));
    }
    Ok(results)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_payload_parses() {
        let segments =
            parse_segments(r#"{"results": ["First chunk.", "  Second chunk.  "]}"#).unwrap();
        assert_eq!(segments, vec!["First chunk.", "Second chunk."]);
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert!(matches!(
            parse_segments("Sure! Here are your chunks:"),
            Err(BuildError::MalformedReply(_))
        ));
        assert!(matches!(
            parse_segments(r#"{"chunks": ["wrong key"]}"#),
            Err(BuildError::MalformedReply(_))
        ));
        assert!(matches!(
            parse_segments(r#"{"results": ["ok"], "extra": 1}"#),
            Err(BuildError::MalformedReply(_))
        ));
    }

    #[test]
    fn empty_or_blank_results_are_rejected() {
        assert!(matches!(
            parse_segments(r#"{"results": []}"#),
            Err(BuildError::MalformedReply(_))
        ));
        assert!(matches!(
            parse_segments(r#"{"results": ["", "   "]}"#),
            Err(BuildError::MalformedReply(_))
        ));
    }

    #[test]
    fn prompt_carries_the_configured_limit() {
        let prompt = render_prompt(780);
        assert!(prompt.contains("under 780 characters"));
        assert!(prompt.contains("`results`"));
    }

    #[test]
    fn nodes_render_as_minimal_markup() {
        let nodes = vec![
            Node {
                kind: NodeKind::Heading(2),
                text: "Blocks".into(),
            },
            Node {
                kind: NodeKind::Paragraph,
                text: "Everything is a block.".into(),
            },
            Node {
                kind: NodeKind::ListBlock,
                text: "Write\nPlan".into(),
            },
        ];
        assert_eq!(
            render_nodes(&nodes),
            "<h2>Blocks</h2>\n<p>Everything is a block.</p>\n<li>Write</li>\n<li>Plan</li>"
        );
    }
}
