use async_trait::async_trait;
use scraper::{ElementRef, Html};

use super::{article, assemble, ChunkBuilder, Node, NodeKind};
use crate::config::Settings;
use crate::dataset::{Article, Chunk};
use crate::error::BuildError;

/// Subtrees that never contribute chunk text.
const SKIP_TAGS: &[&str] = &["aside", "nav", "script", "style", "noscript"];

/// Structural chunking: walk the article markup in document order and fold
/// headings, paragraphs and list blocks into size-bounded chunks.
pub struct HtmlChunker {
    chunk_size: usize,
    chunk_size_buffer: usize,
}

impl HtmlChunker {
    pub fn new(chunk_size: usize, chunk_size_buffer: usize) -> Self {
        HtmlChunker {
            chunk_size,
            chunk_size_buffer,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.chunk_size, settings.chunk_size_buffer)
    }

    fn budget(&self) -> usize {
        self.chunk_size + self.chunk_size_buffer
    }

    pub fn chunk(&self, article_html: &str) -> Vec<String> {
        self.chunk_nodes(&collect_nodes(article_html))
    }

    /// Fold nodes into chunk texts. A heading boundary or a full budget
    /// closes the current chunk, whichever comes first. A single node larger
    /// than the whole budget is emitted on its own rather than dropped or
    /// truncated.
    pub fn chunk_nodes(&self, nodes: &[Node]) -> Vec<String> {
        let mut chunks: Vec<String> = Vec::new();
        let mut current = String::new();
        let mut current_chars = 0usize;

        for node in nodes {
            let node_chars = node.text.chars().count();
            let crosses_heading = node.kind.is_heading() && !current.is_empty();
            let crosses_budget =
                !current.is_empty() && current_chars + 1 + node_chars > self.budget();

            if crosses_heading || crosses_budget {
                chunks.push(std::mem::take(&mut current));
                current_chars = 0;
            }
            if !current.is_empty() {
                current.push('\n');
                current_chars += 1;
            }
            current.push_str(&node.text);
            current_chars += node_chars;
        }

        if !current.is_empty() {
            chunks.push(current);
        }
        chunks
    }
}

#[async_trait]
impl ChunkBuilder for HtmlChunker {
    fn strategy(&self) -> &'static str {
        "html"
    }

    async fn build(&self, article: &Article) -> Result<Vec<Chunk>, BuildError> {
        let mut texts = Vec::new();
        for body in article::extract_article_bodies(&article.html)? {
            texts.extend(self.chunk(&body));
        }
        Ok(assemble(article, texts))
    }
}

/// Collect text-bearing structural nodes from an article fragment in
/// document order. A matched tag is taken whole (no further descent);
/// consecutive `<li>` items merge into one inseparable list block.
pub fn collect_nodes(fragment_html: &str) -> Vec<Node> {
    let fragment = Html::parse_fragment(fragment_html);
    let mut nodes = Vec::new();
    walk(fragment.root_element(), &mut nodes);
    merge_list_items(nodes)
}

fn walk(el: ElementRef, out: &mut Vec<Node>) {
    let name = el.value().name();
    if SKIP_TAGS.contains(&name) {
        return;
    }
    if let Some(kind) = classify(name) {
        let text = normalized_text(el);
        if !text.is_empty() {
            out.push(Node { kind, text });
        }
        return;
    }
    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            walk(child_el, out);
        }
    }
}

fn classify(tag: &str) -> Option<NodeKind> {
    match tag {
        "p" => Some(NodeKind::Paragraph),
        "li" => Some(NodeKind::ListBlock),
        _ => {
            let level = tag.strip_prefix('h')?.parse::<u8>().ok()?;
            (1..=6).contains(&level).then_some(NodeKind::Heading(level))
        }
    }
}

/// All descendant text with whitespace runs collapsed to single spaces.
fn normalized_text(el: ElementRef) -> String {
    el.text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn merge_list_items(nodes: Vec<Node>) -> Vec<Node> {
    let mut merged: Vec<Node> = Vec::new();
    for node in nodes {
        match merged.last_mut() {
            Some(prev) if prev.kind == NodeKind::ListBlock && node.kind == NodeKind::ListBlock => {
                prev.text.push('\n');
                prev.text.push_str(&node.text);
            }
            _ => merged.push(node),
        }
    }
    merged
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker() -> HtmlChunker {
        HtmlChunker::new(750, 30)
    }

    #[test]
    fn one_chunk_per_heading_section() {
        let html = "\
            <article>\
            <h2>Blocks</h2><p>Everything is a block.</p>\
            <h2>Pages</h2><p>Pages hold blocks.</p>\
            <h2>Databases</h2><p>Databases hold pages.</p>\
            </article>";
        let chunks = chunker().chunk(html);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], "Blocks\nEverything is a block.");
        assert_eq!(chunks[2], "Databases\nDatabases hold pages.");
    }

    #[test]
    fn oversized_single_paragraph_is_one_whole_chunk() {
        let long = "word ".repeat(400);
        let html = format!("<article><p>{long}</p></article>");
        let chunks = chunker().chunk(&html);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], long.trim());
        assert!(chunks[0].chars().count() > 780);
    }

    #[test]
    fn empty_body_yields_zero_chunks() {
        assert!(chunker().chunk("<article></article>").is_empty());
        assert!(chunker().chunk("<article><div>  </div></article>").is_empty());
    }

    #[test]
    fn budget_holds_except_for_oversized_nodes() {
        let para = "Short paragraphs that add up over the article body. ".repeat(3);
        let html = format!("<article>{}</article>", format!("<p>{para}</p>").repeat(20));
        let chunker = chunker();
        let chunks = chunker.chunk(&html);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= chunker.budget());
        }
    }

    #[test]
    fn consecutive_list_items_stay_together() {
        let html = "\
            <article>\
            <p>You can:</p>\
            <ul><li>Write</li><li>Plan</li><li>Organize</li></ul>\
            </article>";
        let nodes = collect_nodes(html);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1].kind, NodeKind::ListBlock);
        assert_eq!(nodes[1].text, "Write\nPlan\nOrganize");
    }

    #[test]
    fn matched_tags_are_taken_whole() {
        let html = "<article><p>A block is a <strong>unit</strong> of content.</p></article>";
        let nodes = collect_nodes(html);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].text, "A block is a unit of content.");
    }

    #[test]
    fn aside_subtrees_are_excluded() {
        let html = "\
            <article>\
            <aside><p>In this article</p></aside>\
            <h1>Intro</h1><p>Real content.</p>\
            </article>";
        let chunks = chunker().chunk(html);
        assert_eq!(chunks, vec!["Intro\nReal content.".to_string()]);
    }

    #[test]
    fn chunking_is_deterministic() {
        let html = std::fs::read_to_string("tests/fixtures/what-is-a-block.html").unwrap();
        let body = article::extract_article_bodies(&html).unwrap().remove(0);
        let first = chunker().chunk(&body);
        let second = chunker().chunk(&body);
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn fixture_chunks_respect_section_boundaries() {
        let html = std::fs::read_to_string("tests/fixtures/what-is-a-block.html").unwrap();
        let body = article::extract_article_bodies(&html).unwrap().remove(0);
        let chunks = chunker().chunk(&body);
        // Fixture has a title section plus two h2 sections
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].starts_with("What is a block?"));
        assert!(chunks[1].starts_with("Turn blocks into other blocks"));
        // ToC rail must not leak into chunk text
        assert!(chunks.iter().all(|c| !c.contains("In this article")));
    }
}
