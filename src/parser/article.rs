use scraper::{Html, Selector};

use crate::error::BuildError;

/// Pull the article bodies out of a scraped help page.
///
/// Help pages carry exactly one `<main>` region whose `<article>` children
/// hold the content; everything else on the page (navigation, footer,
/// table-of-contents rails) is noise. A page without that shape is not a
/// help article and is reported as such so the batch can skip it.
pub fn extract_article_bodies(page_html: &str) -> Result<Vec<String>, BuildError> {
    let doc = Html::parse_document(page_html);
    let main_sel = Selector::parse("main").unwrap();
    let article_sel = Selector::parse("article").unwrap();

    let main = doc
        .select(&main_sel)
        .next()
        .ok_or(BuildError::NoArticleBody)?;

    let bodies: Vec<String> = main.select(&article_sel).map(|el| el.html()).collect();
    if bodies.is_empty() {
        return Err(BuildError::NoArticleBody);
    }
    Ok(bodies)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_article_inside_main() {
        let html = std::fs::read_to_string("tests/fixtures/what-is-a-block.html").unwrap();
        let bodies = extract_article_bodies(&html).unwrap();
        assert_eq!(bodies.len(), 1);
        assert!(bodies[0].contains("<h1>"));
        assert!(!bodies[0].contains("<nav"));
    }

    #[test]
    fn page_without_main_is_rejected() {
        let err = extract_article_bodies("<html><body><p>landing page</p></body></html>")
            .unwrap_err();
        assert!(matches!(err, BuildError::NoArticleBody));
    }

    #[test]
    fn main_without_article_is_rejected() {
        let err = extract_article_bodies("<html><body><main><p>index</p></main></body></html>")
            .unwrap_err();
        assert!(matches!(err, BuildError::NoArticleBody));
    }
}
