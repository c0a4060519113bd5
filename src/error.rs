use thiserror::Error;

/// Failure modes of the chunk-build path.
///
/// `Setup` aborts a run before any work begins. Everything else is scoped to
/// a single article: the batch records the article as skipped and continues.
/// Transient variants go through the bounded retry loop first.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("setup: {0}")]
    Setup(String),

    #[error("no <main>/<article> body in page markup")]
    NoArticleBody,

    #[error("malformed model reply: {0}")]
    MalformedReply(String),

    #[error("transient upstream error: {0}")]
    Transient(String),

    #[error("upstream returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl BuildError {
    /// Whether the retry loop should take another attempt at this failure.
    pub fn is_transient(&self) -> bool {
        match self {
            BuildError::Transient(_) => true,
            BuildError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}
