use thiserror::Error;

pub type Result<T> = std::result::Result<T, ScrapeError>;

/// Failures of the fetch → parse → extract pipeline.
///
/// Every variant maps to an issue key so the host side can show a
/// configuration error or a repair issue for it.
#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("HTTP error fetching {url}: {message}")]
    Http { url: String, message: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to parse pdf: {0}")]
    PdfParse(String),

    #[error("Invalid page range: {0}")]
    InvalidPageRange(String),

    #[error("Page {page} not found in pdf (document has {count} pages)")]
    PageOutOfRange { page: usize, count: usize },

    #[error("{message}: {pattern}")]
    Pattern { pattern: String, message: String },

    #[error("No matches found using regex: {0}")]
    NoMatches(String),

    #[error("Match index {index} out of range ({count} matches)")]
    MatchIndexOutOfRange { index: i64, count: usize },

    #[error("Error rendering template: {0}")]
    Template(String),

    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Scan interval {0}s is below the minimum of {min}s", min = crate::coordinator::MIN_SCAN_INTERVAL_SECS)]
    IntervalTooShort(u64),

    #[error("Document already configured: {0}")]
    AlreadyConfigured(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ScrapeError {
    /// Stable key used for the `issues` table and the CLI output.
    pub fn issue_key(&self) -> &'static str {
        match self {
            ScrapeError::Http { .. } => "http_error",
            ScrapeError::Io { .. } => "io_error",
            ScrapeError::PdfParse(_) => "pdf_parse",
            ScrapeError::InvalidPageRange(_) => "invalid_page_range",
            ScrapeError::PageOutOfRange { .. } => "page_out_of_range",
            ScrapeError::Pattern { .. } => "bad_pattern",
            ScrapeError::NoMatches(_) => "no_matches",
            ScrapeError::MatchIndexOutOfRange { .. } => "match_index",
            ScrapeError::Template(_) => "template_error",
            ScrapeError::InvalidSource(_) => "invalid_source",
            ScrapeError::IntervalTooShort(_) => "min_interval",
            ScrapeError::AlreadyConfigured(_) => "already_configured",
            ScrapeError::InvalidConfig(_) => "invalid_config",
        }
    }

    /// Whether re-pointing the document at a new source is the likely fix.
    pub fn needs_reconfigure(&self) -> bool {
        matches!(
            self,
            ScrapeError::Http { .. } | ScrapeError::Io { .. } | ScrapeError::InvalidSource(_)
        )
    }

    pub(crate) fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        ScrapeError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<reqwest::Error> for ScrapeError {
    fn from(err: reqwest::Error) -> Self {
        let url = err.url().map(|u| u.to_string()).unwrap_or_default();
        ScrapeError::Http {
            url,
            message: err.to_string(),
        }
    }
}

impl From<minijinja::Error> for ScrapeError {
    fn from(err: minijinja::Error) -> Self {
        ScrapeError::Template(err.to_string())
    }
}
