//! Error types for cooking and building.
//!
//! Each stage of the cook pipeline has its own error enum. `CookError`
//! wraps them with the URL being cooked, the plugin that failed and a
//! source position, which is what the dev server and the build report.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use owo_colors::OwoColorize;
use thiserror::Error;
use url::Url;

// ============================================================================
// Trace
// ============================================================================

/// Source position attached to references and errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trace {
    pub url: Option<Url>,
    /// 1-based line
    pub line: usize,
    /// 0-based column
    pub column: usize,
    /// Text of the offending line
    pub snippet: Option<String>,
}

impl Trace {
    /// Position of byte `offset` inside `text`, which is the content of `url`.
    pub fn at(url: &Url, text: &str, offset: usize) -> Self {
        let (line, column) = line_column(text, offset);
        let line_start = text.as_bytes()[..offset.min(text.len())]
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |p| p + 1);
        let snippet = text[line_start..].lines().next().map(str::to_owned);
        Self {
            url: Some(url.clone()),
            line,
            column,
            snippet,
        }
    }

    pub fn url(url: &Url) -> Self {
        Self {
            url: Some(url.clone()),
            ..Self::default()
        }
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.url {
            Some(url) if self.line > 0 => write!(f, "{url}:{}:{}", self.line, self.column)?,
            Some(url) => write!(f, "{url}")?,
            None => write!(f, "<unknown>")?,
        }
        if let Some(snippet) = &self.snippet {
            write!(f, "\n  | {snippet}")?;
            if self.line > 0 {
                write!(f, "\n  | {}^", " ".repeat(self.column))?;
            }
        }
        Ok(())
    }
}

/// 1-based line and 0-based column of a byte offset.
pub fn line_column(text: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(text.len());
    let before = &text.as_bytes()[..offset];
    let line = before.iter().filter(|&&b| b == b'\n').count() + 1;
    let column = before.iter().rev().take_while(|&&b| b != b'\n').count();
    (line, column)
}

// ============================================================================
// Stage errors
// ============================================================================

/// Failure of a fetch hook.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no such resource: {0}")]
    NotFound(Url),

    #[error("permission denied: {0}")]
    PermissionDenied(Url),

    #[error("resource busy: {0}")]
    Busy(Url),

    #[error("IO error when reading `{0}`")]
    Io(Url, #[source] io::Error),

    #[error("no plugin could fetch {0}")]
    Unhandled(Url),

    #[error("{0}")]
    Other(String),
}

impl FetchError {
    /// Classify an IO error the way the dev server wants to report it.
    pub fn from_io(url: &Url, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::NotADirectory => Self::NotFound(url.clone()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(url.clone()),
            io::ErrorKind::ResourceBusy | io::ErrorKind::WouldBlock => Self::Busy(url.clone()),
            _ => Self::Io(url.clone(), err),
        }
    }

    /// Only a busy resource is worth asking for again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy(_))
    }
}

/// Failure of a transform or finalize hook.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransformError {
    /// Content could not be parsed. Offset is a byte offset into the input.
    #[error("{message}")]
    Parse { message: String, offset: usize },

    #[error("{0}")]
    Other(String),
}

impl TransformError {
    pub fn parse(message: impl Into<String>, offset: usize) -> Self {
        Self::Parse {
            message: message.into(),
            offset,
        }
    }
}

// ============================================================================
// CookError
// ============================================================================

/// What went wrong while cooking a URL.
#[derive(Debug, Error)]
pub enum CookErrorKind {
    #[error("cannot resolve `{0}`")]
    Resolve(String),

    #[error(transparent)]
    Fetch(FetchError),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("transform failed: {0}")]
    Transform(String),

    #[error("finalize failed: {0}")]
    Finalize(String),

    #[error("cancelled")]
    Cancelled,
}

/// A cook failure with the context needed to report it.
#[derive(Debug)]
pub struct CookError {
    pub kind: CookErrorKind,
    pub url: Option<Url>,
    pub plugin: Option<String>,
    pub trace: Option<Trace>,
}

impl CookError {
    pub fn new(kind: CookErrorKind) -> Self {
        Self {
            kind,
            url: None,
            plugin: None,
            trace: None,
        }
    }

    pub fn cancelled() -> Self {
        Self::new(CookErrorKind::Cancelled)
    }

    pub fn with_url(mut self, url: &Url) -> Self {
        self.url = Some(url.clone());
        self
    }

    pub fn with_plugin(mut self, plugin: &str) -> Self {
        self.plugin = Some(plugin.to_string());
        self
    }

    pub fn with_trace(mut self, trace: Trace) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Wrap a transform-stage failure; parse errors get a trace into `text`.
    pub fn from_transform(err: TransformError, url: &Url, text: Option<&str>) -> Self {
        match err {
            TransformError::Parse { message, offset } => {
                let error = Self::new(CookErrorKind::Parse(message)).with_url(url);
                match text {
                    Some(text) => error.with_trace(Trace::at(url, text, offset)),
                    None => error,
                }
            }
            TransformError::Other(message) => {
                Self::new(CookErrorKind::Transform(message)).with_url(url)
            }
        }
    }

    pub fn is_parse_error(&self) -> bool {
        matches!(self.kind, CookErrorKind::Parse(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, CookErrorKind::Cancelled)
    }
}

impl fmt::Display for CookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(plugin) = &self.plugin {
            write!(f, " {}", format!("(plugin `{plugin}`)").dimmed())?;
        }
        match (&self.trace, &self.url) {
            (Some(trace), _) => write!(f, "\n  {} {trace}", "-->".blue())?,
            (None, Some(url)) => write!(f, "\n  {} {url}", "-->".blue())?,
            (None, None) => {}
        }
        Ok(())
    }
}

impl std::error::Error for CookError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            CookErrorKind::Fetch(err) => err.source(),
            _ => None,
        }
    }
}

impl From<CookErrorKind> for CookError {
    fn from(kind: CookErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Outcome shared by every caller waiting on the same cook.
pub type CookResult = Result<(), Arc<CookError>>;

// ============================================================================
// BuildError
// ============================================================================

/// Failure of a production build.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{0}")]
    Cook(Arc<CookError>),

    #[error("entry point `{0}` could not be resolved")]
    EntryPoint(String),

    #[error("bundler `{plugin}` failed for {url_type}: {message}")]
    Bundle {
        plugin: String,
        url_type: String,
        message: String,
    },

    #[error("IO error when writing `{0}`")]
    Io(PathBuf, #[source] io::Error),

    #[error("failed to serialize build manifest")]
    Manifest(#[from] serde_json::Error),

    #[error("build cancelled")]
    Cancelled,
}

impl From<Arc<CookError>> for BuildError {
    fn from(err: Arc<CookError>) -> Self {
        if err.is_cancelled() {
            Self::Cancelled
        } else {
            Self::Cook(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("file:///app/main.js").unwrap()
    }

    #[test]
    fn test_line_column() {
        let text = "a\nbc\ndef";
        assert_eq!(line_column(text, 0), (1, 0));
        assert_eq!(line_column(text, 3), (2, 1));
        assert_eq!(line_column(text, 7), (3, 2));
        assert_eq!(line_column(text, 100), (3, 3));
    }

    #[test]
    fn test_trace_snippet() {
        let trace = Trace::at(&url(), "import a\nimport \"./b.js\"\n", 16);
        assert_eq!(trace.line, 2);
        assert_eq!(trace.column, 7);
        assert_eq!(trace.snippet.as_deref(), Some("import \"./b.js\""));
    }

    #[test]
    fn test_fetch_error_from_io() {
        let u = url();
        let not_found = FetchError::from_io(&u, io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(not_found, FetchError::NotFound(_)));
        let denied = FetchError::from_io(&u, io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(denied, FetchError::PermissionDenied(_)));
        let other = FetchError::from_io(&u, io::Error::other("disk"));
        assert!(matches!(other, FetchError::Io(..)));
    }

    #[test]
    fn test_parse_error_gets_trace() {
        let u = url();
        let err = CookError::from_transform(TransformError::parse("unexpected `}`", 4), &u, Some("let }"));
        assert!(err.is_parse_error());
        let trace = err.trace.unwrap();
        assert_eq!((trace.line, trace.column), (1, 4));
    }

    #[test]
    fn test_cancelled_maps_to_build_cancelled() {
        let err: BuildError = Arc::new(CookError::cancelled()).into();
        assert!(matches!(err, BuildError::Cancelled));
    }
}
