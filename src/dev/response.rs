//! What the dev server answers, independent of the HTTP transport.

use crate::content::Content;
use crate::error::{CookError, CookErrorKind, FetchError};

/// Cache policy for cooked resources: always revalidate with the etag.
const REVALIDATE: &str = "private,max-age=0,must-revalidate";

/// A response ready to be written by a transport.
#[derive(Debug, Clone)]
pub struct DevResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Content,
}

impl DevResponse {
    /// 200 with cooked content.
    pub fn ok(content: Content, content_type: &str, etag: Option<String>) -> Self {
        let mut headers = vec![
            ("content-type".to_string(), content_type.to_string()),
            ("cache-control".to_string(), REVALIDATE.to_string()),
        ];
        if let Some(etag) = etag {
            headers.push(("etag".to_string(), etag));
        }
        Self {
            status: 200,
            headers,
            body: content,
        }
    }

    /// 304 for a client whose cached copy is still current.
    pub fn not_modified(etag: String) -> Self {
        Self {
            status: 304,
            headers: vec![
                ("etag".to_string(), etag),
                ("cache-control".to_string(), REVALIDATE.to_string()),
            ],
            body: Content::default(),
        }
    }

    /// Best-effort content of a resource that failed to parse.
    ///
    /// Never cached, so the fixed file is fetched as soon as it parses.
    pub fn parse_error(content: Content, content_type: &str, error: &CookError) -> Self {
        Self {
            status: 200,
            headers: vec![
                ("content-type".to_string(), content_type.to_string()),
                ("cache-control".to_string(), "no-store".to_string()),
                ("x-simmer-error".to_string(), one_line(&error.kind.to_string())),
            ],
            body: content,
        }
    }

    /// Plain-text error response matching the kind of failure.
    pub fn error(error: &CookError) -> Self {
        let status = status_of(error);
        let mut headers = vec![
            ("content-type".to_string(), "text/plain; charset=utf-8".to_string()),
            ("cache-control".to_string(), "no-store".to_string()),
        ];
        if status == 503 {
            headers.push(("retry-after".to_string(), "1".to_string()));
        }
        Self {
            status,
            headers,
            body: Content::from(strip_ansi(&error.to_string())),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Add `headers`, replacing any already present under the same name.
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        for (name, value) in headers {
            self.headers.retain(|(key, _)| !key.eq_ignore_ascii_case(&name));
            self.headers.push((name, value));
        }
        self
    }
}

fn status_of(error: &CookError) -> u16 {
    match &error.kind {
        CookErrorKind::Resolve(_) => 404,
        CookErrorKind::Fetch(FetchError::NotFound(_) | FetchError::Unhandled(_)) => 404,
        CookErrorKind::Fetch(FetchError::PermissionDenied(_)) => 403,
        CookErrorKind::Fetch(FetchError::Busy(_)) | CookErrorKind::Cancelled => 503,
        _ => 500,
    }
}

fn one_line(message: &str) -> String {
    message.lines().next().unwrap_or_default().to_string()
}

/// Error displays are colored for terminals; bodies are plain text.
fn strip_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            for c in chars.by_ref() {
                if c.is_ascii_alphabetic() {
                    break;
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}
