//! Reading `file:` URLs from disk.

use std::path::PathBuf;

use crate::content::Content;
use crate::error::FetchError;
use crate::plugin::{FetchRequest, FetchResult, Fetched, Plugin};
use crate::utils::mime;

/// Fetch `file:` URLs with `tokio::fs`.
///
/// Registered low priority so any other fetcher gets the first say.
/// Directory URLs serve their `index.html`.
pub fn file_url_fetch() -> Plugin {
    Plugin::new("file-url-fetch")
        .low_priority()
        .fetch_url_content(read_file)
}

async fn read_file(request: FetchRequest) -> FetchResult {
    let url = request.url;
    if url.scheme() != "file" || request.is_inline {
        return Ok(None);
    }
    let Ok(mut path): Result<PathBuf, ()> = url.to_file_path() else {
        return Err(FetchError::NotFound(url));
    };

    let metadata = tokio::fs::metadata(&path)
        .await
        .map_err(|err| FetchError::from_io(&url, err))?;
    let content_type = if metadata.is_dir() {
        path.push("index.html");
        mime::types::HTML
    } else {
        mime::from_url(&url)
    };

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|err| FetchError::from_io(&url, err))?;
    let content = Content::from_bytes(bytes, mime::is_text(content_type));
    Ok(Some(Fetched::new(content).with_content_type(content_type)))
}
