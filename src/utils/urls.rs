//! URL manipulation helpers.
//!
//! Graph nodes are keyed by absolute URLs; everything that turns them back
//! into specifiers, filenames or output paths goes through here.

use std::borrow::Cow;

use percent_encoding::percent_decode_str;
use url::Url;

/// Check if a specifier carries its own scheme (`https:`, `data:`, `mailto:`).
///
/// ```
/// use simmer::utils::urls::has_scheme;
/// assert!(has_scheme("https://example.com"));
/// assert!(has_scheme("data:text/plain,hi"));
/// assert!(!has_scheme("/about"));
/// assert!(!has_scheme("./file.txt"));
/// ```
#[inline]
pub fn has_scheme(specifier: &str) -> bool {
    specifier.find(':').is_some_and(|pos| {
        pos > 1
            && specifier[..pos]
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    })
}

/// Make sure a directory URL ends with `/` so `join` resolves inside it.
pub fn as_directory(url: &Url) -> Url {
    if url.path().ends_with('/') {
        return url.clone();
    }
    let mut dir = url.clone();
    dir.set_path(&format!("{}/", url.path()));
    dir
}

/// Path of `url` relative to directory `base`, with query kept.
///
/// Returns `None` when `url` lives outside `base` or on another origin.
pub fn relative_to(url: &Url, base: &Url) -> Option<String> {
    if url.scheme() != base.scheme() || url.host_str() != base.host_str() {
        return None;
    }
    let base = as_directory(base);
    let path = url.path().strip_prefix(base.path())?;
    Some(match url.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    })
}

/// Server-relative form (`/dir/file.js?x=1`) of a URL under `root`.
///
/// URLs outside the root keep their full form.
pub fn server_relative(url: &Url, root: &Url) -> String {
    match relative_to(url, root) {
        Some(path) => format!("/{path}"),
        None => url.to_string(),
    }
}

/// Last path segment, without query.
pub fn filename(url: &Url) -> &str {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or("")
}

/// Split `name.ext` into (`name`, `.ext`). Dotfiles keep their dot in the stem.
///
/// ```
/// use simmer::utils::urls::split_extension;
/// assert_eq!(split_extension("main.js"), ("main", ".js"));
/// assert_eq!(split_extension("archive.tar.gz"), ("archive.tar", ".gz"));
/// assert_eq!(split_extension(".env"), (".env", ""));
/// assert_eq!(split_extension("README"), ("README", ""));
/// ```
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(0) | None => (name, ""),
        Some(pos) => name.split_at(pos),
    }
}

/// Replace the last path segment.
pub fn with_filename(url: &Url, name: &str) -> Url {
    let mut out = url.clone();
    let path = url.path();
    let dir = path.rfind('/').map_or("", |pos| &path[..=pos]);
    out.set_path(&format!("{dir}{name}"));
    out
}

/// Append search params, keeping existing ones.
pub fn with_search_params(url: &Url, params: &[(String, String)]) -> Url {
    if params.is_empty() {
        return url.clone();
    }
    let mut out = url.clone();
    {
        let mut pairs = out.query_pairs_mut();
        for (key, value) in params {
            pairs.append_pair(key, value);
        }
    }
    out
}

/// Remove every occurrence of search param `name`; drops an emptied `?`.
pub fn without_search_param(url: &Url, name: &str) -> Url {
    if !url.query_pairs().any(|(k, _)| k == name) {
        return url.clone();
    }
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != name)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let mut out = url.clone();
    out.set_query(None);
    with_search_params(&out, &kept)
}

/// URL without query and fragment.
pub fn without_query(url: &Url) -> Url {
    let mut out = url.clone();
    out.set_query(None);
    out.set_fragment(None);
    out
}

/// Decode percent escapes for use as a filesystem path.
pub fn decode(path: &str) -> Cow<'_, str> {
    percent_decode_str(path).decode_utf8_lossy()
}
