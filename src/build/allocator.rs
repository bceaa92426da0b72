//! Unique output paths inside the build directory.
//!
//! First come, first served: the first resource asking for a path gets
//! it, later ones get `name2.ext`, `name3.ext` in the same directory.
//! Entry points keep their path relative to the root, HTML pages land at
//! the top, everything else is grouped by type under the assets dir.

use rustc_hash::{FxHashMap, FxHashSet};
use url::Url;

use crate::graph::UrlType;
use crate::utils::urls;

/// What the allocator needs to know about one resource.
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct Allocation<'a> {
    pub url_type: Option<UrlType>,
    pub is_entry_point: bool,
    /// Path relative to the root directory, when the source lives there
    pub root_relative: Option<&'a str>,
    pub filename_hint: Option<&'a str>,
}

#[derive(Debug)]
pub(super) struct BuildUrls {
    build_directory_url: Url,
    assets_dir: String,
    taken: FxHashSet<String>,
    by_source: FxHashMap<Url, Url>,
    order: Vec<(Url, Url)>,
}

impl BuildUrls {
    pub fn new(build_directory_url: &Url, assets_dir: &str) -> Self {
        Self {
            build_directory_url: urls::as_directory(build_directory_url),
            assets_dir: assets_dir.trim_matches('/').to_string(),
            taken: FxHashSet::default(),
            by_source: FxHashMap::default(),
            order: Vec::new(),
        }
    }

    pub fn get(&self, source: &Url) -> Option<&Url> {
        self.by_source.get(source)
    }

    /// `(source, build url)` pairs in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = (&Url, &Url)> {
        self.order.iter().map(|(source, build)| (source, build))
    }

    /// The build URL of `source`, allocating one on first sight.
    pub fn allocate(&mut self, source: &Url, allocation: Allocation<'_>) -> Url {
        if let Some(url) = self.by_source.get(source) {
            return url.clone();
        }
        let desired = self.desired_path(source, allocation);
        let path = self.unique(&desired);
        let url = self
            .build_directory_url
            .join(&path)
            .unwrap_or_else(|_| self.build_directory_url.clone());
        self.taken.insert(path);
        self.by_source.insert(source.clone(), url.clone());
        self.order.push((source.clone(), url.clone()));
        url
    }

    fn desired_path(&self, source: &Url, allocation: Allocation<'_>) -> String {
        if allocation.is_entry_point
            && let Some(path) = allocation.root_relative
            && !path.is_empty()
        {
            return path.to_string();
        }
        let name = match allocation.filename_hint {
            Some(hint) if !hint.is_empty() => hint.to_string(),
            _ => default_filename(source, allocation.url_type),
        };
        match allocation.url_type {
            Some(UrlType::Html) => name,
            url_type => {
                let dir = url_type.unwrap_or(UrlType::Other).asset_dir();
                if self.assets_dir.is_empty() {
                    format!("{dir}/{name}")
                } else {
                    format!("{}/{dir}/{name}", self.assets_dir)
                }
            }
        }
    }

    fn unique(&self, desired: &str) -> String {
        if !self.taken.contains(desired) {
            return desired.to_string();
        }
        let (dir, name) = match desired.rfind('/') {
            Some(pos) => desired.split_at(pos + 1),
            None => ("", desired),
        };
        let (stem, extension) = urls::split_extension(name);
        (2..)
            .map(|n| format!("{dir}{stem}{n}{extension}"))
            .find(|candidate| !self.taken.contains(candidate))
            .unwrap_or_else(|| desired.to_string())
    }
}

fn default_filename(source: &Url, url_type: Option<UrlType>) -> String {
    let name = urls::filename(source);
    if !name.is_empty() {
        return name.to_string();
    }
    format!("index.{}", url_type.unwrap_or(UrlType::Other).inline_extension())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn build_urls() -> BuildUrls {
        BuildUrls::new(&url("file:///out"), "assets")
    }

    fn js() -> Allocation<'static> {
        Allocation {
            url_type: Some(UrlType::JsModule),
            ..Allocation::default()
        }
    }

    #[test]
    fn test_entry_keeps_its_path() {
        let mut urls = build_urls();
        let entry = Allocation {
            url_type: Some(UrlType::Html),
            is_entry_point: true,
            root_relative: Some("pages/about.html"),
            filename_hint: None,
        };
        let built = urls.allocate(&url("file:///app/pages/about.html"), entry);
        assert_eq!(built.as_str(), "file:///out/pages/about.html");
    }

    #[test]
    fn test_assets_grouped_by_type() {
        let mut urls = build_urls();
        let css = Allocation {
            url_type: Some(UrlType::Css),
            ..Allocation::default()
        };
        let html = Allocation {
            url_type: Some(UrlType::Html),
            ..Allocation::default()
        };
        assert_eq!(urls.allocate(&url("file:///app/lib/a.js"), js()).as_str(), "file:///out/assets/js/a.js");
        assert_eq!(urls.allocate(&url("file:///app/s/main.css"), css).as_str(), "file:///out/assets/css/main.css");
        assert_eq!(urls.allocate(&url("file:///app/x/frame.html"), html).as_str(), "file:///out/frame.html");
        assert_eq!(
            urls.allocate(&url("file:///app/logo.png"), Allocation::default()).as_str(),
            "file:///out/assets/other/logo.png"
        );
    }

    #[test]
    fn test_collisions_get_numbered() {
        let mut urls = build_urls();
        let first = urls.allocate(&url("file:///app/a/util.js"), js());
        let second = urls.allocate(&url("file:///app/b/util.js"), js());
        let third = urls.allocate(&url("file:///app/c/util.js"), js());
        assert_eq!(first.as_str(), "file:///out/assets/js/util.js");
        assert_eq!(second.as_str(), "file:///out/assets/js/util2.js");
        assert_eq!(third.as_str(), "file:///out/assets/js/util3.js");
    }

    #[test]
    fn test_same_source_same_url() {
        let mut urls = build_urls();
        let source = url("file:///app/util.js");
        let first = urls.allocate(&source, js());
        let again = urls.allocate(&source, js());
        assert_eq!(first, again);
        assert_eq!(urls.iter().count(), 1);
    }

    #[test]
    fn test_filename_hint_wins() {
        let mut urls = build_urls();
        let hinted = Allocation {
            filename_hint: Some("vendor.js"),
            ..js()
        };
        let built = urls.allocate(&url("file:///app/node_modules/lib/index.js"), hinted);
        assert_eq!(built.as_str(), "file:///out/assets/js/vendor.js");
    }
}
