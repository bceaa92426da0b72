//! MIME type detection for cooked resources.
//!
//! The kitchen needs a content type for every node it serves; fetch hooks
//! may supply one, otherwise it is guessed from the URL's extension.

use url::Url;

use crate::graph::UrlType;

/// Common MIME type constants.
pub mod types {
    pub const HTML: &str = "text/html; charset=utf-8";
    pub const PLAIN: &str = "text/plain; charset=utf-8";
    pub const CSS: &str = "text/css; charset=utf-8";
    pub const JAVASCRIPT: &str = "text/javascript; charset=utf-8";
    pub const JSON: &str = "application/json";
    pub const IMPORTMAP: &str = "application/importmap+json";
    pub const SOURCEMAP: &str = "application/json";
    pub const XML: &str = "application/xml";
    pub const MARKDOWN: &str = "text/markdown; charset=utf-8";

    pub const OCTET_STREAM: &str = "application/octet-stream";
    pub const WASM: &str = "application/wasm";

    pub const PNG: &str = "image/png";
    pub const JPEG: &str = "image/jpeg";
    pub const GIF: &str = "image/gif";
    pub const WEBP: &str = "image/webp";
    pub const AVIF: &str = "image/avif";
    pub const SVG: &str = "image/svg+xml";
    pub const ICO: &str = "image/x-icon";

    pub const WOFF: &str = "font/woff";
    pub const WOFF2: &str = "font/woff2";
    pub const TTF: &str = "font/ttf";
    pub const OTF: &str = "font/otf";
}

/// Extension of the last path segment, lowercased, without the dot.
pub fn extension(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    let (_, ext) = segment.rsplit_once('.')?;
    (!ext.is_empty()).then(|| ext.to_ascii_lowercase())
}

/// Guess MIME type from a URL's extension.
pub fn from_url(url: &Url) -> &'static str {
    from_extension(extension(url).as_deref())
}

/// Guess MIME type from file extension string.
pub fn from_extension(ext: Option<&str>) -> &'static str {
    match ext {
        Some("html" | "htm") => types::HTML,
        Some("css") => types::CSS,
        Some("js" | "mjs" | "cjs") => types::JAVASCRIPT,
        Some("json") => types::JSON,
        Some("importmap") => types::IMPORTMAP,
        Some("map") => types::SOURCEMAP,
        Some("xml") => types::XML,
        Some("txt") => types::PLAIN,
        Some("md") => types::MARKDOWN,

        Some("svg") => types::SVG,
        Some("png") => types::PNG,
        Some("jpg" | "jpeg") => types::JPEG,
        Some("gif") => types::GIF,
        Some("webp") => types::WEBP,
        Some("avif") => types::AVIF,
        Some("ico") => types::ICO,

        Some("woff") => types::WOFF,
        Some("woff2") => types::WOFF2,
        Some("ttf") => types::TTF,
        Some("otf") => types::OTF,

        Some("wasm") => types::WASM,
        _ => types::OCTET_STREAM,
    }
}

/// Classify a resource from its content type, falling back to the extension.
///
/// JavaScript is reported as classic; module scripts are only known from
/// the reference that points at them (`<script type="module">`, `import`).
pub fn url_type(content_type: Option<&str>, url: &Url) -> UrlType {
    let essence = content_type
        .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase());
    match essence.as_deref() {
        Some("text/html") => return UrlType::Html,
        Some("text/css") => return UrlType::Css,
        Some("text/javascript" | "application/javascript") => return UrlType::JsClassic,
        Some("application/importmap+json") => return UrlType::Importmap,
        Some("image/svg+xml") => return UrlType::Svg,
        _ => {}
    }
    match extension(url).as_deref() {
        Some("html" | "htm") => UrlType::Html,
        Some("css") => UrlType::Css,
        Some("mjs") => UrlType::JsModule,
        Some("js" | "cjs") => UrlType::JsClassic,
        Some("importmap") => UrlType::Importmap,
        Some("map") => UrlType::Sourcemap,
        Some("json" | "webmanifest") => UrlType::Json,
        Some("svg") => UrlType::Svg,
        Some("txt" | "md" | "xml") => UrlType::Text,
        _ if essence.as_deref() == Some("application/json") => UrlType::Json,
        _ if essence.as_deref().is_some_and(|e| e.starts_with("text/")) => UrlType::Text,
        _ => UrlType::Other,
    }
}

/// Content type for a classified resource, used when nothing better is known.
pub fn for_type(url_type: UrlType) -> &'static str {
    match url_type {
        UrlType::Html => types::HTML,
        UrlType::Css => types::CSS,
        UrlType::JsClassic | UrlType::JsModule => types::JAVASCRIPT,
        UrlType::Json => types::JSON,
        UrlType::Importmap => types::IMPORTMAP,
        UrlType::Sourcemap => types::SOURCEMAP,
        UrlType::Svg => types::SVG,
        UrlType::Text => types::PLAIN,
        UrlType::Other => types::OCTET_STREAM,
    }
}

/// Whether content of this type is decoded as text.
pub fn is_text(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or(content_type).trim();
    essence.starts_with("text/")
        || matches!(
            essence,
            "application/json"
                | "application/importmap+json"
                | "application/javascript"
                | "application/manifest+json"
                | "application/xml"
                | "image/svg+xml"
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_from_url() {
        assert_eq!(from_url(&url("file:///app/main.js")), types::JAVASCRIPT);
        assert_eq!(from_url(&url("file:///app/Style.CSS")), types::CSS);
        assert_eq!(from_url(&url("file:///app/logo")), types::OCTET_STREAM);
    }

    #[test]
    fn test_extension_ignores_query() {
        assert_eq!(extension(&url("file:///a/b.js?hot=1")).as_deref(), Some("js"));
        assert_eq!(extension(&url("file:///a/")), None);
    }

    #[test]
    fn test_url_type_prefers_content_type() {
        let u = url("file:///app/page");
        assert_eq!(url_type(Some("text/html; charset=utf-8"), &u), UrlType::Html);
        assert_eq!(url_type(None, &url("file:///app/a.mjs")), UrlType::JsModule);
        assert_eq!(url_type(None, &url("file:///app/a.js")), UrlType::JsClassic);
        assert_eq!(url_type(Some("application/json"), &u), UrlType::Json);
        assert_eq!(url_type(None, &url("file:///app/a.bin")), UrlType::Other);
    }

    #[test]
    fn test_is_text() {
        assert!(is_text(types::CSS));
        assert!(is_text(types::SVG));
        assert!(!is_text(types::PNG));
        assert!(!is_text(types::WOFF2));
    }
}
