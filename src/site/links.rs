//! Broken-link check for a rendered article.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::error::SiteError;

static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:href|src)=["']([^"']+)["']"#).expect("valid link regex")
});

/// Per-request timeout for external HEAD checks.
pub const HEAD_TIMEOUT: Duration = Duration::from_secs(5);

const SKIPPED_PREFIXES: &[&str] = &["#", "javascript:", "data:", "mailto:"];

/// A link that failed the check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokenLink {
    /// Local target missing on disk.
    Local(String),
    /// External target answered with an error status.
    Status { url: String, status: u16 },
    /// External target unreachable.
    Unreachable { url: String, reason: String },
}

impl std::fmt::Display for BrokenLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(url) => write!(f, "LOKAL: {url}"),
            Self::Status { url, status } => write!(f, "HTTP {status}: {url}"),
            Self::Unreachable { url, reason } => write!(f, "FEHLER: {url} ({reason})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Skip,
    Local(PathBuf),
    External(String),
}

/// All `href`/`src` values in document order.
pub fn extract_links(html: &str) -> Vec<String> {
    LINK_RE
        .captures_iter(html)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

fn classify(link: &str, page_dir: &Path, docs_dir: &Path) -> Target {
    if SKIPPED_PREFIXES.iter().any(|p| link.starts_with(p)) {
        return Target::Skip;
    }
    if link.starts_with("http://") || link.starts_with("https://") {
        return Target::External(link.to_string());
    }
    // Drop fragment and query before touching the filesystem.
    let path = link.split(['#', '?']).next().unwrap_or_default();
    if path.is_empty() {
        return Target::Skip;
    }
    match path.strip_prefix('/') {
        Some(rooted) => Target::Local(docs_dir.join(rooted)),
        None => Target::Local(page_dir.join(path)),
    }
}

/// Check every link in the page at `html_path`.
///
/// Root-relative links resolve against `docs_dir`, other relative links
/// against the page's own directory.
pub async fn check_links(
    html_path: &Path,
    docs_dir: &Path,
    http: &reqwest::Client,
) -> Result<Vec<BrokenLink>, SiteError> {
    let html = std::fs::read_to_string(html_path).map_err(|source| SiteError::Scan {
        path: html_path.to_path_buf(),
        source,
    })?;
    let page_dir = html_path.parent().unwrap_or(docs_dir);

    let mut broken = Vec::new();
    for link in extract_links(&html) {
        match classify(&link, page_dir, docs_dir) {
            Target::Skip => {}
            Target::Local(path) => {
                if !path.exists() {
                    broken.push(BrokenLink::Local(link));
                }
            }
            Target::External(url) => {
                match http.head(&url).timeout(HEAD_TIMEOUT).send().await {
                    Ok(resp) if resp.status().as_u16() >= 400 => broken.push(BrokenLink::Status {
                        url,
                        status: resp.status().as_u16(),
                    }),
                    Ok(_) => {}
                    Err(e) => broken.push(BrokenLink::Unreachable {
                        url,
                        reason: e.to_string(),
                    }),
                }
            }
        }
    }

    if broken.is_empty() {
        tracing::debug!(page = %html_path.display(), "All links OK");
    } else {
        tracing::warn!(page = %html_path.display(), broken = broken.len(), "Broken links found");
    }
    Ok(broken)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_href_and_src() {
        let html = r##"<a href="a.html">x</a><img src='../images/b.jpg'><a href="#top">t</a>"##;
        assert_eq!(extract_links(html), vec!["a.html", "../images/b.jpg", "#top"]);
    }

    #[test]
    fn classify_links() {
        let page = Path::new("/docs/artikel");
        let docs = Path::new("/docs");
        assert_eq!(classify("#x", page, docs), Target::Skip);
        assert_eq!(classify("mailto:a@b", page, docs), Target::Skip);
        assert_eq!(classify("javascript:void(0)", page, docs), Target::Skip);
        assert_eq!(
            classify("https://dtb-tennis.de", page, docs),
            Target::External("https://dtb-tennis.de".into())
        );
        assert_eq!(
            classify("/index.html", page, docs),
            Target::Local(PathBuf::from("/docs/index.html"))
        );
        assert_eq!(
            classify("volley.html#step", page, docs),
            Target::Local(PathBuf::from("/docs/artikel/volley.html"))
        );
    }

    #[test]
    fn display_matches_report_format() {
        assert_eq!(BrokenLink::Local("x.html".into()).to_string(), "LOKAL: x.html");
        assert_eq!(
            BrokenLink::Status {
                url: "https://x".into(),
                status: 404
            }
            .to_string(),
            "HTTP 404: https://x"
        );
    }

    #[tokio::test]
    async fn check_local_links_only() {
        let dir = tempfile::tempdir().unwrap();
        let docs = dir.path();
        let articles = docs.join("artikel");
        std::fs::create_dir_all(&articles).unwrap();
        std::fs::write(docs.join("index.html"), "").unwrap();
        std::fs::write(articles.join("other.html"), "").unwrap();
        let page = articles.join("page.html");
        std::fs::write(
            &page,
            r##"<a href="../index.html">i</a><a href="/index.html">r</a>
               <a href="other.html">o</a><a href="missing.html">m</a>
               <img src="../images/page.jpg"><a href="#top">t</a>"##,
        )
        .unwrap();

        let broken = check_links(&page, docs, &reqwest::Client::new()).await.unwrap();
        assert_eq!(
            broken,
            vec![
                BrokenLink::Local("missing.html".into()),
                BrokenLink::Local("../images/page.jpg".into()),
            ]
        );
    }
}
