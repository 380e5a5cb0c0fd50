//! Static output tree under `docs/`.
//!
//! - [`render`]: one article page per topic, overwritten in place.
//! - [`build`]: index, about page, sitemap and robots listing.
//! - [`links`]: broken-link check on a rendered page.

pub mod build;
pub mod links;
pub mod render;

use std::path::{Path, PathBuf};

use crate::catalog::{ARTICLE_EXT, Catalog, PublishedState, Topic};
use crate::error::SiteError;
use crate::pipeline::prompts::Draft;

/// Directory of article pages, relative to the docs root.
pub const ARTICLES_DIR: &str = "artikel";

/// Directory of hero images, relative to the docs root.
pub const IMAGES_DIR: &str = "images";

/// The output tree rooted at `docs/`.
#[derive(Debug, Clone)]
pub struct Site {
    docs_dir: PathBuf,
}

impl Site {
    pub fn new(docs_dir: impl Into<PathBuf>) -> Self {
        Self {
            docs_dir: docs_dir.into(),
        }
    }

    pub fn docs_dir(&self) -> &Path {
        &self.docs_dir
    }

    pub fn articles_dir(&self) -> PathBuf {
        self.docs_dir.join(ARTICLES_DIR)
    }

    pub fn images_dir(&self) -> PathBuf {
        self.docs_dir.join(IMAGES_DIR)
    }

    pub fn article_path(&self, slug: &str) -> PathBuf {
        self.articles_dir().join(format!("{slug}.{ARTICLE_EXT}"))
    }

    /// Create `artikel/` and `images/` if missing.
    pub fn ensure_dirs(&self) -> Result<(), SiteError> {
        for dir in [self.articles_dir(), self.images_dir()] {
            std::fs::create_dir_all(&dir).map_err(|source| SiteError::Write {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Current published-state snapshot.
    pub fn published(&self) -> Result<PublishedState, SiteError> {
        PublishedState::scan(&self.articles_dir())
    }

    /// Write hero image bytes; returns the file name the article references.
    pub fn write_image(&self, slug: &str, bytes: &[u8]) -> Result<String, SiteError> {
        let file_name = image_file_name(slug);
        write_file(&self.images_dir().join(&file_name), bytes)?;
        Ok(file_name)
    }

    /// Whether a hero image exists for `slug`.
    pub fn has_image(&self, slug: &str) -> bool {
        self.images_dir().join(image_file_name(slug)).is_file()
    }

    /// Render and write the article page for `topic`, replacing any prior page.
    pub fn render_article(
        &self,
        topic: &Topic,
        draft: &Draft,
        image: Option<&str>,
        catalog: &Catalog,
        published: &PublishedState,
    ) -> Result<PathBuf, SiteError> {
        let today = chrono::Local::now().date_naive();
        let related = render::related_articles(topic, catalog, published);
        let html = render::article_html(&render::ArticlePage {
            site: &catalog.site,
            topic,
            draft,
            image,
            related: &related,
            date: today,
        });

        let path = self.article_path(&topic.slug);
        write_file(&path, html.as_bytes())?;
        tracing::info!(slug = %topic.slug, path = %path.display(), "Article rendered");
        Ok(path)
    }

    /// Regenerate index, about page, sitemap and robots listing.
    pub fn rebuild(&self, catalog: &Catalog, published: &PublishedState) -> Result<(), SiteError> {
        build::rebuild(self, catalog, published)
    }
}

/// `<slug>.jpg`
pub fn image_file_name(slug: &str) -> String {
    format!("{slug}.jpg")
}

/// Escape text for HTML element and attribute content.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

pub(crate) fn write_file(path: &Path, contents: &[u8]) -> Result<(), SiteError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| SiteError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, contents).map_err(|source| SiteError::Write {
        path: path.to_path_buf(),
        source,
    })
}
