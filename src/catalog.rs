//! Topic catalog and derived published-state.
//!
//! The catalog is read from `topics.json` at the start of every cycle so edits
//! take effect without a restart. Published-state is never stored: a topic is
//! published iff `docs/artikel/<slug>.html` exists.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, SiteError};

/// File extension of rendered articles.
pub const ARTICLE_EXT: &str = "html";

/// Site-wide settings from the catalog's `site` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteSettings {
    pub base_url: String,
    #[serde(default = "default_site_name")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_site_name() -> String {
    "AI Tennis Lab".to_string()
}

fn default_language() -> String {
    "de".to_string()
}

/// One catalog entry. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub slug: String,
    pub title: String,
    pub category: String,
    pub difficulty: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// The full ordered topic catalog plus site settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Catalog {
    pub site: SiteSettings,
    pub topics: Vec<Topic>,
}

impl Catalog {
    /// Load and validate a catalog file.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog: Catalog =
            serde_json::from_str(&raw).map_err(|source| CatalogError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        catalog.validate()?;
        tracing::debug!(topics = catalog.topics.len(), "Catalog loaded");
        Ok(catalog)
    }

    fn validate(&self) -> Result<(), CatalogError> {
        if self.site.base_url.trim().is_empty() {
            return Err(CatalogError::MissingBaseUrl);
        }
        let mut seen = HashSet::new();
        for topic in &self.topics {
            if !seen.insert(topic.slug.as_str()) {
                return Err(CatalogError::DuplicateSlug(topic.slug.clone()));
            }
        }
        Ok(())
    }

    pub fn get(&self, slug: &str) -> Option<&Topic> {
        self.topics.iter().find(|t| t.slug == slug)
    }

    /// Unpublished topics in catalog order.
    pub fn remaining<'a>(&'a self, published: &'a PublishedState) -> impl Iterator<Item = &'a Topic> {
        self.topics.iter().filter(|t| !published.contains(&t.slug))
    }

    /// First unpublished topic in catalog order.
    pub fn first_unpublished<'a>(&'a self, published: &'a PublishedState) -> Option<&'a Topic> {
        self.remaining(published).next()
    }

    /// Public URL of a topic's article.
    pub fn article_url(&self, slug: &str) -> String {
        format!(
            "{}/artikel/{slug}.{ARTICLE_EXT}",
            self.site.base_url.trim_end_matches('/')
        )
    }

    /// Categories in first-seen catalog order with their topics.
    pub fn by_category(&self) -> Vec<(&str, Vec<&Topic>)> {
        let mut groups: Vec<(&str, Vec<&Topic>)> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();
        for topic in &self.topics {
            let slot = *index.entry(topic.category.as_str()).or_insert_with(|| {
                groups.push((topic.category.as_str(), Vec::new()));
                groups.len() - 1
            });
            groups[slot].1.push(topic);
        }
        groups
    }
}

/// Snapshot of which slugs currently have an artifact in the output tree.
#[derive(Debug, Clone, Default)]
pub struct PublishedState {
    slugs: HashSet<String>,
    articles_dir: PathBuf,
}

impl PublishedState {
    /// Scan `articles_dir` for `<slug>.html` files. A missing directory means
    /// nothing is published yet.
    pub fn scan(articles_dir: &Path) -> Result<Self, SiteError> {
        let mut slugs = HashSet::new();
        let entries = match std::fs::read_dir(articles_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self {
                    slugs,
                    articles_dir: articles_dir.to_path_buf(),
                });
            }
            Err(source) => {
                return Err(SiteError::Scan {
                    path: articles_dir.to_path_buf(),
                    source,
                });
            }
        };

        for entry in entries {
            let entry = entry.map_err(|source| SiteError::Scan {
                path: articles_dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ARTICLE_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                slugs.insert(stem.to_string());
            }
        }

        Ok(Self {
            slugs,
            articles_dir: articles_dir.to_path_buf(),
        })
    }

    /// Build a state from an explicit slug list (no backing directory).
    pub fn from_slugs<I, S>(slugs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            slugs: slugs.into_iter().map(Into::into).collect(),
            articles_dir: PathBuf::new(),
        }
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.slugs.contains(slug)
    }

    /// Number of catalog topics that are published.
    pub fn count_in(&self, catalog: &Catalog) -> usize {
        catalog
            .topics
            .iter()
            .filter(|t| self.contains(&t.slug))
            .count()
    }

    /// Path of the artifact for `slug`.
    pub fn article_path(&self, slug: &str) -> PathBuf {
        self.articles_dir.join(format!("{slug}.{ARTICLE_EXT}"))
    }

    /// Modification date of a published artifact, today if unknown.
    pub fn modified_date(&self, slug: &str) -> NaiveDate {
        std::fs::metadata(self.article_path(slug))
            .and_then(|m| m.modified())
            .map(|t| DateTime::<Local>::from(t).date_naive())
            .unwrap_or_else(|_| Local::now().date_naive())
    }
}
