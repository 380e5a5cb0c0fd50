//! Aggregate pages: index, about page, sitemap, robots listing.
//!
//! All four are regenerated from the catalog and a published-state snapshot
//! on every rebuild, so the output is idempotent.

use chrono::{Local, NaiveDate};

use crate::catalog::{ARTICLE_EXT, Catalog, PublishedState, Topic};
use crate::error::SiteError;
use crate::site::render::page_shell;
use crate::site::{ARTICLES_DIR, IMAGES_DIR, Site, escape_html, image_file_name, write_file};

pub const INDEX_FILE: &str = "index.html";
pub const ABOUT_FILE: &str = "ueber-uns.html";
pub const SITEMAP_FILE: &str = "sitemap.xml";
pub const ROBOTS_FILE: &str = "robots.txt";

/// A published article as listed on the index.
struct Listed<'a> {
    topic: &'a Topic,
    has_image: bool,
    date: NaiveDate,
}

pub(crate) fn rebuild(
    site: &Site,
    catalog: &Catalog,
    published: &PublishedState,
) -> Result<(), SiteError> {
    let groups: Vec<(&str, Vec<Listed<'_>>)> = catalog
        .by_category()
        .into_iter()
        .map(|(category, topics)| {
            let listed = topics
                .into_iter()
                .filter(|t| published.contains(&t.slug))
                .map(|topic| Listed {
                    topic,
                    has_image: site.has_image(&topic.slug),
                    date: published.modified_date(&topic.slug),
                })
                .collect::<Vec<_>>();
            (category, listed)
        })
        .filter(|(_, listed)| !listed.is_empty())
        .collect();

    let docs = site.docs_dir();
    write_file(&docs.join(INDEX_FILE), index_html(catalog, &groups).as_bytes())?;
    write_file(&docs.join(ABOUT_FILE), about_html(catalog).as_bytes())?;

    let today = Local::now().date_naive();
    let articles: Vec<(&str, NaiveDate)> = groups
        .iter()
        .flat_map(|(_, listed)| listed.iter().map(|l| (l.topic.slug.as_str(), l.date)))
        .collect();
    write_file(
        &docs.join(SITEMAP_FILE),
        sitemap_xml(&catalog.site.base_url, today, &articles).as_bytes(),
    )?;
    write_file(&docs.join(ROBOTS_FILE), robots_txt(&catalog.site.base_url).as_bytes())?;

    tracing::info!(
        articles = articles.len(),
        categories = groups.len(),
        "Site rebuilt"
    );
    Ok(())
}

fn index_html(catalog: &Catalog, groups: &[(&str, Vec<Listed<'_>>)]) -> String {
    let total: usize = groups.iter().map(|(_, l)| l.len()).sum();
    let site = &catalog.site;

    let mut body = format!(
        "<section class=\"intro\">\n<h1>{}</h1>\n<p>{}</p>\n<p>{total} Artikel in {} Kategorien</p>\n</section>\n",
        escape_html(&site.name),
        escape_html(&site.description),
        groups.len(),
    );

    for (category, listed) in groups {
        body.push_str(&format!(
            "<section class=\"category\">\n<h2>{}</h2>\n<ul>\n",
            escape_html(category)
        ));
        for entry in listed {
            let slug = escape_html(&entry.topic.slug);
            body.push_str("<li>");
            if entry.has_image {
                body.push_str(&format!(
                    "<img src=\"{IMAGES_DIR}/{}\" alt=\"\" loading=\"lazy\"> ",
                    escape_html(&image_file_name(&entry.topic.slug))
                ));
            }
            body.push_str(&format!(
                "<a href=\"{ARTICLES_DIR}/{slug}.{ARTICLE_EXT}\">{}</a> <span class=\"meta\">{} · {}</span></li>\n",
                escape_html(&entry.topic.title),
                escape_html(&entry.topic.difficulty),
                entry.date.format("%d.%m.%Y"),
            ));
        }
        body.push_str("</ul>\n</section>\n");
    }

    page_shell(site, &site.name, &site.description, "", &body, "")
}

fn about_html(catalog: &Catalog) -> String {
    let site = &catalog.site;
    let body = format!(
        "<article>\n<h1>Ueber {name}</h1>\n<p>{description}</p>\n\
         <p>Alle Artikel werden mit KI-Unterstuetzung recherchiert, geschrieben und \
         vor der Veroeffentlichung von einem unabhaengigen Pruefschritt bewertet.</p>\n</article>\n",
        name = escape_html(&site.name),
        description = escape_html(&site.description),
    );
    page_shell(
        site,
        &format!("Ueber uns | {}", site.name),
        &site.description,
        "",
        &body,
        "",
    )
}

/// Sitemap with home, about page and one entry per published article.
pub fn sitemap_xml(base_url: &str, today: NaiveDate, articles: &[(&str, NaiveDate)]) -> String {
    let base = base_url.trim_end_matches('/');
    let mut urls = vec![
        (format!("{base}/"), today),
        (format!("{base}/{ABOUT_FILE}"), today),
    ];
    urls.extend(
        articles
            .iter()
            .map(|(slug, date)| (format!("{base}/{ARTICLES_DIR}/{slug}.{ARTICLE_EXT}"), *date)),
    );

    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n",
    );
    for (loc, lastmod) in urls {
        xml.push_str(&format!(
            "  <url>\n    <loc>{}</loc>\n    <lastmod>{}</lastmod>\n  </url>\n",
            escape_html(&loc),
            lastmod.format("%Y-%m-%d")
        ));
    }
    xml.push_str("</urlset>\n");
    xml
}

pub fn robots_txt(base_url: &str) -> String {
    format!(
        "User-agent: *\nAllow: /\n\nSitemap: {}/{SITEMAP_FILE}\n",
        base_url.trim_end_matches('/')
    )
}
