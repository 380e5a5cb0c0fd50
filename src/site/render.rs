//! Article page rendering.

use chrono::NaiveDate;

use crate::catalog::{ARTICLE_EXT, Catalog, PublishedState, SiteSettings, Topic};
use crate::pipeline::prompts::Draft;
use crate::site::{IMAGES_DIR, escape_html};

/// Maximum related articles linked from a page.
pub const MAX_RELATED: usize = 3;

/// Everything needed to render one article page.
pub struct ArticlePage<'a> {
    pub site: &'a SiteSettings,
    pub topic: &'a Topic,
    pub draft: &'a Draft,
    /// Hero image file name under `images/`.
    pub image: Option<&'a str>,
    pub related: &'a [&'a Topic],
    pub date: NaiveDate,
}

/// Published articles to link from `topic`: same category first, then the
/// rest, in catalog order, never the topic itself.
pub fn related_articles<'a>(
    topic: &Topic,
    catalog: &'a Catalog,
    published: &PublishedState,
) -> Vec<&'a Topic> {
    let candidates = || {
        catalog
            .topics
            .iter()
            .filter(|t| t.slug != topic.slug && published.contains(&t.slug))
    };

    candidates()
        .filter(|t| t.category == topic.category)
        .chain(candidates().filter(|t| t.category != topic.category))
        .take(MAX_RELATED)
        .collect()
}

/// Full HTML document for an article.
pub fn article_html(page: &ArticlePage<'_>) -> String {
    let topic = page.topic;
    let site = page.site;
    let base = site.base_url.trim_end_matches('/');
    let url = format!("{base}/artikel/{}.{ARTICLE_EXT}", topic.slug);

    let mut body = String::new();
    body.push_str("<article>\n");
    body.push_str(&format!("<h1>{}</h1>\n", escape_html(&topic.title)));
    body.push_str(&format!(
        "<p class=\"meta\">{} · {} · <time datetime=\"{}\">{}</time></p>\n",
        escape_html(&topic.category),
        escape_html(&topic.difficulty),
        page.date.format("%Y-%m-%d"),
        page.date.format("%d.%m.%Y"),
    ));
    if let Some(image) = page.image {
        body.push_str(&format!(
            "<img class=\"hero\" src=\"../{IMAGES_DIR}/{}\" alt=\"{}\">\n",
            escape_html(image),
            escape_html(&topic.title),
        ));
    }
    body.push_str(&page.draft.content_html);
    body.push('\n');
    body.push_str("</article>\n");

    if !page.related.is_empty() {
        body.push_str("<aside class=\"related\">\n<h2>Verwandte Artikel</h2>\n<ul>\n");
        for related in page.related {
            body.push_str(&format!(
                "<li><a href=\"{}.{ARTICLE_EXT}\">{}</a></li>\n",
                escape_html(&related.slug),
                escape_html(&related.title),
            ));
        }
        body.push_str("</ul>\n</aside>\n");
    }

    let mut head_extra = String::new();
    if !topic.keywords.is_empty() {
        head_extra.push_str(&format!(
            "<meta name=\"keywords\" content=\"{}\">\n",
            escape_html(&topic.keywords.join(", "))
        ));
    }
    head_extra.push_str(&format!("<link rel=\"canonical\" href=\"{}\">\n", escape_html(&url)));
    head_extra.push_str(&format!(
        "<script type=\"application/ld+json\">{}</script>\n",
        structured_data(page, &url)
    ));

    page_shell(
        site,
        &format!("{} | {}", topic.title, site.name),
        &page.draft.meta_description,
        &head_extra,
        &body,
        "../",
    )
}

/// JSON-LD for the article, plus a HowTo block when steps exist.
fn structured_data(page: &ArticlePage<'_>, url: &str) -> String {
    let date = page.date.format("%Y-%m-%d").to_string();
    let mut graph = vec![serde_json::json!({
        "@type": "Article",
        "headline": page.topic.title,
        "description": page.draft.meta_description,
        "datePublished": date,
        "dateModified": date,
        "inLanguage": page.site.language,
        "url": url,
        "publisher": { "@type": "Organization", "name": page.site.name },
    })];

    if !page.draft.howto_steps.is_empty() {
        let steps: Vec<serde_json::Value> = page
            .draft
            .howto_steps
            .iter()
            .enumerate()
            .map(|(i, step)| {
                serde_json::json!({
                    "@type": "HowToStep",
                    "position": i + 1,
                    "name": step.name,
                    "text": step.text,
                })
            })
            .collect();
        graph.push(serde_json::json!({
            "@type": "HowTo",
            "name": page.topic.title,
            "step": steps,
        }));
    }

    let doc = serde_json::json!({ "@context": "https://schema.org", "@graph": graph });
    // A literal "</" would close the script element early.
    doc.to_string().replace("</", "<\\/")
}

/// Shared page frame. `root` is the relative path back to the docs root.
pub(crate) fn page_shell(
    site: &SiteSettings,
    title: &str,
    description: &str,
    head_extra: &str,
    body: &str,
    root: &str,
) -> String {
    let year = chrono::Local::now().format("%Y");
    format!(
        "<!DOCTYPE html>\n\
         <html lang=\"{lang}\">\n\
         <head>\n\
         <meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{title}</title>\n\
         <meta name=\"description\" content=\"{description}\">\n\
         {head_extra}\
         </head>\n\
         <body>\n\
         <header><a href=\"{root}index.html\">{name}</a> · <a href=\"{root}ueber-uns.html\">Ueber uns</a></header>\n\
         <main>\n\
         {body}\
         </main>\n\
         <footer>&copy; {year} {name}</footer>\n\
         </body>\n\
         </html>\n",
        lang = escape_html(&site.language),
        title = escape_html(title),
        description = escape_html(description),
        name = escape_html(&site.name),
    )
}
