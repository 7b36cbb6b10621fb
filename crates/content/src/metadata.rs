use std::collections::HashMap;

use scraper::{Html, Selector};

/// Page-level metadata collected from `<head>`, independent of whichever
/// subtree `onlyMainContent`/`includeTags` retained (§4.C step "collect
/// metadata"): title, description, Open Graph tags, and declared language.
#[derive(Debug, Default, Clone)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
    pub extra: HashMap<String, String>,
}

pub fn collect(document: &Html) -> PageMetadata {
    let mut meta = PageMetadata::default();

    if let Ok(sel) = Selector::parse("title") {
        meta.title = document
            .select(&sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty());
    }

    if let Ok(sel) = Selector::parse("html") {
        meta.language = document
            .select(&sel)
            .next()
            .and_then(|el| el.value().attr("lang"))
            .map(|s| s.to_string());
    }

    if let Ok(sel) = Selector::parse("meta") {
        for el in document.select(&sel) {
            let value = el.value();
            let content = match value.attr("content") {
                Some(c) if !c.is_empty() => c.to_string(),
                _ => continue,
            };
            if let Some(name) = value.attr("name") {
                match name {
                    "description" => meta.description = Some(content.clone()),
                    _ => {
                        meta.extra.insert(name.to_string(), content.clone());
                    }
                }
                continue;
            }
            if let Some(prop) = value.attr("property") {
                if prop == "og:description" && meta.description.is_none() {
                    meta.description = Some(content.clone());
                }
                meta.extra.insert(prop.to_string(), content);
            }
        }
    }

    meta
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_title_description_and_language() {
        let html = r#"
            <html lang="en"><head>
                <title>Example Page</title>
                <meta name="description" content="An example.">
                <meta property="og:title" content="Example OG">
            </head><body></body></html>
        "#;
        let document = Html::parse_document(html);
        let meta = collect(&document);
        assert_eq!(meta.title.as_deref(), Some("Example Page"));
        assert_eq!(meta.description.as_deref(), Some("An example."));
        assert_eq!(meta.language.as_deref(), Some("en"));
        assert_eq!(meta.extra.get("og:title").map(|s| s.as_str()), Some("Example OG"));
    }
}
