use std::collections::HashSet;

use ego_tree::NodeId;
use scraper::{Html, Selector};
use url::Url;

/// Ordered, de-duplicated `<a href>` targets under the retained subtree,
/// resolved against `final_url` (§4.C steps "resolve URLs" then "collect
/// links" — resolution happens first so relative and absolute forms of the
/// same target collapse to one entry).
pub fn collect_links(document: &Html, roots: &[NodeId], excluded: &HashSet<NodeId>, final_url: &Url) -> Vec<String> {
    let Ok(sel) = Selector::parse("a") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for &root in roots {
        let Some(root_node) = document.tree.get(root) else {
            continue;
        };
        let Some(root_el) = scraper::ElementRef::wrap(root_node) else {
            continue;
        };
        for a in root_el.select(&sel) {
            if excluded.contains(&a.id()) {
                continue;
            }
            let Some(href) = a.value().attr("href") else {
                continue;
            };
            let href = href.trim();
            if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
                continue;
            }
            let Ok(resolved) = final_url.join(href) else {
                continue;
            };
            let normalized = resolved.as_str().to_string();
            if seen.insert(normalized.clone()) {
                links.push(normalized);
            }
        }
    }

    links
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::roots_for;

    #[test]
    fn resolves_and_dedups_relative_links() {
        let html = r#"<html><body><a href="/a">a</a><a href="/a">dup</a><a href="https://other.test/b">b</a></body></html>"#;
        let document = Html::parse_document(html);
        let roots = roots_for(&document, &[]);
        let final_url = Url::parse("https://example.test/page").unwrap();
        let links = collect_links(&document, &roots, &HashSet::new(), &final_url);
        assert_eq!(links, vec!["https://example.test/a", "https://other.test/b"]);
    }
}
