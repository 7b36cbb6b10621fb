use std::collections::HashSet;

use ego_tree::NodeId;
use scraper::{Html, Selector};

use crate::selection::text_under;

const CANDIDATE_TAGS: &[&str] = &["article", "main", "section", "div", "p"];
const HEADING_TAGS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6"];

/// A block-level element scored as a candidate for `onlyMainContent`
/// (§4.C). Score favors long runs of text with low link density; ties break
/// on earliest document order so the result is deterministic (testable
/// property 5, markdown determinism, depends on this).
fn score(document: &Html, id: NodeId, excluded: &HashSet<NodeId>) -> f64 {
    let text = text_under(document, id, excluded);
    let text_len = text.chars().count() as f64;
    if text_len == 0.0 {
        return 0.0;
    }

    let link_sel = Selector::parse("a").unwrap();
    let link_text_len: f64 = document
        .tree
        .get(id)
        .map(|node| {
            scraper::ElementRef::wrap(node)
                .map(|el| {
                    el.select(&link_sel)
                        .map(|a| a.text().collect::<String>().chars().count() as f64)
                        .sum::<f64>()
                })
                .unwrap_or(0.0)
        })
        .unwrap_or(0.0);

    let link_density = (link_text_len / text_len).min(1.0);
    text_len * (1.0 - link_density)
}

/// Picks the best-scoring candidate element under `roots`, per §4.C's
/// `onlyMainContent` step. Returns `None` (keep `roots` unchanged) when no
/// candidate scores above zero, e.g. an all-link or empty page.
///
/// The winning candidate's immediately preceding sibling is folded in when
/// it's a heading (`h1`-`h6`): a bare `<p>` chosen as the main block still
/// needs the `<h1>` sitting right above it in the same parent, or the title
/// is silently dropped even though it's plainly part of the same content
/// block (spec.md's literal S1 fixture: `<h1>Hi</h1><p>World</p>`).
pub fn pick_main_content(document: &Html, roots: &[NodeId], excluded: &HashSet<NodeId>) -> Option<Vec<NodeId>> {
    let mut best: Option<(NodeId, f64, usize)> = None;
    let mut order_index = 0usize;

    for &root in roots {
        let Some(root_node) = document.tree.get(root) else {
            continue;
        };
        for descendant in root_node.descendants() {
            order_index += 1;
            if excluded.contains(&descendant.id()) {
                continue;
            }
            let is_candidate = matches!(descendant.value(), scraper::Node::Element(el) if CANDIDATE_TAGS.contains(&el.name()));
            if !is_candidate {
                continue;
            }
            let s = score(document, descendant.id(), excluded);
            match &best {
                Some((_, best_score, _)) if *best_score >= s => {}
                _ => best = Some((descendant.id(), s, order_index)),
            }
        }
    }

    let (winner, _, _) = best.filter(|(_, s, _)| *s > 0.0)?;
    match preceding_heading_sibling(document, winner, excluded) {
        Some(heading) => Some(vec![heading, winner]),
        None => Some(vec![winner]),
    }
}

/// The nearest preceding sibling of `id` that's a heading element, skipping
/// whitespace-only text nodes, or `None` if anything else (a non-heading
/// element, non-blank text) sits between them.
fn preceding_heading_sibling(document: &Html, id: NodeId, excluded: &HashSet<NodeId>) -> Option<NodeId> {
    let mut sibling = document.tree.get(id)?.prev_sibling();
    while let Some(node) = sibling {
        if excluded.contains(&node.id()) {
            sibling = node.prev_sibling();
            continue;
        }
        match node.value() {
            scraper::Node::Element(el) if HEADING_TAGS.contains(&el.name()) => return Some(node.id()),
            scraper::Node::Text(text) if text.trim().is_empty() => {
                sibling = node.prev_sibling();
            }
            _ => return None,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::roots_for;

    #[test]
    fn prefers_dense_text_block_over_nav_links() {
        let html = r#"
            <html><body>
                <nav><a href="/a">a</a><a href="/b">b</a><a href="/c">c</a></nav>
                <main><p>This is a long paragraph of real article content about something interesting.</p></main>
            </body></html>
        "#;
        let document = Html::parse_document(html);
        let roots = roots_for(&document, &[]);
        let excluded = HashSet::new();
        let best = pick_main_content(&document, &roots, &excluded).expect("a candidate");
        assert_eq!(best.len(), 1);
        let text = text_under(&document, best[0], &excluded);
        assert!(text.contains("real article content"));
    }

    #[test]
    fn retains_heading_immediately_preceding_the_winning_paragraph() {
        let html = "<html><body><h1>Hi</h1><p>World</p></body></html>";
        let document = Html::parse_document(html);
        let roots = roots_for(&document, &[]);
        let excluded = HashSet::new();
        let best = pick_main_content(&document, &roots, &excluded).expect("a candidate");
        assert_eq!(best.len(), 2);
        let combined = best
            .iter()
            .map(|&id| text_under(&document, id, &excluded))
            .collect::<Vec<_>>()
            .join(" ");
        assert!(combined.contains("Hi"));
        assert!(combined.contains("World"));
    }
}
