use std::collections::HashSet;

use ego_tree::NodeId;
use scraper::{Html, Node, Selector};

/// Parses a comma/space-tolerant list of tag or CSS selectors from the API
/// (e.g. `excludeTags: ["script", "style", ".ad-banner"]`) into `Selector`s,
/// skipping any entry that fails to parse rather than failing the whole
/// extraction (§4.C).
pub fn parse_selectors(raw: &[String]) -> Vec<Selector> {
    raw.iter()
        .filter_map(|s| Selector::parse(s).ok())
        .collect()
}

/// Every node id in the subtree rooted at `id`, inclusive.
fn subtree_ids(document: &Html, id: NodeId, out: &mut HashSet<NodeId>) {
    if let Some(node) = document.tree.get(id) {
        out.insert(id);
        for child in node.children() {
            subtree_ids(document, child.id(), out);
        }
    }
}

/// Node ids to drop entirely during serialization: every element matched by
/// an `excludeTags` selector, plus its descendants (§4.C step "excludeTags").
pub fn excluded_ids(document: &Html, selectors: &[Selector]) -> HashSet<NodeId> {
    let mut excluded = HashSet::new();
    for sel in selectors {
        for el in document.select(sel) {
            subtree_ids(document, el.id(), &mut excluded);
        }
    }
    excluded
}

/// Adds `<img src="data:...">` elements to an existing exclusion set
/// (§4.C step "removeBase64Images", applied after structural selection).
pub fn exclude_base64_images(document: &Html, mut excluded: HashSet<NodeId>) -> HashSet<NodeId> {
    if let Ok(img_sel) = Selector::parse("img") {
        for el in document.select(&img_sel) {
            if el
                .value()
                .attr("src")
                .map(|src| src.trim_start().starts_with("data:"))
                .unwrap_or(false)
            {
                excluded.insert(el.id());
            }
        }
    }
    excluded
}

/// Roots to serialize from. With no `includeTags`, that's the `<body>`
/// element (falling back to the document root for fragments without one).
/// With `includeTags`, it's every top-level element matched by any include
/// selector — nested matches are folded into their outermost ancestor match
/// so a subtree isn't duplicated (§4.C step "includeTags").
pub fn roots_for(document: &Html, include_selectors: &[Selector]) -> Vec<NodeId> {
    if include_selectors.is_empty() {
        let body_sel = Selector::parse("body").unwrap();
        if let Some(body) = document.select(&body_sel).next() {
            return vec![body.id()];
        }
        return vec![document.tree.root().id()];
    }

    let mut matched: HashSet<NodeId> = HashSet::new();
    for sel in include_selectors {
        for el in document.select(sel) {
            matched.insert(el.id());
        }
    }

    let mut roots = Vec::new();
    for &id in &matched {
        let has_matched_ancestor = document
            .tree
            .get(id)
            .and_then(|n| n.parent())
            .map(|p| ancestors_contain(p, &matched))
            .unwrap_or(false);
        if !has_matched_ancestor {
            roots.push(id);
        }
    }
    // Preserve document order rather than HashSet iteration order.
    roots.sort_by_key(|id| document_order_index(document, *id));
    roots
}

fn ancestors_contain(mut node: ego_tree::NodeRef<Node>, matched: &HashSet<NodeId>) -> bool {
    loop {
        if matched.contains(&node.id()) {
            return true;
        }
        match node.parent() {
            Some(p) => node = p,
            None => return false,
        }
    }
}

fn document_order_index(document: &Html, id: NodeId) -> usize {
    document
        .tree
        .root()
        .descendants()
        .position(|n| n.id() == id)
        .unwrap_or(usize::MAX)
}

/// Serializes the given roots (skipping anything in `excluded`) back into an
/// HTML string, concatenating multiple roots in document order.
pub fn serialize_roots(document: &Html, roots: &[NodeId], excluded: &HashSet<NodeId>) -> String {
    let mut out = String::new();
    for &root in roots {
        if let Some(node) = document.tree.get(root) {
            serialize_node(node, excluded, &mut out);
        }
    }
    out
}

fn serialize_node(node: ego_tree::NodeRef<Node>, excluded: &HashSet<NodeId>, out: &mut String) {
    if excluded.contains(&node.id()) {
        return;
    }
    match node.value() {
        Node::Element(el) => {
            let name = el.name();
            out.push('<');
            out.push_str(name);
            for (attr_name, value) in el.attrs() {
                out.push(' ');
                out.push_str(attr_name);
                out.push_str("=\"");
                out.push_str(&value.replace('&', "&amp;").replace('"', "&quot;"));
                out.push('"');
            }
            out.push('>');
            for child in node.children() {
                serialize_node(child, excluded, out);
            }
            out.push_str("</");
            out.push_str(name);
            out.push('>');
        }
        Node::Text(text) => {
            out.push_str(&escape_text(text));
        }
        _ => {
            for child in node.children() {
                serialize_node(child, excluded, out);
            }
        }
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Plain text under the given roots, skipping excluded subtrees and
/// collapsing whitespace runs. Used by the readability scorer, which needs
/// text length and link density without going through Markdown first.
pub fn text_under(document: &Html, root: NodeId, excluded: &HashSet<NodeId>) -> String {
    let mut buf = String::new();
    if let Some(node) = document.tree.get(root) {
        collect_text(node, excluded, &mut buf);
    }
    buf.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn collect_text(node: ego_tree::NodeRef<Node>, excluded: &HashSet<NodeId>, out: &mut String) {
    if excluded.contains(&node.id()) {
        return;
    }
    match node.value() {
        Node::Text(text) => {
            out.push_str(text);
            out.push(' ');
        }
        _ => {
            for child in node.children() {
                collect_text(child, excluded, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excludes_script_and_descendants() {
        let html = r#"<html><body><p>keep</p><script>evil()</script></body></html>"#;
        let document = Html::parse_document(html);
        let selectors = parse_selectors(&[String::from("script")]);
        let excluded = excluded_ids(&document, &selectors);
        let roots = roots_for(&document, &[]);
        let out = serialize_roots(&document, &roots, &excluded);
        assert!(out.contains("keep"));
        assert!(!out.contains("evil"));
    }

    #[test]
    fn include_tags_keeps_only_matched_subtree() {
        let html = r#"<html><body><nav>nav</nav><main><p>Main</p></main><footer>f</footer></body></html>"#;
        let document = Html::parse_document(html);
        let selectors = parse_selectors(&[String::from("main")]);
        let roots = roots_for(&document, &selectors);
        let out = serialize_roots(&document, &roots, &HashSet::new());
        assert!(out.contains("Main"));
        assert!(!out.contains("nav"));
        assert!(!out.contains('f'));
    }
}
