/// Derives plain text from Markdown (§4.C step "derive text") by stripping
/// the common inline/block markers rather than re-parsing. Good enough for
/// an index/search surface; not meant to be a full Markdown AST walk.
pub fn derive_text(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len());
    for line in markdown.lines() {
        let mut line = line.trim();
        line = line.trim_start_matches(|c| c == '#').trim_start();
        if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
            line = rest;
        }
        if let Some(rest) = line.strip_prefix("> ") {
            line = rest;
        }
        let stripped = strip_inline_markers(line);
        if !stripped.is_empty() {
            out.push_str(&stripped);
            out.push('\n');
        }
    }
    out.trim_end().to_string()
}

fn strip_inline_markers(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' | '_' | '`' => continue,
            '[' => {
                // Markdown link: emit the label, drop the `(url)`.
                let mut label = String::new();
                for lc in chars.by_ref() {
                    if lc == ']' {
                        break;
                    }
                    label.push(lc);
                }
                out.push_str(&label);
                if chars.peek() == Some(&'(') {
                    chars.next();
                    for lc in chars.by_ref() {
                        if lc == ')' {
                            break;
                        }
                    }
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_heading_and_emphasis_markers() {
        let text = derive_text("# Hi\n\n**World**, *this* is `code`.");
        assert_eq!(text, "Hi\nWorld, this is code.");
    }

    #[test]
    fn strips_link_syntax_to_label() {
        let text = derive_text("See [the docs](https://example.test/docs) for more.");
        assert_eq!(text, "See the docs for more.");
    }
}
