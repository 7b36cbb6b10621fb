use scrapeforge_core::ScrapeOptions;

/// Converts cleaned HTML to Markdown (§4.C step "convert to Markdown").
/// Deliberately an opaque sub-interface: the pipeline only needs the
/// conversion to be pure and deterministic (testable property 5), not any
/// particular Markdown dialect, so tests can substitute a trivial stand-in.
pub trait MarkdownConverter: Send + Sync {
    fn convert(&self, clean_html: &str, opts: &ScrapeOptions) -> String;
}

/// Production converter, backed by `htmd`.
pub struct HtmdConverter;

impl MarkdownConverter for HtmdConverter {
    fn convert(&self, clean_html: &str, _opts: &ScrapeOptions) -> String {
        htmd::convert(clean_html).unwrap_or_default()
    }
}

#[cfg(test)]
pub struct RecordingConverter;

#[cfg(test)]
impl MarkdownConverter for RecordingConverter {
    fn convert(&self, clean_html: &str, _opts: &ScrapeOptions) -> String {
        clean_html.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn htmd_converts_heading_and_paragraph() {
        let converter = HtmdConverter;
        let opts = ScrapeOptions::default();
        let md = converter.convert("<h1>Hi</h1><p>World</p>", &opts);
        assert_eq!(md.trim(), "# Hi\n\nWorld");
    }

    #[test]
    fn same_input_converts_identically_every_time() {
        let converter = HtmdConverter;
        let opts = ScrapeOptions::default();
        let a = converter.convert("<p>stable</p>", &opts);
        let b = converter.convert("<p>stable</p>", &opts);
        assert_eq!(a, b);
    }
}
