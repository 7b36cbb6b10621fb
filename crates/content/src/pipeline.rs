use std::collections::HashMap;

use scraper::Html;
use url::Url;

use scrapeforge_core::ScrapeOptions;

use crate::extract::Extractor;
use crate::links::collect_links;
use crate::markdown::MarkdownConverter;
use crate::metadata;
use crate::readability::pick_main_content;
use crate::selection::{excluded_ids, exclude_base64_images, parse_selectors, roots_for, serialize_roots};
use crate::text::derive_text;

/// Everything a scrape needs to populate a `Document` (§3), produced by one
/// `Pipeline::run` call.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub clean_html: String,
    pub markdown: String,
    pub text: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
    pub links: Vec<String>,
    pub metadata: HashMap<String, String>,
    pub extract: Option<serde_json::Value>,
    pub extract_error: Option<String>,
}

/// Runs the fixed-order content pipeline of §4.C over one fetched document.
/// Stage order is load-bearing: `excludeTags` always runs before
/// `includeTags`, which always runs before `onlyMainContent`, and
/// `removeBase64Images` is applied last among the structural filters so it
/// can't be undone by a later inclusion step.
pub struct Pipeline<'a> {
    pub markdown_converter: &'a dyn MarkdownConverter,
    pub extractor: &'a dyn Extractor,
}

impl<'a> Pipeline<'a> {
    pub fn new(markdown_converter: &'a dyn MarkdownConverter, extractor: &'a dyn Extractor) -> Self {
        Self {
            markdown_converter,
            extractor,
        }
    }

    pub fn run(&self, raw_html: &str, opts: &ScrapeOptions, final_url: &Url) -> PipelineOutput {
        let document = Html::parse_document(raw_html);

        let exclude_selectors = parse_selectors(&opts.exclude_tags);
        let include_selectors = parse_selectors(&opts.include_tags);

        let mut excluded = excluded_ids(&document, &exclude_selectors);
        let mut roots = roots_for(&document, &include_selectors);

        if opts.only_main_content {
            if let Some(main_roots) = pick_main_content(&document, &roots, &excluded) {
                roots = main_roots;
            }
        }

        if opts.remove_base64_images {
            excluded = exclude_base64_images(&document, excluded);
        }

        let clean_html = serialize_roots(&document, &roots, &excluded);
        let links = collect_links(&document, &roots, &excluded, final_url);
        let page_meta = metadata::collect(&document);

        let markdown = self.markdown_converter.convert(&clean_html, opts);
        let text = derive_text(&markdown);

        let (extract, extract_error) = match &opts.extract {
            Some(extract_opts) => match self.extractor.extract(&text, extract_opts) {
                Ok(value) => (Some(value), None),
                Err(e) => (None, Some(e)),
            },
            None => (None, None),
        };

        PipelineOutput {
            clean_html,
            markdown,
            text,
            title: page_meta.title,
            description: page_meta.description,
            language: page_meta.language,
            links,
            metadata: page_meta.extra,
            extract,
            extract_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::NullExtractor;
    use crate::markdown::HtmdConverter;

    fn run(html: &str, opts: ScrapeOptions) -> PipelineOutput {
        let converter = HtmdConverter;
        let extractor = NullExtractor;
        let pipeline = Pipeline::new(&converter, &extractor);
        let final_url = Url::parse("https://example.test/page").unwrap();
        pipeline.run(html, &opts, &final_url)
    }

    #[test]
    fn s1_basic_document_produces_expected_markdown() {
        // Defaults per spec.md S1 ("with defaults"): only_main_content is
        // true out of the box (crates/core/src/types.rs), so this exercises
        // the readability path, not a bypass of it.
        let opts = ScrapeOptions::default();
        let out = run("<html><body><h1>Hi</h1><p>World</p></body></html>", opts);
        assert_eq!(out.markdown.trim(), "# Hi\n\nWorld");
    }

    #[test]
    fn s2_only_main_content_picks_main_over_nav_and_footer() {
        let html = r#"
            <html><body>
                <nav><a href="/x">x</a><a href="/y">y</a></nav>
                <main><h1>Main</h1></main>
                <footer>copyright</footer>
            </body></html>
        "#;
        let mut opts = ScrapeOptions::default();
        opts.only_main_content = true;
        let out = run(html, opts);
        assert_eq!(out.markdown.trim(), "# Main");
    }

    #[test]
    fn s3_exclude_tags_strips_script_and_style() {
        let html = r#"<html><body><p>keep</p><script>evil()</script><style>.evil{}</style></body></html>"#;
        let mut opts = ScrapeOptions::default();
        opts.only_main_content = false;
        opts.exclude_tags = vec!["script".into(), "style".into()];
        let out = run(html, opts);
        assert!(!out.markdown.contains("evil"));
        assert!(out.markdown.contains("keep"));
    }

    #[test]
    fn links_are_resolved_against_final_url() {
        let html = r#"<html><body><p><a href="/about">About</a></p></body></html>"#;
        let mut opts = ScrapeOptions::default();
        opts.only_main_content = false;
        let out = run(html, opts);
        assert_eq!(out.links, vec!["https://example.test/about"]);
    }

    #[test]
    fn metadata_is_collected_from_head_regardless_of_main_content_selection() {
        let html = r#"
            <html lang="en"><head><title>T</title><meta name="description" content="D."></head>
            <body><main><p>body</p></main></body></html>
        "#;
        let mut opts = ScrapeOptions::default();
        opts.only_main_content = true;
        let out = run(html, opts);
        assert_eq!(out.title.as_deref(), Some("T"));
        assert_eq!(out.description.as_deref(), Some("D."));
        assert_eq!(out.language.as_deref(), Some("en"));
    }
}
