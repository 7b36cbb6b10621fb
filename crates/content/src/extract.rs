use scrapeforge_core::ExtractOptions;

/// Structured extraction over already-derived text (§4.C step "extract",
/// optional). An opaque sub-interface, same reasoning as `MarkdownConverter`:
/// the pipeline doesn't care whether this is schema-guided regex, an LLM
/// call, or nothing at all, only that it returns a JSON value or an error.
pub trait Extractor: Send + Sync {
    fn extract(&self, text: &str, opts: &ExtractOptions) -> Result<serde_json::Value, String>;
}

/// Default extractor when no extraction backend is configured: always fails,
/// so the pipeline surfaces `extract_error` rather than silently returning
/// `null` for a format the caller explicitly asked for.
pub struct NullExtractor;

impl Extractor for NullExtractor {
    fn extract(&self, _text: &str, _opts: &ExtractOptions) -> Result<serde_json::Value, String> {
        Err("no extraction backend configured".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_extractor_always_errors() {
        let extractor = NullExtractor;
        let opts = ExtractOptions::default();
        assert!(extractor.extract("some text", &opts).is_err());
    }
}
