use std::collections::HashSet;

use url::Url;

use scrapeforge_core::{CanonicalUrl, CrawlOptions};

const BINARY_EXTENSIONS: &[&str] = &[
    "pdf", "zip", "tar", "gz", "rar", "7z", "exe", "dmg", "mp4", "mp3", "wav", "avi", "mov", "mkv",
    "jpg", "jpeg", "png", "gif", "webp", "svg", "ico", "woff", "woff2", "ttf", "eot",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Scheme,
    ExternalDomain,
    BinaryMedia,
    RobotsDisallowed,
    PathNotIncluded,
    PathExcluded,
    DepthExceeded,
    AlreadySeen,
    BackwardLink,
}

/// Local (synchronous) admissibility rules of §4.D, excluding the
/// `robots.txt` check which requires I/O and is evaluated by the caller via
/// `RobotsCache` before a URL reaches the frontier.
pub struct Admissibility<'a> {
    pub root_host: &'a str,
    pub opts: &'a CrawlOptions,
}

impl<'a> Admissibility<'a> {
    pub fn new(root_host: &'a str, opts: &'a CrawlOptions) -> Self {
        Self { root_host, opts }
    }

    pub fn check(
        &self,
        url: &Url,
        canonical: &CanonicalUrl,
        depth: u32,
        root_path: Option<&str>,
        visited_or_enqueued: &HashSet<CanonicalUrl>,
    ) -> Result<(), Rejection> {
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Rejection::Scheme);
        }

        if !self.opts.allow_external_links && !self.is_same_site(url) {
            return Err(Rejection::ExternalDomain);
        }

        if is_binary_media(url) {
            return Err(Rejection::BinaryMedia);
        }

        if depth > self.opts.max_depth {
            return Err(Rejection::DepthExceeded);
        }

        let path = url.path();
        if !self.opts.include_paths.is_empty() && !matches_any(path, &self.opts.include_paths) {
            return Err(Rejection::PathNotIncluded);
        }
        if matches_any(path, &self.opts.exclude_paths) {
            return Err(Rejection::PathExcluded);
        }

        if !self.opts.allow_backward_links {
            if let Some(root_path) = root_path {
                if is_backward(root_path, path) {
                    return Err(Rejection::BackwardLink);
                }
            }
        }

        if visited_or_enqueued.contains(canonical) {
            return Err(Rejection::AlreadySeen);
        }

        Ok(())
    }

    fn is_same_site(&self, url: &Url) -> bool {
        match url.host_str() {
            Some(host) => host == self.root_host || host.ends_with(&format!(".{}", self.root_host)),
            None => false,
        }
    }
}

fn is_binary_media(url: &Url) -> bool {
    let path = url.path().to_lowercase();
    match path.rsplit_once('.') {
        Some((_, ext)) => BINARY_EXTENSIONS.contains(&ext),
        None => false,
    }
}

/// A glob-lite matcher: entries may end in `*` to mean "starts with", else
/// they're matched as an exact path prefix (§4.D `includePaths`/`excludePaths`).
fn matches_any(path: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| {
        if let Some(prefix) = pattern.strip_suffix('*') {
            path.starts_with(prefix)
        } else {
            path == pattern || path.starts_with(pattern.trim_end_matches('/'))
        }
    })
}

/// A "backward" link walks up out of the subtree the crawl *root* entered
/// from — anchored to the root's path, not the path of whichever page the
/// link was discovered on (spec.md §4.D: "the URL's path is a
/// prefix-extension of the **root's** path"). E.g. with root `/blog`,
/// discovering `/blog/posts/1` from anywhere in the crawl is forward, but
/// discovering `/about` is backward. Using the referring page's path
/// instead would wrongly reject ordinary sibling sections: a link from
/// `/section-a/page1` to `/section-b/page2` is backward relative to
/// `/section-a` but perfectly forward relative to a root of `/`.
///
/// Anchored on `root_path` itself, not on its parent directory: a target
/// is forward if it extends `root_path`, and backward unless it's an
/// ancestor of `root_path`. Truncating at the last `/` first (as a
/// previous version of this function did) breaks for any single-segment
/// root path with no trailing slash — `"/blog".rsplit_once('/')` yields
/// `("", "blog")`, collapsing the ancestor check to "starts with `\"\"`",
/// which is true of every path and admits everything.
fn is_backward(root_path: &str, target_path: &str) -> bool {
    !target_path.starts_with(root_path) && !root_path.starts_with(target_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrapeforge_core::CanonicalUrl;

    fn opts() -> CrawlOptions {
        CrawlOptions::default()
    }

    #[test]
    fn rejects_external_domain_by_default() {
        let o = opts();
        let admissibility = Admissibility::new("example.test", &o);
        let url = Url::parse("https://other.test/page").unwrap();
        let canonical = CanonicalUrl::from_canonical(url.to_string());
        let err = admissibility
            .check(&url, &canonical, 1, None, &HashSet::new())
            .unwrap_err();
        assert_eq!(err, Rejection::ExternalDomain);
    }

    #[test]
    fn rejects_binary_media() {
        let o = opts();
        let admissibility = Admissibility::new("example.test", &o);
        let url = Url::parse("https://example.test/file.pdf").unwrap();
        let canonical = CanonicalUrl::from_canonical(url.to_string());
        let err = admissibility
            .check(&url, &canonical, 1, None, &HashSet::new())
            .unwrap_err();
        assert_eq!(err, Rejection::BinaryMedia);
    }

    #[test]
    fn rejects_beyond_max_depth() {
        let mut o = opts();
        o.max_depth = 2;
        let admissibility = Admissibility::new("example.test", &o);
        let url = Url::parse("https://example.test/a").unwrap();
        let canonical = CanonicalUrl::from_canonical(url.to_string());
        let err = admissibility
            .check(&url, &canonical, 3, None, &HashSet::new())
            .unwrap_err();
        assert_eq!(err, Rejection::DepthExceeded);
    }

    #[test]
    fn rejects_duplicate_urls() {
        let o = opts();
        let admissibility = Admissibility::new("example.test", &o);
        let url = Url::parse("https://example.test/a").unwrap();
        let canonical = CanonicalUrl::from_canonical(url.to_string());
        let mut seen = HashSet::new();
        seen.insert(canonical.clone());
        let err = admissibility.check(&url, &canonical, 1, None, &seen).unwrap_err();
        assert_eq!(err, Rejection::AlreadySeen);
    }

    #[test]
    fn accepts_ordinary_internal_link() {
        let o = opts();
        let admissibility = Admissibility::new("example.test", &o);
        let url = Url::parse("https://example.test/blog/post-1").unwrap();
        let canonical = CanonicalUrl::from_canonical(url.to_string());
        assert!(admissibility.check(&url, &canonical, 1, None, &HashSet::new()).is_ok());
    }

    #[test]
    fn accepts_sibling_section_relative_to_root_even_from_a_different_sections_page() {
        // Root is "/": a page under /section-a linking to a page under
        // /section-b is a sibling section, not a backward link, regardless
        // of which page discovered it.
        let o = opts();
        let admissibility = Admissibility::new("example.test", &o);
        let url = Url::parse("https://example.test/section-b/page2").unwrap();
        let canonical = CanonicalUrl::from_canonical(url.to_string());
        let err = admissibility.check(&url, &canonical, 2, Some("/"), &HashSet::new());
        assert!(err.is_ok(), "expected sibling section to be admitted, got {err:?}");
    }

    #[test]
    fn rejects_link_climbing_above_a_non_root_crawl_root() {
        let o = opts();
        let admissibility = Admissibility::new("example.test", &o);
        let url = Url::parse("https://example.test/about").unwrap();
        let canonical = CanonicalUrl::from_canonical(url.to_string());
        let err = admissibility
            .check(&url, &canonical, 2, Some("/docs/api/"), &HashSet::new())
            .unwrap_err();
        assert_eq!(err, Rejection::BackwardLink);
    }

    #[test]
    fn rejects_link_climbing_above_a_single_segment_root_with_no_trailing_slash() {
        // Regression: a root URL like "https://example.test/blog" yields
        // root_path = "/blog" (no trailing slash) via Url::path() — the
        // exact shape that broke the old rsplit_once-based truncation.
        let o = opts();
        let admissibility = Admissibility::new("example.test", &o);
        let url = Url::parse("https://example.test/about").unwrap();
        let canonical = CanonicalUrl::from_canonical(url.to_string());
        let err = admissibility
            .check(&url, &canonical, 1, Some("/blog"), &HashSet::new())
            .unwrap_err();
        assert_eq!(err, Rejection::BackwardLink);
    }

    #[test]
    fn allow_backward_links_disables_the_check_entirely() {
        let mut o = opts();
        o.allow_backward_links = true;
        let admissibility = Admissibility::new("example.test", &o);
        let url = Url::parse("https://example.test/about").unwrap();
        let canonical = CanonicalUrl::from_canonical(url.to_string());
        assert!(admissibility
            .check(&url, &canonical, 2, Some("/docs/api/"), &HashSet::new())
            .is_ok());
    }
}
