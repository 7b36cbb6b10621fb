use std::collections::HashSet;

use url::Url;

use scrapeforge_core::CanonicalUrl;

/// Hosts where query parameter order is known to be meaningful (e.g. a
/// cursor/pagination token where swapping positions changes the page), so
/// sorting would merge distinct pages into one canonical form. Open
/// Question from §9: resolved by keeping this a small explicit override
/// table rather than a heuristic, since the failure mode (wrongly merging
/// two different pages) is worse than the failure mode of a stray
/// duplicate.
const PRESERVE_QUERY_ORDER_HOSTS: &[&str] = &[];

/// Normalizes a URL to the canonical form used for dedup and storage (§3,
/// §4.D): lowercase scheme and host, default ports stripped, fragment
/// dropped, query parameters sorted by key unless the host opts out.
///
/// Idempotent: `canonicalize(canonicalize(u)) == canonicalize(u)` (testable
/// property 1).
pub fn canonicalize(url: &Url) -> CanonicalUrl {
    let mut normalized = url.clone();

    let _ = normalized.set_scheme(&url.scheme().to_lowercase());

    if let Some(host) = url.host_str() {
        let _ = normalized.set_host(Some(&host.to_lowercase()));
    }

    let is_default_port = matches!(
        (url.scheme(), url.port()),
        ("http", Some(80)) | ("https", Some(443))
    );
    if is_default_port {
        let _ = normalized.set_port(None);
    }

    normalized.set_fragment(None);

    let decoded_path = percent_decode_reencode(normalized.path());
    normalized.set_path(&decoded_path);

    let host = url.host_str().unwrap_or("");
    if !PRESERVE_QUERY_ORDER_HOSTS.contains(&host) {
        if let Some(query) = normalized.query() {
            let sorted = sort_query(query);
            if sorted.is_empty() {
                normalized.set_query(None);
            } else {
                normalized.set_query(Some(&sorted));
            }
        }
    }

    CanonicalUrl::from_canonical(normalized.to_string())
}

fn percent_decode_reencode(path: &str) -> String {
    let decoded = percent_decode(path);
    // Re-encoding happens implicitly: `Url::set_path` percent-encodes any
    // character that needs it, so round-tripping through a decoded string
    // yields one canonical encoding regardless of the input's original
    // encoding style (`%2F` vs `/`, mixed case hex digits, etc).
    decoded
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(hex) = std::str::from_utf8(&bytes[i + 1..i + 3]) {
                if let Ok(byte) = u8::from_str_radix(hex, 16) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn sort_query(query: &str) -> String {
    let mut pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut seen: HashSet<(String, String)> = HashSet::new();
    pairs.retain(|pair| seen.insert(pair.clone()));

    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_is_idempotent() {
        let url = Url::parse("HTTPS://Example.com:443/a/b/../c?z=1&a=2#frag").unwrap();
        let once = canonicalize(&url);
        let twice = canonicalize(&Url::parse(once.as_str()).unwrap());
        assert_eq!(once.as_str(), twice.as_str());
    }

    #[test]
    fn strips_default_port_and_fragment() {
        let url = Url::parse("http://example.com:80/page#section").unwrap();
        let canonical = canonicalize(&url);
        assert_eq!(canonical.as_str(), "http://example.com/page");
    }

    #[test]
    fn sorts_query_parameters() {
        let a = canonicalize(&Url::parse("https://example.com/p?b=2&a=1").unwrap());
        let b = canonicalize(&Url::parse("https://example.com/p?a=1&b=2").unwrap());
        assert_eq!(a.as_str(), b.as_str());
    }

    #[test]
    fn lowercases_scheme_and_host() {
        let canonical = canonicalize(&Url::parse("HTTPS://Example.COM/Path").unwrap());
        assert!(canonical.as_str().starts_with("https://example.com"));
    }
}
