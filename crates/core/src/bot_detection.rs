/// Detect bot-challenge / DDoS-protection interstitials in a fetched body.
/// Per §4.A, such responses are treated as `InvalidContent`, which the
/// fetcher selector then folds into `Blocked` (§4.B rule 3).
pub fn is_bot_challenge(body_text: &str, html_size: usize) -> bool {
    if html_size < 500 {
        let body_lower = body_text.to_lowercase();
        if body_lower.contains("wait") || body_lower.contains("loading") || body_lower.contains("redirect") {
            return true;
        }
    }

    let body_lower = body_text.to_lowercase();

    let challenge_keywords = [
        "please wait",
        "just a moment",
        "checking your browser",
        "ddos protection",
        "cloudflare",
        "verifying you are human",
        "cf-turnstile",
        "g-recaptcha",
        "h-captcha",
        "access denied",
    ];

    for keyword in challenge_keywords {
        if body_lower.contains(keyword) {
            return true;
        }
    }

    if html_size < 1000 && body_lower.contains("redirect") {
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_common_challenge_pages() {
        assert!(is_bot_challenge("Please Wait...", 14));
        assert!(is_bot_challenge("Checking your browser before accessing", 200));
        assert!(is_bot_challenge("cf-turnstile widget here", 300));
        assert!(!is_bot_challenge("This is a normal page with lots of content", 5000));
    }
}
