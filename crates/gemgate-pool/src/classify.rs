use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Daily quota used up; the key sleeps until the next quota reset.
    QuotaExceeded,
    /// Short-window throttling.
    RateLimited,
    /// The credential itself is rejected; only a manual reset brings it back.
    AuthInvalid,
    Generic,
}

pub trait FailureClassifier: Send + Sync {
    fn classify(&self, message: &str) -> FailureKind;
}

type Predicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

const QUOTA_PATTERNS: &[&str] = &[
    "quota",
    "resource exhausted",
    "resource_exhausted",
    "limit reached",
];

const RATE_LIMIT_PATTERNS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "too many requests",
    "slow down",
];

const AUTH_PATTERNS: &[&str] = &[
    "invalid api key",
    "api key not valid",
    "api_key_invalid",
    "unauthorized",
    "permission denied",
    "permission_denied",
];

/// Ordered `(predicate, kind)` rules over the lowercased error text; the
/// first match wins, and no match means [`FailureKind::Generic`].
#[derive(Clone)]
pub struct RuleClassifier {
    rules: Vec<(Predicate, FailureKind)>,
}

impl RuleClassifier {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn rule<F>(mut self, predicate: F, kind: FailureKind) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.rules.push((Arc::new(predicate), kind));
        self
    }

    /// Matches when any of `patterns` occurs in the lowercased message.
    pub fn patterns(self, patterns: &'static [&'static str], kind: FailureKind) -> Self {
        self.rule(
            move |message| patterns.iter().any(|pattern| message.contains(pattern)),
            kind,
        )
    }

    /// Matches when the message carries an `HTTP <code>` marker with one of
    /// `codes`. Bare digits elsewhere in the text never match.
    pub fn statuses(self, codes: &'static [u16], kind: FailureKind) -> Self {
        self.rule(
            move |message| http_status(message).is_some_and(|code| codes.contains(&code)),
            kind,
        )
    }
}

/// Three-digit status after the first `http ` marker, e.g. `upstream returned http 429: ...`.
fn http_status(message: &str) -> Option<u16> {
    message.match_indices("http ").find_map(|(at, marker)| {
        let rest = &message[at + marker.len()..];
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 3 {
            rest[..3].parse().ok()
        } else {
            None
        }
    })
}

impl Default for RuleClassifier {
    fn default() -> Self {
        Self::empty()
            .patterns(QUOTA_PATTERNS, FailureKind::QuotaExceeded)
            .patterns(RATE_LIMIT_PATTERNS, FailureKind::RateLimited)
            .statuses(&[429], FailureKind::RateLimited)
            .patterns(AUTH_PATTERNS, FailureKind::AuthInvalid)
            .statuses(&[401, 403], FailureKind::AuthInvalid)
    }
}

impl fmt::Debug for RuleClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleClassifier")
            .field("rules", &self.rules.len())
            .finish()
    }
}

impl FailureClassifier for RuleClassifier {
    fn classify(&self, message: &str) -> FailureKind {
        let message = message.to_lowercase();
        self.rules
            .iter()
            .find(|(predicate, _)| predicate(&message))
            .map(|(_, kind)| *kind)
            .unwrap_or(FailureKind::Generic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rules() {
        let classifier = RuleClassifier::default();
        let cases = [
            (
                "HTTP 429: Quota exceeded for metric generate_content_free_tier_requests",
                FailureKind::QuotaExceeded,
            ),
            ("RESOURCE_EXHAUSTED", FailureKind::QuotaExceeded),
            ("HTTP 429 Too Many Requests", FailureKind::RateLimited),
            ("please slow down", FailureKind::RateLimited),
            (
                "HTTP 400: API key not valid. Please pass a valid API key.",
                FailureKind::AuthInvalid,
            ),
            ("HTTP 403: PERMISSION_DENIED", FailureKind::AuthInvalid),
            ("upstream returned HTTP 429: busy", FailureKind::RateLimited),
            ("upstream returned HTTP 401: nope", FailureKind::AuthInvalid),
            ("upstream returned HTTP 403: forbidden", FailureKind::AuthInvalid),
            ("deadline exceeded", FailureKind::Generic),
            ("connection reset by peer", FailureKind::Generic),
        ];
        for (message, expected) in cases {
            assert_eq!(classifier.classify(message), expected, "{message}");
        }
    }

    #[test]
    fn custom_rules_are_ranked_in_insertion_order() {
        let classifier = RuleClassifier::empty()
            .rule(|message| message.starts_with("http 503"), FailureKind::RateLimited)
            .patterns(&["503"], FailureKind::AuthInvalid);
        assert_eq!(
            classifier.classify("HTTP 503 overloaded"),
            FailureKind::RateLimited
        );
        assert_eq!(classifier.classify("got 503"), FailureKind::AuthInvalid);
        assert_eq!(classifier.classify("quota"), FailureKind::Generic);
    }

    #[test]
    fn status_digits_outside_the_http_marker_do_not_match() {
        let classifier = RuleClassifier::default();
        let cases = [
            "malformed upstream payload: EOF while parsing an object at line 401 column 0",
            "malformed upstream payload: expected value at line 1 column 429",
            "upstream connect error: dial 10.0.0.403:443 refused",
            "upstream returned HTTP 500: request 4290 failed",
            "upstream returned HTTP 4030: odd",
        ];
        for message in cases {
            assert_eq!(classifier.classify(message), FailureKind::Generic, "{message}");
        }
    }
}
