//! Phone-number redaction.
//!
//! All supported formats live in one alternation so a single leftmost-first
//! pass decides every match. Alternatives are ordered longest first, which
//! makes the winner deterministic when two formats could start at the same
//! offset.

use std::sync::LazyLock;

use regex::Regex;

/// Replacement for every redacted span. Contains no digits, so redacting
/// already-redacted text is a no-op.
pub const PLACEHOLDER: &str = "[REDACTED]";

const PHONE_PATTERN: &str = r"(?x)
    \(\d{3}\)[\s.-]?\d{3}[\s.-]\d{4}\b      # (555) 123-4567
  | \b\d{3}[\s.-]?\d{3}[\s.-]?\d{4}\b       # 555-123-4567, 555.123.4567, 5551234567
  | \b\d{3}[\s.-]\d{4}\b                    # 555-0199
";

static PHONE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PHONE_PATTERN).expect("phone pattern is a valid regex"));

/// Result of a redaction pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redaction {
    pub text: String,
    /// Number of spans replaced.
    pub count: usize,
}

/// Stateless phone-number redactor.
#[derive(Debug, Clone, Copy, Default)]
pub struct Redactor;

impl Redactor {
    pub fn new() -> Self {
        Self
    }

    /// Replace every phone-number-shaped substring with [`PLACEHOLDER`].
    pub fn redact(&self, text: &str) -> String {
        PHONE_REGEX.replace_all(text, PLACEHOLDER).into_owned()
    }

    /// Like [`Redactor::redact`], also reporting how many spans were replaced.
    pub fn redact_counted(&self, text: &str) -> Redaction {
        let count = PHONE_REGEX.find_iter(text).count();
        let text = if count == 0 {
            text.to_string()
        } else {
            self.redact(text)
        };
        Redaction { text, count }
    }
}

/// Convenience wrapper around [`Redactor::redact`].
pub fn redact(text: &str) -> String {
    Redactor.redact(text)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn lowercase(text: &str) -> String {
        text.chars().filter(char::is_ascii_lowercase).collect()
    }

    // Digits, separators and parentheses mixed with words, so phone-shaped
    // runs show up often.
    fn arb_log_text() -> impl Strategy<Value = String> {
        "[0-9 .()a-z-]{0,48}"
    }

    proptest! {
        #[test]
        fn redaction_is_idempotent_for_any_text(text in arb_log_text()) {
            let once = redact(&text);
            prop_assert_eq!(redact(&once), once);
        }

        #[test]
        fn words_survive_redaction(text in arb_log_text()) {
            let out = redact(&text).replace(PLACEHOLDER, "");
            prop_assert_eq!(lowercase(&out), lowercase(&text));
        }

        #[test]
        fn digit_free_text_is_untouched(text in "[a-z .,()-]{0,48}") {
            prop_assert_eq!(redact(&text), text);
        }

        #[test]
        fn counted_matches_plain(text in arb_log_text()) {
            let counted = Redactor::new().redact_counted(&text);
            prop_assert_eq!(&counted.text, &redact(&text));
            prop_assert_eq!(counted.count, counted.text.matches(PLACEHOLDER).count());
        }
    }
}
