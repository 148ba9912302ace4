//! PII scrubbing for inbound event content.
//!
//! Runs after the allowlists and before command dispatch or fan-out.
//! String values anywhere in the content map (nested maps and arrays
//! included) are rewritten in place; the total replacement count is
//! recorded on the event.

use regex::Regex;

/// One scrub category: a pattern and its replacement marker.
struct ScrubRule {
    pattern: Regex,
    replacement: &'static str,
}

/// The well-known-PII scrubber.
///
/// Categories: email addresses, card-like digit runs, SSN-like triplets,
/// and phone numbers. Order matters: card runs are scrubbed before
/// phone numbers so a 16-digit number is not half-eaten by the looser
/// phone pattern.
pub struct PiiScrubber {
    rules: Vec<ScrubRule>,
}

impl PiiScrubber {
    /// Build the scrubber with the built-in rule set.
    pub fn new() -> Self {
        let rules = vec![
            ScrubRule {
                pattern: Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
                    .expect("valid regex"),
                replacement: "[REDACTED-EMAIL]",
            },
            ScrubRule {
                pattern: Regex::new(r"\b\d(?:[ -]?\d){12,18}\b").expect("valid regex"),
                replacement: "[REDACTED-CARD]",
            },
            ScrubRule {
                pattern: Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("valid regex"),
                replacement: "[REDACTED-SSN]",
            },
            ScrubRule {
                pattern: Regex::new(r"\+?\d{1,3}[ .-]?\(?\d{2,4}\)?[ .-]?\d{3}[ .-]?\d{3,4}")
                    .expect("valid regex"),
                replacement: "[REDACTED-PHONE]",
            },
        ];
        Self { rules }
    }

    /// Scrub one string, returning the rewritten text and the number of
    /// replacements.
    pub fn scrub_text(&self, text: &str) -> (String, usize) {
        let mut current = text.to_string();
        let mut count = 0;
        for rule in &self.rules {
            let found = rule.pattern.find_iter(&current).count();
            if found > 0 {
                count += found;
                current = rule
                    .pattern
                    .replace_all(&current, rule.replacement)
                    .into_owned();
            }
        }
        (current, count)
    }

    /// Scrub every string value in a JSON value tree in place.
    /// Returns the total replacement count.
    pub fn scrub_value(&self, value: &mut serde_json::Value) -> usize {
        match value {
            serde_json::Value::String(s) => {
                let (scrubbed, count) = self.scrub_text(s);
                if count > 0 {
                    *s = scrubbed;
                }
                count
            }
            serde_json::Value::Object(map) => {
                map.values_mut().map(|v| self.scrub_value(v)).sum()
            }
            serde_json::Value::Array(items) => {
                items.iter_mut().map(|v| self.scrub_value(v)).sum()
            }
            _ => 0,
        }
    }
}

impl Default for PiiScrubber {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_are_redacted() {
        let scrubber = PiiScrubber::new();
        let (out, count) = scrubber.scrub_text("contact alice@example.com today");
        assert_eq!(out, "contact [REDACTED-EMAIL] today");
        assert_eq!(count, 1);
    }

    #[test]
    fn card_runs_are_redacted_before_phone_rule() {
        let scrubber = PiiScrubber::new();
        let (out, count) = scrubber.scrub_text("card 4111 1111 1111 1111 ok");
        assert_eq!(out, "card [REDACTED-CARD] ok");
        assert_eq!(count, 1);
    }

    #[test]
    fn ssn_and_phone() {
        let scrubber = PiiScrubber::new();
        let (out, _) = scrubber.scrub_text("ssn 123-45-6789");
        assert!(out.contains("[REDACTED-SSN]"));

        let (out, _) = scrubber.scrub_text("call +1 555 123 4567 now");
        assert!(out.contains("[REDACTED-PHONE]"));
    }

    #[test]
    fn clean_text_is_untouched() {
        let scrubber = PiiScrubber::new();
        let (out, count) = scrubber.scrub_text("start the deploy in room seven");
        assert_eq!(out, "start the deploy in room seven");
        assert_eq!(count, 0);
    }

    #[test]
    fn nested_content_is_scrubbed() {
        let scrubber = PiiScrubber::new();
        let mut value = serde_json::json!({
            "body": "mail bob@example.org",
            "meta": {
                "note": "and carol@example.org too",
                "tags": ["x", "dave@example.org"]
            },
            "n": 7
        });
        let count = scrubber.scrub_value(&mut value);
        assert_eq!(count, 3);
        assert_eq!(value["body"], "mail [REDACTED-EMAIL]");
        assert_eq!(value["meta"]["note"], "and [REDACTED-EMAIL] too");
        assert_eq!(value["meta"]["tags"][1], "[REDACTED-EMAIL]");
    }

    #[test]
    fn multiple_hits_are_all_counted() {
        let scrubber = PiiScrubber::new();
        let (_, count) = scrubber.scrub_text("a@x.com b@y.org 123-45-6789");
        assert_eq!(count, 3);
    }
}
