use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Placeholder delimiters. Control bytes outside the range MediaWiki accepts
/// in page content, so a placeholder can never collide with real wikitext.
pub const PLACEHOLDER_PREFIX: char = '\u{1}';
pub const PLACEHOLDER_SUFFIX: char = '\u{2}';

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new("\u{1}([0-9]+)\u{2}").expect("placeholder pattern"));

/// Ordered record of the substrings one [`mask`] pass hid behind placeholders.
#[derive(Debug, Clone, Default)]
pub struct MaskLedger {
    spans: Vec<String>,
}

impl MaskLedger {
    fn hide(&mut self, span: &str) -> String {
        let token = format!(
            "{}{}{}",
            PLACEHOLDER_PREFIX,
            self.spans.len(),
            PLACEHOLDER_SUFFIX
        );
        self.spans.push(span.to_string());
        token
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

/// Replaces every match of `pattern` with an opaque placeholder and records
/// the hidden substring in the returned ledger.
///
/// Masking is re-entrant: placeholders already present in `text` (from an
/// enclosing mask pass, or pathological input that happens to look like one)
/// are re-masked first, so `pattern` can never split or rewrite a token.
pub fn mask(text: &str, pattern: &Regex) -> (String, MaskLedger) {
    let mut ledger = MaskLedger::default();
    let text = PLACEHOLDER.replace_all(text, |caps: &Captures| ledger.hide(&caps[0]));
    let text = pattern.replace_all(&text, |caps: &Captures| ledger.hide(&caps[0]));
    (text.into_owned(), ledger)
}

/// Restores the text produced by [`mask`]. Left inverse of `mask` for any
/// input: `unmask(mask(t, p)) == t`. A token whose index is not covered by
/// the ledger is left in place rather than dropped.
pub fn unmask(text: &str, ledger: &MaskLedger) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures| {
            match caps[1].parse::<usize>().ok().and_then(|i| ledger.spans.get(i)) {
                Some(span) => span.clone(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use once_cell::sync::Lazy;
    use regex::Regex;

    use super::{MaskLedger, mask, unmask};

    static COMMENTS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());

    #[test]
    fn round_trip_restores_protected_spans() {
        let text = "before <!-- hidden [[Category:X]] --> after <!--2-->";
        let (masked, ledger) = mask(text, &COMMENTS);
        assert!(!masked.contains("hidden"));
        assert_eq!(ledger.len(), 2);
        assert_eq!(unmask(&masked, &ledger), text);
    }

    #[test]
    fn round_trip_with_placeholder_shaped_input() {
        let text = "weird \u{1}0\u{2} and \u{1}99\u{2} bytes <!-- c -->";
        let (masked, ledger) = mask(text, &COMMENTS);
        // pre-existing tokens were re-masked, so the comment pattern saw none
        assert_eq!(ledger.len(), 3);
        assert_eq!(unmask(&masked, &ledger), text);
    }

    #[test]
    fn nested_mask_calls_compose() {
        let inner = Regex::new(r"\[\[.*?\]\]").unwrap();
        let text = "a <!-- x --> [[Link]] b";
        let (outer_masked, outer_ledger) = mask(text, &COMMENTS);
        let (inner_masked, inner_ledger) = mask(&outer_masked, &inner);
        let restored = unmask(&inner_masked, &inner_ledger);
        assert_eq!(restored, outer_masked);
        assert_eq!(unmask(&restored, &outer_ledger), text);
    }

    #[test]
    fn placeholder_indices_start_at_zero_and_increase() {
        let (masked, _) = mask("<!--a--> mid <!--b-->", &COMMENTS);
        assert_eq!(masked, "\u{1}0\u{2} mid \u{1}1\u{2}");
    }

    #[test]
    fn unmask_leaves_stray_tokens_alone() {
        let ledger = MaskLedger::default();
        assert_eq!(unmask("text \u{1}5\u{2} more", &ledger), "text \u{1}5\u{2} more");
    }
}
