use regex::Regex;

use crate::textops::{count_ignore_case, subn};

// Tag names come from the rule catalogue as plain ASCII literals, so the
// composed patterns are statically valid.
fn tag_pattern(pattern: &str) -> Regex {
    Regex::new(pattern).expect("tag pattern")
}

/// Verifies that every `<tag>` has a matching `</tag>` in document order.
///
/// The running balance must never go negative, must never exceed one unless
/// `nesting_allowed` is set, and must end at zero.
pub fn check_tag_balance(text: &str, tag: &str, nesting_allowed: bool) -> bool {
    let finder = tag_pattern(&[r"(?i)<(/?)\s*", tag, r"\b"].concat());
    let mut balance = 0i32;
    for caps in finder.captures_iter(text) {
        if caps[1].is_empty() {
            balance += 1;
        } else {
            balance -= 1;
        }
        if balance < 0 {
            return false;
        }
        if !nesting_allowed && balance > 1 {
            return false;
        }
    }
    balance == 0
}

/// Canonicalizes every spelling variant of an unpaired tag (`<br/>`, `</br>`,
/// `<br \>`, ...) to `<tag>`. Instances already canonical are not counted.
pub fn fix_unpaired_tag(text: &str, tag: &str) -> (String, usize) {
    let canonical = format!("<{tag}>");
    let variants = tag_pattern(&[r"(?i)<[/\\]?[ ]*", tag, r"[ ]*[/\\]?>"].concat());

    let already = count_ignore_case(text, &canonical);
    let (text, replaced) = subn(&variants, &canonical, text);
    (text, replaced.saturating_sub(already))
}

/// Rewrites self-closing and backslash variants of a paired tag to the
/// canonical closing form, committing only if the result passes
/// [`check_tag_balance`]. On failure the whole rewrite is reverted; a partial
/// fix could silently swallow content.
pub fn fix_paired_tag(text: &str, tag: &str, nesting_allowed: bool) -> (String, usize) {
    let closing = format!("</{tag}>");
    let self_closing = tag_pattern(&[r"(?i)<[ ]*", tag, r"[ ]*[/\\]>"].concat());
    let backslash_open = tag_pattern(&[r"(?i)<\\[ ]*", tag, r"[ ]*>"].concat());

    let (fixed, count_a) = subn(&self_closing, &closing, text);
    let (fixed, count_b) = subn(&backslash_open, &closing, &fixed);

    if check_tag_balance(&fixed, tag, nesting_allowed) {
        (fixed, count_a + count_b)
    } else {
        (text.to_string(), 0)
    }
}
