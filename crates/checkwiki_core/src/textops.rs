use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use regex::{Captures, Regex};

use crate::masking::{mask, unmask};

/// Ceiling on total replacements for the fixed-point helpers. A sane pattern
/// converges in a handful of passes; hitting this means the replacement
/// regenerates its own trigger.
pub const DEFAULT_MAX_REPLACEMENTS: usize = 10_000;

/// Single substitution pass returning the replacement count alongside the
/// text. `replacement` uses the usual `$1`/`${1}` group expansion.
pub fn subn(pattern: &Regex, replacement: &str, text: &str) -> (String, usize) {
    let count = pattern.find_iter(text).count();
    if count == 0 {
        return (text.to_string(), 0);
    }
    (pattern.replace_all(text, replacement).into_owned(), count)
}

/// Single substitution pass driven by a closure. Returning `None` keeps the
/// match untouched and uncounted; only `Some` replacements count.
pub fn subn_map<F>(pattern: &Regex, text: &str, mut replace: F) -> (String, usize)
where
    F: FnMut(&Captures) -> Option<String>,
{
    let mut count = 0usize;
    let out = pattern.replace_all(text, |caps: &Captures| match replace(caps) {
        Some(replacement) => {
            count += 1;
            replacement
        }
        None => caps[0].to_string(),
    });
    (out.into_owned(), count)
}

/// Re-applies `pattern -> replacement` until a pass makes no replacement,
/// returning the cumulative count. `max_total` caps the total number of
/// replacements; `None` uses [`DEFAULT_MAX_REPLACEMENTS`].
pub fn subn_until_stable(
    pattern: &Regex,
    replacement: &str,
    text: &str,
    max_total: Option<usize>,
) -> (String, usize) {
    let cap = max_total.unwrap_or(DEFAULT_MAX_REPLACEMENTS);
    let mut current = text.to_string();
    let mut total = 0usize;
    while total < cap {
        let mut pass = 0usize;
        let next = pattern
            .replacen(&current, cap - total, |caps: &Captures| {
                pass += 1;
                let mut expanded = String::new();
                caps.expand(replacement, &mut expanded);
                expanded
            })
            .into_owned();
        if pass == 0 {
            break;
        }
        total += pass;
        current = next;
    }
    (current, total)
}

/// Closure-driven variant of [`subn_until_stable`]. The cap is checked
/// between passes, so a pass may overshoot it by its own match count.
pub fn subn_map_until_stable<F>(
    pattern: &Regex,
    text: &str,
    mut replace: F,
    max_total: Option<usize>,
) -> (String, usize)
where
    F: FnMut(&Captures) -> Option<String>,
{
    let cap = max_total.unwrap_or(DEFAULT_MAX_REPLACEMENTS);
    let mut current = text.to_string();
    let mut total = 0usize;
    while total < cap {
        let (next, count) = subn_map(pattern, &current, &mut replace);
        if count == 0 {
            break;
        }
        total += count;
        current = next;
    }
    (current, total)
}

/// Case-insensitive substring occurrence count.
pub fn count_ignore_case(text: &str, needle: &str) -> usize {
    if needle.is_empty() {
        return 0;
    }
    text.to_lowercase().matches(&needle.to_lowercase()).count()
}

/// Underscores become spaces, surrounding whitespace is trimmed.
pub fn normalize_link_whitespace(link: &str) -> String {
    link.replace('_', " ").trim().to_string()
}

/// Normalized form used for link comparison: whitespace handling plus
/// upper-casing of the first character only.
pub fn unify_link(link: &str) -> String {
    let link = normalize_link_whitespace(link);
    let mut chars = link.chars();
    match chars.next() {
        None => link,
        Some(first) => {
            let rest = chars.as_str();
            let mut out: String = first.to_uppercase().collect();
            out.push_str(rest);
            out
        }
    }
}

/// True when two targets refer to the same page.
pub fn links_equal(left: &str, right: &str) -> bool {
    unify_link(left) == unify_link(right)
}

static DATE_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:0?[1-9]|[12][0-9]|3[01])\.(?:0?[1-9]|1[0-2])\.[0-9]{4}").expect("date pattern")
});
static ANCHOR_HEX_BYTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(#.*?)\.([0-9A-F]{2})").expect("anchor pattern"));

/// Decodes a percent-encoded link target such as `%D0%A1#.D0.B2`.
///
/// Section anchors use `.XX` in place of `%XX`; those are rewritten first,
/// with date-like literals masked so `12.05.1999` keeps its dots. A target
/// that does not decode to valid UTF-8 is returned unchanged with `false`.
pub fn decode_link(link: &str) -> (String, bool) {
    let normalized = normalize_link_whitespace(link);

    let (masked, ledger) = mask(&normalized, &DATE_LITERAL);
    let (masked, _) = subn_until_stable(&ANCHOR_HEX_BYTE, "${1}%${2}", &masked, None);
    let candidate = unmask(&masked, &ledger);

    match percent_decode_str(&candidate).decode_utf8() {
        Ok(decoded) if !decoded.contains('\u{FFFD}') => (decoded.into_owned(), true),
        _ => (link.to_string(), false),
    }
}

#[cfg(test)]
mod tests {
    use once_cell::sync::Lazy;
    use regex::Regex;

    use super::{
        count_ignore_case, decode_link, links_equal, normalize_link_whitespace, subn, subn_map,
        subn_map_until_stable, subn_until_stable, unify_link,
    };

    static DOUBLE_A: Lazy<Regex> = Lazy::new(|| Regex::new("aa").unwrap());

    #[test]
    fn subn_counts_replacements() {
        let re = Regex::new(r"b+").unwrap();
        assert_eq!(subn(&re, "b", "abba abb"), ("aba ab".to_string(), 2));
        assert_eq!(subn(&re, "b", "aaa"), ("aaa".to_string(), 0));
    }

    #[test]
    fn fixed_point_collapses_to_single_char() {
        let (text, count) = subn_until_stable(&DOUBLE_A, "a", "aaaaa", None);
        assert_eq!(text, "a");
        assert_eq!(count, 4);
    }

    #[test]
    fn fixed_point_respects_replacement_cap() {
        let (text, count) = subn_until_stable(&DOUBLE_A, "a", "aaaaa", Some(3));
        assert_eq!(count, 3);
        assert_eq!(text, "aa");
    }

    #[test]
    fn fixed_point_terminates_on_self_triggering_pattern() {
        // "a" -> "aa" regenerates its own trigger forever; the cap stops it
        let re = Regex::new("a").unwrap();
        let (_, count) = subn_until_stable(&re, "aa", "a", Some(50));
        assert_eq!(count, 50);
    }

    #[test]
    fn subn_map_skips_uncounted_matches() {
        let re = Regex::new(r"\d+").unwrap();
        let (text, count) = subn_map(&re, "1 22 333", |caps| {
            if caps[0].len() > 1 {
                Some("N".to_string())
            } else {
                None
            }
        });
        assert_eq!(text, "1 N N");
        assert_eq!(count, 2);
    }

    #[test]
    fn subn_map_until_stable_reaches_fixed_point() {
        let (text, count) = subn_map_until_stable(&DOUBLE_A, "aaaa b", |_| Some("a".into()), None);
        assert_eq!(text, "a b");
        assert_eq!(count, 3);
    }

    #[test]
    fn link_unification() {
        assert_eq!(normalize_link_whitespace("_Foo_bar_"), "Foo bar");
        assert_eq!(unify_link("foo_bar"), "Foo bar");
        assert_eq!(unify_link("x"), "X");
        assert!(links_equal("foo_bar", "Foo bar"));
        assert!(links_equal("ёлка", "Ёлка"));
        assert!(!links_equal("Foo", "Bar"));
    }

    #[test]
    fn count_ignore_case_matches_any_case() {
        assert_eq!(count_ignore_case("<BR> <br> <Br>", "<br>"), 3);
        assert_eq!(count_ignore_case("abc", ""), 0);
    }

    #[test]
    fn decode_link_handles_percent_and_anchor_bytes() {
        let (decoded, ok) = decode_link("%D0%A1%D0%B2%D0%B5%D1%82");
        assert!(ok);
        assert_eq!(decoded, "Свет");

        let (decoded, ok) = decode_link("Page#.D0.A1");
        assert!(ok);
        assert_eq!(decoded, "Page#С");
    }

    #[test]
    fn decode_link_keeps_date_literals() {
        let (decoded, ok) = decode_link("Elections#Results 12.05.1999");
        assert!(ok);
        assert_eq!(decoded, "Elections#Results 12.05.1999");
    }

    #[test]
    fn decode_link_rejects_invalid_utf8() {
        let (decoded, ok) = decode_link("broken%FF%FElink");
        assert!(!ok);
        assert_eq!(decoded, "broken%FF%FElink");
    }
}
