use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::masking::{mask, unmask};
use crate::pipeline::PageContext;
use crate::tags::{check_tag_balance, fix_paired_tag, fix_unpaired_tag};
use crate::textops::{
    count_ignore_case, decode_link, links_equal, subn, subn_map, subn_map_until_stable,
    subn_until_stable,
};

/// Accepted namespace spellings. Canonical forms are `File:`, `Category:`,
/// `Template:`, `Module:`.
pub(crate) const IMAGE: &str = r"(?:file|image)\s*:";
pub(crate) const CATEGORY: &str = r"(?:category)\s*:";
pub(crate) const TEMPLATE: &str = r"(?:template)\s*:";
pub(crate) const MODULE: &str = r"(?:module)\s*:";

const INTERWIKI: &str = r"[a-z]{2,3}|nds_nl|simple|be-tarask";

/// Language code of the wiki the catalogue is rendered for. Rule 90 treats
/// external links into this language edition as internal.
const LANG_CODE: &str = "en";

// Patterns are composed from string parts the way the rule constants above
// are reused; every part is a static literal.
fn rx(parts: &[&str]) -> Regex {
    Regex::new(&parts.concat()).expect("rule pattern")
}

// --- pre/post passes (id 0, never counted) ---------------------------------

static BLANK_LINE_SPACES: Lazy<Regex> = Lazy::new(|| rx(&[r"\n[ ]+\n"]));
static HEADLINE_TRAILING_SPACES: Lazy<Regex> = Lazy::new(|| rx(&[r"(?m)^(==.*==)[ ]+\n"]));
static HEADLINE_INNER_SPACES: Lazy<Regex> = Lazy::new(|| rx(&[r"(?m)^(=+)\s*(.*?)\s*(=+)$"]));
static HEADLINE_NEEDS_GAP: Lazy<Regex> = Lazy::new(|| rx(&[r"([^\n])(\n==.*==)"]));
static HEADLINE_EXTRA_GAP: Lazy<Regex> = Lazy::new(|| rx(&[r"(?m)^(==.*==\n)\n+(=?)"]));
static LIST_ITEM_SPACING: Lazy<Regex> = Lazy::new(|| rx(&[r"(?m)^(\*+)([^ *#:])"]));
static EXTERNAL_LINK_SPAN: Lazy<Regex> = Lazy::new(|| rx(&[r"(?i)\[https?://[^\n\]]+\]"]));
static LINK_TARGET_WITH_PIPE: Lazy<Regex> = Lazy::new(|| rx(&[r"\[\[[^\[\]\|]+\|"]));

/// Always reports zero: these are cosmetic touches applied before the
/// numbered rules run.
pub fn minor_fixes_before(text: &str, _ctx: &PageContext) -> (String, usize) {
    let (text, _) = subn_until_stable(&BLANK_LINE_SPACES, "\n\n", text, None);

    // headlines: spaces after, spaces inside, empty line before, none after
    let (text, _) = subn(&HEADLINE_TRAILING_SPACES, "${1}\n", &text);
    let (text, _) = subn(&HEADLINE_INNER_SPACES, "${1} ${2} ${3}", &text);
    let (text, _) = subn_until_stable(&HEADLINE_NEEDS_GAP, "${1}\n${2}", &text, None);
    let (text, _) = subn_map(&HEADLINE_EXTRA_GAP, &text, |caps| {
        if &caps[2] == "=" {
            None
        } else {
            Some(caps[1].to_string())
        }
    });

    let (text, _) = subn(&LIST_ITEM_SPACING, "${1} ${2}", &text);

    // decode percent-encoded link targets; external links keep their encoding
    let (masked, ledger) = mask(&text, &EXTERNAL_LINK_SPAN);
    let decoded = LINK_TARGET_WITH_PIPE
        .replace_all(&masked, |caps: &Captures| decode_link(&caps[0]).0)
        .into_owned();
    let text = unmask(&decoded, &ledger);

    (text, 0)
}

static LINK_CATEGORY_ALIAS: Lazy<Regex> = Lazy::new(|| rx(&[r"(?i)(\[\[:?)", CATEGORY, r"(\s*)"]));
static LINK_MODULE_ALIAS: Lazy<Regex> = Lazy::new(|| rx(&[r"(?i)(\[\[:?)", MODULE, r"(\s*)"]));
static LINK_TEMPLATE_ALIAS: Lazy<Regex> = Lazy::new(|| rx(&[r"(?i)(\[\[:?)", TEMPLATE, r"(\s*)"]));
static LINK_IMAGE_ALIAS: Lazy<Regex> = Lazy::new(|| rx(&[r"(?i)(\[\[:?)", IMAGE, r"(\s*)"]));
static LINK_UNDERSCORE: Lazy<Regex> = Lazy::new(|| rx(&[r"(\[\[[^\[\]\|\n]+)_"]));
static REFLIST_SYNONYM: Lazy<Regex> = Lazy::new(|| rx(&[r"(?i)\{\{reference[ _]list"]));
static REF_LANG_TEMPLATE_SPACE: Lazy<Regex> = Lazy::new(|| rx(&[r" +(\{\{ref-[a-z]+\}\})"]));

/// Always reports zero: cosmetic touches applied after the numbered rules.
pub fn minor_fixes_after(text: &str, _ctx: &PageContext) -> (String, usize) {
    let (text, _) = subn(&LINK_CATEGORY_ALIAS, "${1}Category:", text);
    let (text, _) = subn(&LINK_MODULE_ALIAS, "${1}Module:", &text);
    let (text, _) = subn(&LINK_TEMPLATE_ALIAS, "${1}Template:", &text);
    let (text, _) = subn(&LINK_IMAGE_ALIAS, "${1}File:", &text);

    let (text, _) = subn_until_stable(&LINK_UNDERSCORE, "${1} ", &text, None);

    let (text, _) = subn(&REFLIST_SYNONYM, "{{reflist", &text);
    let (text, _) = subn(&REF_LANG_TEMPLATE_SPACE, "${1}", &text);

    (text, 0)
}

// --- defect rules ----------------------------------------------------------

static TEMPLATE_NAMESPACE_PREFIX: Lazy<Regex> = Lazy::new(|| rx(&[r"(?i)\{\{", TEMPLATE, r"\s*"]));

/// 1: `{{Template:Foo}}` carries a redundant namespace keyword.
pub fn rule_001_template_prefix(text: &str, _ctx: &PageContext) -> (String, usize) {
    subn(&TEMPLATE_NAMESPACE_PREFIX, "{{", text)
}

/// 2: malformed spellings of unpaired and paired tags.
pub fn rule_002_invalid_tags(text: &str, _ctx: &PageContext) -> (String, usize) {
    let (text, fixed_br) = fix_unpaired_tag(text, "br");
    let (text, fixed_hr) = fix_unpaired_tag(&text, "hr");

    let (text, fixed_small) = fix_paired_tag(&text, "small", false);
    let (text, fixed_center) = fix_paired_tag(&text, "center", false);
    let (text, fixed_div) = fix_paired_tag(&text, "div", true);
    let (text, fixed_span) = fix_paired_tag(&text, "span", true);

    (
        text,
        fixed_br + fixed_hr + fixed_small + fixed_center + fixed_div + fixed_span,
    )
}

static CATEGORY_GLUED_AFTER: Lazy<Regex> =
    Lazy::new(|| rx(&[r"(?i)(\[\[category:.*?\]\][ ]*)([^ \n])"]));
static CATEGORY_GLUED_BEFORE: Lazy<Regex> =
    Lazy::new(|| rx(&[r"(?i)([^\n])(\[\[category:.*?\]\])"]));

/// 9: a category link must sit on its own line. Adjacent glued categories
/// shadow each other within one pass, so both fixes run to a fixed point.
pub fn rule_009_category_without_break(text: &str, _ctx: &PageContext) -> (String, usize) {
    let (text, no_after) = subn_until_stable(&CATEGORY_GLUED_AFTER, "${1}\n${2}", text, None);
    let (text, no_before) = subn_until_stable(&CATEGORY_GLUED_BEFORE, "${1}\n${2}", &text, None);
    (text, no_after + no_before)
}

static LINK_DIRECTION_MARKS: Lazy<Regex> =
    Lazy::new(|| rx(&[r"(\[\[[^|\[\]]*)[\x{00AD}\x{200E}\x{200F}]+([^\[\]]*\]\])"]));
static ZERO_WIDTH_CHARS: Lazy<Regex> =
    Lazy::new(|| rx(&[r"[\x{200E}\x{FEFF}\x{200B}\x{2028}\x{202A}\x{202C}\x{202D}\x{202E}]"]));
static ODD_SPACE_CHARS: Lazy<Regex> =
    Lazy::new(|| rx(&[r"[\x{2004}\x{2005}\x{2006}\x{2007}\x{2008}]"]));

/// 16: invisible control and direction characters.
pub fn rule_016_control_characters(text: &str, _ctx: &PageContext) -> (String, usize) {
    let (text, count1) = subn_until_stable(&LINK_DIRECTION_MARKS, "${1}${2}", text, None);
    let (text, count2) = subn(&ZERO_WIDTH_CHARS, "", &text);
    let (text, count3) = subn(&ODD_SPACE_CHARS, " ", &text);
    (text, count1 + count2 + count3)
}

static CATEGORY_WITH_KEY: Lazy<Regex> =
    Lazy::new(|| rx(&[r"(?i)\[\[category:([^\|\[\]\n]+)(?:\|([^\|\[\]\n]*))?\]\]\n?"]));

/// 17: duplicated categories. The occurrence with the longest sort key wins;
/// on equal keys the one closest to the document end is kept. Deletion
/// decisions always compare against the occurrence list collected before any
/// removal, with the scan offset adjusted explicitly as the text shrinks.
pub fn rule_017_duplicate_categories(text: &str, _ctx: &PageContext) -> (String, usize) {
    let occurrences: Vec<(String, String)> = CATEGORY_WITH_KEY
        .captures_iter(text)
        .map(|caps| {
            (
                caps[1].to_string(),
                caps.get(2).map(|m| m.as_str()).unwrap_or("").to_string(),
            )
        })
        .collect();

    let should_delete = |name: &str, key: &str, position: usize| {
        let key_len = key.chars().count();
        occurrences.iter().enumerate().any(|(index, (other, other_key))| {
            if !links_equal(name, other) {
                return false;
            }
            let other_len = other_key.chars().count();
            other_len > key_len || (other_len == key_len && index > position)
        })
    };

    let mut text = text.to_string();
    let mut count = 0usize;
    let mut position = 0usize;
    let mut base = 0usize;
    while let Some(caps) = CATEGORY_WITH_KEY.captures(&text[base..]) {
        let whole = caps.get(0).expect("group 0");
        let (start, end) = (whole.start(), whole.end());
        let key = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        if should_delete(&caps[1], key, position) {
            let deleted_range = base + start..base + end;
            text.replace_range(deleted_range, "");
            count += 1;
            base += start;
        } else {
            base += end;
        }
        position += 1;
    }
    (text, count)
}

static FOREIGN_CATEGORY_PREFIX: Lazy<Regex> = Lazy::new(|| {
    rx(&[r"(?i)\[\[(?:категория|kategorie|categoría|categoria|catégorie)\s*:"])
});

/// 21: category namespace spelled in another language.
pub fn rule_021_category_in_foreign_language(text: &str, _ctx: &PageContext) -> (String, usize) {
    subn(&FOREIGN_CATEGORY_PREFIX, "[[Category:", text)
}

static CATEGORY_SPACED: Lazy<Regex> = Lazy::new(|| rx(&[r"(?i)\[\[\s*category\s*:\s*"]));
static CATEGORY_SPACE_BEFORE_CLOSE: Lazy<Regex> =
    Lazy::new(|| rx(&[r"(?i)(\[\[category:[^\[\]|]+?)\s+([\]|])"]));

/// 22: whitespace padding inside category links. Pure case fixes are applied
/// silently without counting.
pub fn rule_022_category_with_spaces(text: &str, _ctx: &PageContext) -> (String, usize) {
    let already = count_ignore_case(text, "[[Category:");
    let (text, fixed) = subn(&CATEGORY_SPACED, "[[Category:", text);
    let count1 = fixed.saturating_sub(already);

    let (text, count2) = subn(&CATEGORY_SPACE_BEFORE_CLOSE, "${1}${2}", &text);
    (text, count1 + count2)
}

static BOLD_HTML_TAG: Lazy<Regex> = Lazy::new(|| rx(&[r"(?i)</?(?:b|strong)>"]));

/// 26: `<b>`/`<strong>` instead of wiki emphasis. Requires both tags to be
/// balanced, otherwise the conversion could eat content.
pub fn rule_026_bold_tag(text: &str, _ctx: &PageContext) -> (String, usize) {
    if check_tag_balance(text, "b", false) && check_tag_balance(text, "strong", false) {
        subn(&BOLD_HTML_TAG, "'''", text)
    } else {
        (text.to_string(), 0)
    }
}

static LINK_DOUBLE_PIPE: Lazy<Regex> =
    Lazy::new(|| rx(&[r"\[\[([^\|\[\]\n]+)\|\|([^\|\[\]\n]+)\]\]"]));
static LINK_TRAILING_PIPE: Lazy<Regex> =
    Lazy::new(|| rx(&[r"\[\[([^\|\[\]\n]+)\|([^\|\[\]\n]+)\|\]\]"]));

/// 32: doubled or trailing pipe inside a wikilink.
pub fn rule_032_link_two_pipes(text: &str, _ctx: &PageContext) -> (String, usize) {
    let (text, count1) = subn(&LINK_DOUBLE_PIPE, "[[${1}|${2}]]", text);
    let (text, count2) = subn(&LINK_TRAILING_PIPE, "[[${1}|${2}]]", &text);
    (text, count1 + count2)
}

static PAGENAME_MAGIC: Lazy<Regex> =
    Lazy::new(|| rx(&[r"\{\{(NAMESPACE|SITENAME|PAGENAME|FULLPAGENAME)\}\}"]));

/// 34: pagename magic words must be substituted.
pub fn rule_034_template_elements(text: &str, _ctx: &PageContext) -> (String, usize) {
    subn(&PAGENAME_MAGIC, "{{subst:${1}}}", text)
}

static ITALIC_HTML_TAG: Lazy<Regex> = Lazy::new(|| rx(&[r"(?i)</?(?:i|em)>"]));

/// 38: `<i>`/`<em>` instead of wiki emphasis, balance gated like rule 26.
pub fn rule_038_italic_tag(text: &str, _ctx: &PageContext) -> (String, usize) {
    if check_tag_balance(text, "i", false) && check_tag_balance(text, "em", false) {
        subn(&ITALIC_HTML_TAG, "''", text)
    } else {
        (text.to_string(), 0)
    }
}

static STRIKE_TAG: Lazy<Regex> = Lazy::new(|| rx(&[r"(?i)(</?)strike>"]));

/// 42: deprecated `<strike>` element.
pub fn rule_042_strike_tag(text: &str, _ctx: &PageContext) -> (String, usize) {
    subn(&STRIKE_TAG, "${1}s>", text)
}

static HEADLINE_WITH_BOLD: Lazy<Regex> =
    Lazy::new(|| rx(&[r"(?m)^(=+) (.*?)'''(.*?)'''(.*?) (=+)$"]));

/// 44: bold markup inside a headline.
pub fn rule_044_headline_with_bold(text: &str, _ctx: &PageContext) -> (String, usize) {
    subn_map_until_stable(
        &HEADLINE_WITH_BOLD,
        text,
        |caps| {
            if caps[1] == caps[5] {
                Some(format!(
                    "{} {}{}{} {}",
                    &caps[1], &caps[2], &caps[3], &caps[4], &caps[5]
                ))
            } else {
                None
            }
        },
        None,
    )
}

static TITLE_WIKILINK: Lazy<Regex> =
    Lazy::new(|| rx(&[r"\[\[([^\]\|\n]+)(?:\|([^\]\|\n]+))?\]\]"]));

/// 48: the page linking to itself. The title comes from the page context;
/// without one this rule is a no-op.
pub fn rule_048_title_link_in_text(text: &str, ctx: &PageContext) -> (String, usize) {
    let Some(title) = ctx.title.as_deref() else {
        return (text.to_string(), 0);
    };
    subn_map(&TITLE_WIKILINK, text, |caps| {
        if links_equal(&caps[1], title) {
            let name = caps.get(2).map(|m| m.as_str()).unwrap_or(&caps[1]);
            Some(name.to_string())
        } else {
            None
        }
    })
}

static NDASH_ENTITY: Lazy<Regex> = Lazy::new(|| rx(&[r"(?i)&ndash;"]));
static MDASH_ENTITY: Lazy<Regex> = Lazy::new(|| rx(&[r"(?i)&mdash;"]));

/// 50: dash entities instead of the characters themselves.
pub fn rule_050_mnemonic_dash(text: &str, _ctx: &PageContext) -> (String, usize) {
    let (text, count1) = subn(&NDASH_ENTITY, "–", text);
    let (text, count2) = subn(&MDASH_ENTITY, "—", &text);
    (text, count1 + count2)
}

static TRANSCLUSION_SPANS: Lazy<Regex> = Lazy::new(|| {
    rx(&[
        r"(?is)(<noinclude>.*?</noinclude>|<onlyinclude>.*?</onlyinclude>|<includeonly>.*?</includeonly>)",
    ])
});
static CATEGORY_LINE: Lazy<Regex> = Lazy::new(|| rx(&[r"\[\[Category:[^\[\]\n]+\]\][ ]*\n"]));
static TRAILING_LINK_BLOCK: Lazy<Regex> =
    Lazy::new(|| rx(&[r"(?:\[\[[A-Za-z\-]+:[^\[\]\n]+\]\]\s*)*$"]));

/// 52: categories placed inside the article body. All categories move to the
/// end, before any trailing interwiki block; transclusion-control containers
/// are masked so their categories stay put. Counts only the categories that
/// actually sat above a later section.
pub fn rule_052_category_in_article(text: &str, _ctx: &PageContext) -> (String, usize) {
    let (masked, ledger) = mask(text, &TRANSCLUSION_SPANS);

    let mut work = format!("{masked}\n");
    let count = CATEGORY_LINE
        .find_iter(&work)
        .filter(|found| work[found.end()..].contains("\n=="))
        .count();
    let categories: Vec<String> = CATEGORY_LINE
        .find_iter(&work)
        .map(|found| found.as_str().to_string())
        .collect();
    if categories.is_empty() {
        return (text.to_string(), 0);
    }
    work = CATEGORY_LINE.replace_all(&work, "").into_owned();

    // categories go before the trailing interwiki block, if any
    let insert_pos = TRAILING_LINK_BLOCK
        .find(&work)
        .map(|found| found.start())
        .unwrap_or(work.len());
    let prefix = work[..insert_pos].trim_end();
    let interwikis = &work[insert_pos..];

    let joined = categories.concat();
    let rebuilt = if prefix.trim().is_empty() {
        // page of categories only, possible in the Category namespace
        format!("{joined}\n{interwikis}")
    } else {
        format!("{prefix}\n\n{joined}\n{interwikis}")
    };
    let rebuilt = format!("{}\n", rebuilt.trim_end());

    (unmask(&rebuilt, &ledger), count)
}

static LIST_ITEM_BR: Lazy<Regex> = Lazy::new(|| rx(&[r"(?m)^(\*.*)<br>[ ]*$"]));

/// 54: list items terminated with `<br>`.
pub fn rule_054_list_with_break(text: &str, _ctx: &PageContext) -> (String, usize) {
    subn_until_stable(&LIST_ITEM_BR, "${1}", text, None)
}

static HEADLINE_WITH_COLON: Lazy<Regex> = Lazy::new(|| rx(&[r"(?m)^(=+) (.*?): (=+)$"]));

/// 57: headline ending with a colon.
pub fn rule_057_headline_with_colon(text: &str, _ctx: &PageContext) -> (String, usize) {
    subn_map(&HEADLINE_WITH_COLON, text, |caps| {
        if caps[1] == caps[3] {
            Some(format!("{} {} {}", &caps[1], &caps[2], &caps[3]))
        } else {
            None
        }
    })
}

static TABLES_AND_WIKILINKS: Lazy<Regex> =
    Lazy::new(|| rx(&[r"(?s)(\[\[.*?\]\]|\{\|.*?\|\})"]));
static BREAK_BEFORE_TEMPLATE_EDGE: Lazy<Regex> =
    Lazy::new(|| rx(&[r"([ ]*<br>[ ]*)(\n?\s*(?:\||\}\}))"]));

/// 59: `<br>` directly before a template pipe or closing braces. Pipes also
/// occur in tables and wikilinks, so those spans are masked first.
pub fn rule_059_template_with_break(text: &str, _ctx: &PageContext) -> (String, usize) {
    let (masked, ledger) = mask(text, &TABLES_AND_WIKILINKS);
    let (replaced, count) = subn(&BREAK_BEFORE_TEMPLATE_EDGE, "${2}", &masked);
    (unmask(&replaced, &ledger), count)
}

static REF_WWW_WITHOUT_SCHEME: Lazy<Regex> =
    Lazy::new(|| rx(&[r"(<ref[^<>]*>)\s*(\[?)\s*www\."]));

/// 62: scheme-less `www.` URL at the start of a reference.
pub fn rule_062_url_without_http(text: &str, _ctx: &PageContext) -> (String, usize) {
    subn(&REF_WWW_WITHOUT_SCHEME, "${1}${2}http://www.", text)
}

static SMALL_FILLING_TAG: Lazy<Regex> =
    Lazy::new(|| rx(&[r"(?i)(<(ref|su[bp])[^>]*>)<small>([^<>]+)</small>(</(ref|su[bp])>)"]));

/// 63: `<small>` wrapping the whole contents of a ref/sub/sup, which already
/// render small.
pub fn rule_063_small_tag_in_refs(text: &str, _ctx: &PageContext) -> (String, usize) {
    subn_map(&SMALL_FILLING_TAG, text, |caps| {
        if caps[2].eq_ignore_ascii_case(&caps[5]) {
            Some(format!("{}{}{}", &caps[1], &caps[3], &caps[4]))
        } else {
            None
        }
    })
}

static LEADING_CATEGORY: Lazy<Regex> = Lazy::new(|| rx(&[r"^Category:"]));
static EMPHASIS_WRAPPED: Lazy<Regex> =
    Lazy::new(|| rx(&[r"^('''''|'''|'')(.*)('''''|'''|'')$"]));

/// 64: link text equal to the link target. Also silently trims targets and
/// hoists emphasis markup out of the link.
pub fn rule_064_link_equal_linktext(text: &str, _ctx: &PageContext) -> (String, usize) {
    let mut count = 0usize;
    let out = TITLE_WIKILINK.replace_all(text, |caps: &Captures| {
        let raw_link = &caps[1];
        if LEADING_CATEGORY.is_match(raw_link) {
            return caps[0].to_string();
        }
        let link = raw_link.trim();
        let Some(name_match) = caps.get(2) else {
            return format!("[[{link}]]");
        };

        let full_name = name_match.as_str().trim();
        let (quotes, name) = match EMPHASIS_WRAPPED.captures(full_name) {
            Some(parsed) if parsed[1] == parsed[3] => {
                let open = parsed.get(1).map(|m| m.as_str()).unwrap_or("");
                let inner = parsed.get(2).map(|m| m.as_str()).unwrap_or("").trim();
                (open, inner)
            }
            _ => ("", full_name),
        };

        if links_equal(link, name) {
            count += 1;
            format!("{quotes}[[{name}]]{quotes}")
        } else {
            format!("[[{link}|{quotes}{name}{quotes}]]")
        }
    });
    (out.into_owned(), count)
}

static IMAGE_CAPTION_BREAK: Lazy<Regex> =
    Lazy::new(|| rx(&[r"(\[\[File:[^\]]+)\s*<br>\s*(\]\])"]));

/// 65: `<br>` left at the end of an image description.
pub fn rule_065_image_desc_with_break(text: &str, _ctx: &PageContext) -> (String, usize) {
    subn(&IMAGE_CAPTION_BREAK, "${1}${2}", text)
}

static REF_AFTER_PUNCTUATION: Lazy<Regex> =
    Lazy::new(|| rx(&[r"(?s)([.,:;])(<ref[^/>]*/>|<ref[^/>]*>.*?</ref>)"]));

/// 67: references placed after punctuation.
///
/// Not registered in the catalogue: moving refs across punctuation is unsafe
/// without manual review, so this stays an opt-in standalone fix.
pub fn rule_067_ref_after_punctuation(text: &str, _ctx: &PageContext) -> (String, usize) {
    subn_until_stable(&REF_AFTER_PUNCTUATION, "${2}${1}", text, None)
}

static BARE_URL_SPAN: Lazy<Regex> = Lazy::new(|| rx(&[r"(?i)(https?://[^ ]+)"]));
static ISBN_WITH_COLON: Lazy<Regex> =
    Lazy::new(|| rx(&[r"(?i)ISBN(?:[- ]?1[03])?\s*:\s*([0-9])"]));
static ISBN_GLUED: Lazy<Regex> = Lazy::new(|| rx(&[r"(?i)ISBN-?((?:[0-9X]-?){10})"]));
static ISBN_MULTISPACE: Lazy<Regex> = Lazy::new(|| rx(&[r"(?i)ISBN[ ]{2,}([0-9])"]));
static ISBN_LENGTH_PREFIX: Lazy<Regex> = Lazy::new(|| rx(&[r"(?i)1[03]-ISBN ([0-9])"]));
static ISBN_LOWER_CASE: Lazy<Regex> = Lazy::new(|| rx(&[r"(?i)ISBN ([0-9])"]));

/// 69: ISBN punctuation variants. URLs are masked first so an ISBN embedded
/// in an external link is never rewritten; the pure case fix at the end is
/// silent.
pub fn rule_069_isbn_wrong_syntax(text: &str, _ctx: &PageContext) -> (String, usize) {
    let (masked, ledger) = mask(text, &BARE_URL_SPAN);

    let (text, count1) = subn(&ISBN_WITH_COLON, "ISBN ${1}", &masked);
    let (text, count2) = subn(&ISBN_GLUED, "ISBN ${1}", &text);
    let (text, count3) = subn(&ISBN_MULTISPACE, "ISBN ${1}", &text);
    let (text, count4) = subn(&ISBN_LENGTH_PREFIX, "ISBN ${1}", &text);
    let text = ISBN_LOWER_CASE.replace_all(&text, "ISBN ${1}").into_owned();

    (unmask(&text, &ledger), count1 + count2 + count3 + count4)
}

static ISBN_CYRILLIC_X: Lazy<Regex> =
    Lazy::new(|| rx(&[r"(?i)((?:ISBN |\|isbn\s*=\s*)(?:[0-9]-?){9})Х"]));

/// 70: Cyrillic Х instead of the Latin check digit X.
pub fn rule_070_isbn_wrong_length(text: &str, _ctx: &PageContext) -> (String, usize) {
    subn(&ISBN_CYRILLIC_X, "${1}X", text)
}

static UNCLOSED_REF_EXTLINK: Lazy<Regex> =
    Lazy::new(|| rx(&[r"(?i)(<ref[^<>/]*>\[https?://[^\[\]]*?)(</ref>)"]));
static EXTLINK_BROKEN_BY_NEWLINE: Lazy<Regex> =
    Lazy::new(|| rx(&[r"(?i)(\[https?://[^\[\]]*?)\n([^\[\]]*?\])"]));

/// 80: external link missing its closing bracket or broken across lines.
pub fn rule_080_ext_link_with_break(text: &str, _ctx: &PageContext) -> (String, usize) {
    let (text, unclosed) = subn(&UNCLOSED_REF_EXTLINK, "${1}]${2}", text);
    let (text, broken) = subn_until_stable(&EXTLINK_BROKEN_BY_NEWLINE, "${1} ${2}", &text, None);
    (text, unclosed + broken)
}

static EMPTY_REF: Lazy<Regex> = Lazy::new(|| rx(&[r"<ref>\s*</ref>"]));
static EMPTY_CENTER: Lazy<Regex> = Lazy::new(|| rx(&[r"<center>\s*</center>"]));
static EMPTY_GALLERY: Lazy<Regex> = Lazy::new(|| rx(&[r"<gallery.*?>\s*</gallery>"]));
static EMPTY_NOINCLUDE: Lazy<Regex> = Lazy::new(|| rx(&[r"<noinclude></noinclude>"]));
static EMPTY_ONLYINCLUDE: Lazy<Regex> = Lazy::new(|| rx(&[r"<onlyinclude></onlyinclude>"]));
static EMPTY_DIV: Lazy<Regex> = Lazy::new(|| rx(&[r"<div>(\s*)</div>"]));
static EMPTY_SPAN: Lazy<Regex> = Lazy::new(|| rx(&[r"<span>(\s*)</span>"]));

/// 85: empty tag pairs. Removing one pair can expose an enclosing empty
/// pair, so the passes repeat until nothing is left to strip.
pub fn rule_085_empty_tag(text: &str, _ctx: &PageContext) -> (String, usize) {
    let mut text = text.to_string();
    let mut total = 0usize;
    loop {
        let (t, c1) = subn(&EMPTY_REF, "", &text);
        let (t, c2) = subn(&EMPTY_CENTER, "", &t);
        let (t, c3) = subn(&EMPTY_GALLERY, "", &t);
        let (t, c4) = subn(&EMPTY_NOINCLUDE, "", &t);
        let (t, c5) = subn(&EMPTY_ONLYINCLUDE, "", &t);
        let (t, c6) = subn(&EMPTY_DIV, "${1}", &t);
        let (t, c7) = subn(&EMPTY_SPAN, "${1}", &t);
        let round = c1 + c2 + c3 + c4 + c5 + c6 + c7;
        text = t;
        if round == 0 {
            break;
        }
        total += round;
    }
    (text, total)
}

static EXTLINK_AS_WIKILINK: Lazy<Regex> =
    Lazy::new(|| rx(&[r"(?i)\[\[(https?://[^\[\]\|\n]+)\|([^\[\]\|\n]+)\]\]"]));
static EXTLINK_DOUBLE_BRACKETS: Lazy<Regex> =
    Lazy::new(|| rx(&[r"(?i)\[(\[https?://[^\[\]\n]+\])\]"]));

/// 86: external link written with doubled square brackets.
pub fn rule_086_ext_link_two_brackets(text: &str, _ctx: &PageContext) -> (String, usize) {
    let (text, count1) = subn_map(&EXTLINK_AS_WIKILINK, text, |caps| {
        let name = &caps[2];
        let link = if caps[1].to_lowercase().contains("wikipedia.org") {
            caps[1].replace(' ', "_")
        } else {
            caps[1].replace(' ', "%20")
        };
        Some(format!("[{link} {name}]"))
    });
    let (text, count2) = subn(&EXTLINK_DOUBLE_BRACKETS, "${1}", &text);
    (text, count1 + count2)
}

static DEFAULTSORT_SPACED: Lazy<Regex> = Lazy::new(|| rx(&[r"(?i)\{\{\s*DEFAULTSORT\s*:\s*"]));

/// 88: whitespace padding around DEFAULTSORT.
pub fn rule_088_defaultsort_with_spaces(text: &str, _ctx: &PageContext) -> (String, usize) {
    let already = count_ignore_case(text, "{{DEFAULTSORT");
    let (text, fixed) = subn(&DEFAULTSORT_SPACED, "{{DEFAULTSORT:", text);
    (text, fixed.saturating_sub(already))
}

struct WikiExtLinkPatterns {
    prefix: Regex,
    piped: Regex,
    spaced: Regex,
    bare: Regex,
}

fn wiki_ext_link_patterns(lang_group: &str) -> WikiExtLinkPatterns {
    let prefix = [
        r"(?i)\[https?://(",
        lang_group,
        r")\.(?:m\.)?wikipedia\.org/(?:w|wiki)/",
    ]
    .concat();
    WikiExtLinkPatterns {
        prefix: rx(&[prefix.as_str()]),
        // [wp/Example Article|text]
        piped: rx(&[prefix.as_str(), r"([^\[\]\|?=]+)\|([^\[\]\|]+)", r"\]"]),
        // [wp/Example_Article text]
        spaced: rx(&[prefix.as_str(), r"([^\[\]\| ?=]+) ([^\[\]\|]+)", r"\]"]),
        // [wp/Example_Article], heuristic: enabled only by the unsafe flag
        bare: rx(&[prefix.as_str(), r"([^\[\]\|?=]+)", r"\]"]),
    }
}

static OWN_WIKI_EXTLINKS: Lazy<WikiExtLinkPatterns> =
    Lazy::new(|| wiki_ext_link_patterns(LANG_CODE));
static INTERWIKI_EXTLINKS: Lazy<WikiExtLinkPatterns> =
    Lazy::new(|| wiki_ext_link_patterns(INTERWIKI));

static LEADING_CATEGORY_ALIAS: Lazy<Regex> = Lazy::new(|| rx(&[r"(?i)^", CATEGORY]));
static LEADING_IMAGE_ALIAS: Lazy<Regex> = Lazy::new(|| rx(&[r"(?i)^", IMAGE]));

fn rewrite_wiki_external_link(
    whole: &str,
    code: &str,
    raw_link: &str,
    name: Option<&str>,
) -> String {
    let (link, decoded) = decode_link(raw_link);
    if !decoded {
        return whole.to_string();
    }

    let mut prefix = if code == LANG_CODE {
        String::new()
    } else {
        format!(":{code}:")
    };
    let is_category = LEADING_CATEGORY_ALIAS.is_match(&link);
    let is_image = LEADING_IMAGE_ALIAS.is_match(&link);
    if (is_category || is_image) && prefix.is_empty() {
        prefix = ":".to_string();
    }

    let name = name.filter(|name| !links_equal(&link, name));
    match name {
        Some(name) => format!("[[{prefix}{link}|{name}]]"),
        None if prefix.is_empty() => format!("[[{link}]]"),
        None => format!("[[{prefix}{link}|{link}]]"),
    }
}

fn convert_wiki_external_links(
    text: &str,
    patterns: &WikiExtLinkPatterns,
    allow_bare: bool,
) -> (String, usize) {
    let count_before = patterns.prefix.find_iter(text).count();

    let text = patterns.piped.replace_all(text, |caps: &Captures| {
        rewrite_wiki_external_link(&caps[0], &caps[1], &caps[2], Some(&caps[3]))
    });
    let text = patterns.spaced.replace_all(&text, |caps: &Captures| {
        rewrite_wiki_external_link(&caps[0], &caps[1], &caps[2], Some(&caps[3]))
    });
    let text = if allow_bare {
        patterns
            .bare
            .replace_all(&text, |caps: &Captures| {
                rewrite_wiki_external_link(&caps[0], &caps[1], &caps[2], None)
            })
            .into_owned()
    } else {
        text.into_owned()
    };

    let count_after = patterns.prefix.find_iter(&text).count();
    (text, count_before.saturating_sub(count_after))
}

/// 90: external link into this wiki rewritten as an internal link.
pub fn rule_090_internal_link_as_external(text: &str, ctx: &PageContext) -> (String, usize) {
    convert_wiki_external_links(text, &OWN_WIKI_EXTLINKS, ctx.unsafe_extlinks)
}

/// 91: external link into a sister language edition rewritten as interwiki.
pub fn rule_091_interwiki_link_as_external(text: &str, ctx: &PageContext) -> (String, usize) {
    convert_wiki_external_links(text, &INTERWIKI_EXTLINKS, ctx.unsafe_extlinks)
}

static DOUBLED_HTTP: Lazy<Regex> = Lazy::new(|| rx(&[r"(?i)https?:/?/?(https?://)"]));

/// 93: doubled protocol prefix.
pub fn rule_093_double_http(text: &str, _ctx: &PageContext) -> (String, usize) {
    subn_until_stable(&DOUBLED_HTTP, "${1}", text, None)
}

/// 98: self-closing `<sub/>`.
pub fn rule_098_unclosed_sub(text: &str, _ctx: &PageContext) -> (String, usize) {
    fix_paired_tag(text, "sub", false)
}

/// 99: self-closing `<sup/>`.
pub fn rule_099_unclosed_sup(text: &str, _ctx: &PageContext) -> (String, usize) {
    fix_paired_tag(text, "sup", false)
}

static ORDINAL_SUP: Lazy<Regex> = Lazy::new(|| rx(&[r"(?i)([0-9])<sup>(st|nd|rd|th)</sup>"]));

/// 101: English ordinal suffix wrapped in `<sup>`.
pub fn rule_101_sup_in_numbers(text: &str, _ctx: &PageContext) -> (String, usize) {
    subn(&ORDINAL_SUP, "${1}${2}", text)
}

static PIPE_MAGIC_IN_LINK: Lazy<Regex> =
    Lazy::new(|| rx(&[r"(\[\[[^\]\|\n]+)\{\{!\}\}([^\]\|\n]+\]\])"]));

/// 103: `{{!}}` magic word inside a wikilink, where a plain pipe belongs.
pub fn rule_103_pipe_in_wikilink(text: &str, _ctx: &PageContext) -> (String, usize) {
    subn(&PIPE_MAGIC_IN_LINK, "${1}|${2}", text)
}

static REF_NAME_UNCLOSED_QUOTE: Lazy<Regex> =
    Lazy::new(|| rx(&[r#"(<ref name="[^">]+?)(\s*/?>)"#]));
static REF_NAME_UNOPENED_QUOTE: Lazy<Regex> =
    Lazy::new(|| rx(&[r#"(<ref name=)([^">]+?"\s*/?>)"#]));

/// 104: unbalanced quote marks around a ref name.
pub fn rule_104_quote_marks_in_refs(text: &str, _ctx: &PageContext) -> (String, usize) {
    let (text, count1) = subn(&REF_NAME_UNCLOSED_QUOTE, "${1}\"${2}", text);
    let (text, count2) = subn(&REF_NAME_UNOPENED_QUOTE, "${1}\"${2}", &text);
    (text, count1 + count2)
}
