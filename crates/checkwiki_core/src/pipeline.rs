use once_cell::sync::Lazy;
use regex::Regex;

use crate::masking::{mask, unmask};
use crate::rules;

/// Spans the rule pipeline must never see: comments, verbatim containers,
/// math, and transclusion metadata. Masked before the first rule runs and
/// restored after the last.
static IGNORE_FILTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?xis) (
            <!--.*?-->

          | <nowiki>.*?</nowiki>
          | <nowiki\s*/>

          | <math>.*?</math>
          | <hiero>.*?</hiero>

          | <source>.*?</source>
          | <tt>.*?</tt>
          | <code>.*?</code>
          | <pre>.*?</pre>
          | <syntaxhighlight[^>]*>.*?</syntaxhighlight>

          | <templatedata>.*?</templatedata>
          | <imagemap>.*?</imagemap>
        )",
    )
    .expect("ignore filter")
});

/// Per-document context threaded into every rule. The title feeds the
/// self-link rule; the unsafe flag widens two external-link rewrites.
/// Context is always local to one document, never shared between runs.
#[derive(Debug, Clone, Default)]
pub struct PageContext {
    pub title: Option<String>,
    pub unsafe_extlinks: bool,
}

impl PageContext {
    pub fn for_title(title: &str) -> Self {
        Self {
            title: Some(title.to_string()),
            ..Self::default()
        }
    }
}

/// One correction rule. The id is the defect number reported upstream;
/// it is declared here explicitly rather than derived from the function
/// name, so renaming a function can never silently change an id.
pub struct Rule {
    pub id: &'static str,
    pub name: &'static str,
    pub apply: fn(&str, &PageContext) -> (String, usize),
}

/// The pipeline, in mandatory order. Entries whose placement matters carry
/// the constraint next to them; reordering without reading those is how
/// counts silently go wrong.
static CATALOGUE: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        Rule {
            id: "0",
            name: "minor-fixes-before",
            apply: rules::minor_fixes_before,
        },
        Rule {
            id: "16",
            name: "control-characters",
            apply: rules::rule_016_control_characters,
        },
        // html tags
        Rule {
            id: "2",
            name: "invalid-tags",
            apply: rules::rule_002_invalid_tags,
        },
        Rule {
            id: "26",
            name: "bold-tag",
            apply: rules::rule_026_bold_tag,
        },
        Rule {
            id: "38",
            name: "italic-tag",
            apply: rules::rule_038_italic_tag,
        },
        Rule {
            id: "42",
            name: "strike-tag",
            apply: rules::rule_042_strike_tag,
        },
        Rule {
            id: "85",
            name: "empty-tag",
            apply: rules::rule_085_empty_tag,
        },
        Rule {
            id: "98",
            name: "unclosed-sub",
            apply: rules::rule_098_unclosed_sub,
        },
        Rule {
            id: "99",
            name: "unclosed-sup",
            apply: rules::rule_099_unclosed_sup,
        },
        // templates; after 2, which canonicalizes the braces' neighborhood tags
        Rule {
            id: "1",
            name: "template-namespace-prefix",
            apply: rules::rule_001_template_prefix,
        },
        Rule {
            id: "34",
            name: "pagename-magic-words",
            apply: rules::rule_034_template_elements,
        },
        Rule {
            id: "59",
            name: "template-with-break",
            apply: rules::rule_059_template_with_break,
        },
        // headlines; after 26, which turns <b> into the ''' this rule strips
        Rule {
            id: "44",
            name: "headline-with-bold",
            apply: rules::rule_044_headline_with_bold,
        },
        Rule {
            id: "57",
            name: "headline-with-colon",
            apply: rules::rule_057_headline_with_colon,
        },
        // external links
        Rule {
            id: "62",
            name: "url-without-scheme",
            apply: rules::rule_062_url_without_http,
        },
        Rule {
            id: "93",
            name: "doubled-http",
            apply: rules::rule_093_double_http,
        },
        Rule {
            id: "80",
            name: "ext-link-with-break",
            apply: rules::rule_080_ext_link_with_break,
        },
        Rule {
            id: "86",
            name: "ext-link-two-brackets",
            apply: rules::rule_086_ext_link_two_brackets,
        },
        Rule {
            id: "90",
            name: "internal-link-as-external",
            apply: rules::rule_090_internal_link_as_external,
        },
        Rule {
            id: "91",
            name: "interwiki-link-as-external",
            apply: rules::rule_091_interwiki_link_as_external,
        },
        // categories; after 86, which can produce category links from
        // double-bracketed external links
        Rule {
            id: "21",
            name: "category-in-foreign-language",
            apply: rules::rule_021_category_in_foreign_language,
        },
        Rule {
            id: "22",
            name: "category-with-spaces",
            apply: rules::rule_022_category_with_spaces,
        },
        Rule {
            id: "9",
            name: "category-without-break",
            apply: rules::rule_009_category_without_break,
        },
        Rule {
            id: "17",
            name: "duplicate-categories",
            apply: rules::rule_017_duplicate_categories,
        },
        Rule {
            id: "52",
            name: "category-in-article",
            apply: rules::rule_052_category_in_article,
        },
        // links; after the external-link rules, which mint wikilinks, and
        // after 34, which rewrites {{!}}-adjacent magic words
        Rule {
            id: "103",
            name: "pipe-magic-in-link",
            apply: rules::rule_103_pipe_in_wikilink,
        },
        Rule {
            id: "32",
            name: "link-two-pipes",
            apply: rules::rule_032_link_two_pipes,
        },
        Rule {
            id: "48",
            name: "title-link-in-text",
            apply: rules::rule_048_title_link_in_text,
        },
        Rule {
            id: "64",
            name: "link-equal-linktext",
            apply: rules::rule_064_link_equal_linktext,
        },
        // isbn
        Rule {
            id: "69",
            name: "isbn-wrong-syntax",
            apply: rules::rule_069_isbn_wrong_syntax,
        },
        Rule {
            id: "70",
            name: "isbn-wrong-length",
            apply: rules::rule_070_isbn_wrong_length,
        },
        // other; after 2, which canonicalizes the <br> spellings these match
        Rule {
            id: "54",
            name: "list-with-break",
            apply: rules::rule_054_list_with_break,
        },
        Rule {
            id: "65",
            name: "image-desc-with-break",
            apply: rules::rule_065_image_desc_with_break,
        },
        Rule {
            id: "50",
            name: "mnemonic-dash",
            apply: rules::rule_050_mnemonic_dash,
        },
        Rule {
            id: "63",
            name: "small-tag-in-refs",
            apply: rules::rule_063_small_tag_in_refs,
        },
        Rule {
            id: "88",
            name: "defaultsort-with-spaces",
            apply: rules::rule_088_defaultsort_with_spaces,
        },
        Rule {
            id: "101",
            name: "sup-in-numbers",
            apply: rules::rule_101_sup_in_numbers,
        },
        Rule {
            id: "104",
            name: "quote-marks-in-refs",
            apply: rules::rule_104_quote_marks_in_refs,
        },
        Rule {
            id: "0",
            name: "minor-fixes-after",
            apply: rules::minor_fixes_after,
        },
    ]
});

pub fn catalogue() -> &'static [Rule] {
    &CATALOGUE
}

/// Runs the full pipeline over one document.
///
/// Returns the corrected text and the ids of the rules that fired, in
/// pipeline order without duplicates. Without a title the self-link rule is
/// a no-op.
pub fn process_text(text: &str, title: Option<&str>) -> (String, Vec<String>) {
    let ctx = PageContext {
        title: title.map(ToString::to_string),
        ..PageContext::default()
    };
    process_text_with(text, &ctx)
}

/// [`process_text`] with full control over the page context.
pub fn process_text_with(text: &str, ctx: &PageContext) -> (String, Vec<String>) {
    let (mut current, ledger) = mask(text, &IGNORE_FILTER);

    let mut fired: Vec<String> = Vec::new();
    for rule in catalogue() {
        let (next, count) = (rule.apply)(&current, ctx);
        current = next;
        if count > 0 && !fired.iter().any(|id| id == rule.id) {
            fired.push(rule.id.to_string());
        }
    }

    (unmask(&current, &ledger), fired)
}
