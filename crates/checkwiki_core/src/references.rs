use once_cell::sync::Lazy;
use regex::Regex;

static REFERENCES_TEMPLATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\{\{\s*(?:reflist|reference list|references list)").expect("references template"));
static REFERENCES_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<\s*references").expect("references tag"));
static REFERENCES_SECTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^==[ ]*References[ ]*==$").expect("references section"));
static TRAILER_SECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)^==[ ]*(?:Bibliography|Further reading|External links|Sources)[ ]*==$")
        .expect("trailer section")
});
static AFTER_SECTION_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:\n==|\[\[Category:)").expect("section break"));
static AFTER_SECTION_CATEGORY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\[\[Category:").expect("section category"));
static TRAILING_BOILERPLATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\{\{[^:{}][^{}]*\}\}|\[\[Category:[^\[\]]+\]\]|\s)*$")
        .expect("trailing boilerplate")
});
static LAST_BOILERPLATE_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\n(?:\{\{[^:{}][^{}]*\}\}|\[\[Category:[^\[\]]+\]\]|\s)*$")
        .expect("boilerplate block")
});

fn section_is_effectively_empty(rest: &str) -> bool {
    rest.trim().is_empty() || AFTER_SECTION_BREAK.is_match(rest)
}

/// Inserts the references placeholder where the manual of style expects it.
///
/// `last_ref` is the byte position just past the last reference in `text`,
/// when the caller knows it; any insertion point before it is rejected.
/// Returns the new text and whether an insertion happened.
///
/// Insertion points are tried in priority order: an existing `References`
/// section (if empty, or — under `allow_unsafe` — followed only by trailing
/// boilerplate), then right before the first trailer section, then (only
/// under `allow_unsafe`) before the trailing category/template block at the
/// end of the document. A page with no recognizable anchor is left alone.
pub fn insert_references(text: &str, last_ref: Option<usize>, allow_unsafe: bool) -> (String, bool) {
    let unchanged = (text.to_string(), false);

    if REFERENCES_TEMPLATE.is_match(text) || REFERENCES_TAG.is_match(text) {
        return unchanged;
    }
    if text.contains("noinclude") || text.contains("includeonly") || text.contains("onlyinclude") {
        // the page is transcluded somewhere; an insertion could leak into
        // every including page
        return unchanged;
    }

    // an existing References section
    if let Some(section) = REFERENCES_SECTION.find(text) {
        let pos = section.end();
        if last_ref.is_some_and(|anchor| pos < anchor) {
            return unchanged;
        }
        let rest = &text[pos..];
        if !section_is_effectively_empty(rest)
            && !(allow_unsafe && TRAILING_BOILERPLATE.is_match(rest))
        {
            return unchanged;
        }
        return (
            format!("{}\n{{{{reflist}}}}{}", &text[..pos], rest),
            true,
        );
    }

    // right before the first trailer section
    if let Some(section) = TRAILER_SECTION.find(text) {
        let (start, end) = (section.start(), section.end());
        if last_ref.is_some_and(|anchor| start < anchor) {
            return unchanged;
        }
        let rest = &text[end..];
        let new_text = if rest.trim().is_empty() || AFTER_SECTION_CATEGORY.is_match(rest) {
            // the trailer section itself is empty; take its place
            format!(
                "{}== References ==\n{{{{reflist}}}}{}",
                &text[..start],
                rest
            )
        } else {
            format!(
                "{}== References ==\n{{{{reflist}}}}\n\n{}",
                &text[..start],
                &text[start..]
            )
        };
        return (new_text, true);
    }

    // at the very end, before trailing categories and templates
    if allow_unsafe {
        let Some(block) = LAST_BOILERPLATE_BLOCK.find(text) else {
            return unchanged;
        };
        let pos = block.start();
        if last_ref.is_some_and(|anchor| pos < anchor) {
            return unchanged;
        }
        return (
            format!(
                "{}\n\n== References ==\n{{{{reflist}}}}{}",
                &text[..pos],
                &text[pos..]
            ),
            true,
        );
    }

    unchanged
}

#[cfg(test)]
mod tests {
    use super::insert_references;

    #[test]
    fn empty_references_section_receives_the_template() {
        let text = "Body.<ref>a</ref>\n\n== References ==\n\n[[Category:X]]\n";
        let (new_text, inserted) = insert_references(text, None, false);
        assert!(inserted);
        assert!(new_text.contains("== References ==\n{{reflist}}"));
    }

    #[test]
    fn populated_references_section_is_left_alone() {
        let text = "Body.\n\n== References ==\nHand-written notes.\n";
        let (new_text, inserted) = insert_references(text, None, false);
        assert!(!inserted);
        assert_eq!(new_text, text);
    }

    #[test]
    fn section_followed_by_boilerplate_needs_the_unsafe_flag() {
        let text = "Body.\n\n== References ==\n{{stub}}\n[[Category:X]]\n";
        let (_, inserted) = insert_references(text, None, false);
        assert!(!inserted);

        let (new_text, inserted) = insert_references(text, None, true);
        assert!(inserted);
        assert!(new_text.contains("== References ==\n{{reflist}}\n{{stub}}"));
    }

    #[test]
    fn template_goes_before_the_first_trailer_section() {
        let text = "Body.<ref>a</ref>\n\n== External links ==\n* [http://e.com e]\n";
        let (new_text, inserted) = insert_references(text, None, false);
        assert!(inserted);
        assert!(new_text.contains("== References ==\n{{reflist}}\n\n== External links =="));
    }

    #[test]
    fn existing_references_markup_blocks_insertion() {
        for text in [
            "Body.\n{{reflist}}\n",
            "Body.\n{{Reference list}}\n",
            "Body.\n<references />\n",
        ] {
            let (new_text, inserted) = insert_references(text, None, false);
            assert!(!inserted);
            assert_eq!(new_text, text);
        }
    }

    #[test]
    fn transcluded_pages_are_never_touched() {
        let text = "<noinclude>doc</noinclude>\nBody.\n\n== References ==\n";
        let (_, inserted) = insert_references(text, None, false);
        assert!(!inserted);
    }

    #[test]
    fn insertion_point_before_last_ref_is_rejected() {
        let text = "Top.\n\n== References ==\n\nBody.<ref>late</ref>\n";
        let anchor = text.find("</ref>").map(|pos| pos + "</ref>".len());
        let (_, inserted) = insert_references(text, anchor, false);
        assert!(!inserted);
    }

    #[test]
    fn unsafe_end_insertion_lands_before_trailing_boilerplate() {
        let text = "Body.<ref>a</ref>\n{{stub}}\n[[Category:X]]\n";
        let (_, inserted) = insert_references(text, None, false);
        assert!(!inserted);

        let (new_text, inserted) = insert_references(text, None, true);
        assert!(inserted);
        assert_eq!(
            new_text,
            "Body.<ref>a</ref>\n\n== References ==\n{{reflist}}\n{{stub}}\n[[Category:X]]\n"
        );
    }

    #[test]
    fn page_without_anchor_is_left_untouched() {
        let text = "Just prose with a ref.<ref>a</ref>";
        let (new_text, inserted) = insert_references(text, None, false);
        assert!(!inserted);
        assert_eq!(new_text, text);
    }
}
