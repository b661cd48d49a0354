use std::collections::BTreeMap;

use once_cell::sync::Lazy;

/// Summary prefix used in edit comments.
const SUMMARY_PREFIX: &str = "[[Project:CheckWiki|CheckWiki]]";

static STANDARD: Lazy<SeverityCatalogue> = Lazy::new(|| {
    SeverityCatalogue::from_entries(&[
        ("32", "links"),
        ("42", "deprecated tags"),
        ("62", "links"),
        ("69", "ISBN"),
        ("70", "ISBN"),
        ("80", "links"),
        ("86", "links"),
        ("90", "links"),
        ("93", "links"),
        ("98", "self-closing tags"),
        ("99", "self-closing tags"),
        ("104", "footnotes"),
    ])
});

/// Maps defect ids to the human-readable category named in edit summaries.
/// An id present here is a major defect; everything else is minor.
#[derive(Debug, Clone, Default)]
pub struct SeverityCatalogue {
    entries: BTreeMap<String, String>,
}

impl SeverityCatalogue {
    /// The catalogue the orchestrator publishes with.
    pub fn standard() -> &'static SeverityCatalogue {
        &STANDARD
    }

    pub fn from_entries(entries: &[(&str, &str)]) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|(id, label)| ((*id).to_string(), (*label).to_string()))
                .collect(),
        }
    }

    pub fn label(&self, id: &str) -> Option<&str> {
        self.entries.get(id).map(String::as_str)
    }

    pub fn has_major(&self, fired: &[String]) -> bool {
        fired.iter().any(|id| self.entries.contains_key(id))
    }

    pub fn has_minor(&self, fired: &[String]) -> bool {
        fired.iter().any(|id| !self.entries.contains_key(id))
    }

    /// Builds the edit summary for a fired-rule list. Major labels are
    /// deduplicated keeping first occurrence; a minor-fix suffix is appended
    /// when unclassified ids also fired. An empty fired list yields an empty
    /// summary.
    pub fn build_summary(&self, fired: &[String]) -> String {
        if fired.is_empty() {
            return String::new();
        }

        let mut labels: Vec<&str> = Vec::new();
        for id in fired {
            if let Some(label) = self.label(id)
                && !labels.contains(&label)
            {
                labels.push(label);
            }
        }

        let minors = self.has_minor(fired);
        if labels.is_empty() {
            if minors {
                format!("{SUMMARY_PREFIX}: minor fixes.")
            } else {
                format!("{SUMMARY_PREFIX}.")
            }
        } else {
            let joined = labels.join(", ");
            if minors {
                format!("{SUMMARY_PREFIX}: fixed {joined}; minor fixes.")
            } else {
                format!("{SUMMARY_PREFIX}: fixed {joined}.")
            }
        }
    }
}
