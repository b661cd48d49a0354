use anyhow::Result;
use serde::Serialize;

use crate::pipeline::{PageContext, process_text_with};
use crate::report::SeverityCatalogue;

/// Storage collaborator: one page at a time, addressed by title.
pub trait PageStore {
    fn exists(&self, title: &str) -> Result<bool>;
    fn can_edit(&self, title: &str) -> Result<bool>;
    fn load(&self, title: &str) -> Result<String>;
    fn save(&self, title: &str, text: &str, summary: &str) -> Result<()>;
}

/// Defect-tracking collaborator: lists pages believed to carry a defect and
/// accepts resolution notices.
pub trait ErrorTracker {
    fn list_titles(&self, defect_id: &str, offset: usize) -> Result<Vec<String>>;
    fn mark_resolved(&self, defect_id: &str, title: &str) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Persist results whose fixes are all minor. Off by default: minor-only
    /// edits are not worth an edit in the page history.
    pub persist_minor: bool,
    /// Enables the heuristic bare-external-link rewrites.
    pub unsafe_extlinks: bool,
}

/// Outcome of one page run, returned to the caller whether or not anything
/// was persisted.
#[derive(Debug, Clone, Serialize)]
pub struct PageReport {
    pub title: String,
    pub fired: Vec<String>,
    pub persisted: bool,
    pub summary: Option<String>,
}

impl PageReport {
    fn discarded(title: &str, fired: Vec<String>) -> Self {
        Self {
            title: title.to_string(),
            fired,
            persisted: false,
            summary: None,
        }
    }
}

/// Drives one page through load, pipeline, classification and persistence.
///
/// A missing or edit-protected page is discarded before the pipeline runs.
/// A page whose fixes are minor-only is discarded unless `persist_minor` is
/// set; the fired list still comes back for reporting. A rejected save is a
/// discard outcome as well, never an error, and nothing is marked resolved.
pub fn process_page(
    store: &dyn PageStore,
    tracker: &dyn ErrorTracker,
    title: &str,
    options: &ProcessOptions,
) -> Result<PageReport> {
    if !store.exists(title)? || !store.can_edit(title)? {
        return Ok(PageReport::discarded(title, Vec::new()));
    }

    let text = store.load(title)?;
    let ctx = PageContext {
        title: Some(title.to_string()),
        unsafe_extlinks: options.unsafe_extlinks,
    };
    let (new_text, fired) = process_text_with(&text, &ctx);
    if fired.is_empty() {
        return Ok(PageReport::discarded(title, fired));
    }

    let catalogue = SeverityCatalogue::standard();
    if !options.persist_minor && !catalogue.has_major(&fired) {
        return Ok(PageReport::discarded(title, fired));
    }

    let summary = catalogue.build_summary(&fired);
    if store.save(title, &new_text, &summary).is_err() {
        return Ok(PageReport::discarded(title, fired));
    }

    for id in &fired {
        // a tracker hiccup must not lose the remaining notifications
        let _ = tracker.mark_resolved(id, title);
    }

    Ok(PageReport {
        title: title.to_string(),
        fired,
        persisted: true,
        summary: Some(summary),
    })
}

/// Processes a list of titles, logging one line per page in the
/// `Title - [2, 17] ... ok` form. Returns how many pages were persisted.
pub fn process_batch(
    store: &dyn PageStore,
    tracker: &dyn ErrorTracker,
    titles: &[String],
    options: &ProcessOptions,
) -> usize {
    let mut persisted = 0usize;
    for title in titles {
        let title = title.trim();
        if title.is_empty() {
            continue;
        }
        match process_page(store, tracker, title, options) {
            Ok(report) => {
                log_page(title, &report.fired, report.persisted);
                if report.persisted {
                    persisted += 1;
                }
            }
            Err(error) => println!("{title} ... fail ({error:#})"),
        }
    }
    persisted
}

fn log_page(title: &str, fired: &[String], persisted: bool) {
    let list = if fired.is_empty() {
        String::new()
    } else {
        format!(" - [{}]", fired.join(", "))
    };
    let state = if persisted { "ok" } else { "fail" };
    println!("{title}{list} ... {state}");
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    use anyhow::{Result, bail};

    use super::{ErrorTracker, PageStore, ProcessOptions, process_page};

    #[derive(Default)]
    struct FakeStore {
        pages: BTreeMap<String, String>,
        protected: Vec<String>,
        reject_saves: bool,
        saved: RefCell<Vec<(String, String, String)>>,
    }

    impl FakeStore {
        fn with_page(title: &str, text: &str) -> Self {
            let mut store = Self::default();
            store.pages.insert(title.to_string(), text.to_string());
            store
        }
    }

    impl PageStore for FakeStore {
        fn exists(&self, title: &str) -> Result<bool> {
            Ok(self.pages.contains_key(title))
        }

        fn can_edit(&self, title: &str) -> Result<bool> {
            Ok(!self.protected.contains(&title.to_string()))
        }

        fn load(&self, title: &str) -> Result<String> {
            self.pages
                .get(title)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("missing page {title}"))
        }

        fn save(&self, title: &str, text: &str, summary: &str) -> Result<()> {
            if self.reject_saves {
                bail!("edit conflict");
            }
            self.saved.borrow_mut().push((
                title.to_string(),
                text.to_string(),
                summary.to_string(),
            ));
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeTracker {
        resolved: RefCell<Vec<(String, String)>>,
    }

    impl ErrorTracker for FakeTracker {
        fn list_titles(&self, _defect_id: &str, _offset: usize) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        fn mark_resolved(&self, defect_id: &str, title: &str) -> Result<()> {
            self.resolved
                .borrow_mut()
                .push((defect_id.to_string(), title.to_string()));
            Ok(())
        }
    }

    // has a major fix (69) and a minor one (17)
    const DIRTY: &str = "ISBN: 123\n[[Category:X]]\n[[Category:X]]\n";

    #[test]
    fn major_fix_is_persisted_and_marked_resolved() {
        let store = FakeStore::with_page("Page", DIRTY);
        let tracker = FakeTracker::default();
        let report =
            process_page(&store, &tracker, "Page", &ProcessOptions::default()).unwrap();

        assert!(report.persisted);
        assert_eq!(report.fired, vec!["17", "69"]);
        let saved = store.saved.borrow();
        assert_eq!(saved.len(), 1);
        assert!(saved[0].1.contains("ISBN 123"));
        assert!(saved[0].2.contains("ISBN"));
        assert_eq!(
            *tracker.resolved.borrow(),
            vec![
                ("17".to_string(), "Page".to_string()),
                ("69".to_string(), "Page".to_string())
            ]
        );
    }

    #[test]
    fn minor_only_fixes_are_discarded_by_default() {
        let store = FakeStore::with_page("Page", "[[Category:X]]\n[[Category:X]]\n");
        let tracker = FakeTracker::default();
        let report =
            process_page(&store, &tracker, "Page", &ProcessOptions::default()).unwrap();

        assert!(!report.persisted);
        assert_eq!(report.fired, vec!["17"]);
        assert!(store.saved.borrow().is_empty());
        assert!(tracker.resolved.borrow().is_empty());
    }

    #[test]
    fn persist_minor_mode_saves_minor_only_results() {
        let store = FakeStore::with_page("Page", "[[Category:X]]\n[[Category:X]]\n");
        let tracker = FakeTracker::default();
        let options = ProcessOptions {
            persist_minor: true,
            ..ProcessOptions::default()
        };
        let report = process_page(&store, &tracker, "Page", &options).unwrap();

        assert!(report.persisted);
        assert_eq!(
            report.summary.as_deref(),
            Some("[[Project:CheckWiki|CheckWiki]]: minor fixes.")
        );
    }

    #[test]
    fn missing_page_is_discarded_with_empty_fired_list() {
        let store = FakeStore::default();
        let tracker = FakeTracker::default();
        let report =
            process_page(&store, &tracker, "Ghost", &ProcessOptions::default()).unwrap();
        assert!(!report.persisted);
        assert!(report.fired.is_empty());
    }

    #[test]
    fn protected_page_is_discarded_before_processing() {
        let mut store = FakeStore::with_page("Page", DIRTY);
        store.protected.push("Page".to_string());
        let tracker = FakeTracker::default();
        let report =
            process_page(&store, &tracker, "Page", &ProcessOptions::default()).unwrap();
        assert!(!report.persisted);
        assert!(report.fired.is_empty());
    }

    #[test]
    fn clean_page_fires_nothing_and_is_not_saved() {
        let store = FakeStore::with_page("Page", "Perfectly fine text.\n");
        let tracker = FakeTracker::default();
        let report =
            process_page(&store, &tracker, "Page", &ProcessOptions::default()).unwrap();
        assert!(!report.persisted);
        assert!(report.fired.is_empty());
        assert!(store.saved.borrow().is_empty());
    }

    #[test]
    fn rejected_save_still_reports_the_fired_list() {
        let mut store = FakeStore::with_page("Page", DIRTY);
        store.reject_saves = true;
        let tracker = FakeTracker::default();
        let report =
            process_page(&store, &tracker, "Page", &ProcessOptions::default()).unwrap();

        assert!(!report.persisted);
        assert_eq!(report.fired, vec!["17", "69"]);
        assert!(tracker.resolved.borrow().is_empty());
    }
}
