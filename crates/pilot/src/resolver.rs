//! Turning addressing hints into exactly one notebook.

use async_trait::async_trait;
use folio_core::{
    notebook_id_from_url, AddressingHint, DefaultRecord, Error, NotebookHints, NotebookRef, Result,
};
use std::collections::HashMap;
use tracing::{debug, info};

/// Candidates scoring below this never match a name hint.
pub const MATCH_THRESHOLD: u32 = 20;

const SCORE_EXACT: u32 = 100;
const SCORE_PREFIX: u32 = 80;
const SCORE_WORD: u32 = 60;
const SCORE_SUBSTRING: u32 = 40;
const SCORE_FUZZY_MAX: f64 = 30.0;

/// Source of the live notebook list.
#[async_trait]
pub trait NotebookCatalog: Send + Sync {
    async fn fetch_notebooks(&self) -> Result<Vec<NotebookRef>>;
}

pub struct Resolver<'a> {
    catalog: &'a dyn NotebookCatalog,
    listing: Option<Vec<NotebookRef>>,
}

impl<'a> Resolver<'a> {
    pub fn new(catalog: &'a dyn NotebookCatalog) -> Self {
        Self {
            catalog,
            listing: None,
        }
    }

    /// Listing fetched during resolution, if any.
    pub fn cached_listing(&self) -> Option<&[NotebookRef]> {
        self.listing.as_deref()
    }

    pub async fn resolve(
        &mut self,
        hints: &NotebookHints,
        default: Option<DefaultRecord>,
    ) -> Result<NotebookRef> {
        match hints.effective() {
            AddressingHint::Url(url) => {
                let id = notebook_id_from_url(&url).unwrap_or_else(|| url.clone());
                debug!(notebook_id = %id, "Resolved notebook from URL");
                Ok(NotebookRef::from_address(id, url))
            }
            AddressingHint::Id(id) => {
                let listing = self.listing().await?;
                listing
                    .iter()
                    .find(|n| n.id == id)
                    .cloned()
                    .ok_or(Error::NotebookNotFound(id))
            }
            AddressingHint::Name(name) => {
                let listing = self.listing().await?;
                let found = best_match(&name, listing)?.clone();
                info!(hint = %name, notebook = %found.name, "Resolved notebook by name");
                Ok(found)
            }
            AddressingHint::None => match default {
                Some(record) => {
                    debug!(notebook_id = %record.id, "Using remembered default notebook");
                    Ok(NotebookRef::from_address(record.id, record.url))
                }
                None => Err(Error::NoNotebookSpecified),
            },
        }
    }

    async fn listing(&mut self) -> Result<&[NotebookRef]> {
        if self.listing.is_none() {
            let fetched = self.catalog.fetch_notebooks().await?;
            debug!(count = fetched.len(), "Fetched notebook listing");
            self.listing = Some(fetched);
        }
        Ok(self.listing.as_deref().unwrap_or_default())
    }
}

fn best_match<'n>(hint: &str, listing: &'n [NotebookRef]) -> Result<&'n NotebookRef> {
    let scored: Vec<(u32, &NotebookRef)> = listing
        .iter()
        .map(|n| (score_name(hint, &n.name), n))
        .collect();
    let best = scored.iter().map(|(s, _)| *s).max().unwrap_or(0);
    if best < MATCH_THRESHOLD {
        return Err(Error::NotebookNotFound(hint.to_string()));
    }

    let tied: Vec<&NotebookRef> = scored
        .iter()
        .filter(|(s, _)| *s == best)
        .map(|(_, n)| *n)
        .collect();
    match tied.as_slice() {
        [only] => Ok(only),
        _ => Err(Error::AmbiguousNotebookName {
            hint: hint.to_string(),
            candidates: tied.iter().map(|n| format!("{} ({})", n.name, n.id)).collect(),
        }),
    }
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Similarity of a name hint to a notebook name, 0..=100.
///
/// Exact 100, prefix 80, substring starting at a word boundary 60, other
/// substring 40, otherwise bigram Dice similarity scaled to at most 30.
pub fn score_name(hint: &str, name: &str) -> u32 {
    let hint = normalize(hint);
    let name = normalize(name);
    if hint.is_empty() || name.is_empty() {
        return 0;
    }
    if hint == name {
        return SCORE_EXACT;
    }
    if name.starts_with(&hint) {
        return SCORE_PREFIX;
    }

    let mut substring = false;
    for (idx, _) in name.match_indices(&hint) {
        substring = true;
        let boundary = name[..idx]
            .chars()
            .last()
            .map(|c| !c.is_alphanumeric())
            .unwrap_or(true);
        if boundary {
            return SCORE_WORD;
        }
    }
    if substring {
        return SCORE_SUBSTRING;
    }

    (dice(&hint, &name) * SCORE_FUZZY_MAX) as u32
}

/// Sørensen–Dice coefficient over character bigrams.
fn dice(a: &str, b: &str) -> f64 {
    fn bigrams(s: &str) -> HashMap<(char, char), usize> {
        let chars: Vec<char> = s.chars().collect();
        let mut out = HashMap::new();
        for pair in chars.windows(2) {
            *out.entry((pair[0], pair[1])).or_insert(0) += 1;
        }
        out
    }

    let a = bigrams(a);
    let b = bigrams(b);
    let total: usize = a.values().sum::<usize>() + b.values().sum::<usize>();
    if total == 0 {
        return 0.0;
    }
    let shared: usize = a
        .iter()
        .map(|(k, n)| (*n).min(*b.get(k).unwrap_or(&0)))
        .sum();
    2.0 * shared as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticCatalog {
        notebooks: Vec<NotebookRef>,
        fetches: AtomicUsize,
    }

    impl StaticCatalog {
        fn new(names: &[(&str, &str)]) -> Self {
            Self {
                notebooks: names
                    .iter()
                    .map(|(id, name)| NotebookRef {
                        id: id.to_string(),
                        name: name.to_string(),
                        url: format!("https://notebooklm.google.com/notebook/{}", id),
                        source_count: Some(2),
                        last_modified: None,
                    })
                    .collect(),
                fetches: AtomicUsize::new(0),
            }
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl NotebookCatalog for StaticCatalog {
        async fn fetch_notebooks(&self) -> Result<Vec<NotebookRef>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.notebooks.clone())
        }
    }

    fn catalog() -> StaticCatalog {
        StaticCatalog::new(&[
            ("nb-notes", "Research Notes"),
            ("nb-plan", "Research Plan"),
            ("nb-cook", "Cooking"),
        ])
    }

    fn record(id: &str) -> DefaultRecord {
        DefaultRecord {
            id: id.to_string(),
            url: format!("https://notebooklm.google.com/notebook/{}", id),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_url_wins_without_fetching() {
        let catalog = catalog();
        let mut resolver = Resolver::new(&catalog);
        let hints = NotebookHints {
            url: Some("https://notebooklm.google.com/notebook/abc-123".into()),
            id: Some("nb-plan".into()),
            name: Some("Cooking".into()),
        };
        let found = resolver.resolve(&hints, Some(record("nb-notes"))).await.unwrap();
        assert_eq!(found.id, "abc-123");
        assert_eq!(catalog.fetches(), 0);
        assert!(resolver.cached_listing().is_none());
    }

    #[tokio::test]
    async fn test_id_beats_name() {
        let catalog = catalog();
        let mut resolver = Resolver::new(&catalog);
        let hints = NotebookHints {
            url: None,
            id: Some("nb-cook".into()),
            name: Some("Research Notes".into()),
        };
        let found = resolver.resolve(&hints, None).await.unwrap();
        assert_eq!(found.name, "Cooking");
        assert_eq!(found.source_count, Some(2));
        assert_eq!(catalog.fetches(), 1);
        assert_eq!(resolver.cached_listing().map(|l| l.len()), Some(3));
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let catalog = catalog();
        let mut resolver = Resolver::new(&catalog);
        let err = resolver
            .resolve(&NotebookHints::id("nb-missing"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "notebook_not_found");
    }

    #[tokio::test]
    async fn test_name_prefix_unique() {
        let catalog = catalog();
        let mut resolver = Resolver::new(&catalog);
        let found = resolver
            .resolve(&NotebookHints::name("research n"), None)
            .await
            .unwrap();
        assert_eq!(found.id, "nb-notes");
    }

    #[tokio::test]
    async fn test_equal_scores_are_ambiguous() {
        let catalog = catalog();
        let mut resolver = Resolver::new(&catalog);
        let err = resolver
            .resolve(&NotebookHints::name("research"), None)
            .await
            .unwrap_err();
        match err {
            Error::AmbiguousNotebookName { candidates, .. } => {
                assert_eq!(candidates.len(), 2);
                assert!(candidates.iter().any(|c| c.contains("nb-notes")));
                assert!(candidates.iter().any(|c| c.contains("nb-plan")));
            }
            other => panic!("expected ambiguity, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_name_below_threshold() {
        let catalog = catalog();
        let mut resolver = Resolver::new(&catalog);
        let err = resolver
            .resolve(&NotebookHints::name("quantum zebra"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "notebook_not_found");
    }

    #[tokio::test]
    async fn test_default_used_without_fetch() {
        let catalog = catalog();
        let mut resolver = Resolver::new(&catalog);
        let found = resolver
            .resolve(&NotebookHints::default(), Some(record("nb-stale")))
            .await
            .unwrap();
        assert_eq!(found.id, "nb-stale");
        assert_eq!(catalog.fetches(), 0);
    }

    #[tokio::test]
    async fn test_no_hint_no_default() {
        let catalog = catalog();
        let mut resolver = Resolver::new(&catalog);
        let err = resolver
            .resolve(&NotebookHints::name("   "), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoNotebookSpecified));
    }

    #[test]
    fn test_score_tiers() {
        assert_eq!(score_name("Cooking", "cooking"), 100);
        assert_eq!(score_name("  research   notes ", "Research Notes"), 100);
        assert_eq!(score_name("research", "Research Notes"), 80);
        assert_eq!(score_name("notes", "Research Notes"), 60);
        assert_eq!(score_name("search", "Research Notes"), 40);
        let fuzzy = score_name("reserch notes", "Research Notes");
        assert!(fuzzy >= MATCH_THRESHOLD && fuzzy < 40, "{}", fuzzy);
        assert!(score_name("zzz", "Research Notes") < MATCH_THRESHOLD);
    }
}
