use crate::{
    model::PaperId,
    store::{AssignmentStore, Reject},
};
use std::collections::BTreeSet;

///
/// PaperSearcher
///
/// Delegate for paper selectors the engine does not understand natively.
/// The embedder can wire its full search syntax here; the engine only
/// resolves ids, ranges, and `all` itself.
///

pub trait PaperSearcher {
    fn search(&self, query: &str, store: &AssignmentStore) -> Result<Vec<PaperId>, Reject>;
}

/// Refuses every delegated query.
pub struct NoSearcher;

impl PaperSearcher for NoSearcher {
    fn search(&self, query: &str, _store: &AssignmentStore) -> Result<Vec<PaperId>, Reject> {
        Err(Reject::new(format!("unsupported paper selector '{query}'")))
    }
}

/// Resolve a paper selector into existing paper ids, in selector order
/// with duplicates removed. Tokens are ids (`7`, `#7`) or inclusive
/// ranges (`3-9`); anything else sends the whole selector to the
/// searcher.
pub fn resolve_papers(
    selector: &str,
    store: &AssignmentStore,
    searcher: &dyn PaperSearcher,
) -> Result<Vec<PaperId>, Reject> {
    let selector = selector.trim();
    if selector.is_empty() {
        return Err(Reject::new("paper selector required"));
    }
    if selector.eq_ignore_ascii_case("all") {
        return Ok(store.paper_ids());
    }

    let mut out = Vec::new();
    let mut seen = BTreeSet::new();
    for token in selector.split([' ', ',']).filter(|t| !t.is_empty()) {
        match parse_token(token) {
            Some(Token::Id(pid)) => {
                if store.paper(pid).is_none() {
                    return Err(Reject::new(format!("unknown paper {pid}")));
                }
                if seen.insert(pid) {
                    out.push(pid);
                }
            }
            Some(Token::Range(lo, hi)) => {
                if lo > hi {
                    return Err(Reject::new(format!("backwards paper range '{token}'")));
                }
                // Ranges skip gaps rather than erroring on them. Walk the
                // known ids, not the numeric span, which may be huge.
                for pid in store.paper_ids() {
                    if (lo..=hi).contains(&pid.0) && seen.insert(pid) {
                        out.push(pid);
                    }
                }
            }
            None => return searcher.search(selector, store),
        }
    }
    Ok(out)
}

enum Token {
    Id(PaperId),
    Range(u32, u32),
}

fn parse_token(token: &str) -> Option<Token> {
    let token = token.trim_start_matches('#');
    if let Some((lo, hi)) = token.split_once('-') {
        let lo = lo.trim().parse().ok()?;
        let hi = hi.trim().trim_start_matches('#').parse().ok()?;
        Some(Token::Range(lo, hi))
    } else {
        token.parse().ok().map(|n| Token::Id(PaperId(n)))
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::ConferenceDb,
        model::{Now, Paper},
    };

    struct FixedSearcher(Vec<PaperId>);

    impl PaperSearcher for FixedSearcher {
        fn search(&self, _query: &str, _store: &AssignmentStore) -> Result<Vec<PaperId>, Reject> {
            Ok(self.0.clone())
        }
    }

    fn store() -> AssignmentStore {
        let mut db = ConferenceDb::default();
        for id in [1, 2, 3, 5, 8] {
            db.add_paper(Paper::new(PaperId(id), format!("p{id}")));
        }
        AssignmentStore::new(&db, Now(0))
    }

    #[test]
    fn resolves_ids_ranges_and_all() {
        let store = store();
        let got = resolve_papers("#1, 3 5-8", &store, &NoSearcher).unwrap();
        assert_eq!(got, vec![PaperId(1), PaperId(3), PaperId(5), PaperId(8)]);

        let got = resolve_papers("all", &store, &NoSearcher).unwrap();
        assert_eq!(got.len(), 5);
    }

    #[test]
    fn duplicates_collapse_in_order() {
        let store = store();
        let got = resolve_papers("2 1-2", &store, &NoSearcher).unwrap();
        assert_eq!(got, vec![PaperId(2), PaperId(1)]);
    }

    #[test]
    fn explicit_unknown_ids_are_rejected() {
        let store = store();
        assert!(resolve_papers("4", &store, &NoSearcher).is_err());
        // ...but a range quietly skips the gap.
        let got = resolve_papers("3-5", &store, &NoSearcher).unwrap();
        assert_eq!(got, vec![PaperId(3), PaperId(5)]);
    }

    #[test]
    fn huge_ranges_only_visit_known_papers() {
        let store = store();
        let got = resolve_papers("1-4294967295", &store, &NoSearcher).unwrap();
        assert_eq!(
            got,
            vec![PaperId(1), PaperId(2), PaperId(3), PaperId(5), PaperId(8)]
        );
    }

    #[test]
    fn non_numeric_selectors_delegate_to_the_searcher() {
        let store = store();
        assert!(resolve_papers("re:alice", &store, &NoSearcher).is_err());

        let got = resolve_papers("re:alice", &store, &FixedSearcher(vec![PaperId(8)])).unwrap();
        assert_eq!(got, vec![PaperId(8)]);
    }
}
