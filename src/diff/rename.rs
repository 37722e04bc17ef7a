//! Rename detection
//!
//! Candidate pairs form a bipartite graph between names that disappeared and
//! names that appeared. A rename is accepted only when a connected component
//! of that graph is a single edge: the old name has exactly one candidate and
//! that candidate points back at nothing else. Larger components are
//! ambiguous and fall back to drop + create.

use crate::schema::{Column, Table};
use std::collections::BTreeSet;

/// Outcome of matching disappeared names against appeared names.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct RenameMatch {
    pub pairs: Vec<(String, String)>,
    /// Components with more than one candidate: `(old names, new names)`.
    pub ambiguous: Vec<(Vec<String>, Vec<String>)>,
}

pub(crate) fn match_renames<T>(
    old: &[&T],
    new: &[&T],
    name: impl Fn(&T) -> &str,
    is_candidate: impl Fn(&T, &T) -> bool,
) -> RenameMatch {
    let edges: Vec<(usize, usize)> = old
        .iter()
        .enumerate()
        .flat_map(|(i, o)| {
            new.iter()
                .enumerate()
                .filter(|(_, n)| is_candidate(o, n))
                .map(move |(j, _)| (i, j))
                .collect::<Vec<_>>()
        })
        .collect();

    let mut result = RenameMatch::default();
    let mut seen_old = vec![false; old.len()];

    for start in 0..old.len() {
        if seen_old[start] || !edges.iter().any(|(i, _)| *i == start) {
            continue;
        }

        // Flood the component reachable from `start`.
        let mut olds = BTreeSet::from([start]);
        let mut news = BTreeSet::new();
        loop {
            let before = olds.len() + news.len();
            for (i, j) in &edges {
                if olds.contains(i) || news.contains(j) {
                    olds.insert(*i);
                    news.insert(*j);
                }
            }
            if olds.len() + news.len() == before {
                break;
            }
        }
        for i in &olds {
            seen_old[*i] = true;
        }

        let olds: Vec<String> = olds.iter().map(|i| name(old[*i]).to_string()).collect();
        let news: Vec<String> = news.iter().map(|j| name(new[*j]).to_string()).collect();
        if olds.len() == 1 && news.len() == 1 {
            result.pairs.push((olds[0].clone(), news[0].clone()));
        } else {
            result.ambiguous.push((olds, news));
        }
    }

    result
}

/// Column identity used to compare tables: name, type and nullability.
fn signatures(table: &Table) -> BTreeSet<String> {
    table
        .columns
        .iter()
        .map(|c| {
            let (name, ty, nullable) = c.signature();
            format!("{name}:{ty}:{nullable}")
        })
        .collect()
}

/// Whether `new` may be `old` under another name.
///
/// The column signature sets must share at least one entry and differ in no
/// more than `tolerance` entries.
pub(crate) fn is_table_candidate(old: &Table, new: &Table, tolerance: usize) -> bool {
    let a = signatures(old);
    let b = signatures(new);
    let shared = a.intersection(&b).count();
    let mismatched = a.symmetric_difference(&b).count();
    shared > 0 && mismatched <= tolerance
}

pub(crate) fn is_column_candidate(old: &Column, new: &Column) -> bool {
    old.column_type == new.column_type && old.nullable == new.nullable
}
