use crate::intercept::QueryEvent;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Groups smaller than this are not reported.
pub const MIN_GROUP_SIZE: usize = 2;

/// Aggregates for one connection alias.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatabaseAliasStats {
    pub time_spent_ms: f64,
    pub num_queries: usize,
    /// Sum of the sizes of this alias's repeating similarity groups.
    pub similar_count: usize,
    /// Sum of the sizes of this alias's repeating duplicate groups.
    pub duplicate_count: usize,
}

/// The finalized profile of one request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestStats {
    /// Id of the stored request, when one was recorded.
    pub request_id: Option<String>,
    pub sql_time_ms: f64,
    pub num_queries: usize,
    pub databases: BTreeMap<String, DatabaseAliasStats>,
    /// Annotated events in execution order.
    pub queries: Vec<QueryEvent>,
}

impl RequestStats {
    /// Events that belong to a repeating similarity group.
    pub fn similar_queries(&self) -> impl Iterator<Item = &QueryEvent> {
        self.queries.iter().filter(|q| q.similar_count.is_some())
    }

    /// Events that belong to a repeating duplicate group.
    pub fn duplicate_queries(&self) -> impl Iterator<Item = &QueryEvent> {
        self.queries.iter().filter(|q| q.duplicate_count.is_some())
    }
}

type SimilarKey = (String, String);
type DuplicateKey = (String, String, String);

/// Annotate `queries` in place and add group totals to `databases`.
///
/// One ordered pass counts similarity and duplicate groups per alias and
/// marks transaction runs; a second pass copies group sizes onto events
/// whose group repeats.
pub(crate) fn annotate(
    queries: &mut [QueryEvent],
    databases: &mut BTreeMap<String, DatabaseAliasStats>,
) {
    let mut similar: HashMap<SimilarKey, usize> = HashMap::new();
    let mut duplicates: HashMap<DuplicateKey, usize> = HashMap::new();
    // alias -> (transaction id, index) of that alias's previous event
    let mut last_seen: HashMap<String, (Option<String>, usize)> = HashMap::new();

    for idx in 0..queries.len() {
        let query = &queries[idx];
        *similar.entry(similar_key(query)).or_default() += 1;
        *duplicates.entry(duplicate_key(query)).or_default() += 1;

        let alias = query.alias.clone();
        let transaction_id = query
            .transaction_id
            .clone()
            .filter(|id| !id.is_empty());
        match last_seen.get(&alias) {
            Some((previous, previous_idx)) if *previous != transaction_id => {
                if previous.is_some() {
                    queries[*previous_idx].ends_trans = true;
                }
                if transaction_id.is_some() {
                    queries[idx].starts_trans = true;
                }
            }
            None if transaction_id.is_some() => queries[idx].starts_trans = true,
            _ => {}
        }
        queries[idx].in_trans = transaction_id.is_some();
        last_seen.insert(alias, (transaction_id, idx));
    }
    for (transaction_id, idx) in last_seen.into_values() {
        if transaction_id.is_some() {
            queries[idx].ends_trans = true;
        }
    }

    for query in queries.iter_mut() {
        query.similar_count = similar
            .get(&similar_key(query))
            .copied()
            .filter(|&n| n >= MIN_GROUP_SIZE);
        query.duplicate_count = duplicates
            .get(&duplicate_key(query))
            .copied()
            .filter(|&n| n >= MIN_GROUP_SIZE);
    }

    for ((alias, _), count) in similar {
        if count >= MIN_GROUP_SIZE {
            databases.entry(alias).or_default().similar_count += count;
        }
    }
    for ((alias, _, _), count) in duplicates {
        if count >= MIN_GROUP_SIZE {
            databases.entry(alias).or_default().duplicate_count += count;
        }
    }
}

fn similar_key(query: &QueryEvent) -> SimilarKey {
    (query.alias.clone(), query.similarity_key().to_string())
}

fn duplicate_key(query: &QueryEvent) -> DuplicateKey {
    let (sql, params) = query.duplicate_key();
    (query.alias.clone(), sql.to_string(), params.to_string())
}
