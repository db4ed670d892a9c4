//! Latest-run deduplication of grouped query results.
//!
//! The photometry and image queries return several rows for the same
//! exposure (or exposure and CCD) when an image was processed more than once.
//! The queries order rows by the grouping key and then by processing run, so
//! the row to keep is always the last one of its group.
use std::collections::HashSet;
use std::hash::Hash;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ReduceError {
    #[error("input not grouped: key at record {index} reappears after its group ended")]
    NonContiguousGroup { index: usize },
}

/// Keeps the last record of every maximal run of consecutive records with
/// equal key.
///
/// Only neighbours are compared: if the same key shows up in two separate
/// runs, each run is reduced on its own and both survivors are returned.
/// Callers that need one record per key must pass input grouped by key, or
/// use [`latest_per_group`] which checks that.
pub fn latest_per_run<T, K, F>(records: Vec<T>, key: F) -> Vec<T>
where
    K: PartialEq,
    F: Fn(&T) -> K,
{
    let mut reduced: Vec<T> = Vec::with_capacity(records.len());
    let mut last_key: Option<K> = None;

    for record in records {
        let k = key(&record);
        if last_key.as_ref() == Some(&k) {
            // same group as the previous record: the later one wins
            if let Some(slot) = reduced.last_mut() {
                *slot = record;
            }
        } else {
            reduced.push(record);
        }
        last_key = Some(k);
    }

    reduced
}

/// Verifies that equal keys are contiguous, then reduces with
/// [`latest_per_run`].
pub fn latest_per_group<T, K, F>(records: Vec<T>, key: F) -> Result<Vec<T>, ReduceError>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    check_grouped(&records, &key)?;
    Ok(latest_per_run(records, key))
}

fn check_grouped<T, K, F>(records: &[T], key: &F) -> Result<(), ReduceError>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut closed: HashSet<K> = HashSet::new();
    let mut current: Option<K> = None;

    for (index, record) in records.iter().enumerate() {
        let k = key(record);
        if current.as_ref() == Some(&k) {
            continue;
        }
        if closed.contains(&k) {
            return Err(ReduceError::NonContiguousGroup { index });
        }
        if let Some(previous) = current.replace(k) {
            closed.insert(previous);
        }
    }

    Ok(())
}
