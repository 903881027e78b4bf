//! Reordering helpers that mix items of different provenance.

use std::collections::HashSet;
use std::hash::Hash;

use crate::models::schemas::TranslationRecommendation;

/// Round-robin across groups, groups ordered by first appearance.
///
/// Relative order inside a group is preserved.
pub fn round_robin_by<T, K, F>(items: Vec<T>, key: F) -> Vec<T>
where
    K: Eq,
    F: Fn(&T) -> K,
{
    let mut groups: Vec<(K, Vec<T>)> = Vec::new();
    for item in items {
        let item_key = key(&item);
        match groups.iter_mut().find(|(existing, _)| *existing == item_key) {
            Some((_, group)) => group.push(item),
            None => groups.push((item_key, vec![item])),
        }
    }

    let total = groups.iter().map(|(_, group)| group.len()).sum();
    let mut iterators: Vec<_> = groups.into_iter().map(|(_, group)| group.into_iter()).collect();
    let mut result = Vec::with_capacity(total);

    while result.len() < total {
        for iterator in iterators.iter_mut() {
            if let Some(item) = iterator.next() {
                result.push(item);
            }
        }
    }

    result
}

/// Alternate items that satisfy `preferred` with items that don't, starting
/// with a preferred one; whichever side runs out first is backfilled by the other.
pub fn alternate_by<T>(items: Vec<T>, preferred: impl Fn(&T) -> bool) -> Vec<T> {
    let (with, without): (Vec<T>, Vec<T>) = items.into_iter().partition(|item| preferred(item));
    let total = with.len() + without.len();
    let mut with = with.into_iter();
    let mut without = without.into_iter();
    let mut result = Vec::with_capacity(total);

    for position in 0..total {
        let next = if position % 2 == 0 {
            with.next().or_else(|| without.next())
        } else {
            without.next().or_else(|| with.next())
        };
        result.extend(next);
    }

    result
}

/// Mix `secondary` into `primary`: after every `max(1, |primary| / |secondary|)`
/// primary items one secondary item follows; leftovers are appended.
/// Secondary items already present in `primary` are dropped.
pub fn interleave_by_ratio(
    primary: Vec<TranslationRecommendation>,
    secondary: Vec<TranslationRecommendation>,
) -> Vec<TranslationRecommendation> {
    interleave_by_ratio_with(primary, secondary, |rec| rec.identity().to_string())
}

fn interleave_by_ratio_with<T, K, F>(primary: Vec<T>, secondary: Vec<T>, identity: F) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let seen: HashSet<K> = primary.iter().map(&identity).collect();
    let secondary: Vec<T> = secondary
        .into_iter()
        .filter(|item| !seen.contains(&identity(item)))
        .collect();

    if secondary.is_empty() {
        return primary;
    }

    let ratio = (primary.len() / secondary.len()).max(1);
    let mut result = Vec::with_capacity(primary.len() + secondary.len());
    let mut primary = primary.into_iter().peekable();
    let mut secondary = secondary.into_iter();

    while primary.peek().is_some() {
        result.extend(primary.by_ref().take(ratio));
        match secondary.next() {
            Some(item) => result.push(item),
            None => break,
        }
    }

    result.extend(primary);
    result.extend(secondary);
    result
}
