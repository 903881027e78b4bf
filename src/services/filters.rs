//! Size and difficulty predicates.

use std::collections::BTreeMap;

use crate::config::SizeThresholds;
use crate::models::schemas::Difficulty;

/// Inclusive range check; an unknown size never matches.
pub fn matches_article_size_filter(size: Option<u64>, min_size: Option<u64>, max_size: Option<u64>) -> bool {
    let Some(size) = size else {
        return false;
    };

    if min_size.is_some_and(|min| size < min) {
        return false;
    }

    if max_size.is_some_and(|max| size > max) {
        return false;
    }

    true
}

/// True if any section matches; sizes that could not be fetched never match.
pub fn matches_section_size_filter(
    section_sizes: Option<&BTreeMap<String, u64>>,
    min_size: Option<u64>,
    max_size: Option<u64>,
) -> bool {
    let Some(section_sizes) = section_sizes else {
        return false;
    };

    if min_size.is_none() && max_size.is_none() {
        return true;
    }

    if section_sizes.is_empty() {
        return true;
    }

    section_sizes
        .values()
        .any(|size| matches_article_size_filter(Some(*size), min_size, max_size))
}

fn difficulty_by_thresholds(size: u64, easy: u64, medium: u64, hard: u64) -> Option<Difficulty> {
    if size < easy {
        None
    } else if size < medium {
        Some(Difficulty::Easy)
    } else if size < hard {
        Some(Difficulty::Medium)
    } else {
        Some(Difficulty::Hard)
    }
}

pub fn article_difficulty(size: Option<u64>, thresholds: &SizeThresholds) -> Option<Difficulty> {
    size.and_then(|size| {
        difficulty_by_thresholds(
            size,
            thresholds.article_easy,
            thresholds.article_medium,
            thresholds.article_hard,
        )
    })
}

pub fn section_difficulty(size: u64, thresholds: &SizeThresholds) -> Option<Difficulty> {
    difficulty_by_thresholds(
        size,
        thresholds.section_easy,
        thresholds.section_medium,
        thresholds.section_hard,
    )
}

pub fn matches_article_difficulty_filter(
    size: Option<u64>,
    requested: Option<Difficulty>,
    thresholds: &SizeThresholds,
) -> bool {
    match requested {
        None => true,
        Some(requested) => article_difficulty(size, thresholds) == Some(requested),
    }
}

/// True if any section has the requested difficulty.
pub fn matches_section_difficulty_filter(
    section_sizes: &BTreeMap<String, u64>,
    requested: Option<Difficulty>,
    thresholds: &SizeThresholds,
) -> bool {
    let Some(requested) = requested else {
        return true;
    };

    if section_sizes.is_empty() {
        return true;
    }

    section_sizes
        .values()
        .any(|size| section_difficulty(*size, thresholds) == Some(requested))
}
