//! Section-gap suggestions from CXServer.
//!
//! Candidates are queried concurrently and the fan-out stops as soon as
//! enough usable suggestions have arrived.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::SizeThresholds;
use crate::error::FetchResult;
use crate::models::schemas::{
    Difficulty, SectionTranslationRecommendation, SourceSectionInfo, TranslationRecommendation,
};
use crate::services::bounded::collect_until;
use crate::services::cache::RecommendationCache;
use crate::services::filters::{matches_section_difficulty_filter, matches_section_size_filter, section_difficulty};
use crate::services::wiki::{params, WikiApi};

/// Boilerplate sections that are never worth suggesting, in English
pub const APPENDIX_TITLES_EN: &[&str] = &[
    "References",
    "External links",
    "Further reading",
    "See also",
    "Notes",
    "Bibliography",
    "Sources",
    "Citations",
    "Footnotes",
    "Works cited",
    "Notes and references",
    "References and notes",
    "Gallery",
];

/// Constraints on the missing sections of a suggestion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectionFilter {
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub difficulty: Option<Difficulty>,
}

/// Payload of `v2/suggest/sections/{title}/{source}/{target}`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SectionSuggestion {
    source_title: String,
    target_title: String,
    #[serde(default)]
    source_sections: Vec<String>,
    #[serde(default)]
    target_sections: Vec<String>,
    #[serde(default)]
    present: BTreeMap<String, String>,
    #[serde(default)]
    missing: BTreeMap<String, String>,
    #[serde(default)]
    source_section_sizes: BTreeMap<String, u64>,
}

#[derive(Debug, Deserialize)]
struct SectionSuggestionResponse {
    sections: SectionSuggestion,
}

pub struct SectionSuggester {
    wiki: Arc<WikiApi>,
    cache: Arc<RecommendationCache>,
    thresholds: SizeThresholds,
    concurrency: usize,
}

impl SectionSuggester {
    pub fn new(wiki: Arc<WikiApi>, cache: Arc<RecommendationCache>, thresholds: SizeThresholds, concurrency: usize) -> Self {
        Self {
            wiki,
            cache,
            thresholds,
            concurrency,
        }
    }

    /// Appendix section titles in `language`, translated once and cached.
    ///
    /// A failed translation yields an empty list and is retried next time.
    pub async fn appendix_titles(&self, language: &str) -> Arc<Vec<String>> {
        if let Some(titles) = self.cache.appendix_titles(language).await {
            return titles;
        }

        let titles = if language == "en" {
            APPENDIX_TITLES_EN.iter().map(|title| title.to_string()).collect()
        } else {
            match self.translate_appendix_titles(language).await {
                Ok(titles) => titles,
                Err(e) => {
                    tracing::warn!("Could not translate appendix section titles to {}: {}", language, e);
                    return Arc::new(Vec::new());
                }
            }
        };

        if let Err(e) = self.cache.set_appendix_titles(language, titles.clone()).await {
            tracing::error!("Failed to persist appendix titles for {}: {}", language, e);
        }
        Arc::new(titles)
    }

    async fn translate_appendix_titles(&self, language: &str) -> FetchResult<Vec<String>> {
        let joined = APPENDIX_TITLES_EN.join("|");
        let response = self
            .wiki
            .cxserver(
                &["v2", "suggest", "sections", "titles", "en", language],
                params(&[("titles", joined.as_str())]),
                "en",
            )
            .await?;

        let mut titles = Vec::new();
        if let Some(map) = response.as_object() {
            for translations in map.values() {
                match translations {
                    Value::Array(items) => titles.extend(items.iter().filter_map(Value::as_str).map(str::to_string)),
                    Value::String(title) => titles.push(title.clone()),
                    _ => {}
                }
            }
        }
        titles.sort();
        titles.dedup();
        Ok(titles)
    }

    /// Suggestions in completion order, at most `count`
    pub async fn suggest(
        &self,
        candidates: Vec<TranslationRecommendation>,
        source: &str,
        target: &str,
        count: usize,
        filter: SectionFilter,
    ) -> Vec<SectionTranslationRecommendation> {
        self.suggest_indexed(candidates, source, target, count, filter)
            .await
            .into_iter()
            .map(|(_, recommendation)| recommendation)
            .collect()
    }

    /// Like [`suggest`](Self::suggest), each suggestion paired with its candidate position
    pub async fn suggest_indexed(
        &self,
        candidates: Vec<TranslationRecommendation>,
        source: &str,
        target: &str,
        count: usize,
        filter: SectionFilter,
    ) -> Vec<(usize, SectionTranslationRecommendation)> {
        if candidates.is_empty() || count == 0 {
            return Vec::new();
        }

        let appendix = self.appendix_titles(target).await;
        let collections: Vec<_> = candidates.iter().map(|c| c.collection.clone()).collect();
        let thresholds = self.thresholds;

        let wiki = self.wiki.clone();
        let source_owned = source.to_string();
        let target_owned = target.to_string();
        let fetch = move |title: String| {
            let wiki = wiki.clone();
            let source = source_owned.clone();
            let target = target_owned.clone();
            async move {
                let result = wiki
                    .cxserver(
                        &["v2", "suggest", "sections", title.as_str(), source.as_str(), target.as_str()],
                        params(&[("include_section_sizes", "true")]),
                        &source,
                    )
                    .await;
                (title, result)
            }
        };

        let titles = candidates.into_iter().map(|c| c.title).collect();
        let accepted = collect_until(titles, self.concurrency, count, fetch, |(title, result)| {
            let value = match result {
                Ok(value) => value,
                Err(e) => {
                    tracing::error!("Error fetching section suggestions for {}: {}", title, e);
                    return None;
                }
            };
            match serde_json::from_value::<SectionSuggestionResponse>(value) {
                Ok(response) => build_recommendation(response.sections, &appendix, filter, &thresholds),
                Err(e) => {
                    tracing::debug!("No usable section suggestion for {}: {}", title, e);
                    None
                }
            }
        })
        .await;

        accepted
            .into_iter()
            .map(|(position, mut recommendation)| {
                recommendation.collection = collections[position].clone();
                (position, recommendation)
            })
            .collect()
    }
}

/// Validated recommendation, or `None` when nothing worth translating is missing
fn build_recommendation(
    suggestion: SectionSuggestion,
    appendix: &[String],
    filter: SectionFilter,
    thresholds: &SizeThresholds,
) -> Option<SectionTranslationRecommendation> {
    let missing: BTreeMap<String, String> = suggestion
        .missing
        .into_iter()
        .filter(|(section, _)| !appendix.contains(section))
        .collect();

    if missing.is_empty() {
        return None;
    }

    let missing_sizes: BTreeMap<String, u64> = missing
        .keys()
        .filter_map(|section| {
            suggestion
                .source_section_sizes
                .get(section)
                .map(|size| (section.clone(), *size))
        })
        .collect();

    if !matches_section_size_filter(Some(&missing_sizes), filter.min_size, filter.max_size) {
        return None;
    }

    if !matches_section_difficulty_filter(&missing_sizes, filter.difficulty, thresholds) {
        return None;
    }

    let source_section_info = suggestion
        .source_sections
        .iter()
        .filter_map(|section| {
            let size = *suggestion.source_section_sizes.get(section)?;
            Some((
                section.clone(),
                SourceSectionInfo {
                    size,
                    difficulty: section_difficulty(size, thresholds),
                },
            ))
        })
        .collect();

    Some(SectionTranslationRecommendation {
        source_title: suggestion.source_title,
        target_title: suggestion.target_title,
        source_sections: suggestion.source_sections,
        target_sections: suggestion.target_sections,
        present: suggestion.present,
        missing,
        source_section_info,
        collection: None,
    })
}
