//! Data models for API request and response schemas.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::wiki::PageCollectionMetadata;

/// Default number of recommendations per request
pub const DEFAULT_COUNT: usize = 24;

/// How recommendations are ordered after filtering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankMethod {
    /// Random order
    #[default]
    Default,
    /// Descending number of sitelinks
    Sitelinks,
}

/// Size tier of an article or a section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// Query parameters accepted by the recommendation endpoints
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RecommendationQuery {
    pub source: String,
    pub target: String,
    pub count: Option<usize>,
    /// Seed article, or collection name when `collections` is set
    pub seed: Option<String>,
    pub topic: Option<String>,
    pub country: Option<String>,
    pub featured_collection: Option<String>,
    pub collections: bool,
    pub lead_section: bool,
    pub include_pageviews: bool,
    pub rank_method: RankMethod,
    pub difficulty: Option<Difficulty>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub continue_offset: Option<i64>,
    pub continue_seed: Option<u64>,
}

/// Validated, immutable recommendation request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendationRequest {
    pub source: String,
    pub target: String,
    pub count: usize,
    pub seed: Option<String>,
    pub topic: Option<String>,
    pub country: Option<String>,
    pub featured_collection: Option<String>,
    pub collections: bool,
    pub lead_section: bool,
    pub include_pageviews: bool,
    pub rank_method: RankMethod,
    pub difficulty: Option<Difficulty>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub continue_offset: Option<i64>,
    pub continue_seed: Option<u64>,
}

impl RecommendationRequest {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            count: DEFAULT_COUNT,
            seed: None,
            topic: None,
            country: None,
            featured_collection: None,
            collections: false,
            lead_section: false,
            include_pageviews: false,
            rank_method: RankMethod::Default,
            difficulty: None,
            min_size: None,
            max_size: None,
            continue_offset: None,
            continue_seed: None,
        }
    }

    pub fn has_size_bounds(&self) -> bool {
        self.min_size.is_some() || self.max_size.is_some()
    }

    /// Collection name, carried in `seed` for collection requests
    pub fn collection_name(&self) -> Option<&str> {
        self.seed.as_deref().filter(|name| !name.is_empty())
    }
}

/// A single article translation recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationRecommendation {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wikidata_id: Option<String>,
    /// Meaning depends on the strategy that produced it
    pub rank: u64,
    pub langlinks_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_section_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pageviews: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<PageCollectionMetadata>,
}

impl TranslationRecommendation {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            wikidata_id: None,
            rank: 0,
            langlinks_count: 0,
            size: None,
            lead_section_size: None,
            pageviews: None,
            difficulty: None,
            collection: None,
        }
    }

    /// Wikidata id when known, title otherwise
    pub fn identity(&self) -> &str {
        self.wikidata_id.as_deref().unwrap_or(&self.title)
    }
}

/// Size information for one source section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSectionInfo {
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
}

/// A section translation recommendation for an article present in both languages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionTranslationRecommendation {
    pub source_title: String,
    pub target_title: String,
    pub source_sections: Vec<String>,
    pub target_sections: Vec<String>,
    /// source section -> already translated target section
    pub present: BTreeMap<String, String>,
    /// source section -> proposed target section
    pub missing: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub source_section_info: BTreeMap<String, SourceSectionInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<PageCollectionMetadata>,
}

/// Response for article recommendations
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TranslationRecommendationResponse {
    pub recommendations: Vec<TranslationRecommendation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_offset: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_seed: Option<u64>,
}

impl TranslationRecommendationResponse {
    pub fn new(recommendations: Vec<TranslationRecommendation>) -> Self {
        Self {
            recommendations,
            ..Default::default()
        }
    }
}

/// Response for section recommendations
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SectionTranslationRecommendationResponse {
    pub recommendations: Vec<SectionTranslationRecommendation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_offset: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_seed: Option<u64>,
}

impl SectionTranslationRecommendationResponse {
    pub fn new(recommendations: Vec<SectionTranslationRecommendation>) -> Self {
        Self {
            recommendations,
            ..Default::default()
        }
    }
}

/// Query for checking collection membership
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MembershipQuery {
    pub collection: String,
    /// Pipe-delimited Wikidata ids
    pub qids: Option<String>,
    /// Pipe-delimited titles in `language`
    pub titles: Option<String>,
    pub language: Option<String>,
}

/// Membership flags, keyed by the requested qid or title
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MembershipResponse {
    pub collection: Option<PageCollectionMetadata>,
    pub qids: BTreeMap<String, bool>,
    pub titles: BTreeMap<String, bool>,
}

/// Statistics about the cache
#[derive(Debug, Serialize)]
pub struct CacheStats {
    pub page_collections: usize,
    pub collection_articles: usize,
    pub site_matrix_languages: usize,
    pub interwiki_prefixes: usize,
    pub appendix_languages: usize,
    pub persistent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collections_updated_at: Option<DateTime<Utc>>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub page_collections_loaded: bool,
}

/// Root endpoint response
#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub service: String,
    pub version: String,
    pub description: String,
    pub endpoints: serde_json::Value,
}
