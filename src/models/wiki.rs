//! Wiki-side data: pages, Wikidata articles, page collections and the
//! upstream page shapes returned by the MediaWiki Action API.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A page on some wiki, pinned to a revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WikiPage {
    pub wiki: String,
    pub id: u64,
    pub revision_id: u64,
    pub title: String,
    pub language: String,
    pub namespace: i64,
}

/// A Wikidata entity with its per-language sitelinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WikiDataArticle {
    pub wikidata_id: String,
    /// language code -> article title
    pub langlinks: BTreeMap<String, String>,
    /// language code -> byte size
    #[serde(default)]
    pub sizes: BTreeMap<String, u64>,
    /// language code -> page id
    #[serde(default)]
    pub page_ids: BTreeMap<String, u64>,
}

impl WikiDataArticle {
    pub fn new(wikidata_id: impl Into<String>, langlinks: BTreeMap<String, String>) -> Self {
        Self {
            wikidata_id: wikidata_id.into(),
            langlinks,
            sizes: BTreeMap::new(),
            page_ids: BTreeMap::new(),
        }
    }

    pub fn title(&self, language: &str) -> Option<&str> {
        self.langlinks.get(language).map(String::as_str)
    }
}

/// Editorial description of a collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCollectionMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub articles_count: Option<usize>,
}

impl PageCollectionMetadata {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// A named set of marker pages and the Wikidata articles reachable from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCollection {
    pub metadata: PageCollectionMetadata,
    pub pages: Vec<WikiPage>,
    pub articles: Vec<WikiDataArticle>,
}

impl PageCollection {
    /// Pages are kept ordered by (language, id) so the cache key is stable.
    pub fn new(metadata: PageCollectionMetadata, mut pages: Vec<WikiPage>) -> Self {
        pages.sort_by(|a, b| (a.language.as_str(), a.id).cmp(&(b.language.as_str(), b.id)));
        Self {
            metadata,
            pages,
            articles: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Changes whenever any member page gets a new revision.
    pub fn cache_key(&self) -> String {
        self.pages
            .iter()
            .map(|page| format!("{}-{}-{}", page.language, page.id, page.revision_id))
            .collect::<Vec<_>>()
            .join("|")
    }

    /// Metadata as exposed on recommendations, including the article count.
    pub fn metadata(&self) -> PageCollectionMetadata {
        PageCollectionMetadata {
            articles_count: Some(self.articles.len()),
            ..self.metadata.clone()
        }
    }

    /// Case-insensitive exact match, or `name/` prefix match for sub-collections.
    pub fn matches_name(&self, name: &str) -> bool {
        let own = self.name().to_lowercase();
        let wanted = name.to_lowercase();
        own == wanted || own.starts_with(&format!("{}/", wanted))
    }

    pub fn is_named(&self, name: &str) -> bool {
        self.name().to_lowercase() == name.to_lowercase()
    }
}

/// One language entry of the Wikimedia site matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteMatrixLanguage {
    pub code: String,
    #[serde(default, rename = "site")]
    pub sites: Vec<SiteMatrixSite>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteMatrixSite {
    pub url: String,
    pub dbname: String,
    #[serde(default)]
    pub code: String,
}

/// One entry of a wiki's interwiki map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterwikiEntry {
    pub prefix: String,
    pub url: String,
}

/// A page as returned by `action=query` generators (search, mostviewed).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiPage {
    pub title: String,
    #[serde(default)]
    pub ns: i64,
    #[serde(default)]
    pub pageid: Option<u64>,
    #[serde(default)]
    pub index: Option<u64>,
    #[serde(default)]
    pub langlinks: Vec<ApiLanglink>,
    #[serde(default)]
    pub langlinkscount: Option<u64>,
    #[serde(default)]
    pub pageprops: ApiPageProps,
    #[serde(default)]
    pub length: Option<u64>,
    #[serde(default)]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiLanglink {
    pub lang: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiPageProps {
    #[serde(default)]
    pub wikibase_item: Option<String>,
    #[serde(default)]
    pub disambiguation: Option<serde_json::Value>,
}

impl ApiPage {
    pub fn is_disambiguation(&self) -> bool {
        self.pageprops.disambiguation.is_some()
    }

    pub fn languages(&self) -> Vec<&str> {
        self.langlinks.iter().map(|link| link.lang.as_str()).collect()
    }

    pub fn byte_size(&self) -> Option<u64> {
        self.size.or(self.length)
    }
}
