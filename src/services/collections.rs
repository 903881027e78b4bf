//! Page collection refresh pipeline.
//!
//! Discovers collection marker pages on Meta, resolves their metadata,
//! fetches the Wikidata articles each page links to and replaces the cached
//! collection set in one step. Collections whose member pages have not been
//! edited since the previous cycle keep their articles without refetching.

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::config::Settings;
use crate::error::{AppResult, FetchResult};
use crate::models::wiki::{PageCollection, PageCollectionMetadata, WikiDataArticle, WikiPage};
use crate::services::cache::RecommendationCache;
use crate::services::sitematrix::SiteDirectory;
use crate::services::wiki::{normalization_map, params, WikiApi, TITLES_PER_REQUEST};

/// Marker pages per `pagecollectionsmetadata` request
const METADATA_BATCH_SIZE: usize = 20;

/// In-flight metadata requests
const METADATA_CONCURRENCY: usize = 10;

/// Name of the lease that designates the refresh runner
pub const REFRESH_LEASE: &str = "page-collection-refresh";

/// Sitelink projects that are not language editions of Wikipedia
const NON_LANGUAGE_SITES: &[&str] = &[
    "commons",
    "species",
    "meta",
    "mediawiki",
    "wikidata",
    "sources",
    "outreach",
    "incubator",
    "wikimania",
    "wikifunctions",
];

pub struct CollectionRefresher {
    wiki: Arc<WikiApi>,
    cache: Arc<RecommendationCache>,
    sites: Arc<SiteDirectory>,
    category: String,
    namespace: String,
    enrichment_language: String,
    batch_semaphore: Arc<Semaphore>,
    qid_pattern: Regex,
}

impl CollectionRefresher {
    pub fn new(
        wiki: Arc<WikiApi>,
        cache: Arc<RecommendationCache>,
        sites: Arc<SiteDirectory>,
        settings: &Settings,
    ) -> Self {
        Self {
            wiki,
            cache,
            sites,
            category: settings.collections_category.clone(),
            namespace: settings.collections_namespace.clone(),
            enrichment_language: settings.collection_enrichment_language.clone(),
            batch_semaphore: Arc::new(Semaphore::new(settings.api_concurrency_limit)),
            qid_pattern: Regex::new(r"^(Q\d+)").unwrap(),
        }
    }

    /// Run one refresh cycle and return the number of cached collections.
    ///
    /// When marker pages cannot be listed the cached set is left untouched.
    pub async fn refresh(&self) -> AppResult<usize> {
        self.sites.bootstrap().await;

        let pages = match self.collection_pages().await {
            Ok(pages) if !pages.is_empty() => pages,
            Ok(_) => {
                tracing::error!("No pages found in Category:{}", self.category);
                return Ok(self.cache.page_collections().map(|c| c.len()).unwrap_or(0));
            }
            Err(e) => {
                tracing::error!("Could not list Category:{}: {}", self.category, e);
                return Ok(self.cache.page_collections().map(|c| c.len()).unwrap_or(0));
            }
        };
        tracing::info!("Found {} page collection marker pages", pages.len());

        let metadata = self.metadata_by_page(&pages).await;
        let fetched = group_into_collections(pages, &metadata);
        let cached = self.cache.page_collections();

        let mut collections = Vec::with_capacity(fetched.len());
        for mut collection in fetched {
            let reusable = cached.as_ref().and_then(|cached| {
                cached.iter().find(|previous| {
                    previous.name() == collection.name()
                        && previous.cache_key() == collection.cache_key()
                        && !previous.articles.is_empty()
                })
            });

            match reusable {
                Some(previous) => {
                    tracing::debug!("Reusing cached articles of page collection {}", collection.name());
                    collection.articles = previous.articles.clone();
                }
                None => {
                    collection.articles = self.fetch_collection_articles(&collection.pages).await;
                    tracing::info!(
                        "Fetched {} articles for page collection {}",
                        collection.articles.len(),
                        collection.name()
                    );
                }
            }

            if collection.articles.is_empty() {
                tracing::warn!("Discarding page collection {} without articles", collection.name());
                continue;
            }
            collections.push(collection);
        }

        let count = collections.len();
        self.cache.set_page_collections(collections).await?;
        tracing::info!("Page collection cache updated with {} collections", count);
        Ok(count)
    }

    /// Pages in the marker category
    async fn collection_pages(&self) -> FetchResult<Vec<WikiPage>> {
        let category = format!("Category:{}", self.category);
        let responses = self
            .wiki
            .query_all(
                "meta",
                params(&[
                    ("action", "query"),
                    ("format", "json"),
                    ("formatversion", "2"),
                    ("generator", "categorymembers"),
                    ("gcmlimit", "max"),
                    ("gcmnamespace", self.namespace.as_str()),
                    ("gcmtitle", category.as_str()),
                    ("prop", "info"),
                ]),
            )
            .await?;

        let pages = responses
            .iter()
            .filter_map(|response| response.pointer("/query/pages").and_then(Value::as_array))
            .flatten()
            .filter_map(|page| {
                Some(WikiPage {
                    wiki: "meta".to_string(),
                    id: page.get("pageid")?.as_u64()?,
                    revision_id: page.get("lastrevid")?.as_u64()?,
                    title: page.get("title")?.as_str()?.to_string(),
                    language: page.get("pagelanguage").and_then(Value::as_str).unwrap_or("en").to_string(),
                    namespace: page.get("ns").and_then(Value::as_i64).unwrap_or(0),
                })
            })
            .collect();

        Ok(pages)
    }

    /// Editorial metadata keyed by page id
    async fn metadata_by_page(&self, pages: &[WikiPage]) -> HashMap<u64, PageCollectionMetadata> {
        let batches: Vec<_> = pages.chunks(METADATA_BATCH_SIZE).map(|batch| self.metadata_batch(batch)).collect();
        let results: Vec<_> = stream::iter(batches)
            .buffer_unordered(METADATA_CONCURRENCY)
            .collect()
            .await;

        let mut metadata = HashMap::new();
        for result in results {
            match result {
                Ok(batch) => metadata.extend(batch),
                Err(e) => tracing::error!("Could not fetch page collection metadata: {}", e),
            }
        }
        metadata
    }

    async fn metadata_batch(&self, pages: &[WikiPage]) -> FetchResult<HashMap<u64, PageCollectionMetadata>> {
        let titles = pages.iter().map(|page| page.title.as_str()).collect::<Vec<_>>().join("|");
        let response = self
            .wiki
            .query(
                "meta",
                params(&[
                    ("action", "query"),
                    ("format", "json"),
                    ("formatversion", "2"),
                    ("list", "pagecollectionsmetadata"),
                    ("titles", titles.as_str()),
                ]),
            )
            .await?;

        let normalized = normalization_map(&response);
        let entries = response.pointer("/query/page_collections").and_then(Value::as_object);
        let mut metadata = HashMap::new();

        for page in response
            .pointer("/query/pages")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let (Some(id), Some(title)) = (
                page.get("pageid").and_then(Value::as_u64),
                page.get("title").and_then(Value::as_str),
            ) else {
                continue;
            };
            let requested = normalized.get(title).map(String::as_str).unwrap_or(title);
            let entry = entries.and_then(|entries| entries.get(requested).or_else(|| entries.get(title)));
            let text = |field: &str| {
                entry
                    .and_then(|entry| entry.get(field))
                    .and_then(Value::as_str)
                    .filter(|value| !value.is_empty())
                    .map(str::to_string)
            };

            metadata.insert(
                id,
                PageCollectionMetadata {
                    name: text("name").unwrap_or_else(|| requested.to_string()),
                    description: text("description"),
                    end_date: text("end-date"),
                    articles_count: None,
                },
            );
        }

        Ok(metadata)
    }

    /// Articles linked from all member pages, deduplicated and enriched
    async fn fetch_collection_articles(&self, pages: &[WikiPage]) -> Vec<WikiDataArticle> {
        let mut seen = HashSet::new();
        let mut articles = Vec::new();

        for page in pages {
            for article in self.articles_in_page(page).await {
                if seen.insert(article.wikidata_id.clone()) {
                    articles.push(article);
                }
            }
        }

        self.enrich(&mut articles).await;
        articles
    }

    /// Wikidata articles reachable from one marker page
    async fn articles_in_page(&self, page: &WikiPage) -> Vec<WikiDataArticle> {
        let links = match self.page_links(page).await {
            Ok(links) => links,
            Err(e) => {
                tracing::error!("Could not fetch links for {}:{}: {}", page.wiki, page.title, e);
                return Vec::new();
            }
        };

        if links.is_empty() {
            tracing::error!("No links found for {}:{}", page.wiki, page.title);
            return Vec::new();
        }

        let mut qids = Vec::new();
        let mut titles_by_prefix: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for link in links {
            let qid = self
                .qid_pattern
                .captures(&link.title)
                .filter(|_| link.url.starts_with("https://www.wikidata.org"))
                .map(|captures| captures[1].to_string());

            if let Some(qid) = qid {
                qids.push(qid);
            } else if !link.title.contains(':') {
                // Only main namespace titles
                titles_by_prefix.entry(link.prefix).or_default().push(link.title);
            }
        }

        let mut articles = self
            .fetch_batches(qids.chunks(TITLES_PER_REQUEST).map(|batch| EntityQuery::Ids(batch.join("|"))).collect())
            .await;

        let mut resolved_by_language: HashMap<&str, HashSet<String>> = HashMap::new();
        for article in &articles {
            for (language, title) in &article.langlinks {
                resolved_by_language
                    .entry(language.as_str())
                    .or_default()
                    .insert(title.replace(' ', "_"));
            }
        }

        let mut title_queries = Vec::new();
        for (prefix, titles) in titles_by_prefix {
            let resolved = resolved_by_language.get(prefix.as_str());
            let mut remaining: Vec<String> = titles
                .into_iter()
                .filter(|title| !resolved.is_some_and(|resolved| resolved.contains(&title.replace(' ', "_"))))
                .collect();
            remaining.sort();
            remaining.dedup();

            let dbname = self.sites.dbname_for_prefix(&prefix);
            for batch in remaining.chunks(TITLES_PER_REQUEST) {
                title_queries.push(EntityQuery::Titles {
                    site: dbname.clone(),
                    titles: batch.join("|"),
                });
            }
        }

        articles.extend(self.fetch_batches(title_queries).await);
        articles.retain(|article| !article.langlinks.is_empty());
        articles
    }

    async fn page_links(&self, page: &WikiPage) -> FetchResult<Vec<PageLink>> {
        let prop = if page.wiki == "meta" { "iwlinks" } else { "links" };
        let request = if prop == "iwlinks" {
            params(&[
                ("action", "query"),
                ("format", "json"),
                ("formatversion", "2"),
                ("prop", "iwlinks"),
                ("titles", page.title.as_str()),
                ("iwlimit", "max"),
                ("iwprop", "url"),
            ])
        } else {
            params(&[
                ("action", "query"),
                ("format", "json"),
                ("formatversion", "2"),
                ("prop", "links"),
                ("titles", page.title.as_str()),
                ("plnamespace", "0"),
                ("pllimit", "max"),
            ])
        };

        let responses = self.wiki.query_all(&page.wiki, request).await?;
        let links = responses
            .iter()
            .filter_map(|response| response.pointer(&format!("/query/pages/0/{}", prop)))
            .filter_map(Value::as_array)
            .flatten()
            .filter_map(|link| {
                Some(PageLink {
                    title: link.get("title")?.as_str()?.to_string(),
                    prefix: link
                        .get("prefix")
                        .and_then(Value::as_str)
                        .unwrap_or(page.wiki.as_str())
                        .to_string(),
                    url: link.get("url").and_then(Value::as_str).unwrap_or_default().to_string(),
                })
            })
            .collect();

        Ok(links)
    }

    /// Run entity lookups concurrently; a failed batch is logged and skipped
    async fn fetch_batches(&self, queries: Vec<EntityQuery>) -> Vec<WikiDataArticle> {
        let results = join_all(queries.into_iter().map(|query| async move {
            let _permit = self.batch_semaphore.acquire().await.ok();
            self.fetch_entities(&query).await
        }))
        .await;

        let mut articles = Vec::new();
        for result in results {
            match result {
                Ok(batch) => articles.extend(batch),
                Err(e) => tracing::error!("Error fetching articles: {}", e),
            }
        }
        articles
    }

    async fn fetch_entities(&self, query: &EntityQuery) -> FetchResult<Vec<WikiDataArticle>> {
        let mut request = params(&[
            ("action", "wbgetentities"),
            ("format", "json"),
            ("formatversion", "2"),
            ("props", "sitelinks"),
        ]);
        match query {
            EntityQuery::Ids(ids) => request.push(("ids".to_string(), ids.clone())),
            EntityQuery::Titles { site, titles } => {
                request.push(("sites".to_string(), site.clone()));
                request.push(("titles".to_string(), titles.clone()));
            }
        }

        let response = self.wiki.query("wikidata", request).await?;
        let Some(entities) = response.get("entities").and_then(Value::as_object) else {
            return Ok(Vec::new());
        };

        Ok(entities
            .iter()
            .filter(|(_, entity)| entity.get("missing").is_none())
            .map(|(qid, entity)| WikiDataArticle::new(qid.clone(), sitelinks_by_language(entity)))
            .collect())
    }

    /// Attach byte sizes and page ids in the enrichment language
    async fn enrich(&self, articles: &mut [WikiDataArticle]) {
        let language = self.enrichment_language.as_str();
        let titles: Vec<String> = articles
            .iter()
            .filter_map(|article| article.title(language).map(str::to_string))
            .collect();
        if titles.is_empty() {
            return;
        }

        let infos = self.wiki.page_info(language, &titles).await;
        if infos.len() < titles.len() {
            tracing::debug!("Sizes resolved for {} of {} {} articles", infos.len(), titles.len(), language);
        }

        for article in articles.iter_mut() {
            let Some(info) = article.title(language).and_then(|title| infos.get(title)) else {
                continue;
            };
            let (length, pageid) = (info.length, info.pageid);
            if let Some(length) = length {
                article.sizes.insert(language.to_string(), length);
            }
            if let Some(pageid) = pageid {
                article.page_ids.insert(language.to_string(), pageid);
            }
        }
    }
}

/// Link found on a marker page
struct PageLink {
    title: String,
    prefix: String,
    url: String,
}

enum EntityQuery {
    Ids(String),
    Titles { site: String, titles: String },
}

/// Language code -> title from an entity's Wikipedia sitelinks
fn sitelinks_by_language(entity: &Value) -> BTreeMap<String, String> {
    entity
        .get("sitelinks")
        .and_then(Value::as_object)
        .into_iter()
        .flatten()
        .filter_map(|(site, link)| {
            let language = site.strip_suffix("wiki")?;
            if language.is_empty() || NON_LANGUAGE_SITES.contains(&language) {
                return None;
            }
            let title = link.get("title")?.as_str()?;
            Some((language.replace('_', "-"), title.to_string()))
        })
        .collect()
}

/// One collection per metadata name; pages without metadata are skipped
fn group_into_collections(
    pages: Vec<WikiPage>,
    metadata: &HashMap<u64, PageCollectionMetadata>,
) -> Vec<PageCollection> {
    let mut groups: BTreeMap<String, (PageCollectionMetadata, Vec<WikiPage>)> = BTreeMap::new();

    for page in pages {
        let Some(page_metadata) = metadata.get(&page.id) else {
            tracing::warn!("No page collection metadata for {}", page.title);
            continue;
        };
        groups
            .entry(page_metadata.name.clone())
            .or_insert_with(|| (page_metadata.clone(), Vec::new()))
            .1
            .push(page);
    }

    groups
        .into_values()
        .map(|(metadata, pages)| PageCollection::new(metadata, pages))
        .collect()
}

/// Refresh now and then every `interval`, but only while holding the refresh lease.
///
/// Each cycle runs in its own task so that a panic is logged instead of
/// ending the loop.
pub async fn run_periodic_refresh(
    refresher: Arc<CollectionRefresher>,
    cache: Arc<RecommendationCache>,
    holder: String,
    interval: Duration,
) {
    loop {
        run_refresh_cycle(&refresher, &cache, &holder, interval * 2).await;
        tokio::time::sleep(interval).await;
    }
}

/// Refresh while holding the lease; otherwise load what the holder persisted
async fn run_refresh_cycle(
    refresher: &Arc<CollectionRefresher>,
    cache: &RecommendationCache,
    holder: &str,
    ttl: Duration,
) {
    match cache.try_acquire_lease(REFRESH_LEASE, holder, ttl).await {
        Ok(true) => {
            let refresher = refresher.clone();
            match tokio::spawn(async move { refresher.refresh().await }).await {
                Ok(Ok(count)) => tracing::debug!("Refresh cycle finished with {} collections", count),
                Ok(Err(e)) => tracing::error!("Page collection refresh failed: {}", e),
                Err(e) => tracing::error!("Page collection refresh aborted: {}", e),
            }
        }
        Ok(false) => {
            tracing::debug!("Another process holds the refresh lease, skipping cycle");
            reload_shared_snapshot(cache).await;
        }
        Err(e) => tracing::error!("Could not acquire refresh lease: {}", e),
    }
}

/// Keep a process that never refreshes in step with the shared store
pub async fn follow_shared_snapshots(cache: Arc<RecommendationCache>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        reload_shared_snapshot(&cache).await;
    }
}

async fn reload_shared_snapshot(cache: &RecommendationCache) {
    if let Err(e) = cache.reload_if_newer().await {
        tracing::error!("Could not reload page collections: {}", e);
    }
}
