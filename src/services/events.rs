//! Fire-and-forget logging of recommendation requests to the event intake.

use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::Settings;
use crate::services::fetcher::JsonFetcher;

const SCHEMA: &str = "TranslationRecommendationAPIRequests";

/// One recommendation request as seen by the HTTP layer
#[derive(Debug, Clone, Default)]
pub struct RequestEvent {
    pub source: String,
    pub target: String,
    pub seed: Option<String>,
    pub search_algorithm: Option<String>,
    pub host: String,
    pub user_agent: Option<String>,
}

pub struct EventLogger {
    fetcher: Arc<dyn JsonFetcher>,
    url: String,
    enabled: bool,
}

impl EventLogger {
    pub fn new(fetcher: Arc<dyn JsonFetcher>, settings: &Settings) -> Self {
        Self {
            fetcher,
            url: settings.event_logger_api.clone(),
            enabled: settings.event_logging_enabled,
        }
    }

    /// Send in the background; never blocks or fails the caller
    pub fn log_request(self: &Arc<Self>, event: RequestEvent) {
        if !self.enabled {
            return;
        }

        let logger = self.clone();
        tokio::spawn(async move {
            logger.send(&event).await;
        });
    }

    async fn send(&self, event: &RequestEvent) {
        let payload = payload(event);
        tracing::debug!("Logging event: {}", payload);

        let headers: Vec<(String, String)> = event
            .user_agent
            .iter()
            .map(|agent| ("User-Agent".to_string(), agent.clone()))
            .collect();

        if let Err(e) = self.fetcher.post_json(&self.url, &payload, &headers).await {
            tracing::debug!("Event logging failed: {}", e);
        }
    }
}

fn payload(event: &RequestEvent) -> Value {
    let mut body = json!({
        "timestamp": Utc::now().timestamp(),
        "sourceLanguage": event.source,
        "targetLanguage": event.target,
    });
    if let Some(seed) = &event.seed {
        body["seed"] = json!(seed);
    }
    if let Some(algorithm) = &event.search_algorithm {
        body["searchAlgorithm"] = json!(algorithm);
    }

    json!({
        "schema": SCHEMA,
        "$schema": format!("/analytics/legacy/{}/1.0.0", SCHEMA.to_lowercase()),
        "revision": 16261139,
        "event": body,
        "webHost": event.host,
        "client_dt": Utc::now().to_rfc3339(),
        "meta": {
            "stream": format!("eventlogging_{}", SCHEMA),
            "domain": event.host,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::services::fetcher::testing::ScriptedFetcher;
    use async_trait::async_trait;

    fn event() -> RequestEvent {
        RequestEvent {
            source: "en".to_string(),
            target: "es".to_string(),
            seed: Some("Apollo 11".to_string()),
            host: "recommend.wmcloud.org".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_send_posts_payload() {
        let fetcher = Arc::new(ScriptedFetcher::new(|_| Ok(Value::Null)));
        let logger = EventLogger::new(fetcher.clone(), &Settings::default());

        logger.send(&event()).await;

        let posts = fetcher.posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0]["event"]["sourceLanguage"], "en");
        assert_eq!(posts[0]["event"]["seed"], "Apollo 11");
        assert_eq!(posts[0]["meta"]["domain"], "recommend.wmcloud.org");
        assert!(posts[0]["event"].get("searchAlgorithm").is_none());
    }

    #[tokio::test]
    async fn test_disabled_logger_sends_nothing() {
        let fetcher = Arc::new(ScriptedFetcher::new(|_| Ok(Value::Null)));
        let logger = Arc::new(EventLogger::new(fetcher.clone(), &Settings::default()));

        logger.log_request(event());
        tokio::task::yield_now().await;

        assert!(fetcher.posts().is_empty());
    }

    struct FailingSink;

    #[async_trait]
    impl JsonFetcher for FailingSink {
        async fn get_json(&self, _url: &str, _params: &[(String, String)], _headers: &[(String, String)])
            -> crate::error::FetchResult<Value> {
            Ok(Value::Null)
        }

        async fn post_json(&self, url: &str, _body: &Value, _headers: &[(String, String)]) -> crate::error::FetchResult<()> {
            Err(FetchError::Status {
                status: 500,
                url: url.to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_sink_failures_are_swallowed() {
        let mut settings = Settings::default();
        settings.event_logging_enabled = true;
        let logger = Arc::new(EventLogger::new(Arc::new(FailingSink), &settings));

        // Must neither panic nor surface the error
        logger.send(&event()).await;
        logger.log_request(event());
        tokio::task::yield_now().await;
    }
}
