use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::provider::{DataProvider, ProviderResponse, Query};

const API_KEY_HEADER: &str = "x-apisports-key";

/// API-Football v3 over HTTPS.
pub struct ApiFootballProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ApiFootballProvider {
    /// A missing key is not an error here; every request then fails with
    /// [`ProviderError::Configuration`] so the owning job reports it.
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl DataProvider for ApiFootballProvider {
    async fn request(&self, endpoint: &str, query: &Query) -> Result<ProviderResponse, ProviderError> {
        let key = self
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ProviderError::Configuration("provider.api_key is not set".to_string()))?;

        let url = format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'));
        debug!(%endpoint, %query, "provider request");

        let resp = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, key)
            .query(query.pairs())
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            warn!(%endpoint, "provider rate limit hit");
            return Err(ProviderError::RateLimited);
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, %endpoint, body = %text, "provider API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let body: ProviderResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        if !body.errors.is_empty() {
            warn!(%endpoint, errors = ?body.errors, "provider reported errors");
            return Err(ProviderError::Reported(body.errors));
        }
        debug!(%endpoint, results = body.results, page = body.paging.current, "provider response");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer, key: Option<&str>) -> ApiFootballProvider {
        ApiFootballProvider::new(&server.uri(), key.map(String::from), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn sends_key_and_query_and_parses_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fixtures"))
            .and(header(API_KEY_HEADER, "secret"))
            .and(query_param("league", "39"))
            .and(query_param("season", "2024"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": 1,
                "errors": [],
                "paging": {"current": 1, "total": 2},
                "response": [{"fixture": {"id": 1}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let query = Query::new().param("league", 39).param("season", 2024);
        let resp = provider(&server, Some("secret"))
            .request("fixtures", &query)
            .await
            .unwrap();

        assert_eq!(resp.results, 1);
        assert_eq!(resp.response.len(), 1);
        assert_eq!(resp.paging.total, 2);
    }

    #[tokio::test]
    async fn error_object_in_2xx_body_is_a_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/teams"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": 0,
                "errors": {"requests": "You have reached the request limit for the day"},
                "response": []
            })))
            .mount(&server)
            .await;

        let err = provider(&server, Some("secret"))
            .request("teams", &Query::new())
            .await
            .unwrap_err();
        match err {
            ProviderError::Reported(errors) => assert!(errors[0].starts_with("requests:")),
            other => panic!("expected Reported, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_2xx_statuses_are_mapped() {
        let server = MockServer::start().await;
        Mock::given(path("/leagues"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;
        Mock::given(path("/odds"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let p = provider(&server, Some("secret"));
        match p.request("leagues", &Query::new()).await.unwrap_err() {
            ProviderError::Api { status, message } => {
                assert_eq!(status, 503);
                assert_eq!(message, "maintenance");
            }
            other => panic!("expected Api, got {other:?}"),
        }
        assert!(matches!(
            p.request("odds", &Query::new()).await,
            Err(ProviderError::RateLimited)
        ));
    }

    #[tokio::test]
    async fn missing_key_fails_without_a_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        for key in [None, Some("  ")] {
            let err = provider(&server, key)
                .request("countries", &Query::new())
                .await
                .unwrap_err();
            assert!(matches!(err, ProviderError::Configuration(_)));
        }
    }
}
