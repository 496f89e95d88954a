//! HTTP client for the repository's JSON REST interface
//!
//! - `POST {base}/{collection}` creates; the new identifier comes back in the
//!   `Location` header or as `@id` in the body
//! - `GET {id}` / `PUT {id}` read and replace (identifiers are URIs)
//! - `POST {base}/{collection}/_search` with `{"filter": {...}}` returns
//!   `{"ids": [...]}`

use super::RepositoryGateway;
use crate::config::RepositoryConfig;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::models::{EntityId, EntityKind, Resource};
use async_trait::async_trait;
use reqwest::{header, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    ids: Vec<EntityId>,
}

#[derive(Deserialize)]
struct CreatedResponse {
    #[serde(rename = "@id")]
    id: EntityId,
}

/// Repository gateway over HTTP
pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGateway {
    /// Create a new gateway client
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &RepositoryConfig) -> Result<Self> {
        Self::new(
            config.base_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    fn collection_url(&self, kind: EntityKind) -> String {
        format!("{}/{}", self.base_url, kind.collection())
    }

    /// Turn a non-success status into a gateway error
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(AppError::Gateway {
            status: status.as_u16(),
            message,
        })
    }

    fn timed<T>(operation: &str, start: Instant, result: &Result<T>) {
        metrics::record_gateway(operation, start.elapsed().as_secs_f64(), result.is_ok());
    }
}

#[async_trait]
impl RepositoryGateway for HttpGateway {
    #[instrument(skip(self, resource), fields(kind = %resource.kind()))]
    async fn create(&self, resource: &Resource) -> Result<EntityId> {
        let start = Instant::now();
        let result: Result<EntityId> = async {
            let response = self
                .client
                .post(self.collection_url(resource.kind()))
                .json(&resource.to_value()?)
                .send()
                .await?;
            let response = Self::check(response).await?;

            let location = response
                .headers()
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(EntityId::from);
            match location {
                Some(id) => Ok(id),
                None => Ok(response.json::<CreatedResponse>().await?.id),
            }
        }
        .await;
        Self::timed("create", start, &result);
        result
    }

    #[instrument(skip(self, id, kind), fields(id = %id, kind = %kind))]
    async fn read(&self, id: &EntityId, kind: EntityKind) -> Result<Option<Resource>> {
        let start = Instant::now();
        let result: Result<Option<Resource>> = async {
            let response = self
                .client
                .get(id.as_str())
                .header(header::ACCEPT, "application/json")
                .send()
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                debug!("Resource not found");
                return Ok(None);
            }
            let value: Value = Self::check(response).await?.json().await?;
            Ok(Some(Resource::from_value(kind, value)?))
        }
        .await;
        Self::timed("read", start, &result);
        result
    }

    #[instrument(skip(self, resource), fields(kind = %resource.kind()))]
    async fn update(&self, resource: &Resource) -> Result<()> {
        let id = resource
            .id()
            .ok_or_else(|| AppError::invalid_argument("cannot update a resource without an id"))?;
        let start = Instant::now();
        let result: Result<()> = async {
            let response = self
                .client
                .put(id.as_str())
                .json(&resource.to_value()?)
                .send()
                .await?;
            Self::check(response).await?;
            Ok(())
        }
        .await;
        Self::timed("update", start, &result);
        result
    }

    #[instrument(skip(self, kind, attributes), fields(kind = %kind))]
    async fn find_all_by_attributes(
        &self,
        kind: EntityKind,
        attributes: &[(&str, Value)],
    ) -> Result<HashSet<EntityId>> {
        let filter: Map<String, Value> = attributes
            .iter()
            .map(|(field, value)| (field.to_string(), value.clone()))
            .collect();

        let start = Instant::now();
        let result: Result<HashSet<EntityId>> = async {
            let response = self
                .client
                .post(format!("{}/_search", self.collection_url(kind)))
                .json(&serde_json::json!({ "filter": filter }))
                .send()
                .await?;
            let found: SearchResponse = Self::check(response).await?.json().await?;
            debug!(matches = found.ids.len(), "Search complete");
            Ok(found.ids.into_iter().collect())
        }
        .await;
        Self::timed("search", start, &result);
        result
    }
}
