//! HubSpot CRM v3 REST client.

use std::time::Duration;

use abm_shared::{AbmError, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::{CrmBackend, CrmEntity, CrmError, EntityKind, Properties};

/// Object response shape shared by get/create endpoints.
#[derive(Debug, Deserialize)]
struct ObjectResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<ObjectResponse>,
}

/// Authenticated HubSpot client (private-app bearer token).
pub struct HubSpotClient {
    client: Client,
    base_url: Url,
    token: String,
}

impl HubSpotClient {
    pub fn new(token: impl Into<String>, base_url: &str, timeout: Duration) -> Result<Self> {
        let token = token.into();
        if token.is_empty() {
            return Err(AbmError::config("HubSpot access token is empty"));
        }

        let base_url = Url::parse(base_url)
            .map_err(|e| AbmError::config(format!("invalid HubSpot base URL '{base_url}': {e}")))?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AbmError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    /// `{base}/crm/v3/objects/{type}[/{segment}]`, with `segment` percent-encoded.
    fn object_url(&self, kind: EntityKind, segment: Option<&str>) -> std::result::Result<Url, CrmError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| CrmError::Transport(format!("base URL cannot be a base: {}", self.base_url)))?;
            segments.pop_if_empty();
            segments.extend(["crm", "v3", "objects", kind.object_type()]);
            if let Some(segment) = segment {
                segments.push(segment);
            }
        }
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> std::result::Result<Response, CrmError> {
        request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| CrmError::Transport(e.to_string()))
    }
}

/// Turn a non-success response into the matching [`CrmError`].
async fn status_error(response: Response) -> CrmError {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return CrmError::RateLimited;
    }
    let body = response.text().await.unwrap_or_default();
    let message: String = body.chars().take(200).collect();
    CrmError::Remote {
        code: status.as_u16(),
        message: if message.is_empty() {
            status.canonical_reason().unwrap_or("unknown").to_string()
        } else {
            message
        },
    }
}

async fn parse_object(response: Response) -> std::result::Result<CrmEntity, CrmError> {
    let status = response.status().as_u16();
    let object: ObjectResponse = response.json().await.map_err(|e| CrmError::Remote {
        code: status,
        message: format!("invalid response body: {e}"),
    })?;
    Ok(CrmEntity { id: object.id })
}

#[async_trait]
impl CrmBackend for HubSpotClient {
    async fn find_by_key(
        &self,
        kind: EntityKind,
        key: &str,
    ) -> std::result::Result<Option<CrmEntity>, CrmError> {
        let response = match kind {
            EntityKind::Contact => {
                let mut url = self.object_url(kind, Some(key))?;
                url.query_pairs_mut()
                    .append_pair("idProperty", "email")
                    .append_pair("properties", "hs_object_id");
                self.send(self.client.get(url)).await?
            }
            EntityKind::Company => {
                let url = self.object_url(kind, Some("search"))?;
                let body = serde_json::json!({
                    "filterGroups": [{
                        "filters": [{"propertyName": "domain", "operator": "EQ", "value": key}]
                    }],
                    "properties": ["hs_object_id", "name", "domain"],
                    "limit": 1
                });
                self.send(self.client.post(url).json(&body)).await?
            }
        };

        let status = response.status();
        if kind == EntityKind::Contact && status == StatusCode::NOT_FOUND {
            debug!(%kind, key, "not found");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(status_error(response).await);
        }

        match kind {
            EntityKind::Contact => parse_object(response).await.map(Some),
            EntityKind::Company => {
                let search: SearchResponse = response.json().await.map_err(|e| CrmError::Remote {
                    code: status.as_u16(),
                    message: format!("invalid search response: {e}"),
                })?;
                Ok(search
                    .results
                    .into_iter()
                    .next()
                    .map(|o| CrmEntity { id: o.id }))
            }
        }
    }

    async fn create(
        &self,
        kind: EntityKind,
        properties: &Properties,
    ) -> std::result::Result<CrmEntity, CrmError> {
        let url = self.object_url(kind, None)?;
        let body = serde_json::json!({ "properties": properties });
        let response = self.send(self.client.post(url).json(&body)).await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        parse_object(response).await
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: &str,
        properties: &Properties,
    ) -> std::result::Result<(), CrmError> {
        let url = self.object_url(kind, Some(id))?;
        let body = serde_json::json!({ "properties": properties });
        let response = self.send(self.client.patch(url).json(&body)).await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        Ok(())
    }
}
