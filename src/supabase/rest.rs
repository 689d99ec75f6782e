//! PostgREST client for the `projects` and `allowed_emails` collections.

use std::sync::Arc;

use gate::{Query, Record, RecordStore, StoreError};
use reqwest::Method;
use tracing::debug;

use super::{Endpoint, GoTrueClient};

pub struct PostgrestClient {
    http: reqwest::Client,
    endpoint: Endpoint,
    auth: Arc<GoTrueClient>,
}

impl PostgrestClient {
    #[must_use]
    pub fn new(http: reqwest::Client, endpoint: Endpoint, auth: Arc<GoTrueClient>) -> Self {
        Self { http, endpoint, auth }
    }

    /// Without a session, requests go out as the anonymous role.
    async fn request(&self, method: Method, collection: &str) -> reqwest::RequestBuilder {
        let bearer = self
            .auth
            .access_token()
            .await
            .unwrap_or_else(|| self.endpoint.anon_key.clone());
        self.http
            .request(method, self.endpoint.url(&format!("/rest/v1/{collection}")))
            .header("apikey", &self.endpoint.anon_key)
            .bearer_auth(bearer)
    }
}

async fn send(builder: reqwest::RequestBuilder) -> Result<String, StoreError> {
    let response = builder
        .send()
        .await
        .map_err(|e| StoreError::Request(e.to_string()))?;
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| StoreError::Request(e.to_string()))?;
    if (200..300).contains(&status) {
        Ok(body)
    } else {
        Err(StoreError::Response { status, message: super::error_message(&body) })
    }
}

#[async_trait::async_trait]
impl RecordStore for PostgrestClient {
    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Record>, StoreError> {
        let params = query_params(query);
        debug!(collection, ?params, "record query");
        let builder = self.request(Method::GET, collection).await.query(&params);
        let body = send(builder).await?;
        serde_json::from_str(&body).map_err(|e| StoreError::Parse(e.to_string()))
    }

    async fn insert(&self, collection: &str, record: Record) -> Result<(), StoreError> {
        debug!(collection, "record insert");
        let builder = self
            .request(Method::POST, collection)
            .await
            .header("Prefer", "return=minimal")
            .json(&[record]);
        send(builder).await.map(|_| ())
    }
}

/// PostgREST query-string pairs for `query`.
pub(crate) fn query_params(query: &Query) -> Vec<(String, String)> {
    let mut params = vec![("select".to_owned(), "*".to_owned())];
    params.extend(
        query
            .filters
            .iter()
            .map(|f| (f.column.clone(), format!("eq.{}", f.value))),
    );
    if let Some(order) = &query.order {
        let direction = if order.ascending { "asc" } else { "desc" };
        params.push(("order".to_owned(), format!("{}.{direction}", order.column)));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_owned(), limit.to_string()));
    }
    params
}

#[cfg(test)]
#[path = "rest_test.rs"]
mod tests;
