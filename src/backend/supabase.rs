//! Supabase REST (PostgREST) client.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::backend::{Backend, BackendError, Query, Row, Table};

pub struct SupabaseClient {
    rest_url: String,
    api_key: String,
    max_rows: usize,
    http: reqwest::Client,
}

/// PostgREST error body.
#[derive(Deserialize, Debug)]
struct ApiError {
    message: Option<String>,
    details: Option<String>,
    hint: Option<String>,
}

impl SupabaseClient {
    pub fn new(url: &str, api_key: String, timeout: Duration, max_rows: usize) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            rest_url: format!("{}/rest/v1", url.trim_end_matches('/')),
            api_key,
            max_rows,
            http,
        })
    }

    fn table_url(&self, table: Table) -> String {
        format!("{}/{}", self.rest_url, table.as_str())
    }

    async fn read_rows(response: reqwest::Response) -> Result<Vec<Row>, BackendError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Api { status: status.as_u16(), message: error_message(&body) });
        }
        response.json::<Vec<Row>>().await.map_err(BackendError::from_reqwest)
    }
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ApiError>(body) {
        Ok(ApiError { message: Some(message), details, hint }) => {
            let mut text = message;
            for extra in [details, hint].into_iter().flatten().filter(|s| !s.is_empty()) {
                text.push_str(&format!(" ({extra})"));
            }
            text
        }
        _ => body.chars().take(300).collect(),
    }
}

#[async_trait]
impl Backend for SupabaseClient {
    async fn select(&self, query: &Query) -> Result<Vec<Row>, BackendError> {
        let params = query.to_params(self.max_rows);
        debug!("select {}: {:?}", query.table, params);

        let response = self
            .http
            .get(self.table_url(query.table))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .query(&params)
            .send()
            .await
            .map_err(BackendError::from_reqwest)?;

        let rows = Self::read_rows(response).await?;
        debug!("select {}: {} row(s)", query.table, rows.len());
        Ok(rows)
    }

    async fn insert(&self, table: Table, row: Row) -> Result<Vec<Row>, BackendError> {
        debug!("insert into {}: {:?}", table, row);

        let response = self
            .http
            .post(self.table_url(table))
            .header("apikey", &self.api_key)
            .header("Prefer", "return=representation")
            .bearer_auth(&self.api_key)
            .json(&row)
            .send()
            .await
            .map_err(BackendError::from_reqwest)?;

        Self::read_rows(response).await
    }
}
