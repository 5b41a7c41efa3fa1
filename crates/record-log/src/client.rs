//! HTTP client for the dashboard files API.
//!
//! Thin wrapper over the `/api/files/jsonl` endpoints; no caching and no retries, each
//! trait call is exactly one request.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::store::{RecordStore, StoreError};
use crate::{LogIdentity, RecordIndex, WindowPage};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountResponse {
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteLineRequest {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteLineResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Clone)]
pub struct HttpRecordStore {
    http: Client,
    base_url: String,
}

impl HttpRecordStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: normalize_base(base_url.into()),
        }
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, StoreError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: normalize_base(base_url.into()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, suffix: &str) -> String {
        format!("{}/api/files/jsonl{}", self.base_url, suffix)
    }
}

fn normalize_base(base: String) -> String {
    base.trim().trim_end_matches('/').to_string()
}

async fn decode<T>(res: Response) -> Result<T, StoreError>
where
    T: DeserializeOwned,
{
    let status = res.status();
    if status.is_success() {
        return Ok(res.json::<T>().await?);
    }
    let body = res.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(parsed) => {
            let message = parsed.message.unwrap_or(parsed.error);
            if status == StatusCode::NOT_FOUND {
                Err(StoreError::LogNotFound(message))
            } else {
                Err(StoreError::Rejected {
                    status: status.as_u16(),
                    message,
                })
            }
        }
        Err(_) => Err(StoreError::UnexpectedStatus { status, body }),
    }
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    async fn count(&self, path: &LogIdentity) -> Result<u64, StoreError> {
        let res = self
            .http
            .get(self.endpoint("/count"))
            .query(&[("path", path.as_str())])
            .send()
            .await?;
        Ok(decode::<CountResponse>(res).await?.total)
    }

    async fn fetch_window(
        &self,
        path: &LogIdentity,
        offset: u64,
        limit: u64,
    ) -> Result<WindowPage, StoreError> {
        let offset = offset.to_string();
        let limit = limit.to_string();
        let res = self
            .http
            .get(self.endpoint(""))
            .query(&[
                ("path", path.as_str()),
                ("offset", offset.as_str()),
                ("limit", limit.as_str()),
            ])
            .send()
            .await?;
        decode::<WindowPage>(res).await
    }

    async fn write_line(
        &self,
        path: &LogIdentity,
        index: RecordIndex,
        content: &str,
    ) -> Result<(), StoreError> {
        let index = index.to_string();
        let res = self
            .http
            .put(self.endpoint("/line"))
            .query(&[("path", path.as_str()), ("index", index.as_str())])
            .json(&WriteLineRequest {
                content: content.to_string(),
            })
            .send()
            .await?;
        let ack = decode::<WriteLineResponse>(res).await?;
        if ack.success {
            Ok(())
        } else {
            Err(StoreError::Rejected {
                status: StatusCode::OK.as_u16(),
                message: "store did not acknowledge the write".into(),
            })
        }
    }
}
