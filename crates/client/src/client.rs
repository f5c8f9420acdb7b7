use std::collections::HashMap;

use async_trait::async_trait;
use bookforge_core::{JobKind, JobStatus, StatusRecord, StatusReport, TaskId};
use bookforge_infra::monitor::{MonitorError, StatusSource};
use serde_json::{Map, Value, json};

use crate::error::ClientError;

/// Header the API reads the submitting principal from.
const PRINCIPAL_HEADER: &str = "X-Forwarded-User";

/// What the API accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub kind: JobKind,
    pub task_ids: Vec<TaskId>,
    pub message: String,
    /// Only reported for large-book batches.
    pub queue: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    user: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn submit_path(kind: JobKind) -> &'static str {
        match kind {
            JobKind::Book => "/library/generate-async",
            JobKind::LargeBook => "/library/generate-large-books",
            JobKind::Image => "/gallery/generate-images-async",
        }
    }

    pub async fn submit(
        &self,
        kind: JobKind,
        count: Option<i64>,
        word_count: Option<i64>,
    ) -> Result<SubmitReceipt, ClientError> {
        let mut body = Map::new();
        if let Some(count) = count {
            body.insert("count".into(), json!(count));
        }
        if let Some(word_count) = word_count {
            body.insert("word_count".into(), json!(word_count));
        }

        let mut req = self
            .http
            .post(format!("{}{}", self.base_url, Self::submit_path(kind)))
            .json(&Value::Object(body));
        if let Some(user) = &self.user {
            req = req.header(PRINCIPAL_HEADER, user);
        }

        let body = Self::read_json(req.send().await?).await?;
        parse_receipt(kind, &body)
    }

    pub async fn status_report(&self) -> Result<StatusReport, ClientError> {
        let res = self
            .http
            .get(format!("{}/library/tasks/status", self.base_url))
            .send()
            .await?;
        let body = Self::read_json(res).await?;
        serde_json::from_value(body).map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// `None` when the API has no record (never submitted, or expired).
    pub async fn task_status(&self, task_id: TaskId) -> Result<Option<StatusRecord>, ClientError> {
        let res = self
            .http
            .get(format!("{}/library/tasks/status/{}", self.base_url, task_id))
            .send()
            .await?;
        if res.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = Self::read_json(res).await?;
        serde_json::from_value(body)
            .map(Some)
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Success bodies must be JSON; error bodies are read best-effort so a
    /// plain-text 502 from a proxy still reports its status.
    async fn read_json(res: reqwest::Response) -> Result<Value, ClientError> {
        let status = res.status();
        let bytes = res.bytes().await?;
        if status.is_success() {
            return serde_json::from_slice(&bytes).map_err(|e| ClientError::Decode(e.to_string()));
        }
        let body: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        let field = |name: &str| body.get(name).and_then(Value::as_str).map(str::to_string);
        let error = field("error")
            .unwrap_or_else(|| status.canonical_reason().unwrap_or_default().to_string());
        let message = field("message").unwrap_or_else(|| match body {
            Value::Object(_) => String::new(),
            _ => String::from_utf8_lossy(&bytes).trim().to_string(),
        });
        Err(ClientError::Api {
            status: status.as_u16(),
            error,
            message,
        })
    }
}

fn parse_receipt(kind: JobKind, body: &Value) -> Result<SubmitReceipt, ClientError> {
    let parse_id = |v: &Value| -> Result<TaskId, ClientError> {
        v.as_str()
            .ok_or_else(|| ClientError::Decode(format!("task id is not a string: {v}")))?
            .parse()
            .map_err(|e: bookforge_core::DomainError| ClientError::Decode(e.to_string()))
    };

    let task_ids = match (body.get("tasks"), body.get("task_id")) {
        (Some(Value::Array(tasks)), _) => tasks.iter().map(parse_id).collect::<Result<Vec<_>, _>>()?,
        (_, Some(id)) => vec![parse_id(id)?],
        _ => return Err(ClientError::Decode(format!("no task ids in {body}"))),
    };

    Ok(SubmitReceipt {
        kind,
        task_ids,
        message: body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        queue: body.get("queue").and_then(Value::as_str).map(str::to_string),
    })
}

/// One status-report request per poll, whatever the number of tasks.
#[async_trait]
impl StatusSource for ApiClient {
    async fn statuses(
        &self,
        task_ids: &[TaskId],
    ) -> Result<HashMap<TaskId, JobStatus>, MonitorError> {
        let report = self
            .status_report()
            .await
            .map_err(|e| MonitorError::Query(e.to_string()))?;
        Ok(task_ids
            .iter()
            .filter_map(|id| report.status_of(*id).map(|status| (*id, status)))
            .collect())
    }
}
