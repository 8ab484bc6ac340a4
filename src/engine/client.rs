//! # Engine REST Client
//!
//! HTTP client for the engine's external-task and process-definition
//! endpoints. Fetch retries are the calling worker's concern; this client
//! reports classified errors and nothing more.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use super::types::{
    BpmnErrorRequest, CompleteRequest, ExternalTask, FailureRequest, FetchAndLockRequest,
    ProcessDefinitionXml,
};
use super::{CompletionApi, DefinitionSource, EngineError, EngineResult, TaskSource};

#[derive(Clone)]
pub struct EngineClient {
    client: Client,
    base_url: Url,
    worker_id: String,
    auth: Option<(String, String)>,
}

impl EngineClient {
    pub fn new(config: &EngineConfig) -> EngineResult<Self> {
        // Trailing slash so Url::join treats the last path segment as a base
        let base = if config.base_url.ends_with('/') {
            config.base_url.clone()
        } else {
            format!("{}/", config.base_url)
        };
        let base_url = Url::parse(&base)
            .map_err(|e| EngineError::Configuration(format!("Invalid base URL: {e}")))?;

        let mut builder = Client::builder()
            .timeout(std::time::Duration::from_millis(config.request_timeout_ms))
            .user_agent(format!("exttask-relay/{}", env!("CARGO_PKG_VERSION")));

        if config.insecure_skip_verify {
            warn!("⚠️ TLS certificate verification disabled for engine endpoint");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| EngineError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        info!(
            base_url = %config.base_url,
            worker_id = %config.worker_id,
            timeout_ms = config.request_timeout_ms,
            auth_enabled = config.auth.is_some(),
            "Created engine client"
        );

        Ok(Self {
            client,
            base_url,
            worker_id: config.worker_id.clone(),
            auth: config
                .auth
                .as_ref()
                .map(|a| (a.username.clone(), a.password.clone())),
        })
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn url(&self, path: &str) -> EngineResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| EngineError::Configuration(format!("Failed to construct URL: {e}")))
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Some((username, password)) => builder.basic_auth(username, Some(password)),
            None => builder,
        }
    }

    /// Probe engine reachability at startup. An unreachable engine here is a
    /// fatal configuration problem, not a retry case.
    pub async fn probe(&self) -> EngineResult<String> {
        let url = self.url("version")?;
        let response = self
            .request(self.client.get(url))
            .send()
            .await
            .map_err(transport)?;
        let response = check_status(response, None).await?;
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::Decode(e.to_string()))?;
        Ok(body
            .get("version")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string())
    }

    async fn post_completion(
        &self,
        task_id: &str,
        path: &str,
        body: &impl serde::Serialize,
    ) -> EngineResult<()> {
        let url = self.url(path)?;
        let response = self
            .request(self.client.post(url))
            .json(body)
            .send()
            .await
            .map_err(transport)?;
        check_status(response, Some(task_id)).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskSource for EngineClient {
    async fn fetch_and_lock(
        &self,
        request: &FetchAndLockRequest,
    ) -> EngineResult<Vec<ExternalTask>> {
        let url = self.url("external-task/fetchAndLock")?;
        debug!(
            worker_id = %request.worker_id,
            max_tasks = request.max_tasks,
            topics = request.topics.len(),
            "Issuing fetch-and-lock"
        );

        let response = self
            .request(self.client.post(url))
            .json(request)
            .send()
            .await
            .map_err(transport)?;
        let response = check_status(response, None).await?;
        response
            .json::<Vec<ExternalTask>>()
            .await
            .map_err(|e| EngineError::Decode(e.to_string()))
    }
}

#[async_trait]
impl DefinitionSource for EngineClient {
    async fn fetch_definition_xml(&self, process_definition_id: &str) -> EngineResult<String> {
        let url = self.url(&format!("process-definition/{process_definition_id}/xml"))?;
        debug!(process_definition_id, "Fetching structural document");

        let response = self
            .request(self.client.get(url))
            .send()
            .await
            .map_err(transport)?;
        let response = check_status(response, None).await?;
        let envelope: ProcessDefinitionXml = response
            .json()
            .await
            .map_err(|e| EngineError::Decode(e.to_string()))?;
        Ok(envelope.bpmn20_xml)
    }
}

#[async_trait]
impl CompletionApi for EngineClient {
    async fn complete(&self, task_id: &str, request: &CompleteRequest) -> EngineResult<()> {
        self.post_completion(task_id, &format!("external-task/{task_id}/complete"), request)
            .await
    }

    async fn handle_bpmn_error(
        &self,
        task_id: &str,
        request: &BpmnErrorRequest,
    ) -> EngineResult<()> {
        self.post_completion(task_id, &format!("external-task/{task_id}/bpmnError"), request)
            .await
    }

    async fn handle_failure(&self, task_id: &str, request: &FailureRequest) -> EngineResult<()> {
        self.post_completion(task_id, &format!("external-task/{task_id}/failure"), request)
            .await
    }
}

fn transport(error: reqwest::Error) -> EngineError {
    EngineError::Transport(error.to_string())
}

/// Turn a non-success response into a classified error. When `task_id` is
/// set the call is a completion call and gone-task statuses collapse into
/// the idempotent [`EngineError::TaskGone`].
async fn check_status(response: Response, task_id: Option<&str>) -> EngineResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();

    if let Some(task_id) = task_id {
        if is_task_gone(status, &body) {
            return Err(EngineError::TaskGone {
                task_id: task_id.to_string(),
            });
        }
    }

    Err(EngineError::Status {
        status: status.as_u16(),
        body,
    })
}

/// The engine reports an already-completed or re-claimed task as 404 (gone)
/// or 500 with a lock-ownership message, depending on the call.
fn is_task_gone(status: StatusCode, body: &str) -> bool {
    match status {
        StatusCode::NOT_FOUND | StatusCode::CONFLICT => true,
        StatusCode::BAD_REQUEST | StatusCode::INTERNAL_SERVER_ERROR => {
            let body = body.to_ascii_lowercase();
            body.contains("not locked")
                || body.contains("locked by another")
                || body.contains("doesn't exist")
                || body.contains("does not exist")
        }
        _ => false,
    }
}
