use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Certificate, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::kube::models::{ApiStatus, ObjectList, Pipeline, PipelineRun, TektonObject};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const WATCH_TIMEOUT_SECONDS: u32 = 300;

#[derive(Debug, Error)]
pub enum KubeError {
    #[error("kubernetes request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("kubernetes api returned {status} {reason}: {message}")]
    Api {
        status: u16,
        reason: String,
        message: String,
    },
    #[error("failed to decode kubernetes response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl KubeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }

    /// The requested resourceVersion is too old to resume a watch from.
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Api { status: 410, .. })
    }
}

impl From<ApiStatus> for KubeError {
    fn from(status: ApiStatus) -> Self {
        Self::Api {
            status: status.code,
            reason: status.reason,
            message: status.message,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TektonResource {
    Pipelines,
    PipelineRuns,
    TaskRuns,
}

impl TektonResource {
    pub fn plural(self) -> &'static str {
        match self {
            Self::Pipelines => "pipelines",
            Self::PipelineRuns => "pipelineruns",
            Self::TaskRuns => "taskruns",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct KubeConfig {
    pub api_server: String,
    pub token: Option<String>,
    pub ca_pem: Option<Vec<u8>>,
    pub insecure_skip_tls_verify: bool,
}

/// Object accessor used by the tools.
#[async_trait]
pub trait PipelineClient: Send + Sync {
    async fn get_pipeline(&self, namespace: &str, name: &str) -> Result<Pipeline, KubeError>;

    async fn create_pipeline_run(&self, run: &PipelineRun) -> Result<PipelineRun, KubeError>;

    async fn list_pipeline_runs(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<PipelineRun>, KubeError>;

    async fn list_task_runs(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<TektonObject>, KubeError>;
}

#[derive(Debug, Clone)]
pub struct KubeClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl KubeClient {
    pub fn new(config: &KubeConfig) -> Result<Self, KubeError> {
        let mut builder = Client::builder()
            .use_rustls_tls()
            .connect_timeout(CONNECT_TIMEOUT)
            .danger_accept_invalid_certs(config.insecure_skip_tls_verify);

        if let Some(pem) = config.ca_pem.as_deref() {
            builder = builder.add_root_certificate(Certificate::from_pem(pem)?);
        }

        Ok(Self {
            http: builder.build()?,
            base_url: config.api_server.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    pub fn collection_url(&self, resource: TektonResource, namespace: Option<&str>) -> String {
        match namespace {
            Some(namespace) => format!(
                "{}/apis/tekton.dev/v1/namespaces/{namespace}/{}",
                self.base_url,
                resource.plural()
            ),
            None => format!("{}/apis/tekton.dev/v1/{}", self.base_url, resource.plural()),
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    pub async fn list(
        &self,
        resource: TektonResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<ObjectList, KubeError> {
        let mut request = self
            .http
            .get(self.collection_url(resource, namespace))
            .timeout(REQUEST_TIMEOUT);
        if let Some(selector) = label_selector {
            request = request.query(&[("labelSelector", selector)]);
        }

        decode(self.authorize(request).send().await?).await
    }

    /// Opens a watch stream of newline-delimited watch events.
    pub async fn watch(
        &self,
        resource: TektonResource,
        namespace: Option<&str>,
        resource_version: &str,
    ) -> Result<Response, KubeError> {
        let timeout = WATCH_TIMEOUT_SECONDS.to_string();
        let request = self
            .http
            .get(self.collection_url(resource, namespace))
            .query(&[
                ("watch", "true"),
                ("allowWatchBookmarks", "true"),
                ("resourceVersion", resource_version),
                ("timeoutSeconds", timeout.as_str()),
            ]);

        let response = self.authorize(request).send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(api_error(response).await)
        }
    }
}

#[async_trait]
impl PipelineClient for KubeClient {
    async fn get_pipeline(&self, namespace: &str, name: &str) -> Result<Pipeline, KubeError> {
        let url = format!(
            "{}/{name}",
            self.collection_url(TektonResource::Pipelines, Some(namespace))
        );
        let request = self.http.get(url).timeout(REQUEST_TIMEOUT);
        decode(self.authorize(request).send().await?).await
    }

    async fn create_pipeline_run(&self, run: &PipelineRun) -> Result<PipelineRun, KubeError> {
        let url = self.collection_url(
            TektonResource::PipelineRuns,
            Some(run.metadata.namespace.as_str()),
        );
        let request = self.http.post(url).timeout(REQUEST_TIMEOUT).json(run);
        decode(self.authorize(request).send().await?).await
    }

    async fn list_pipeline_runs(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<PipelineRun>, KubeError> {
        self.list(TektonResource::PipelineRuns, namespace, label_selector)
            .await
            .map(|list| list.items)
    }

    async fn list_task_runs(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<TektonObject>, KubeError> {
        self.list(TektonResource::TaskRuns, namespace, label_selector)
            .await
            .map(|list| list.items)
    }
}

async fn api_error(response: Response) -> KubeError {
    let status = response.status();
    let body = match response.bytes().await {
        Ok(body) => body,
        Err(err) => return KubeError::Http(err),
    };

    let api_status: ApiStatus = serde_json::from_slice(&body).unwrap_or_default();
    KubeError::Api {
        status: status.as_u16(),
        reason: if api_status.reason.is_empty() {
            status.canonical_reason().unwrap_or_default().to_string()
        } else {
            api_status.reason
        },
        message: api_status.message,
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, KubeError> {
    if !response.status().is_success() {
        return Err(api_error(response).await);
    }

    let body = response.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}

#[cfg(test)]
mod tests {
    use super::{KubeClient, KubeConfig, KubeError, TektonResource};
    use crate::kube::models::ApiStatus;

    fn client() -> KubeClient {
        KubeClient::new(&KubeConfig {
            api_server: "https://cluster.example:6443/".to_string(),
            ..KubeConfig::default()
        })
        .expect("client builds")
    }

    #[test]
    fn builds_namespaced_and_cluster_urls() {
        let client = client();

        assert_eq!(
            client.collection_url(TektonResource::PipelineRuns, Some("ci")),
            "https://cluster.example:6443/apis/tekton.dev/v1/namespaces/ci/pipelineruns"
        );
        assert_eq!(
            client.collection_url(TektonResource::TaskRuns, None),
            "https://cluster.example:6443/apis/tekton.dev/v1/taskruns"
        );
    }

    #[test]
    fn classifies_api_status_codes() {
        let gone = KubeError::from(ApiStatus {
            code: 410,
            reason: "Expired".to_string(),
            message: "too old resource version".to_string(),
        });
        assert!(gone.is_gone());
        assert!(!gone.is_not_found());

        let missing = KubeError::Api {
            status: 404,
            reason: "NotFound".to_string(),
            message: String::new(),
        };
        assert!(missing.is_not_found());
    }
}
