use crate::error::RpcError;
use async_trait::async_trait;
use common::{methods, DatastoreId, JobKind, JobSummary, RpcReply, RpcRequest, TaskReport};
use serde_json::{json, Map, Value};
use std::time::Duration;

/// A remote-procedure-call endpoint on the modeling server.
#[async_trait]
pub trait RpcClient: Send + Sync {
    async fn call(
        &self,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, RpcError>;
}

/// Posts `{"funcname", "args", "kwargs"}` to the server's RPC URL.
pub struct HttpRpcClient {
    client: reqwest::Client,
    url: String,
}

impl HttpRpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RpcClient for HttpRpcClient {
    async fn call(
        &self,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, RpcError> {
        let request = RpcRequest {
            funcname: method.to_string(),
            args,
            kwargs,
        };
        let transport = |source| RpcError::Transport {
            method: method.to_string(),
            source,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let body = response.bytes().await.map_err(transport)?;

        if !status.is_success() {
            return Err(RpcError::Status {
                method: method.to_string(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let reply: RpcReply = serde_json::from_slice(&body).map_err(|source| RpcError::Decode {
            method: method.to_string(),
            source,
        })?;

        match reply {
            RpcReply::Success(value) => Ok(value),
            RpcReply::Failure { error } => Err(RpcError::Server {
                method: method.to_string(),
                message: error,
            }),
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(method: &str, value: Value) -> Result<T, RpcError> {
    serde_json::from_value(value).map_err(|source| RpcError::Decode {
        method: method.to_string(),
        source,
    })
}

pub async fn check_task(client: &dyn RpcClient, id: &DatastoreId) -> Result<TaskReport, RpcError> {
    let value = client
        .call(methods::CHECK_TASK, vec![json!(id.0)], Map::new())
        .await?;
    decode(methods::CHECK_TASK, value)
}

/// Launches `function` on the server under `id`. `args` and `kwargs` are
/// handed to that function.
pub async fn launch_task(
    client: &dyn RpcClient,
    id: &DatastoreId,
    function: &str,
    args: Vec<Value>,
    kwargs: Map<String, Value>,
) -> Result<(), RpcError> {
    client
        .call(
            methods::LAUNCH_TASK,
            vec![json!(id.0), json!(function), Value::Array(args), Value::Object(kwargs)],
            Map::new(),
        )
        .await?;
    Ok(())
}

pub async fn delete_task(client: &dyn RpcClient, id: &DatastoreId) -> Result<(), RpcError> {
    client
        .call(methods::DELETE_TASK, vec![json!(id.0)], Map::new())
        .await?;
    Ok(())
}

pub async fn del_result(
    client: &dyn RpcClient,
    id: &DatastoreId,
    project_id: &str,
) -> Result<(), RpcError> {
    client
        .call(methods::DEL_RESULT, vec![json!(id.0), json!(project_id)], Map::new())
        .await?;
    Ok(())
}

pub async fn get_info(
    client: &dyn RpcClient,
    kind: JobKind,
    project_id: &str,
) -> Result<Vec<JobSummary>, RpcError> {
    let method = kind.get_info_method();
    let value = client.call(method, vec![json!(project_id)], Map::new()).await?;
    match value {
        Value::Null => Ok(Vec::new()),
        value => decode(method, value),
    }
}

pub async fn set_info(
    client: &dyn RpcClient,
    kind: JobKind,
    project_id: &str,
    jobs: &[JobSummary],
) -> Result<(), RpcError> {
    let method = kind.set_info_method();
    let jobs = serde_json::to_value(jobs).map_err(|source| RpcError::Decode {
        method: method.to_string(),
        source,
    })?;
    client
        .call(method, vec![json!(project_id), jobs], Map::new())
        .await?;
    Ok(())
}
