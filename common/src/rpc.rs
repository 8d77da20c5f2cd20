use crate::elapsed::Elapsed;
use crate::job::TaskStatus;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Method names of the task-management RPC surface.
pub mod methods {
    pub const CHECK_TASK: &str = "check_task";
    pub const LAUNCH_TASK: &str = "launch_task";
    pub const DELETE_TASK: &str = "delete_task";
    pub const DEL_RESULT: &str = "del_result";
}

/// Body posted to the server's RPC endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcRequest {
    pub funcname: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

/// Body the server answers with. A raised server-side exception comes back
/// as `{"error": "..."}`; anything else is the method's return value.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RpcReply {
    Failure { error: String },
    Success(Value),
}

/// Result of `check_task`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskReport {
    pub status: TaskStatus,
    #[serde(default)]
    pub pending_time: Elapsed,
    #[serde(default)]
    pub execution_time: Elapsed,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
}

impl TaskReport {
    /// What a missing or unreachable task is reported as.
    pub fn not_started() -> Self {
        Self {
            status: TaskStatus::NotStarted,
            pending_time: Elapsed::NotApplicable,
            execution_time: Elapsed::NotApplicable,
            error_text: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    #[default]
    Cascade,
    Tb,
}

/// Keyword arguments sent with `launch_task`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LaunchOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plot_options: Option<Value>,
    /// Time budget in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxtime: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_year: Option<u32>,
    /// Target population.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pop: Option<String>,
    #[serde(default)]
    pub tool: Tool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LaunchOptions {
    pub fn to_kwargs(&self) -> serde_json::Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Ok(Map::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_check_task_reply() {
        let report: TaskReport = serde_json::from_value(json!({
            "status": "queued",
            "pendingTime": "2",
            "executionTime": "--"
        }))
        .unwrap();
        assert_eq!(report.status, TaskStatus::Queued);
        assert_eq!(report.pending_time, Elapsed::Seconds(2));
        assert_eq!(report.execution_time, Elapsed::NotApplicable);
        assert!(report.error_text.is_none());
    }

    #[test]
    fn reply_distinguishes_server_errors() {
        let reply: RpcReply = serde_json::from_value(json!({"error": "No task found"})).unwrap();
        assert!(matches!(reply, RpcReply::Failure { error } if error == "No task found"));

        let reply: RpcReply = serde_json::from_value(json!({"status": "completed"})).unwrap();
        assert!(matches!(reply, RpcReply::Success(_)));
    }

    #[test]
    fn launch_options_flatten_into_kwargs() {
        let mut options = LaunchOptions {
            maxtime: Some(30),
            end_year: Some(2030),
            pop: Some("Adults".into()),
            tool: Tool::Tb,
            ..Default::default()
        };
        options.extra.insert("cascade".into(), json!("main"));

        let kwargs = options.to_kwargs().unwrap();
        assert_eq!(kwargs["maxtime"], json!(30));
        assert_eq!(kwargs["end_year"], json!(2030));
        assert_eq!(kwargs["tool"], json!("tb"));
        assert_eq!(kwargs["cascade"], json!("main"));
        assert!(!kwargs.contains_key("plot_options"));
    }
}
