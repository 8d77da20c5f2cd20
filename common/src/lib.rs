pub mod elapsed;
pub mod job;
pub mod rpc;

pub use elapsed::{format_duration, Elapsed, NOT_APPLICABLE};
pub use job::{unique_name, DatastoreId, JobKind, JobSummary, TaskStatus};
pub use rpc::{methods, LaunchOptions, RpcReply, RpcRequest, TaskReport, Tool};

// Config lookup order: user file first, then the system-wide one
pub const USER_CONFIG_PATH: &str = "~/.config/taskwatch/config.yaml";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/taskwatch/config.yaml";

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8094/api/rpcs";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Log target that receives server-reported task error text.
pub const TASK_ERROR_LOG_TARGET: &str = "task_error";
