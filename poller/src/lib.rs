//! Client-side tracking of long-running tasks on the modeling server.
//!
//! A [`TaskPoller`] mirrors one job collection of a project, launches and
//! clears the jobs' server-side tasks, and polls their status while any of
//! them is in flight and the user stays on the page that owns them.

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod poller;

pub use client::{HttpRpcClient, RpcClient};
pub use config::Config;
pub use context::AppContext;
pub use error::{PollerError, RpcError};
pub use metrics::MetricsCollector;
pub use poller::{PollState, RoundSummary, TaskPoller};
