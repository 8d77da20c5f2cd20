#![allow(dead_code)]

use async_trait::async_trait;
use common::{DatastoreId, Elapsed, JobKind, TaskReport, TaskStatus};
use poller::{AppContext, RpcClient, RpcError, TaskPoller};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const PROJECT: &str = "pid";

#[derive(Debug, Clone)]
pub struct Call {
    pub method: String,
    pub args: Vec<Value>,
}

impl Call {
    pub fn mentions(&self, needle: &str) -> bool {
        serde_json::to_string(&self.args)
            .map(|s| s.contains(&format!("\"{}\"", needle)))
            .unwrap_or(false)
    }
}

/// In-memory stand-in for the modeling server. Each task holds a script of
/// reports; every check consumes one until the last, which sticks.
#[derive(Default)]
pub struct FakeServer {
    tasks: Mutex<HashMap<String, VecDeque<TaskReport>>>,
    on_launch: Mutex<HashMap<String, Vec<TaskReport>>>,
    delays: Mutex<HashMap<String, Duration>>,
    failing: Mutex<HashSet<String>>,
    stored: Mutex<Value>,
    calls: Mutex<Vec<Call>>,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn store_jobs(&self, jobs: Value) {
        *self.stored.lock().unwrap() = jobs;
    }

    pub fn stored(&self) -> Value {
        self.stored.lock().unwrap().clone()
    }

    pub fn set_task(&self, id: &str, script: Vec<TaskReport>) {
        self.tasks.lock().unwrap().insert(id.to_string(), script.into());
    }

    pub fn has_task(&self, id: &str) -> bool {
        self.tasks.lock().unwrap().contains_key(id)
    }

    pub fn on_launch(&self, id: &str, script: Vec<TaskReport>) {
        self.on_launch.lock().unwrap().insert(id.to_string(), script);
    }

    pub fn delay(&self, id: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(id.to_string(), delay);
    }

    pub fn fail(&self, method: &str) {
        self.failing.lock().unwrap().insert(method.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str, id: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.method == method && c.mentions(id))
            .count()
    }

    pub fn position(&self, pred: impl Fn(&Call) -> bool) -> Option<usize> {
        self.calls().iter().position(pred)
    }
}

fn server_error(method: &str, message: &str) -> RpcError {
    RpcError::Server {
        method: method.to_string(),
        message: message.to_string(),
    }
}

#[async_trait]
impl RpcClient for FakeServer {
    async fn call(
        &self,
        method: &str,
        args: Vec<Value>,
        _kwargs: Map<String, Value>,
    ) -> Result<Value, RpcError> {
        self.calls.lock().unwrap().push(Call {
            method: method.to_string(),
            args: args.clone(),
        });
        let id = args
            .first()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        // A delayed check answers with the state the task had when asked.
        let report = if method == "check_task" {
            let report = {
                let mut tasks = self.tasks.lock().unwrap();
                let next = tasks.get_mut(&id).and_then(|script| {
                    if script.len() > 1 {
                        script.pop_front()
                    } else {
                        script.front().cloned()
                    }
                });
                next
            };
            let delay = self.delays.lock().unwrap().get(&id).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            report
        } else {
            None
        };
        if self.failing.lock().unwrap().contains(method) {
            return Err(server_error(method, "injected failure"));
        }

        match method {
            "check_task" => match report {
                Some(report) => Ok(serde_json::to_value(report).unwrap()),
                None => Err(server_error(method, "No task found")),
            },
            "launch_task" => {
                let script = self
                    .on_launch
                    .lock()
                    .unwrap()
                    .remove(&id)
                    .unwrap_or_else(|| vec![queued(0)]);
                self.set_task(&id, script);
                Ok(Value::Null)
            }
            "delete_task" => {
                self.tasks.lock().unwrap().remove(&id);
                Ok(Value::Null)
            }
            "del_result" => Ok(Value::Null),
            m if m.starts_with("get_") => Ok(self.stored()),
            m if m.starts_with("set_") => {
                self.store_jobs(args.get(1).cloned().unwrap_or(Value::Null));
                Ok(Value::Null)
            }
            _ => Err(server_error(method, "unknown method")),
        }
    }
}

pub fn id(name: &str) -> String {
    DatastoreId::derive(PROJECT, JobKind::Optimization, name).0
}

fn report(status: TaskStatus, pending: Option<u64>, execution: Option<u64>) -> TaskReport {
    let elapsed = |v: Option<u64>| v.map(Elapsed::Seconds).unwrap_or(Elapsed::NotApplicable);
    TaskReport {
        status,
        pending_time: elapsed(pending),
        execution_time: elapsed(execution),
        error_text: None,
    }
}

pub fn queued(pending: u64) -> TaskReport {
    report(TaskStatus::Queued, Some(pending), None)
}

pub fn started(pending: u64, execution: u64) -> TaskReport {
    report(TaskStatus::Started, Some(pending), Some(execution))
}

pub fn completed(pending: u64, execution: u64) -> TaskReport {
    report(TaskStatus::Completed, Some(pending), Some(execution))
}

pub fn failed(text: &str) -> TaskReport {
    TaskReport {
        error_text: Some(text.to_string()),
        ..report(TaskStatus::Error, Some(1), Some(2))
    }
}

pub fn names(jobs: &[&str]) -> Value {
    Value::Array(jobs.iter().map(|n| json!({ "name": n })).collect())
}

/// Poller for the optimizations page, with the user on that page.
pub fn on_page(fake: &Arc<FakeServer>) -> TaskPoller {
    let ctx = AppContext::new(PROJECT, JobKind::Optimization.page());
    TaskPoller::new(fake.clone(), ctx, JobKind::Optimization)
}

/// Poller whose user is somewhere else, so no session outlives its round.
pub fn off_page(fake: &Arc<FakeServer>) -> TaskPoller {
    let ctx = AppContext::new(PROJECT, "/projects");
    TaskPoller::new(fake.clone(), ctx, JobKind::Optimization)
}
