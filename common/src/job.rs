use crate::elapsed::Elapsed;
use crate::rpc::TaskReport;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Key under which the server stores a task and its cached result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct DatastoreId(pub String);

impl DatastoreId {
    /// `{project_id}:{prefix}-{name}`, e.g. `p1:opt-Baseline`.
    pub fn derive(project_id: &str, kind: JobKind, name: &str) -> Self {
        DatastoreId(format!("{}:{}-{}", project_id, kind.prefix(), name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatastoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of long-running job a collection holds. Each kind is owned by
/// one page and has its own pair of info methods on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Optimization,
    Scenario,
    Calibration,
}

impl JobKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            JobKind::Optimization => "opt",
            JobKind::Scenario => "scen",
            JobKind::Calibration => "cal",
        }
    }

    /// Route path of the page that owns collections of this kind.
    pub fn page(&self) -> &'static str {
        match self {
            JobKind::Optimization => "/optimizations",
            JobKind::Scenario => "/scenarios",
            JobKind::Calibration => "/calibration",
        }
    }

    pub fn get_info_method(&self) -> &'static str {
        match self {
            JobKind::Optimization => "get_optim_info",
            JobKind::Scenario => "get_scen_info",
            JobKind::Calibration => "get_cal_info",
        }
    }

    pub fn set_info_method(&self) -> &'static str {
        match self {
            JobKind::Optimization => "set_optim_info",
            JobKind::Scenario => "set_scen_info",
            JobKind::Calibration => "set_cal_info",
        }
    }

    /// Server-side function a launched task runs.
    pub fn task_function(&self) -> &'static str {
        match self {
            JobKind::Optimization => "run_optimization",
            JobKind::Scenario => "run_scenarios",
            JobKind::Calibration => "run_calibration",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobKind::Optimization => "optimization",
            JobKind::Scenario => "scenario",
            JobKind::Calibration => "calibration",
        };
        f.write_str(name)
    }
}

impl FromStr for JobKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "opt" | "optim" | "optimization" | "optimizations" => Ok(JobKind::Optimization),
            "scen" | "scenario" | "scenarios" => Ok(JobKind::Scenario),
            "cal" | "calib" | "calibration" => Ok(JobKind::Calibration),
            _ => Err(anyhow!("Unknown job kind: {}", s)),
        }
    }
}

/// Status of a server-side task as reported by `check_task`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TaskStatus {
    #[default]
    #[serde(rename = "not started")]
    NotStarted,
    #[serde(rename = "queued")]
    Queued,
    #[serde(rename = "started")]
    Started,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "error")]
    Error,
}

impl TaskStatus {
    /// Queued or started: the job still needs watching.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Started)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_in_flight()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::NotStarted => "not started",
            TaskStatus::Queued => "queued",
            TaskStatus::Started => "started",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "not started" => Ok(TaskStatus::NotStarted),
            "queued" => Ok(TaskStatus::Queued),
            "started" => Ok(TaskStatus::Started),
            "completed" => Ok(TaskStatus::Completed),
            "error" => Ok(TaskStatus::Error),
            _ => Err(anyhow!("Unknown task status: {}", s)),
        }
    }
}

/// Client-side mirror of one server-side job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub name: String,
    #[serde(default)]
    pub datastore_id: DatastoreId,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub pending_time: Elapsed,
    #[serde(default)]
    pub execution_time: Elapsed,
    /// Set once this job has been refreshed in the current polling round.
    #[serde(skip)]
    pub polled: bool,
    /// Error text from the last check that reported `error`.
    #[serde(skip)]
    pub last_error: Option<String>,
    /// Job parameters the server stores alongside the summary.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobSummary {
    pub fn new(project_id: &str, kind: JobKind, name: &str) -> Self {
        Self {
            name: name.to_string(),
            datastore_id: DatastoreId::derive(project_id, kind, name),
            status: TaskStatus::NotStarted,
            pending_time: Elapsed::NotApplicable,
            execution_time: Elapsed::NotApplicable,
            polled: false,
            last_error: None,
            extra: Map::new(),
        }
    }

    pub fn with_extra(mut self, extra: Map<String, Value>) -> Self {
        self.extra = extra;
        self
    }

    pub fn apply_report(&mut self, report: &TaskReport) {
        self.status = report.status;
        self.pending_time = report.pending_time;
        self.execution_time = report.execution_time;
        self.last_error = match report.status {
            TaskStatus::Error => report.error_text.clone(),
            _ => None,
        };
        if self.status == TaskStatus::NotStarted {
            self.pending_time = Elapsed::NotApplicable;
            self.execution_time = Elapsed::NotApplicable;
        }
    }

    pub fn reset(&mut self) {
        self.apply_report(&TaskReport::not_started());
    }

    /// Renames the job and adopts the derived id. Returns the previous id.
    pub fn rename(&mut self, project_id: &str, kind: JobKind, new_name: &str) -> DatastoreId {
        self.name = new_name.to_string();
        std::mem::replace(
            &mut self.datastore_id,
            DatastoreId::derive(project_id, kind, new_name),
        )
    }
}

/// Returns `base` if unused, otherwise the first free `base (n)`.
pub fn unique_name<'a>(base: &str, existing: impl IntoIterator<Item = &'a str>) -> String {
    let taken: Vec<&str> = existing.into_iter().collect();
    if !taken.contains(&base) {
        return base.to_string();
    }
    let mut n = 1;
    loop {
        let candidate = format!("{} ({})", base, n);
        if !taken.contains(&candidate.as_str()) {
            return candidate;
        }
        n += 1;
    }
}
