use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Poller counters with Prometheus-compatible output
pub struct MetricsCollector {
    checks: Arc<DashMap<String, AtomicU64>>,
    check_failures: Arc<DashMap<String, AtomicU64>>,
    launches: Arc<DashMap<String, AtomicU64>>,
    clears: Arc<DashMap<String, AtomicU64>>,
    execution_seconds: Arc<DashMap<String, Vec<u64>>>, // last 100 completed runs per job
    rounds: Arc<AtomicU64>,
    in_flight: Arc<AtomicU64>,
}

fn bump(map: &DashMap<String, AtomicU64>, key: &str) {
    map.entry(key.to_string())
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(1, Ordering::Relaxed);
}

fn read(map: &DashMap<String, AtomicU64>, key: &str) -> u64 {
    map.get(key)
        .map(|v| v.load(Ordering::Relaxed))
        .unwrap_or(0)
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            checks: Arc::new(DashMap::new()),
            check_failures: Arc::new(DashMap::new()),
            launches: Arc::new(DashMap::new()),
            clears: Arc::new(DashMap::new()),
            execution_seconds: Arc::new(DashMap::new()),
            rounds: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn record_check(&self, id: &str) {
        bump(&self.checks, id);
    }

    /// A check that came back empty and was reported as "not started".
    pub fn record_check_failure(&self, id: &str) {
        bump(&self.check_failures, id);
    }

    pub fn record_launch(&self, id: &str) {
        bump(&self.launches, id);
    }

    pub fn record_clear(&self, id: &str) {
        bump(&self.clears, id);
    }

    pub fn record_completion(&self, id: &str, execution_seconds: u64) {
        let mut entry = self
            .execution_seconds
            .entry(id.to_string())
            .or_insert_with(Vec::new);
        entry.push(execution_seconds);
        let len = entry.len();
        if len > 100 {
            entry.drain(0..len - 100);
        }
    }

    pub fn record_round(&self, in_flight: u64) {
        self.rounds.fetch_add(1, Ordering::Relaxed);
        self.in_flight.store(in_flight, Ordering::Relaxed);
    }

    pub fn rounds(&self) -> u64 {
        self.rounds.load(Ordering::Relaxed)
    }

    pub fn checks(&self, id: &str) -> u64 {
        read(&self.checks, id)
    }

    pub fn check_failures(&self, id: &str) -> u64 {
        read(&self.check_failures, id)
    }

    pub fn launches(&self, id: &str) -> u64 {
        read(&self.launches, id)
    }

    pub fn clears(&self, id: &str) -> u64 {
        read(&self.clears, id)
    }

    /// Generate Prometheus-compatible metrics output
    pub fn export(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP taskwatch_poll_rounds_total Total number of polling rounds\n");
        output.push_str("# TYPE taskwatch_poll_rounds_total counter\n");
        output.push_str(&format!("taskwatch_poll_rounds_total {}\n\n", self.rounds()));

        output.push_str("# HELP taskwatch_tasks_in_flight Jobs queued or started after the last round\n");
        output.push_str("# TYPE taskwatch_tasks_in_flight gauge\n");
        output.push_str(&format!(
            "taskwatch_tasks_in_flight {}\n\n",
            self.in_flight.load(Ordering::Relaxed)
        ));

        let counters = [
            ("taskwatch_task_checks_total", "Total number of status checks", &self.checks),
            (
                "taskwatch_task_check_failures_total",
                "Status checks that found no task",
                &self.check_failures,
            ),
            ("taskwatch_task_launches_total", "Total number of task launches", &self.launches),
            ("taskwatch_task_clears_total", "Total number of task clears", &self.clears),
        ];
        for (name, help, map) in counters {
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} counter\n", name));
            for entry in map.iter() {
                output.push_str(&format!(
                    "{}{{datastore_id=\"{}\"}} {}\n",
                    name,
                    entry.key(),
                    entry.value().load(Ordering::Relaxed)
                ));
            }
            output.push('\n');
        }

        output.push_str("# HELP taskwatch_task_execution_seconds Execution time percentiles of completed tasks\n");
        output.push_str("# TYPE taskwatch_task_execution_seconds gauge\n");
        for entry in self.execution_seconds.iter() {
            let mut durations = entry.value().clone();
            if durations.is_empty() {
                continue;
            }
            durations.sort_unstable();
            for (quantile, p) in [("0.5", 50.0), ("0.95", 95.0), ("0.99", 99.0)] {
                output.push_str(&format!(
                    "taskwatch_task_execution_seconds{{datastore_id=\"{}\",quantile=\"{}\"}} {}\n",
                    entry.key(),
                    quantile,
                    percentile(&durations, p)
                ));
            }
        }

        output
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn percentile(sorted_data: &[u64], p: f64) -> u64 {
    if sorted_data.is_empty() {
        return 0;
    }
    let index = ((p / 100.0) * (sorted_data.len() as f64 - 1.0)).round() as usize;
    sorted_data[index.min(sorted_data.len() - 1)]
}
