use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::Table;
use common::{JobKind, JobSummary, LaunchOptions};
use poller::{AppContext, Config, HttpRpcClient, TaskPoller};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about = "Track long-running modeling server tasks", long_about = None)]
struct Cli {
    /// Config file (.yaml, .yml or .toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// RPC endpoint of the modeling server
    #[arg(long, global = true)]
    server: Option<String>,
    /// Project id
    #[arg(short, long, global = true)]
    project: Option<String>,
    /// Job kind: optimization, scenario or calibration
    #[arg(short, long, global = true)]
    kind: Option<JobKind>,
    /// More log output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List jobs and their task status
    List,
    /// Add a new job
    Add {
        name: String,
        /// Job parameter, KEY=VALUE (VALUE is parsed as JSON when possible)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        params: Vec<String>,
    },
    /// Copy a job under a new name
    Copy {
        name: String,
    },
    /// Rename a job, clearing the task under its old name
    Rename {
        old: String,
        new: String,
    },
    /// Delete a job and its task
    Delete {
        name: String,
    },
    /// Launch a job's task on the server
    Run {
        name: String,
        /// Time budget in seconds
        #[arg(long)]
        maxtime: Option<u64>,
        /// Last year to simulate
        #[arg(long)]
        end_year: Option<u32>,
        /// Target population
        #[arg(long)]
        pop: Option<String>,
        /// Extra keyword argument, KEY=VALUE
        #[arg(long = "set", value_name = "KEY=VALUE")]
        options: Vec<String>,
        /// Keep polling until the task finishes
        #[arg(short, long)]
        wait: bool,
    },
    /// Delete a job's task and cached result
    Clear {
        name: String,
    },
    /// Check every job's task once
    Status,
    /// Poll until no task is queued or running
    Watch {
        /// Print poller metrics when done
        #[arg(long)]
        metrics: bool,
    },
    /// Write the job list as CSV
    Export {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check every job once and print poller metrics
    Metrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(server) = cli.server {
        config.server.url = server;
    }
    if let Some(project) = cli.project {
        config.project.id = Some(project);
    }
    if let Some(kind) = cli.kind {
        config.project.kind = kind;
    }
    poller::logging::setup_logging(&config.logging, cli.verbose)?;

    let project_id = config
        .project
        .id
        .clone()
        .ok_or_else(|| anyhow!("No project given. Use --project or set project.id in the config"))?;
    let kind = config.project.kind;

    let client = HttpRpcClient::new(config.server.url.clone(), config.request_timeout())?;
    log::info!("Using {} for {} jobs of project {}", client.url(), kind, project_id);

    let ctx = AppContext::new(project_id, kind.page());
    let poller = TaskPoller::new(Arc::new(client), ctx, kind).with_interval(config.poll_interval());
    poller
        .load_with(config.polling.check_all_on_load)
        .await
        .context("Could not load jobs")?;

    match cli.command {
        Commands::List => print_table(&poller.jobs()),
        Commands::Add { name, params } => {
            let name = poller.add_job(&name, parse_pairs(&params)?).await?;
            println!("Added {}", name);
        }
        Commands::Copy { name } => {
            let copy = poller.copy_job(&name).await?;
            println!("Copied {} to {}", name, copy);
        }
        Commands::Rename { old, new } => {
            poller.rename(&old, &new).await?;
            println!("Renamed {} to {}", old, new);
        }
        Commands::Delete { name } => {
            poller.delete_job(&name).await?;
            println!("Deleted {}", name);
        }
        Commands::Run { name, maxtime, end_year, pop, options, wait } => {
            let options = LaunchOptions {
                maxtime,
                end_year,
                pop,
                tool: config.project.tool,
                extra: parse_pairs(&options)?,
                ..Default::default()
            };
            poller.launch(&name, &options).await?;
            println!("Launched {}", name);
            if wait {
                watch(&poller, &config).await;
            }
        }
        Commands::Clear { name } => {
            poller.clear_task(&name).await?;
            println!("Cleared {}", name);
        }
        Commands::Status => {
            // load() already checked everything unless configured otherwise
            if !config.polling.check_all_on_load {
                poller.poll_all_task_states(true).await;
            }
            print_table(&poller.jobs());
        }
        Commands::Watch { metrics } => {
            poller.ensure_polling();
            watch(&poller, &config).await;
            if metrics {
                print!("{}", poller.metrics().export());
            }
        }
        Commands::Export { output } => export_csv(&poller.jobs(), output)?,
        Commands::Metrics => {
            poller.poll_all_task_states(true).await;
            print!("{}", poller.metrics().export());
        }
    }

    poller.stop();
    Ok(())
}

async fn watch(poller: &TaskPoller, config: &Config) {
    let mut ticker = tokio::time::interval(config.poll_interval());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                // Leaving the page ends the session.
                poller.context().navigate("/");
                break;
            }
            _ = poller.wait_until_idle() => break,
            _ = ticker.tick() => {
                for job in poller.jobs().iter().filter(|j| j.status.is_in_flight()) {
                    println!(
                        "{:<24} {:<12} queued {} running {}",
                        job.name, job.status, job.pending_time, job.execution_time
                    );
                }
            }
        }
    }
    print_table(&poller.jobs());
}

fn print_table(jobs: &[JobSummary]) {
    if jobs.is_empty() {
        println!("No jobs.");
        return;
    }
    let mut table = Table::new();
    table.set_header(vec!["Name", "Status", "Pending", "Running", "Datastore ID"]);
    for job in jobs {
        table.add_row(vec![
            job.name.clone(),
            job.status.to_string(),
            job.pending_time.format(),
            job.execution_time.format(),
            job.datastore_id.to_string(),
        ]);
    }
    println!("{table}");
    for job in jobs {
        if let Some(error) = &job.last_error {
            println!("\n{} failed:\n{}", job.name, error);
        }
    }
}

#[derive(Serialize)]
struct ExportRow<'a> {
    name: &'a str,
    status: &'a str,
    pending_time: String,
    execution_time: String,
    datastore_id: &'a str,
}

fn export_csv(jobs: &[JobSummary], output: Option<PathBuf>) -> Result<()> {
    let writer: Box<dyn std::io::Write> = match &output {
        Some(path) => Box::new(
            std::fs::File::create(path).with_context(|| format!("Failed to create {:?}", path))?,
        ),
        None => Box::new(std::io::stdout()),
    };
    let mut out = csv::Writer::from_writer(writer);
    for job in jobs {
        out.serialize(ExportRow {
            name: &job.name,
            status: job.status.as_str(),
            pending_time: job.pending_time.format(),
            execution_time: job.execution_time.format(),
            datastore_id: job.datastore_id.as_str(),
        })?;
    }
    out.flush()?;
    if let Some(path) = output {
        println!("Exported {} jobs to {:?}", jobs.len(), path);
    }
    Ok(())
}

/// Parses `KEY=VALUE` pairs. Values that are valid JSON keep their type.
fn parse_pairs(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("Expected KEY=VALUE, got {:?}", pair))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        map.insert(key.trim().to_string(), value);
    }
    Ok(map)
}
