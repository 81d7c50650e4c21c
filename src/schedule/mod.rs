// src/schedule/mod.rs
//! The daily `data_ingestion` workflow: four tasks in a line, the ingestion
//! binary as a shell step, one retry per task.
//!
//! Only the declaration and a single run live here. Whatever fires the
//! workflow on its schedule is external; [`Workflow::next_run_after`] and
//! [`Workflow::due_runs`] tell it when.

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{info, warn};

pub const WORKFLOW_ID: &str = "data_ingestion";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskKind {
    Noop,
    /// Run through `sh -c`; an empty command does nothing and succeeds.
    Shell { command: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: String,
    #[serde(flatten)]
    pub kind: TaskKind,
}

impl Task {
    pub fn noop(id: &str) -> Self {
        Self {
            id: id.into(),
            kind: TaskKind::Noop,
        }
    }

    pub fn shell(id: &str, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: TaskKind::Shell {
                command: command.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Workflow {
    pub id: String,
    pub owner: String,
    pub start_date: NaiveDateTime,
    pub schedule_interval: Duration,
    pub catchup: bool,
    pub depends_on_past: bool,
    pub retries: u32,
    pub retry_delay: Duration,
    /// Runs strictly in this order, each after the previous succeeded.
    pub tasks: Vec<Task>,
}

impl Workflow {
    /// `start → data_ingestion → data_processing → end`, daily from
    /// 2022-03-28, no catch-up, one retry after five minutes.
    pub fn data_ingestion(ingest_command: impl Into<String>) -> Self {
        let start_date = NaiveDate::from_ymd_opt(2022, 3, 28)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap_or_default();
        Self {
            id: WORKFLOW_ID.into(),
            owner: "sheetpipe".into(),
            start_date,
            schedule_interval: Duration::from_secs(24 * 60 * 60),
            catchup: false,
            depends_on_past: false,
            retries: 1,
            retry_delay: Duration::from_secs(5 * 60),
            tasks: vec![
                Task::noop("start"),
                Task::shell("data_ingestion", ingest_command),
                Task::shell("data_processing", ""),
                Task::noop("end"),
            ],
        }
    }

    pub fn order(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.id.as_str()).collect()
    }

    fn interval(&self) -> Result<TimeDelta> {
        let interval = TimeDelta::from_std(self.schedule_interval)
            .context("schedule interval out of range")?;
        if interval <= TimeDelta::zero() {
            bail!("schedule interval must be positive");
        }
        Ok(interval)
    }

    /// Fire time number `k`: `start_date + k * interval`.
    fn fire_time(&self, k: i64) -> Result<NaiveDateTime> {
        let step = self.interval()?.num_milliseconds();
        step.checked_mul(k)
            .map(TimeDelta::milliseconds)
            .and_then(|offset| self.start_date.checked_add_signed(offset))
            .context("fire time out of range")
    }

    /// Index of the latest fire time at or before `at` (0 before the first).
    fn elapsed_intervals(&self, at: NaiveDateTime) -> Result<i64> {
        let step = self.interval()?.num_milliseconds();
        let elapsed = (at - self.start_date).num_milliseconds();
        Ok(elapsed.div_euclid(step).max(0))
    }

    /// First fire time strictly after `now`. The first run of the workflow
    /// happens one interval after its start date.
    pub fn next_run_after(&self, now: NaiveDateTime) -> Result<NaiveDateTime> {
        self.fire_time(self.elapsed_intervals(now)? + 1)
    }

    /// Fire times that have passed by `now` and come after `last_run`.
    /// Without catch-up only the latest of them is returned.
    pub fn due_runs(
        &self,
        last_run: Option<NaiveDateTime>,
        now: NaiveDateTime,
    ) -> Result<Vec<NaiveDateTime>> {
        let latest = self.elapsed_intervals(now)?;
        let first = match last_run {
            Some(t) => self.elapsed_intervals(t)? + 1,
            None => 1,
        };
        if latest < first {
            return Ok(Vec::new());
        }
        if !self.catchup {
            return Ok(vec![self.fire_time(latest)?]);
        }
        (first.max(1)..=latest).map(|k| self.fire_time(k)).collect()
    }

    /// Execute every task once, in order. A task that still fails after
    /// `1 + retries` attempts fails the run and the rest are skipped.
    #[tracing::instrument(level = "info", skip(self), fields(workflow = %self.id))]
    pub async fn run_once(&self) -> RunReport {
        let started = Instant::now();
        let mut tasks = Vec::with_capacity(self.tasks.len());
        let mut failed = false;

        for task in &self.tasks {
            if failed {
                info!(task = %task.id, "skipped");
                tasks.push(TaskRun {
                    id: task.id.clone(),
                    status: TaskStatus::Skipped,
                    attempts: 0,
                });
                continue;
            }

            let (status, attempts) = self.run_task(task).await;
            failed = status == TaskStatus::Failed;
            tasks.push(TaskRun {
                id: task.id.clone(),
                status,
                attempts,
            });
        }

        RunReport {
            workflow: self.id.clone(),
            succeeded: !failed,
            tasks,
            elapsed_secs: started.elapsed().as_secs_f64(),
        }
    }

    async fn run_task(&self, task: &Task) -> (TaskStatus, u32) {
        let max_attempts = self.retries + 1;
        for attempt in 1..=max_attempts {
            match execute(&task.kind).await {
                Ok(()) => {
                    info!(task = %task.id, attempt, "succeeded");
                    return (TaskStatus::Succeeded, attempt);
                }
                Err(e) if attempt < max_attempts => {
                    warn!(
                        task = %task.id,
                        attempt,
                        "failed: {:#}; retrying in {:?}",
                        e,
                        self.retry_delay
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => {
                    warn!(task = %task.id, attempt, "failed: {:#}; giving up", e);
                }
            }
        }
        (TaskStatus::Failed, max_attempts)
    }
}

async fn execute(kind: &TaskKind) -> Result<()> {
    match kind {
        TaskKind::Noop => Ok(()),
        TaskKind::Shell { command } if command.trim().is_empty() => Ok(()),
        TaskKind::Shell { command } => {
            let status = Command::new("sh")
                .arg("-c")
                .arg(command)
                .status()
                .await
                .with_context(|| format!("spawning `{}`", command))?;
            if !status.success() {
                bail!("`{}` exited with {}", command, status);
            }
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRun {
    pub id: String,
    pub status: TaskStatus,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub workflow: String,
    pub succeeded: bool,
    pub tasks: Vec<TaskRun>,
    pub elapsed_secs: f64,
}
