use anyhow::{bail, Result};
use chrono::Local;
use sheetpipe::{logging, schedule::Workflow};
use std::env;
use tracing::{error, info};

const USAGE: &str = "usage: workflow <show|next|run>";

#[tokio::main]
async fn main() -> Result<()> {
    logging::init("info,sheetpipe=info");

    let command = env::var("SHEETPIPE_INGEST_COMMAND").unwrap_or_else(|_| "sheetpipe".into());
    let workflow = Workflow::data_ingestion(command);

    match env::args().nth(1).as_deref() {
        Some("show") | None => {
            print!("{}", serde_yaml::to_string(&workflow)?);
        }
        Some("next") => {
            let now = Local::now().naive_local();
            let next = workflow.next_run_after(now)?;
            info!(%now, %next, "next scheduled run");
            println!("{}", next);
        }
        Some("run") => {
            let report = workflow.run_once().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.succeeded {
                error!(workflow = %report.workflow, "run failed");
                bail!("workflow {} failed", report.workflow);
            }
        }
        Some(other) => bail!("unknown command `{}`\n{}", other, USAGE),
    }
    Ok(())
}
