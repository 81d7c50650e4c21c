use anyhow::{bail, Result};
use sheetpipe::{config::IngestConfig, logging, pipeline};
use std::path::PathBuf;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    logging::init("info,sheetpipe=info");
    info!("startup");

    // ─── 2) load config: file (arg or SHEETPIPE_CONFIG), then env ─────
    let config_path: Option<PathBuf> = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("SHEETPIPE_CONFIG").ok())
        .map(PathBuf::from);
    let cfg = IngestConfig::load(config_path.as_deref())?;
    info!(
        org = %cfg.source.organization_id,
        file = %cfg.source.filename,
        table = %format!("{}.{}", cfg.target.schema, cfg.target.table),
        "configured"
    );

    // ─── 3) fetch, clean, load ───────────────────────────────────────
    let summary = pipeline::run(&cfg).await?;

    // ─── 4) report ───────────────────────────────────────────────────
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if !summary.succeeded() {
        error!("load into {} failed", summary.target);
        bail!("load into {} failed", summary.target);
    }
    info!("all done");
    Ok(())
}
