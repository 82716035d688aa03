use anyhow::Result;

use veracity::analyze::ReportFormat;
use veracity::{Config, FileStore, ResultStore};

use super::analyze::emit;

pub async fn cmd_show(config: &Config, id: &str, format: ReportFormat) -> Result<()> {
    let store = FileStore::new(config.results_dir());
    let stored = store.load(id).await?;

    eprintln!(
        "📂 {} result from {}",
        stored.result.kind(),
        stored.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    emit(&stored.result, format, None)
}
