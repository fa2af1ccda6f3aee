use std::sync::Arc;

use tma_core::{config::Config, flows::Flows, journal::ErrorJournal};
use tma_mtproto::GrammersConnector;
use tma_server::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tma_core::logging::init("tma")?;

    let cfg = Arc::new(Config::load()?);
    tracing::info!(
        bind = %cfg.bind_addr,
        fetch_timeout_secs = cfg.fetch_timeout.as_secs(),
        error_log = %cfg.error_log_path.display(),
        "starting launch-data service"
    );

    let journal = ErrorJournal::new(cfg.error_log_path.clone());
    let flows = Arc::new(Flows::new(
        Arc::new(GrammersConnector::new()),
        journal.clone(),
        cfg.fetch_timeout,
    ));

    tma_server::run(cfg, AppState { flows, journal }).await?;
    Ok(())
}
