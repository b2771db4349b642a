use anyhow::Context;
use clap::Parser;
use ragchat_server::{AppState, Settings, init_tracing, run_server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::parse();
    init_tracing(settings.log_format)?;

    // Model downloads and tokenizer parsing are blocking work.
    let engine_settings = settings.clone();
    let engine = tokio::task::spawn_blocking(move || engine_settings.build_engine())
        .await
        .context("engine construction panicked")??;

    run_server(settings.server_config(), AppState::new(engine)).await
}
