mod cli;
mod config;
mod credentials;
mod keygen;
mod oauth;
mod run;
mod splice;
mod tls;

use anyhow::Context;
use cli::ClientArgs;
use config::ClientConfig;

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    sshca_logger::init();

    let args = ClientArgs::from_env();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;

    let result = rt.block_on(async move {
        let config = ClientConfig::load(args.config_path())?;
        run::run_once(&config).await
    });

    if let Err(e) = &result {
        tracing::error!(error = %e, "sshca-client run failed");
    }
    result
}
