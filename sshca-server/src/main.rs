mod cli;
mod notify_once;
mod run;

use anyhow::Context;
use cli::ServerArgs;
use run::Server;

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    sshca_logger::init();

    let args = ServerArgs::from_env();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;

    rt.block_on(async move {
        let server = Server::init(args).await?;

        let shutdown = server.shutdown_channel();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Ctrl+C received, starting graceful shutdown");
                shutdown.send();
            }
        });

        server.run().await
    })
}
