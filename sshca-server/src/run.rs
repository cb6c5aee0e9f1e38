//! Wires C1-C7 into a single running service and drives it to completion.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sshca_api::ServerState;
use sshca_cert::{CaSigner, CertMinter};
use sshca_core::config::ServerConfig;
use sshca_core::{GOOGLE_ISSUERS, GOOGLE_JWKS_URL};
use sshca_oidc::{KeySetCache, TokenVerifier};
use sshca_policy::PolicyResolver;
use tracing::{info, info_span, instrument, warn, Instrument};

use crate::cli::ServerArgs;
use crate::notify_once::NotifyOnce;

/// How long the server waits, after a graceful-shutdown signal, for
/// in-flight requests to finish before giving up.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

pub struct Server {
    listen_addr: SocketAddr,
    tls_config: axum_server::tls_rustls::RustlsConfig,
    router: axum::Router<()>,
    shutdown: NotifyOnce,
}

impl Server {
    #[instrument(skip_all, name = "(sshca-server-init)")]
    pub async fn init(args: ServerArgs) -> anyhow::Result<Self> {
        // axum-server's "no-provider" rustls feature requires us to install a
        // crypto provider before any `RustlsConfig` is built.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let config = ServerConfig::load(args.config_path()).context("Failed to load server config")?;
        let config = Arc::new(config);

        let http = reqwest::Client::builder().build().context("Failed to build reqwest client")?;
        let keyset = KeySetCache::new(GOOGLE_JWKS_URL, http);
        let verifier = TokenVerifier::new(keyset, GOOGLE_ISSUERS.iter().map(|s| s.to_string()).collect());
        let resolver = PolicyResolver::new(config.clone());
        let ca = CaSigner::load(&config.ca_key_path).context("Failed to load CA key")?;
        info!(fingerprint = %ca.fingerprint(), "loaded ca key");

        let minter = CertMinter::new(
            verifier,
            resolver,
            ca,
            config.allowed_client_id_for_id_token.clone(),
            config.allowed_domain_for_id_token.clone(),
            config.client_config_scope.clone(),
            config.ca_comment.clone(),
            config.additional_ssh_configuration_line.clone(),
        );
        let state = Arc::new(ServerState { minter });
        let router = sshca_api::router(state);

        let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(&config.server_cert_path, &config.server_key_path)
            .await
            .context("Failed to load server TLS certificate/key")?;

        let listen_addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));

        Ok(Self { listen_addr, tls_config, router, shutdown: NotifyOnce::new() })
    }

    pub fn shutdown_channel(&self) -> NotifyOnce {
        self.shutdown.clone()
    }

    /// Runs the server until a shutdown signal is observed, waiting up to
    /// [`SHUTDOWN_GRACE_PERIOD`] for in-flight requests to finish.
    #[instrument(skip_all, name = "(sshca-server)")]
    pub async fn run(self) -> anyhow::Result<()> {
        let handle = axum_server::Handle::new();
        let server_span = info_span!("(sshca-server)");
        info!(addr = %self.listen_addr, "starting sshca-server");

        let serve_fut = axum_server::bind_rustls(self.listen_addr, self.tls_config)
            .handle(handle.clone())
            .serve(self.router.into_make_service())
            .instrument(server_span);

        let mut shutdown = self.shutdown;
        let graceful_shutdown_fut = async move {
            shutdown.recv().await;
            info!("shutdown signal received, draining in-flight requests");
            handle.graceful_shutdown(Some(SHUTDOWN_GRACE_PERIOD));
        };

        tokio::pin!(serve_fut);
        tokio::select! {
            biased;
            () = graceful_shutdown_fut => {}
            result = &mut serve_fut => {
                result.context("server exited unexpectedly")?;
                warn!("server exited before a shutdown signal was observed");
                return Ok(());
            }
        }

        serve_fut.await.context("server failed during graceful shutdown")?;
        info!("sshca-server shut down cleanly");
        Ok(())
    }
}
