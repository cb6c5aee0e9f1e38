//! Builds the `reqwest::Client` C9 uses to talk to the sshca-server, per
//! design doc §9's "Dynamic dispatch on credential modes" note. The
//! identity-provider-facing client (JWKS/token endpoints) always uses the
//! public web PKI and is built separately in [`crate::oauth`].

use std::sync::Arc;

use anyhow::Context;

use crate::config::TlsMode;

/// Installs the `ring` crypto provider exactly once per process, mirroring
/// `sshca-server`'s own `run.rs` init (axum-server's rustls acceptor and
/// reqwest's rustls backend both need one installed before first use).
pub fn ensure_crypto_provider_installed() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Builds an HTTP client configured per `tls_mode` for requests to the
/// sshca-server. Requests to the identity provider never go through this
/// client — see [`crate::oauth::public_http_client`].
pub fn build_server_http_client(tls_mode: &TlsMode) -> anyhow::Result<reqwest::Client> {
    ensure_crypto_provider_installed();

    let rustls_config = match tls_mode {
        TlsMode::SystemRoots => system_roots_config()?,
        TlsMode::Pinned { server_cert_path } => pinned_config(server_cert_path)?,
        TlsMode::InsecureSkipVerify => insecure_config()?,
    };

    reqwest::Client::builder()
        .use_preconfigured_tls(rustls_config)
        .build()
        .context("failed to build reqwest client")
}

fn system_roots_config() -> anyhow::Result<rustls::ClientConfig> {
    let roots = rustls::RootCertStore { roots: webpki_roots::TLS_SERVER_ROOTS.to_vec() };
    Ok(rustls::ClientConfig::builder().with_root_certificates(roots).with_no_client_auth())
}

fn pinned_config(server_cert_path: &str) -> anyhow::Result<rustls::ClientConfig> {
    let pem = std::fs::read(server_cert_path)
        .with_context(|| format!("failed to read pinned server cert {server_cert_path}"))?;

    let mut roots = rustls::RootCertStore::empty();
    let mut cursor = std::io::Cursor::new(pem.as_slice());
    let mut found_any = false;
    while let Some(item) = rustls_pemfile::read_one(&mut cursor).context("failed to parse pinned server cert pem")? {
        if let rustls_pemfile::Item::X509Certificate(der) = item {
            roots.add(rustls::pki_types::CertificateDer::from(der)).context("failed to add pinned cert to root store")?;
            found_any = true;
        }
    }
    anyhow::ensure!(found_any, "pinned server cert file {server_cert_path} contained no certificates");

    Ok(rustls::ClientConfig::builder().with_root_certificates(roots).with_no_client_auth())
}

fn insecure_config() -> anyhow::Result<rustls::ClientConfig> {
    Ok(rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoVerify))
        .with_no_client_auth())
}

/// A certificate verifier that accepts anything. Only reachable through
/// [`TlsMode::InsecureSkipVerify`], which a config author must select
/// explicitly — never the default (see [`TlsMode::default`]).
#[derive(Debug)]
struct NoVerify;

impl rustls::client::danger::ServerCertVerifier for NoVerify {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider().signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn system_roots_config_builds() {
        system_roots_config().unwrap();
    }

    #[test]
    fn insecure_config_builds() {
        insecure_config().unwrap();
    }

    #[test]
    fn default_tls_mode_is_system_roots() {
        assert!(matches!(TlsMode::default(), TlsMode::SystemRoots));
    }
}
