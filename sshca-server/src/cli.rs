//! `sshca-server` CLI.

/// The SSH CA issuance server.
#[derive(argh::FromArgs)]
pub struct ServerArgs {
    /// path to the server's TOML config file.
    ///
    /// Default: `sshca-server.toml`.
    /// Env: `SSHCA_CONFIG_PATH`.
    #[argh(option)]
    pub config_path: Option<String>,
}

impl ServerArgs {
    pub fn from_env() -> Self {
        let mut args = argh::from_env::<Self>();
        if args.config_path.is_none() {
            args.config_path = std::env::var("SSHCA_CONFIG_PATH").ok();
        }
        args
    }

    pub fn config_path(&self) -> &str {
        self.config_path.as_deref().unwrap_or("sshca-server.toml")
    }
}
