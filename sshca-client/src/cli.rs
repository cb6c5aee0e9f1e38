//! `sshca-client` CLI.

/// Obtains a short-lived SSH certificate from an sshca-server.
#[derive(argh::FromArgs)]
pub struct ClientArgs {
    /// path to the client's TOML config file.
    ///
    /// Default: `~/.sshca/client.toml`.
    /// Env: `SSHCA_CLIENT_CONFIG_PATH`.
    #[argh(option)]
    pub config_path: Option<String>,
}

impl ClientArgs {
    pub fn from_env() -> Self {
        let mut args = argh::from_env::<Self>();
        if args.config_path.is_none() {
            args.config_path = std::env::var("SSHCA_CLIENT_CONFIG_PATH").ok();
        }
        args
    }

    pub fn config_path(&self) -> String {
        self.config_path.clone().unwrap_or_else(default_config_path)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.sshca/client.toml")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn explicit_path_overrides_default() {
        let args = ClientArgs { config_path: Some("/etc/sshca/client.toml".to_string()) };
        assert_eq!(args.config_path(), "/etc/sshca/client.toml");
    }

    #[test]
    fn falls_back_to_home_relative_default() {
        let args = ClientArgs { config_path: None };
        assert!(args.config_path().ends_with("/.sshca/client.toml"));
    }
}
