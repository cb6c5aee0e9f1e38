//! Local OAuth credential cache for C9's `LoadOrAcquireCreds` state.
//!
//! A missing or unparseable cache is treated as "no cached credentials" —
//! not an error — so the first run on a fresh machine falls straight
//! through to the browser/loopback flow.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// What's persisted between runs: the most recently obtained ID token (so a
/// repeat run within its validity window can skip the browser entirely) and
/// the refresh token used to mint a new one once it expires.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredCredentials {
    pub id_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Reads the credential cache at `path`. A missing file, or one that fails
/// to parse, is reported as `Ok(None)` rather than an error — design doc
/// §4.9 treats "no usable cached credentials" as a normal state that just
/// routes back to acquisition, not a failure.
pub fn load(path: &Path) -> Option<StoredCredentials> {
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

/// Persists `creds` to `path` with owner-only permissions (0600), design
/// doc §4.9's "persist new credentials with owner-only permissions" step.
/// Write-then-rename, same idiom as [`crate::splice`].
pub fn save(path: &Path, creds: &StoredCredentials) -> anyhow::Result<()> {
    let rendered = serde_json::to_vec_pretty(creds).context("failed to serialize credentials")?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmpfornew");
    let tmp_path = std::path::PathBuf::from(tmp_name);

    std::fs::write(&tmp_path, &rendered).with_context(|| format!("failed to write {}", tmp_path.display()))?;
    set_owner_only_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, path).with_context(|| format!("failed to install {}", path.display()))?;
    Ok(())
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("does-not-exist")).is_none());
    }

    #[test]
    fn corrupt_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, b"not json").unwrap();
        assert!(load(&path).is_none());
    }

    #[test]
    fn saved_credentials_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let creds = StoredCredentials { id_token: "abc.def.ghi".to_string(), refresh_token: Some("r-1".to_string()) };

        save(&path, &creds).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.id_token, creds.id_token);
        assert_eq!(loaded.refresh_token, creds.refresh_token);
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        save(&path, &StoredCredentials { id_token: "x".to_string(), refresh_token: None }).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn no_tmp_file_left_behind_after_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        save(&path, &StoredCredentials { id_token: "x".to_string(), refresh_token: None }).unwrap();
        assert!(!dir.path().join("credentials.json.tmpfornew").exists());
    }
}
