//! Durable credential storage.
//!
//! Credentials are kept in a single JSON document keyed by client identity:
//!
//! ```json
//! { "client_id": "...", "tokens": [ { "access_token": "...", "not_after": "...", ... } ] }
//! ```
//!
//! Files are written through a temporary sibling and renamed into place, and
//! are readable by the owner only on Unix.

use crate::error::Result;
use crate::token::CredentialPair;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The persisted document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    /// Client identity the tokens were issued to.
    pub client_id: String,
    /// Stored credential pairs.
    #[serde(default)]
    pub tokens: Vec<CredentialPair>,
}

/// File-backed credential store.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Creates a store backed by `path`. Nothing is touched until load/save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the credential file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the stored document; a missing file is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid document.
    pub fn load(&self) -> Result<Option<StoredCredentials>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No credential file at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let stored: StoredCredentials = serde_json::from_str(&content)?;
        debug!(
            "Read {} stored credential(s) from {}",
            stored.tokens.len(),
            self.path.display()
        );
        Ok(Some(stored))
    }

    /// Replaces the stored document.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn save(&self, credentials: &StoredCredentials) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(credentials)?;
        let tmp_path = self.temp_path();
        fs::write(&tmp_path, content)?;
        restrict_permissions(&tmp_path)?;
        fs::rename(&tmp_path, &self.path)?;

        debug!(
            "Saved {} credential(s) to {}",
            credentials.tokens.len(),
            self.path.display()
        );
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map_or_else(|| "credentials".into(), |name| name.to_string_lossy());
        self.path.with_file_name(format!(".{file_name}.tmp"))
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::token::TokenResponse;
    use chrono::Utc;

    fn pair(name: &str) -> CredentialPair {
        CredentialPair::from_response(
            TokenResponse {
                access_token: name.to_string(),
                token_type: Some("Bearer".to_string()),
                expires_in: Some(3600),
                ext_expires_in: Some(7200),
                refresh_token: Some(format!("{name}-refresh")),
                scope: Some("Mail.Send".to_string()),
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_creates_directories_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("data/nested/credentials.json"));
        let stored = StoredCredentials {
            client_id: "client".to_string(),
            tokens: vec![pair("a"), pair("b")],
        };

        store.save(&stored).unwrap();

        assert_eq!(store.load().unwrap(), Some(stored));
        assert!(!dir.path().join("data/nested/.credentials.json.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("credentials.json"));
        store
            .save(&StoredCredentials {
                client_id: "client".to_string(),
                tokens: Vec::new(),
            })
            .unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_load_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        fs::write(&path, "{ not json").unwrap();

        let store = CredentialStore::new(path);
        assert!(matches!(store.load(), Err(Error::Json(_))));
    }

    #[test]
    fn test_load_accepts_naive_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        fs::write(
            &path,
            r#"{"client_id": "client", "tokens": [{
                "access_token": "a",
                "refresh_token": "r",
                "token_type": "Bearer",
                "scope": null,
                "not_after": "2030-01-01T10:00:00.500000",
                "ext_not_after": "2030-01-01T11:00:00"
            }]}"#,
        )
        .unwrap();

        let stored = CredentialStore::new(path).load().unwrap().unwrap();
        assert_eq!(stored.tokens.len(), 1);
        assert!(stored.tokens[0].ext_not_after > stored.tokens[0].not_after);
    }
}
