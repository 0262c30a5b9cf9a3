//! Shared API secret stored beside the settings document.

use std::fmt::{self, Debug, Formatter};
use std::io::ErrorKind;
use std::path::Path;

use tracing::info;

use crate::error::{ConfigError, ConfigResult};

/// File name of the secret inside the data directory.
pub const SECRET_FILE: &str = ".api_key";

const SECRET_BYTES: usize = 32;

/// Hex-encoded shared secret clients present to the API.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiSecret(String);

impl Debug for ApiSecret {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str("ApiSecret(<redacted>)")
    }
}

impl ApiSecret {
    /// Wrap an existing secret value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a fresh random secret.
    #[must_use]
    pub fn generate() -> Self {
        let bytes: [u8; SECRET_BYTES] = rand::random();
        Self(hex::encode(bytes))
    }

    /// Reuse `<data_dir>/.api_key`, or create it with owner-only permissions.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read, written, or restricted.
    pub async fn load_or_create(data_dir: &Path) -> ConfigResult<Self> {
        let path = data_dir.join(SECRET_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) if !contents.trim().is_empty() => {
                return Ok(Self(contents.trim().to_string()));
            }
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(source) => return Err(ConfigError::io("read", path, source)),
        }

        tokio::fs::create_dir_all(data_dir)
            .await
            .map_err(|source| ConfigError::io("create_dir", data_dir.to_path_buf(), source))?;
        let secret = Self::generate();
        tokio::fs::write(&path, secret.0.as_bytes())
            .await
            .map_err(|source| ConfigError::io("write", path.clone(), source))?;
        restrict_permissions(&path).await?;
        info!(path = %path.display(), "generated API secret");
        Ok(secret)
    }

    /// Secret value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Compare `candidate` without short-circuiting on the first mismatch.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        let expected = self.0.as_bytes();
        let provided = candidate.as_bytes();
        if expected.len() != provided.len() {
            return false;
        }
        expected
            .iter()
            .zip(provided)
            .fold(0_u8, |diff, (left, right)| diff | (left ^ right))
            == 0
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> ConfigResult<()> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .await
        .map_err(|source| ConfigError::io("chmod", path.to_path_buf(), source))
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> ConfigResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[tokio::test]
    async fn secret_is_created_once_and_reused() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let first = ApiSecret::load_or_create(dir.path()).await?;
        assert_eq!(first.expose().len(), SECRET_BYTES * 2);
        assert!(first.expose().chars().all(|ch| ch.is_ascii_hexdigit()));

        let second = ApiSecret::load_or_create(dir.path()).await?;
        assert_eq!(first, second);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(dir.path().join(SECRET_FILE))?
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
        Ok(())
    }

    #[test]
    fn matching_is_exact() {
        let secret = ApiSecret::new("abc123");
        assert!(secret.matches("abc123"));
        assert!(!secret.matches("abc124"));
        assert!(!secret.matches("abc"));
        assert_eq!(format!("{secret:?}"), "ApiSecret(<redacted>)");
    }
}
