//! Secret resolution for the URL-signing key.
//!
//! A secret may come from, in priority order:
//!
//! 1. a value written directly in the config file,
//! 2. a file holding the value (Docker/Kubernetes secret mounts),
//! 3. an environment variable.

use std::fs;

use secrecy::SecretString;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("Secret from {origin} is empty")]
    Empty { origin: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Resolves a secret from the first non-empty source. Values are trimmed.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct.filter(|v| !v.is_empty()) {
        return Ok(SecretString::from(value.trim().to_string()));
    }

    if let Some(path) = file_path.filter(|p| !p.is_empty()) {
        let expanded = expand_home(path);
        let content = fs::read_to_string(&expanded).map_err(|e| SecretError::FileReadError {
            path: expanded.clone(),
            source: e,
        })?;
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(SecretError::Empty {
                origin: format!("file '{}'", expanded),
            });
        }
        return Ok(SecretString::from(trimmed.to_string()));
    }

    if let Some(name) = env_var.filter(|n| !n.is_empty()) {
        return match std::env::var(name) {
            Ok(value) => Ok(SecretString::from(value.trim().to_string())),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: name.to_string(),
            }),
        };
    }

    Err(SecretError::NoSourceProvided)
}

/// Like [`resolve_secret`], but no configured source yields `None`.
pub fn resolve_secret_optional(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<Option<SecretString>> {
    match resolve_secret(direct, file_path, env_var) {
        Ok(secret) => Ok(Some(secret)),
        Err(SecretError::NoSourceProvided) => Ok(None),
        Err(e) => Err(e),
    }
}

/// True when at least one source is configured.
pub fn has_secret_source(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> bool {
    [direct, file_path, env_var]
        .into_iter()
        .any(|s| s.is_some_and(|s| !s.is_empty()))
}

/// Expands a leading `~` to the home directory. `~user` is not supported.
pub fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            let home = home.to_string_lossy();
            return path.replacen('~', &home, 1);
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    #[serial]
    fn test_direct_value_takes_priority() {
        std::env::set_var("DATATASK_TEST_SECRET_1", "env_value");
        let secret =
            resolve_secret(Some("direct_value"), None, Some("DATATASK_TEST_SECRET_1")).unwrap();
        assert_eq!(secret.expose_secret(), "direct_value");
        std::env::remove_var("DATATASK_TEST_SECRET_1");
    }

    #[test]
    #[serial]
    fn test_file_takes_priority_over_env() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "file_value").unwrap();
        std::env::set_var("DATATASK_TEST_SECRET_2", "env_value");

        let secret = resolve_secret(
            None,
            Some(file.path().to_str().unwrap()),
            Some("DATATASK_TEST_SECRET_2"),
        )
        .unwrap();
        assert_eq!(secret.expose_secret(), "file_value");
        std::env::remove_var("DATATASK_TEST_SECRET_2");
    }

    #[test]
    #[serial]
    fn test_env_var_fallback() {
        std::env::set_var("DATATASK_TEST_SECRET_3", "  env_value\n");
        let secret = resolve_secret(None, None, Some("DATATASK_TEST_SECRET_3")).unwrap();
        assert_eq!(secret.expose_secret(), "env_value");
        std::env::remove_var("DATATASK_TEST_SECRET_3");
    }

    #[test]
    #[serial]
    fn test_missing_env_var() {
        std::env::remove_var("DATATASK_TEST_SECRET_MISSING");
        let err = resolve_secret(None, None, Some("DATATASK_TEST_SECRET_MISSING")).unwrap_err();
        assert!(matches!(err, SecretError::EnvVarNotSet { .. }));
    }

    #[test]
    fn test_empty_file_is_an_error() {
        let file = NamedTempFile::new().unwrap();
        let err = resolve_secret(None, Some(file.path().to_str().unwrap()), None).unwrap_err();
        assert!(matches!(err, SecretError::Empty { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = resolve_secret(None, Some("/nonexistent/datatask/key"), None).unwrap_err();
        assert!(matches!(err, SecretError::FileReadError { .. }));
    }

    #[test]
    fn test_optional_without_sources() {
        assert!(resolve_secret_optional(None, Some(""), None).unwrap().is_none());
        assert!(!has_secret_source(None, Some(""), None));
        assert!(has_secret_source(None, None, Some("KEY")));
    }

    #[test]
    fn test_expand_home() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(
            expand_home("~/keys/sign"),
            format!("{}/keys/sign", home.to_string_lossy())
        );
        assert_eq!(expand_home("/abs/path"), "/abs/path");
        assert_eq!(expand_home("~other/path"), "~other/path");
    }
}
