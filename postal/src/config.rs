//! Locating and reading the RON configuration

use std::path::{Path, PathBuf};

use crate::controller::Postal;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "POSTAL_CONFIG";

/// Places searched when [`CONFIG_ENV`] is unset, in order
pub const DEFAULT_PATHS: [&str; 2] = ["./postal.config.ron", "/etc/postal/postal.config.ron"];

/// Find the configuration file using the following precedence:
/// 1. `POSTAL_CONFIG` environment variable
/// 2. ./postal.config.ron (current working directory)
/// 3. /etc/postal/postal.config.ron (system-wide config)
///
/// # Errors
/// If `POSTAL_CONFIG` names a missing file, or no default path exists
pub fn find_config_file() -> anyhow::Result<PathBuf> {
    let defaults = DEFAULT_PATHS.map(PathBuf::from);
    resolve_config_file(std::env::var(CONFIG_ENV).ok().as_deref(), &defaults)
}

/// [`find_config_file`] with the environment value and search path supplied
///
/// # Errors
/// If `env_path` names a missing file, or none of `defaults` exists
pub fn resolve_config_file(
    env_path: Option<&str>,
    defaults: &[PathBuf],
) -> anyhow::Result<PathBuf> {
    if let Some(env_path) = env_path {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("{CONFIG_ENV} points to non-existent file: {}", path.display());
    }

    if let Some(path) = defaults.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = defaults
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}

/// Read and parse a configuration file
///
/// # Errors
/// If the file cannot be read or is not a valid [`Postal`] configuration
pub fn load(path: &Path) -> anyhow::Result<Postal> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        anyhow::anyhow!("Failed to read config from {}: {}", path.display(), e)
    })?;

    ron::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Invalid config in {}: {}", path.display(), e))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;

    use super::*;

    const CONFIG: &str = r#"Postal (
        dispatcher: (
            poll_interval_ms: 250,
            retry: (max_retries: 5),
        ),
        producers: {
            "orders": (topic: "orders", transactional: true),
        },
        mailbox: (capacity: Some(100)),
    )"#;

    #[test]
    fn env_path_wins() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();
        let env = file.path().to_str().unwrap();

        let found = resolve_config_file(Some(env), &[PathBuf::from("/nonexistent.ron")]).unwrap();
        assert_eq!(found, file.path());
    }

    #[test]
    fn missing_env_path_is_an_error() {
        let err = resolve_config_file(Some("/definitely/not/here.ron"), &[]).unwrap_err();
        assert!(err.to_string().contains(CONFIG_ENV));
    }

    #[test]
    fn first_existing_default() {
        let dir = tempfile::tempdir().unwrap();
        let second = dir.path().join("postal.config.ron");
        std::fs::write(&second, CONFIG).unwrap();

        let found =
            resolve_config_file(None, &[dir.path().join("absent.ron"), second.clone()]).unwrap();
        assert_eq!(found, second);

        let err = resolve_config_file(None, &[dir.path().join("absent.ron")]).unwrap_err();
        assert!(err.to_string().contains("absent.ron"));
    }

    #[test]
    fn load_parses_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postal.config.ron");
        std::fs::write(&path, CONFIG).unwrap();

        let postal = load(&path).unwrap();
        assert_eq!(postal.dispatcher().poll_interval_ms, 250);
        assert_eq!(postal.dispatcher().retry.max_retries, 5);
        assert!(postal.producer_config("orders").unwrap().transactional);
        assert_eq!(postal.mailbox().capacity, Some(100));

        std::fs::write(&path, "Postal ( dispatcher: 7 )").unwrap();
        assert!(load(&path).is_err());
    }
}
