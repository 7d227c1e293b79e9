//! Temporary on-disk policy catalogues.
//!
//! [`TestCatalogue`] writes a config file and its policy documents into a
//! temporary directory, so tests can exercise the same loading path as the
//! `warden` binary.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use warden_config::AppConfig;
use warden_core::PolicySnapshot;

/// A test-scoped config file plus policy directory.
///
/// The temp directory is deleted automatically when this value is dropped,
/// guaranteeing cleanup even on panic.
pub struct TestCatalogue {
    pub config_path: PathBuf,
    temp_dir: TempDir,
}

impl TestCatalogue {
    /// Create a catalogue whose config file contains the given TOML.
    pub async fn with_toml(toml_content: &str) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let config_path = temp_dir.path().join("warden.toml");
        tokio::fs::write(&config_path, toml_content)
            .await
            .expect("failed to write test config");

        Self {
            config_path,
            temp_dir,
        }
    }

    /// The directory holding the config file.
    pub fn dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write a policy document next to the config file.
    pub async fn write_policy(&self, file: &str, content: &str) -> PathBuf {
        let path = self.dir().join(file);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .expect("failed to create policy dir");
        }
        tokio::fs::write(&path, content)
            .await
            .expect("failed to write policy document");
        tracing::debug!(path = %path.display(), "wrote test policy");
        path
    }

    /// Overwrite the config file.
    pub async fn write_config(&self, toml_content: &str) {
        tokio::fs::write(&self.config_path, toml_content)
            .await
            .expect("failed to write updated config");
    }

    pub async fn load(&self) -> AppConfig {
        AppConfig::load(&self.config_path)
            .await
            .expect("failed to parse test config")
    }

    pub async fn snapshot(&self) -> PolicySnapshot {
        self.load()
            .await
            .build_snapshot()
            .await
            .expect("failed to build test snapshot")
    }
}
