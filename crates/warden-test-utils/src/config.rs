//! Configuration builders for tests.
//!
//! Use [`TestConfigBuilder`] to create customised [`AppConfig`] values without
//! repeating boilerplate across crate boundaries.

use std::path::PathBuf;

use warden_config::{AppConfig, PolicyEntryConfig};
use warden_core::Scope;

/// Fluent builder for [`AppConfig`] in tests.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .default_scope(Scope::Domain)
///     .inline_policy("member", Scope::Project, "compute = \"allow\"")
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn default_scope(mut self, scope: Scope) -> Self {
        self.config.engine.default_scope = scope;
        self
    }

    pub fn policy_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.engine.policy_dir = dir.into();
        self
    }

    pub fn violation_check(mut self, enabled: bool) -> Self {
        self.config.governance.violation_check = enabled;
        self
    }

    pub fn policy(mut self, entry: PolicyEntryConfig) -> Self {
        self.config.policies.push(entry);
        self
    }

    /// Add an unconstrained policy whose document is the given TOML.
    pub fn inline_policy(self, name: &str, scope: Scope, document: &str) -> Self {
        self.policy(inline_entry(name, scope, document))
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A catalogue entry with an inline TOML document and no principal constraints.
pub fn inline_entry(name: &str, scope: Scope, document: &str) -> PolicyEntryConfig {
    let document: toml::Table = toml::from_str(document).expect("invalid inline policy document");
    PolicyEntryConfig {
        name: name.to_string(),
        scope,
        file: None,
        document: Some(document),
        domain_id: None,
        is_public: false,
        public_scope: Scope::None,
        shared_domain_ids: Vec::new(),
        projects: Vec::new(),
        roles: Vec::new(),
        ips: Vec::new(),
        auth: false,
    }
}

/// A catalogue entry that loads `file` relative to the policy directory.
pub fn file_entry(name: &str, scope: Scope, file: &str) -> PolicyEntryConfig {
    PolicyEntryConfig {
        file: Some(PathBuf::from(file)),
        document: None,
        ..inline_entry(name, scope, "")
    }
}
