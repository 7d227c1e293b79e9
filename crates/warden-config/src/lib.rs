#![deny(unsafe_code)]

//! Configuration loading, validation, and the policy catalogue for Warden.
//!
//! Loads TOML configuration files and validates them. [`AppConfig`] holds
//! the engine settings and the `[[policies]]` catalogue; [`AppConfig::build_snapshot`]
//! decodes every catalogue entry into a [`PolicySnapshot`].
//!
//! ## TOML Example
//!
//! ```toml
//! [engine]
//! default_scope = "project"
//! policy_dir = "policies"
//!
//! [[policies]]
//! name = "project-member"
//! scope = "project"
//! roles = ["member"]
//! file = "member.json"
//!
//! [[policies]]
//! name = "ops-readonly"
//! scope = "domain"
//! domain_id = "default"
//! ips = ["10.0.0.0/8"]
//!
//! [policies.document.compute]
//! "*" = "deny"
//! get = "allow"
//! list = "allow"
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use warden_core::{
    GovernanceError, IpPrefix, PolicyError, PolicyGroup, PolicySnapshot, RbacPolicy, Scope,
    decode_policy_document,
};

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("policy {name:?}: {source}")]
    Policy {
        name: String,
        #[source]
        source: PolicyError,
    },

    #[error("governance: {0}")]
    Governance(#[from] GovernanceError),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Evaluation defaults.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Assignment guard rails.
    #[serde(default)]
    pub governance: GovernanceConfig,

    /// The policy catalogue.
    #[serde(default)]
    pub policies: Vec<PolicyEntryConfig>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Evaluation defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Scope evaluated when a request names none.
    #[serde(default = "default_scope")]
    pub default_scope: Scope,

    /// Directory that relative policy `file` paths resolve against. A
    /// relative directory resolves against the config file's directory.
    #[serde(default = "default_policy_dir")]
    pub policy_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_scope: default_scope(),
            policy_dir: default_policy_dir(),
        }
    }
}

fn default_scope() -> Scope {
    Scope::Project
}

fn default_policy_dir() -> PathBuf {
    PathBuf::from(".")
}

/// Assignment guard rails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceConfig {
    /// Reject assignments that exceed the operator's policies.
    #[serde(default = "default_violation_check")]
    pub violation_check: bool,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            violation_check: default_violation_check(),
        }
    }
}

fn default_violation_check() -> bool {
    true
}

/// One catalogue entry: a policy document plus the principals it applies to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyEntryConfig {
    /// Unique policy name.
    pub name: String,

    /// Scope the policy is granted at.
    pub scope: Scope,

    /// Path to a `.json` or `.toml` policy document.
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Inline policy document.
    #[serde(default)]
    pub document: Option<toml::Table>,

    /// Owning domain.
    #[serde(default)]
    pub domain_id: Option<String>,

    #[serde(default)]
    pub is_public: bool,

    /// "domain" (shared domains only) or "system" (every domain).
    #[serde(default)]
    pub public_scope: Scope,

    #[serde(default)]
    pub shared_domain_ids: Vec<String>,

    #[serde(default)]
    pub projects: Vec<String>,

    #[serde(default)]
    pub roles: Vec<String>,

    /// Address prefixes, e.g. "10.0.0.0/8".
    #[serde(default)]
    pub ips: Vec<String>,

    /// Require an authenticated identity.
    #[serde(default)]
    pub auth: bool,
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let mut config = Self::parse(&content)?;
        if config.engine.policy_dir.is_relative()
            && let Some(parent) = path.parent()
        {
            config.engine.policy_dir = parent.join(&config.engine.policy_dir);
        }
        tracing::debug!(path = %path.display(), policies = config.policies.len(), "loaded config");
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {:?}, got {:?}",
                LOG_LEVELS, self.logging.level
            )));
        }
        if self.engine.default_scope == Scope::None {
            return Err(ConfigError::Validation(
                "engine.default_scope must name a scope".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for (i, entry) in self.policies.iter().enumerate() {
            if entry.name.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "policies[{i}].name must not be empty"
                )));
            }
            if !names.insert(entry.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "policies[{i}].name {:?} is defined more than once",
                    entry.name
                )));
            }
            if entry.scope == Scope::None {
                return Err(ConfigError::Validation(format!(
                    "policies[{i}].scope must name a scope"
                )));
            }
            if entry.file.is_some() == entry.document.is_some() {
                return Err(ConfigError::Validation(format!(
                    "policies[{i}] must set exactly one of file or document"
                )));
            }
            if entry.is_public && !matches!(entry.public_scope, Scope::Domain | Scope::System) {
                return Err(ConfigError::Validation(format!(
                    "policies[{i}].public_scope must be \"domain\" or \"system\" for a public policy"
                )));
            }
            for (j, ip) in entry.ips.iter().enumerate() {
                if ip.parse::<IpPrefix>().is_err() {
                    return Err(ConfigError::Validation(format!(
                        "policies[{i}].ips[{j}] is not an address prefix: {ip:?}"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Decode every catalogue entry into a snapshot.
    pub async fn build_snapshot(&self) -> Result<PolicySnapshot, ConfigError> {
        let mut policies = Vec::with_capacity(self.policies.len());
        for entry in &self.policies {
            let document = self.load_document(entry).await?;
            let policy = decode_policy_document(&document).map_err(|source| ConfigError::Policy {
                name: entry.name.clone(),
                source,
            })?;
            tracing::debug!(name = %entry.name, rules = policy.rules.len(), "decoded policy");
            policies.push(entry.to_rbac_policy(policy)?);
        }
        Ok(PolicySnapshot::new(policies))
    }

    async fn load_document(&self, entry: &PolicyEntryConfig) -> Result<serde_json::Value, ConfigError> {
        if let Some(document) = &entry.document {
            return Ok(serde_json::to_value(document)?);
        }
        let Some(file) = &entry.file else {
            return Err(ConfigError::Validation(format!(
                "policy {:?} has no document",
                entry.name
            )));
        };
        let path = self.engine.policy_dir.join(file);
        let content = tokio::fs::read_to_string(&path).await?;
        parse_document(&path, &content)
    }

    /// Collect the named snapshot policies into a group keyed by their scope.
    pub fn policy_group(
        &self,
        snapshot: &PolicySnapshot,
        names: &[String],
    ) -> Result<PolicyGroup, ConfigError> {
        let mut group = PolicyGroup::new();
        for name in names {
            let policy = snapshot
                .get(name)
                .ok_or_else(|| ConfigError::Validation(format!("unknown policy {name:?}")))?;
            group.insert(policy.scope, policy.policy.clone());
        }
        Ok(group)
    }

    /// Check that holders of `operator` may assign `assigned`, unless
    /// `governance.violation_check` is off.
    pub fn validate_assignment(
        &self,
        snapshot: &PolicySnapshot,
        operator: &[String],
        assigned: &[String],
    ) -> Result<(), ConfigError> {
        if !self.governance.violation_check {
            tracing::debug!("governance.violation_check is off, skipping assignment check");
            return Ok(());
        }
        let operator = self.policy_group(snapshot, operator)?;
        let assigned = self.policy_group(snapshot, assigned)?;
        operator.validate_assignment(&assigned)?;
        Ok(())
    }
}

impl PolicyEntryConfig {
    fn to_rbac_policy(&self, policy: warden_core::ScopedPolicy) -> Result<RbacPolicy, ConfigError> {
        let ips = self
            .ips
            .iter()
            .map(|ip| ip.parse::<IpPrefix>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| ConfigError::Policy {
                name: self.name.clone(),
                source,
            })?;
        Ok(RbacPolicy {
            domain_id: self.domain_id.clone(),
            is_public: self.is_public,
            public_scope: self.public_scope,
            shared_domain_ids: self.shared_domain_ids.clone(),
            projects: self.projects.clone(),
            roles: self.roles.clone(),
            ips,
            auth: self.auth,
            ..RbacPolicy::new(self.name.clone(), self.scope, policy)
        })
    }
}

/// Parse a policy document, as TOML if the path ends in `.toml` and as JSON
/// otherwise.
pub fn parse_document(path: &Path, content: &str) -> Result<serde_json::Value, ConfigError> {
    if path.extension().is_some_and(|ext| ext == "toml") {
        let table: toml::Table = toml::from_str(content)?;
        Ok(serde_json::to_value(table)?)
    } else {
        Ok(serde_json::from_str(content)?)
    }
}
