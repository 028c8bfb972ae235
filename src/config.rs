// Configuration document
//
// A single YAML root listing data sources, at least one metric store
// connection, and the declared checks. Loading is a pipeline: template
// expansion first (the parser never sees `{{ }}` syntax), then YAML
// parsing, then include merging, then validation. Everything that can be
// rejected before a query runs is rejected here.

use crate::models::{
    CheckDescriptor, CheckType, Condition, ConnectionConfig, DatasourceConfig, Threshold,
};
use crate::utils::{expand_placeholders, template_vars, WeiserError, WeiserResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

const MAX_INCLUDE_DEPTH: usize = 8;

fn default_version() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub datasources: Vec<DatasourceConfig>,

    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,

    #[serde(default)]
    pub checks: Vec<CheckDescriptor>,

    /// Relative paths merged into this document at load time.
    #[serde(default)]
    pub includes: Vec<String>,

    /// Consumed by the out-of-core notifier; parsed and preserved only.
    #[serde(default)]
    pub slack_url: Option<String>,
}

impl Config {
    /// Load a configuration file.
    ///
    /// Placeholder values come from the ambient environment and `.env`;
    /// ambient wins unless `env_file` was explicitly passed, in which case
    /// the file wins.
    pub fn load(path: &Path, env_file: Option<&Path>) -> WeiserResult<Self> {
        let vars = template_vars(env_file)?;
        let config = Self::load_document(path, &vars, 0)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse one document from an already-expanded string; used by tests
    /// and by `load_document` after expansion.
    pub fn parse(text: &str) -> WeiserResult<Self> {
        serde_yaml::from_str(text)
            .map_err(|e| WeiserError::config(format!("invalid configuration: {}", e)))
    }

    fn load_document(
        path: &Path,
        vars: &HashMap<String, String>,
        depth: usize,
    ) -> WeiserResult<Self> {
        if depth > MAX_INCLUDE_DEPTH {
            return Err(WeiserError::config(format!(
                "includes nested deeper than {} levels at {}",
                MAX_INCLUDE_DEPTH,
                path.display()
            )));
        }

        let text = fs::read_to_string(path).map_err(|e| {
            WeiserError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let expanded = expand_placeholders(&text, vars)?;
        let mut config = Self::parse(&expanded)?;

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let includes = std::mem::take(&mut config.includes);
        for include in includes {
            let child = Self::load_document(&base_dir.join(&include), vars, depth + 1)?;
            config.merge(child);
        }

        Ok(config)
    }

    /// Merge an included document: lists append, scalars from the
    /// including document win.
    fn merge(&mut self, other: Config) {
        self.datasources.extend(other.datasources);
        self.connections.extend(other.connections);
        self.checks.extend(other.checks);
        if self.slack_url.is_none() {
            self.slack_url = other.slack_url;
        }
    }

    /// Resolve a check's datasource reference; the first declared source
    /// is the implicit default.
    pub fn datasource(&self, name: Option<&str>) -> WeiserResult<&DatasourceConfig> {
        match name {
            Some(name) => self
                .datasources
                .iter()
                .find(|ds| ds.name == name)
                .ok_or_else(|| WeiserError::config(format!("unknown datasource '{}'", name))),
            None => self
                .datasources
                .first()
                .ok_or_else(|| WeiserError::config("no datasources declared")),
        }
    }

    /// The metric store connection record.
    pub fn metric_store(&self) -> WeiserResult<&ConnectionConfig> {
        self.connections
            .iter()
            .find(|c| c.is_metric_store())
            .ok_or_else(|| {
                WeiserError::config("configuration requires a connection of type 'metricstore'")
            })
    }

    pub fn validate(&self) -> WeiserResult<()> {
        if self.version != 1 {
            return Err(WeiserError::config(format!(
                "unsupported configuration version {} (expected 1)",
                self.version
            )));
        }

        self.metric_store()?;

        let mut seen = HashSet::new();
        for ds in &self.datasources {
            if ds.name.trim().is_empty() {
                return Err(WeiserError::config("datasource with empty name"));
            }
            if !seen.insert(ds.name.as_str()) {
                return Err(WeiserError::config(format!(
                    "duplicate datasource name '{}'",
                    ds.name
                )));
            }
        }

        for check in &self.checks {
            self.validate_check(check)?;
        }

        Ok(())
    }

    fn validate_check(&self, check: &CheckDescriptor) -> WeiserResult<()> {
        if check.name.trim().is_empty() {
            return Err(WeiserError::config("check with empty name"));
        }

        // Datasource references must resolve before any query runs.
        self.datasource(check.datasource.as_deref())
            .map_err(|e| WeiserError::config(format!("check '{}': {}", check.name, e)))?;

        match (check.condition, &check.threshold) {
            (Condition::Between, Threshold::Range(pair)) => {
                if pair.len() != 2 {
                    return Err(WeiserError::config(format!(
                        "check '{}': between threshold must be a [lo, hi] pair",
                        check.name
                    )));
                }
                if pair[0] > pair[1] {
                    return Err(WeiserError::config(format!(
                        "check '{}': between threshold requires lo <= hi",
                        check.name
                    )));
                }
            },
            (Condition::Between, Threshold::Value(_)) => {
                return Err(WeiserError::config(format!(
                    "check '{}': between condition requires a [lo, hi] pair",
                    check.name
                )));
            },
            (_, Threshold::Range(_)) => {
                return Err(WeiserError::config(format!(
                    "check '{}': condition '{}' requires a scalar threshold",
                    check.name,
                    check.condition.as_str()
                )));
            },
            (_, Threshold::Value(_)) => {},
        }

        if check.check_type == CheckType::Anomaly
            && check.check_id.is_none()
            && check.combined_filter().is_none()
        {
            return Err(WeiserError::config(format!(
                "check '{}': anomaly requires a check_id or a filter",
                check.name
            )));
        }

        if check.dataset.members().is_empty() {
            return Err(WeiserError::config(format!(
                "check '{}': dataset list is empty",
                check.name
            )));
        }

        Ok(())
    }
}
