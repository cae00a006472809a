//! Data source configuration.

use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
};

use gridsource_common::{GridError, Result, Value};
use serde::{Deserialize, Serialize};

use crate::query::{Filter, FilterOp, GroupDescriptor, Selector, SortDescriptor, SummaryDescriptor};
use crate::store::{RemoteOperations, Store};

/// Whether the store's declared capabilities decide which stages run remotely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value", into = "serde_json::Value")]
pub enum RemoteOperationsSetting {
    #[default]
    Auto,
    Explicit(RemoteOperations),
}

impl RemoteOperationsSetting {
    /// Resolve against a store. Done once when a data source is created.
    pub fn resolve(&self, store: &dyn Store) -> RemoteOperations {
        match self {
            RemoteOperationsSetting::Auto => store.remote_capabilities(),
            RemoteOperationsSetting::Explicit(ops) => *ops,
        }
        .normalized()
    }
}

impl TryFrom<serde_json::Value> for RemoteOperationsSetting {
    type Error = GridError;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::String(s) if s.eq_ignore_ascii_case("auto") => {
                Ok(RemoteOperationsSetting::Auto)
            }
            serde_json::Value::Bool(true) => {
                Ok(RemoteOperationsSetting::Explicit(RemoteOperations::all()))
            }
            serde_json::Value::Bool(false) => {
                Ok(RemoteOperationsSetting::Explicit(RemoteOperations::none()))
            }
            obj @ serde_json::Value::Object(_) => Ok(RemoteOperationsSetting::Explicit(
                serde_json::from_value(obj)?,
            )),
            other => Err(GridError::Config(format!(
                "remoteOperations must be \"auto\", a boolean or an object, got {}",
                other
            ))),
        }
    }
}

impl From<RemoteOperationsSetting> for serde_json::Value {
    fn from(setting: RemoteOperationsSetting) -> Self {
        match setting {
            RemoteOperationsSetting::Auto => serde_json::Value::String("auto".into()),
            RemoteOperationsSetting::Explicit(ops) => {
                serde_json::to_value(ops).unwrap_or(serde_json::Value::Null)
            }
        }
    }
}

/// Initial state of a data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataSourceOptions {
    /// Rows per page; 0 disables paging.
    pub page_size: usize,
    pub paginate: bool,
    pub page_index: usize,
    pub require_total_count: bool,
    pub cache_enabled: bool,
    pub cache_max_entries: usize,
    pub remote_operations: RemoteOperationsSetting,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    pub sort: Vec<SortDescriptor>,
    pub group: Vec<GroupDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_operation: Option<FilterOp>,
    pub search_expr: Vec<Selector>,
    pub total_summary: Vec<SummaryDescriptor>,
    pub group_summary: Vec<SummaryDescriptor>,
    pub user_data: BTreeMap<String, serde_json::Value>,
}

impl Default for DataSourceOptions {
    fn default() -> Self {
        Self {
            page_size: 20,
            paginate: true,
            page_index: 0,
            require_total_count: false,
            cache_enabled: true,
            cache_max_entries: 128,
            remote_operations: RemoteOperationsSetting::Auto,
            filter: None,
            sort: Vec::new(),
            group: Vec::new(),
            search_value: None,
            search_operation: None,
            search_expr: Vec::new(),
            total_summary: Vec::new(),
            group_summary: Vec::new(),
            user_data: BTreeMap::new(),
        }
    }
}

impl DataSourceOptions {
    pub fn paging_enabled(&self) -> bool {
        self.paginate && self.page_size > 0
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        serde_json::from_value(json).map_err(|e| GridError::Config(e.to_string()))
    }

    /// Load options from a TOML file, with environment variable overrides.
    /// Falls back to defaults if the file is not found. GRIDSOURCE_CONFIG overrides the path.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut cfg_path = path.as_ref().to_path_buf();
        if let Ok(env_path) = env::var("GRIDSOURCE_CONFIG") {
            cfg_path = PathBuf::from(env_path);
        }

        let mut cfg = match fs::read_to_string(&cfg_path) {
            Ok(s) => Self::from_toml_str(&s)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(e.into()),
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    /// Apply GRIDSOURCE_* environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("GRIDSOURCE_PAGE_SIZE")
            && let Ok(n) = v.parse::<usize>()
        {
            self.page_size = n;
        }

        if let Ok(v) = env::var("GRIDSOURCE_CACHE_ENABLED")
            && let Ok(b) = v.parse::<bool>()
        {
            self.cache_enabled = b;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ArrayStore;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn toml_overrides_defaults() {
        let cfg = DataSourceOptions::from_toml_str(
            r#"
            pageSize = 3
            requireTotalCount = true

            [remoteOperations]
            filtering = true
            sorting = true
            paging = true

            [[group]]
            selector = "this"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.page_size, 3);
        assert!(cfg.require_total_count);
        assert!(cfg.cache_enabled);
        assert_eq!(cfg.group, vec![GroupDescriptor::new(Selector::This)]);
        assert_eq!(
            cfg.remote_operations,
            RemoteOperationsSetting::Explicit(RemoteOperations {
                filtering: true,
                sorting: true,
                paging: true,
                ..Default::default()
            })
        );
    }

    #[test]
    fn remote_operations_accepts_auto_and_booleans() {
        let cfg = DataSourceOptions::from_json(json!({"remoteOperations": "auto"})).unwrap();
        assert_eq!(cfg.remote_operations, RemoteOperationsSetting::Auto);

        let cfg = DataSourceOptions::from_json(json!({"remoteOperations": true})).unwrap();
        assert_eq!(
            cfg.remote_operations,
            RemoteOperationsSetting::Explicit(RemoteOperations::all())
        );

        assert!(DataSourceOptions::from_json(json!({"remoteOperations": 3})).is_err());
    }

    #[test]
    fn auto_resolves_from_store_capabilities() {
        let store = ArrayStore::new(Vec::new());
        assert_eq!(
            RemoteOperationsSetting::Auto.resolve(&store),
            RemoteOperations::none()
        );
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = DataSourceOptions::load_from_path("/nonexistent/gridsource.toml").unwrap();
        assert_eq!(cfg.page_size, DataSourceOptions::default().page_size);
    }
}
