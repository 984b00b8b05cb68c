//! Configuration Management
//!
//! This module handles the credential store and per-item connection resolution.
//!
//! # Credential Store Locations
//! - Local: `.tsql-batch/credentials.json` (per working directory)
//! - Global: `~/.config/tsql-batch/credentials.json` (per user)
//!
//! Both files hold named credential profiles plus an optional default name. When both exist,
//! local profiles and the local default win.
//!
//! # Resolution Precedence (per field)
//! 1. Per-item override, when present under the field's presence rule
//! 2. Stored credentials
//! 3. Static default (`database` falls back to `master`)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{BatchError, Result};

/// Default SQL Server port
pub const DEFAULT_PORT: u16 = 1433;

/// Database used when neither the override nor the stored credentials name one
pub const DEFAULT_DATABASE: &str = "master";

const LOCAL_DIR: &str = ".tsql-batch";
const STORE_FILE: &str = "credentials.json";

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_database() -> String {
    DEFAULT_DATABASE.to_string()
}

/// Stored credentials for one SQL Server
///
/// `user` and `password` are required by the server but not checked here; a missing value
/// surfaces as a connection failure from the driver.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredCredentials {
    /// Hostname or IP address
    #[serde(default)]
    pub server: String,

    /// Named instance (e.g. `SQLEXPRESS`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,

    /// TCP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// SQL Server login
    #[serde(default)]
    pub user: String,

    /// Password stored directly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Environment variable name holding the password (takes precedence over `password`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,

    /// Initial database
    #[serde(default = "default_database")]
    pub database: String,

    /// Encrypt the connection
    #[serde(default)]
    pub encrypt: bool,

    /// Accept the server certificate without validation
    #[serde(default)]
    pub trust_server_certificate: bool,
}

impl Default for StoredCredentials {
    fn default() -> Self {
        Self {
            server: String::new(),
            instance: None,
            port: DEFAULT_PORT,
            user: String::new(),
            password: None,
            password_env: None,
            database: default_database(),
            encrypt: false,
            trust_server_certificate: false,
        }
    }
}

impl fmt::Debug for StoredCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredCredentials")
            .field("server", &self.server)
            .field("instance", &self.instance)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("password_env", &self.password_env)
            .field("database", &self.database)
            .field("encrypt", &self.encrypt)
            .field("trust_server_certificate", &self.trust_server_certificate)
            .finish()
    }
}

impl StoredCredentials {
    /// Resolve environment variables and return credentials with a concrete password
    pub fn resolve(&self) -> Result<Self> {
        let mut creds = self.clone();

        if let Some(env_var) = &self.password_env {
            match std::env::var(env_var) {
                Ok(password) => creds.password = Some(password),
                Err(_) => {
                    return Err(BatchError::config_error(format!(
                        "Environment variable {env_var} not found for password"
                    )));
                }
            }
        }

        Ok(creds)
    }
}

/// Per-item connection override
///
/// Every field is optional. Strings apply only when non-empty, the port only when non-zero,
/// booleans whenever they are present.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypt: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_server_certificate: Option<bool>,
}

impl fmt::Debug for ConnectionOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOverride")
            .field("server", &self.server)
            .field("instance", &self.instance)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("database", &self.database)
            .field("encrypt", &self.encrypt)
            .field("trust_server_certificate", &self.trust_server_certificate)
            .finish()
    }
}

/// Fully resolved connection parameters for one work item
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub server: String,
    pub instance: Option<String>,
    pub port: u16,
    pub user: String,
    /// WARNING: Sensitive data, do not log or include in error messages
    pub password: String,
    pub database: String,
    pub encrypt: bool,
    pub trust_server_certificate: bool,
}

impl ConnectionDescriptor {
    /// Instance qualifier attached to the connection options, if any
    #[must_use]
    pub fn instance_name(&self) -> Option<&str> {
        self.instance.as_deref().filter(|name| !name.is_empty())
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("server", &self.server)
            .field("instance", &self.instance)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("encrypt", &self.encrypt)
            .field("trust_server_certificate", &self.trust_server_certificate)
            .finish()
    }
}

fn pick_string(over: Option<&String>, stored: &str) -> String {
    match over {
        Some(value) if !value.is_empty() => value.clone(),
        _ => stored.to_string(),
    }
}

/// Merge stored credentials with a per-item override into a connection descriptor
///
/// Field rules:
/// - `server`, `instance`, `user`, `password`, `database`: override iff non-empty
/// - `database`: falls back to `master` when both sides are empty
/// - `port`: override iff present and non-zero (zero means "not overridden")
/// - `encrypt`, `trust_server_certificate`: override iff present, whatever its value
#[must_use]
pub fn resolve_descriptor(
    stored: &StoredCredentials,
    over: &ConnectionOverride,
) -> ConnectionDescriptor {
    let database = pick_string(over.database.as_ref(), &stored.database);
    let instance = pick_string(over.instance.as_ref(), stored.instance.as_deref().unwrap_or(""));

    ConnectionDescriptor {
        server: pick_string(over.server.as_ref(), &stored.server),
        instance: (!instance.is_empty()).then_some(instance),
        port: over.port.filter(|p| *p != 0).unwrap_or(stored.port),
        user: pick_string(over.user.as_ref(), &stored.user),
        password: pick_string(over.password.as_ref(), stored.password.as_deref().unwrap_or("")),
        database: if database.is_empty() { default_database() } else { database },
        encrypt: over.encrypt.unwrap_or(stored.encrypt),
        trust_server_certificate: over
            .trust_server_certificate
            .unwrap_or(stored.trust_server_certificate),
    }
}

/// Credential store file contents
///
/// Example:
/// ```json
/// {
///   "credentials": {
///     "prod": { "server": "db01", "user": "reporter", "password_env": "PROD_SQL_PASSWORD" }
///   },
///   "default": "prod"
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialStore {
    /// Named credential profiles
    #[serde(default)]
    pub credentials: BTreeMap<String, StoredCredentials>,

    /// Name of the default profile (must exist in `credentials`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// Credential store location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLocation {
    /// Local store: `.tsql-batch/credentials.json`
    Local,
    /// Global store: `~/.config/tsql-batch/credentials.json`
    Global,
}

impl ConfigLocation {
    /// Path of the store file for this location
    pub fn path(self) -> Result<PathBuf> {
        match self {
            Self::Local => local_store_path(),
            Self::Global => global_store_path(),
        }
    }
}

/// Get path to the local credential store
pub fn local_store_path() -> Result<PathBuf> {
    let current_dir = std::env::current_dir().map_err(|e| {
        BatchError::config_error(format!("Could not determine current directory: {e}"))
    })?;

    Ok(current_dir.join(LOCAL_DIR).join(STORE_FILE))
}

/// Get path to the global credential store
pub fn global_store_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| BatchError::config_error("Could not determine user config directory"))?;

    Ok(config_dir.join("tsql-batch").join(STORE_FILE))
}

/// Load a credential store file; a missing file is an empty store
pub fn load_store(path: &Path) -> Result<CredentialStore> {
    if !path.exists() {
        return Ok(CredentialStore::default());
    }

    let contents = fs::read_to_string(path)
        .map_err(|e| BatchError::config_error(format!("Could not read credential store: {e}")))?;

    serde_json::from_str(&contents)
        .map_err(|e| BatchError::config_error(format!("Invalid credential store format: {e}")))
}

/// Save a credential store file, creating the parent directory if needed
pub fn save_store(path: &Path, store: &CredentialStore) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            BatchError::config_error(format!("Could not create config directory: {e}"))
        })?;
    }

    let contents = serde_json::to_string_pretty(store)
        .map_err(|e| BatchError::config_error(format!("Could not serialize credentials: {e}")))?;

    fs::write(path, contents)
        .map_err(|e| BatchError::config_error(format!("Could not write credential store: {e}")))
}

/// Merge two stores; entries and default from `local` win
#[must_use]
pub fn merge_stores(global: CredentialStore, local: CredentialStore) -> CredentialStore {
    let mut merged = global;
    merged.credentials.extend(local.credentials);
    if local.default.is_some() {
        merged.default = local.default;
    }
    merged
}

/// Load the local and global stores with local precedence
pub fn load_with_precedence() -> Result<CredentialStore> {
    let global = load_store(&global_store_path()?)?;
    let local = load_store(&local_store_path()?)?;
    Ok(merge_stores(global, local))
}

/// Look up a profile by name (or the store default) and resolve its password
pub fn lookup_credentials(store: &CredentialStore, name: Option<&str>) -> Result<StoredCredentials> {
    let available: Vec<_> = store.credentials.keys().collect();

    let name = match name {
        Some(n) => n,
        None => store.default.as_deref().ok_or_else(|| {
            BatchError::config_error(format!(
                "No default credentials set. Available credentials: {available:?}. \
                 Specify one with --credentials or set a default in the store."
            ))
        })?,
    };

    let stored = store.credentials.get(name).ok_or_else(|| {
        BatchError::config_error(format!(
            "Credentials '{name}' not found. Available credentials: {available:?}"
        ))
    })?;

    stored.resolve()
}

/// Resolve credentials from the merged local/global stores
pub fn resolve_credentials(name: Option<&str>) -> Result<StoredCredentials> {
    let store = load_with_precedence()?;
    lookup_credentials(&store, name)
}

/// Save a named profile; the first profile in a store becomes its default
pub fn save_credentials(
    name: &str,
    creds: StoredCredentials,
    location: ConfigLocation,
) -> Result<()> {
    let path = location.path()?;
    let mut store = load_store(&path)?;

    if store.credentials.is_empty() {
        store.default = Some(name.to_string());
    }
    store.credentials.insert(name.to_string(), creds);

    save_store(&path, &store)
}

/// Remove a named profile; clears the default if it pointed at it
pub fn remove_credentials(name: &str, location: ConfigLocation) -> Result<()> {
    let path = location.path()?;
    let mut store = load_store(&path)?;

    if store.credentials.remove(name).is_none() {
        return Err(BatchError::config_error(format!("Credentials '{name}' not found")));
    }
    if store.default.as_deref() == Some(name) {
        store.default = None;
    }

    save_store(&path, &store)
}

/// List profile names in the merged view, with a marker for the default
pub fn list_credentials() -> Result<Vec<(String, bool)>> {
    let store = load_with_precedence()?;
    Ok(store
        .credentials
        .keys()
        .map(|name| (name.clone(), store.default.as_deref() == Some(name.as_str())))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn stored() -> StoredCredentials {
        StoredCredentials {
            server: "db01".to_string(),
            instance: Some("SQLEXPRESS".to_string()),
            port: 1433,
            user: "sa".to_string(),
            password: Some("stored-secret".to_string()),
            password_env: None,
            database: "inventory".to_string(),
            encrypt: true,
            trust_server_certificate: false,
        }
    }

    fn baseline() -> ConnectionDescriptor {
        resolve_descriptor(&stored(), &ConnectionOverride::default())
    }

    #[test]
    fn test_empty_override_keeps_stored_values() {
        let desc = baseline();
        assert_eq!(desc.server, "db01");
        assert_eq!(desc.instance_name(), Some("SQLEXPRESS"));
        assert_eq!(desc.port, 1433);
        assert_eq!(desc.user, "sa");
        assert_eq!(desc.password, "stored-secret");
        assert_eq!(desc.database, "inventory");
        assert!(desc.encrypt);
        assert!(!desc.trust_server_certificate);
    }

    #[test]
    fn test_single_field_override_leaves_others_untouched() {
        let overrides = [
            ConnectionOverride { server: Some("db02".into()), ..Default::default() },
            ConnectionOverride { instance: Some("PROD".into()), ..Default::default() },
            ConnectionOverride { port: Some(14330), ..Default::default() },
            ConnectionOverride { user: Some("reporter".into()), ..Default::default() },
            ConnectionOverride { password: Some("other".into()), ..Default::default() },
            ConnectionOverride { database: Some("sales".into()), ..Default::default() },
            ConnectionOverride { encrypt: Some(false), ..Default::default() },
            ConnectionOverride { trust_server_certificate: Some(true), ..Default::default() },
        ];

        for over in overrides {
            let mut expected = baseline();
            if let Some(v) = &over.server {
                expected.server = v.clone();
            }
            if let Some(v) = &over.instance {
                expected.instance = Some(v.clone());
            }
            if let Some(v) = over.port {
                expected.port = v;
            }
            if let Some(v) = &over.user {
                expected.user = v.clone();
            }
            if let Some(v) = &over.password {
                expected.password = v.clone();
            }
            if let Some(v) = &over.database {
                expected.database = v.clone();
            }
            if let Some(v) = over.encrypt {
                expected.encrypt = v;
            }
            if let Some(v) = over.trust_server_certificate {
                expected.trust_server_certificate = v;
            }

            assert_eq!(resolve_descriptor(&stored(), &over), expected, "override: {over:?}");
        }
    }

    #[test]
    fn test_empty_string_override_is_ignored() {
        let over = ConnectionOverride {
            server: Some(String::new()),
            instance: Some(String::new()),
            user: Some(String::new()),
            password: Some(String::new()),
            database: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(resolve_descriptor(&stored(), &over), baseline());
    }

    #[test]
    fn test_zero_port_override_falls_back() {
        let over = ConnectionOverride { port: Some(0), ..Default::default() };
        assert_eq!(resolve_descriptor(&stored(), &over).port, 1433);
    }

    #[test]
    fn test_false_boolean_override_applies() {
        let over = ConnectionOverride { encrypt: Some(false), ..Default::default() };
        assert!(!resolve_descriptor(&stored(), &over).encrypt);

        let mut creds = stored();
        creds.trust_server_certificate = true;
        let over = ConnectionOverride { trust_server_certificate: Some(false), ..Default::default() };
        assert!(!resolve_descriptor(&creds, &over).trust_server_certificate);
    }

    #[test]
    fn test_database_falls_back_to_master() {
        let mut creds = stored();
        creds.database = String::new();
        let desc = resolve_descriptor(&creds, &ConnectionOverride::default());
        assert_eq!(desc.database, "master");
    }

    #[test]
    fn test_instance_absent_everywhere() {
        let mut creds = stored();
        creds.instance = None;
        let desc = resolve_descriptor(&creds, &ConnectionOverride::default());
        assert_eq!(desc.instance, None);
        assert_eq!(desc.instance_name(), None);
    }

    #[test]
    fn test_debug_redacts_password() {
        let text = format!("{:?} {:?}", baseline(), stored());
        assert!(!text.contains("stored-secret"));
        assert!(text.contains("<redacted>"));
    }

    #[test]
    fn test_store_defaults_when_fields_missing() {
        let store: CredentialStore =
            serde_json::from_str(r#"{"credentials": {"dev": {"server": "localhost", "user": "sa"}}}"#)
                .unwrap();
        let dev = &store.credentials["dev"];
        assert_eq!(dev.port, 1433);
        assert_eq!(dev.database, "master");
        assert!(!dev.encrypt);
        assert!(!dev.trust_server_certificate);
        assert_eq!(dev.password, None);
    }

    #[test]
    fn test_resolve_env_password() {
        std::env::set_var("TSQL_BATCH_UNIT_PASSWORD", "from-env");
        let creds = StoredCredentials {
            password: Some("ignored".into()),
            password_env: Some("TSQL_BATCH_UNIT_PASSWORD".into()),
            ..stored()
        };
        assert_eq!(creds.resolve().unwrap().password.as_deref(), Some("from-env"));
        std::env::remove_var("TSQL_BATCH_UNIT_PASSWORD");
    }

    #[test]
    fn test_resolve_missing_env_var() {
        let creds = StoredCredentials {
            password_env: Some("TSQL_BATCH_NONEXISTENT_VAR".into()),
            ..stored()
        };
        let err = creds.resolve().unwrap_err();
        assert!(err.message().contains("Environment variable TSQL_BATCH_NONEXISTENT_VAR not found"));
    }

    #[test]
    fn test_merge_stores_local_wins() {
        let mut global = CredentialStore::default();
        global.credentials.insert("shared".into(), stored());
        global.credentials.insert("global-only".into(), stored());
        global.default = Some("global-only".into());

        let mut local = CredentialStore::default();
        local.credentials.insert(
            "shared".into(),
            StoredCredentials { server: "local-db".into(), ..stored() },
        );
        local.default = Some("shared".into());

        let merged = merge_stores(global, local);
        assert_eq!(merged.credentials.len(), 2);
        assert_eq!(merged.credentials["shared"].server, "local-db");
        assert_eq!(merged.default.as_deref(), Some("shared"));
    }

    #[test]
    fn test_lookup_uses_default_and_reports_missing() {
        let mut store = CredentialStore::default();
        store.credentials.insert("dev".into(), stored());

        let err = lookup_credentials(&store, None).unwrap_err();
        assert!(err.message().contains("No default credentials set"));

        store.default = Some("dev".into());
        assert_eq!(lookup_credentials(&store, None).unwrap().server, "db01");

        let err = lookup_credentials(&store, Some("prod")).unwrap_err();
        assert!(err.message().contains("Credentials 'prod' not found"));
        assert!(err.message().contains("dev"));
    }

    #[test]
    fn test_store_round_trip_on_disk() {
        let dir = std::env::temp_dir().join(format!("tsql_batch_store_{}", std::process::id()));
        let path = dir.join(STORE_FILE);
        let _ = fs::remove_dir_all(&dir);

        assert!(load_store(&path).unwrap().credentials.is_empty());

        let mut store = CredentialStore::default();
        store.credentials.insert("dev".into(), stored());
        store.default = Some("dev".into());
        save_store(&path, &store).unwrap();

        let loaded = load_store(&path).unwrap();
        assert_eq!(loaded.credentials["dev"], stored());
        assert_eq!(loaded.default.as_deref(), Some("dev"));

        let _ = fs::remove_dir_all(&dir);
    }
}
