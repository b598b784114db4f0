//! Node configuration loading.
//!
//! TOML is the sole config source. Default config path:
//! `/etc/fabricd/fabricd.toml`.
//!
//! # Required fields
//! - `schema_version = 1`
//! - `node.local_address`
//! - `node.endpoint`

use std::path::Path;

use serde::Deserialize;

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub schema_version: u32,
    /// This node's physical address on the in-memory transport.
    pub local_address: String,
    /// This node's logical endpoint name.
    pub endpoint: String,
    pub registry: RegistryConfig,
    pub routes: Vec<RouteConfig>,
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// When true, this node also runs a `RegistryService` against its own
    /// Route Endpoint, so other nodes can reach the route registry
    /// remotely instead of only in-process.
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct RouteConfig {
    pub route: String,
    pub transient: bool,
    pub publish_only: bool,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    node: Option<RawNodeConfig>,
    registry: Option<RawRegistryConfig>,
    routes: Option<Vec<RawRouteConfig>>,
}

#[derive(Debug, Deserialize)]
struct RawNodeConfig {
    local_address: Option<String>,
    endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRegistryConfig {
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawRouteConfig {
    route: Option<String>,
    transient: Option<bool>,
    publish_only: Option<bool>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

pub fn load_config_from_path(path: &Path) -> Result<NodeConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {e}", path.display())))?;
    load_config_from_str(&toml_str)
}

pub fn load_config() -> Result<NodeConfig, ConfigError> {
    load_config_from_path(Path::new("/etc/fabricd/fabricd.toml"))
}

pub fn load_config_from_str(toml_str: &str) -> Result<NodeConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let schema_version = raw
        .schema_version
        .ok_or_else(|| ConfigError::MissingField("schema_version".to_owned()))?;
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue(format!(
            "schema_version must be 1, got {schema_version}"
        )));
    }

    let raw_node = raw.node.ok_or_else(|| ConfigError::MissingField("node".to_owned()))?;
    let local_address = raw_node
        .local_address
        .ok_or_else(|| ConfigError::MissingField("node.local_address".to_owned()))?;
    let endpoint = raw_node
        .endpoint
        .ok_or_else(|| ConfigError::MissingField("node.endpoint".to_owned()))?;

    let registry = match raw.registry {
        Some(r) => RegistryConfig {
            enabled: r.enabled.unwrap_or(false),
        },
        None => RegistryConfig { enabled: false },
    };

    let mut routes = Vec::new();
    for (i, r) in raw.routes.unwrap_or_default().into_iter().enumerate() {
        let route = r
            .route
            .ok_or_else(|| ConfigError::MissingField(format!("routes[{i}].route")))?;
        routes.push(RouteConfig {
            route,
            transient: r.transient.unwrap_or(false),
            publish_only: r.publish_only.unwrap_or(false),
        });
    }

    Ok(NodeConfig {
        schema_version,
        local_address,
        endpoint,
        registry,
        routes,
    })
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    MissingField(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {s}"),
            ConfigError::Parse(s) => write!(f, "parse error: {s}"),
            ConfigError::MissingField(s) => write!(f, "missing required field: {s}"),
            ConfigError::InvalidValue(s) => write!(f, "invalid config value: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}
