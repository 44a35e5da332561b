//! Runtime configuration.
//!
//! Resolved from layers: built-in defaults, then an optional JSON file, then
//! `GATEHOUSE_*` environment variables. Later layers win field by field.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::accounts::{ANONYMOUS_GROUP, SERVICE_ACCOUNT_GROUP};
use crate::auth::{DEFAULT_REALM, DEFAULT_SESSION_COOKIE};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatehouseConfig {
    pub bind_host: String,
    pub http_port: u16,
    /// Root for `store/*.json` and `provisioning/`.
    pub data_dir: PathBuf,
    pub session_cookie: String,
    pub session_ttl_secs: u64,
    pub basic_realm: String,
    pub anonymous_group: String,
    pub service_account_group: String,
    /// Group new interactive users join, if any.
    pub user_default_group: Option<String>,
}

impl Default for GatehouseConfig {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            http_port: 7878,
            data_dir: PathBuf::from("data"),
            session_cookie: DEFAULT_SESSION_COOKIE.to_string(),
            session_ttl_secs: 3_600,
            basic_realm: DEFAULT_REALM.to_string(),
            anonymous_group: ANONYMOUS_GROUP.to_string(),
            service_account_group: SERVICE_ACCOUNT_GROUP.to_string(),
            user_default_group: None,
        }
    }
}

/// One partial layer; unset fields inherit from the layer below.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConfigOverrides {
    pub bind_host: Option<String>,
    pub http_port: Option<u16>,
    pub data_dir: Option<PathBuf>,
    pub session_cookie: Option<String>,
    pub session_ttl_secs: Option<u64>,
    pub basic_realm: Option<String>,
    pub anonymous_group: Option<String>,
    pub service_account_group: Option<String>,
    pub user_default_group: Option<String>,
}

impl ConfigOverrides {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Read `GATEHOUSE_*` variables through `lookup` (normally `std::env::var`).
    pub fn from_env_with(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let num = |key: &str| -> anyhow::Result<Option<u64>> {
            lookup(key).map(|v| v.trim().parse::<u64>().with_context(|| format!("{key}='{v}' is not a number"))).transpose()
        };
        let http_port = num("GATEHOUSE_HTTP_PORT")?
            .map(|p| u16::try_from(p).with_context(|| format!("GATEHOUSE_HTTP_PORT={p} is out of range")))
            .transpose()?;
        Ok(Self {
            bind_host: lookup("GATEHOUSE_HOST"),
            http_port,
            data_dir: lookup("GATEHOUSE_DATA_DIR").map(PathBuf::from),
            session_cookie: lookup("GATEHOUSE_SESSION_COOKIE"),
            session_ttl_secs: num("GATEHOUSE_SESSION_TTL_SECS")?,
            basic_realm: lookup("GATEHOUSE_BASIC_REALM"),
            anonymous_group: lookup("GATEHOUSE_ANONYMOUS_GROUP"),
            service_account_group: lookup("GATEHOUSE_SERVICE_ACCOUNT_GROUP"),
            user_default_group: lookup("GATEHOUSE_USER_GROUP"),
        })
    }

    pub fn from_env() -> anyhow::Result<Self> { Self::from_env_with(|k| std::env::var(k).ok()) }
}

impl GatehouseConfig {
    /// Overlay `layers` onto `base`, in order.
    pub fn from_layers(base: &GatehouseConfig, layers: &[&ConfigOverrides]) -> Self {
        let mut c = base.clone();
        for l in layers {
            if let Some(v) = &l.bind_host { c.bind_host = v.clone(); }
            if let Some(v) = l.http_port { c.http_port = v; }
            if let Some(v) = &l.data_dir { c.data_dir = v.clone(); }
            if let Some(v) = &l.session_cookie { c.session_cookie = v.clone(); }
            if let Some(v) = l.session_ttl_secs { c.session_ttl_secs = v; }
            if let Some(v) = &l.basic_realm { c.basic_realm = v.clone(); }
            if let Some(v) = &l.anonymous_group { c.anonymous_group = v.clone(); }
            if let Some(v) = &l.service_account_group { c.service_account_group = v.clone(); }
            if l.user_default_group.is_some() { c.user_default_group = l.user_default_group.clone(); }
        }
        c
    }

    /// Defaults, then `file` if given, then the process environment.
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        let from_file = match file {
            Some(p) => ConfigOverrides::from_file(p)?,
            None => ConfigOverrides::default(),
        };
        let from_env = ConfigOverrides::from_env()?;
        Ok(Self::from_layers(&Self::default(), &[&from_file, &from_env]))
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.bind_host, self.http_port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.bind_host, self.http_port))
    }

    pub fn session_ttl(&self) -> Duration { Duration::from_secs(self.session_ttl_secs) }

    pub fn users_store_path(&self) -> PathBuf { self.data_dir.join("store").join("users.json") }

    pub fn service_accounts_store_path(&self) -> PathBuf { self.data_dir.join("store").join("serviceaccounts.json") }

    pub fn provisioning_dir(&self) -> PathBuf { self.data_dir.join("provisioning") }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
