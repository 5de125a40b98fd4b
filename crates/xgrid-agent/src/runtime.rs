//! In-memory proxy configuration and its on-disk rendering.
//!
//! The current [`ProxyConfig`] lives behind a single reader/writer lock.
//! Mutations replace it, write the rendered file while still holding the
//! lock, then release the lock before asking the supervisor to restart. Two
//! applies racing through the restart window can leave the live process one
//! configuration behind the file until the next restart.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info};
use xgrid_core::document::{Document, deep_clone, deep_clone_all, get_str};
use xgrid_core::ProxyConfig;

use crate::config::{AgentConfig, write_private};
use crate::error::{AgentError, AgentResult};
use crate::supervisor::Supervisor;

/// Protocols whose inbound settings take a `clients` list.
const CLIENT_PROTOCOLS: &[&str] = &["vmess", "vless", "trojan", "shadowsocks"];

/// Where the rendered proxy file goes and what it logs.
#[derive(Debug, Clone)]
pub struct ProxyPaths {
    pub config_path: PathBuf,
    pub log_dir: PathBuf,
    pub log_level: String,
}

impl ProxyPaths {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            config_path: PathBuf::from(&config.proxy_config_path),
            log_dir: PathBuf::from(&config.proxy_log_dir),
            log_level: config.log_level.clone(),
        }
    }
}

/// The agent's runtime proxy configuration.
pub struct ProxyRuntime {
    paths: ProxyPaths,
    current: RwLock<Option<ProxyConfig>>,
    supervisor: Arc<dyn Supervisor>,
}

impl ProxyRuntime {
    pub fn new(paths: ProxyPaths, supervisor: Arc<dyn Supervisor>) -> Self {
        Self {
            paths,
            current: RwLock::new(None),
            supervisor,
        }
    }

    pub fn supervisor(&self) -> &dyn Supervisor {
        self.supervisor.as_ref()
    }

    /// Replace the whole configuration, persist it and restart the proxy.
    ///
    /// The stored copy shares nothing with `config`.
    pub async fn apply_config(&self, config: &ProxyConfig) -> AgentResult<()> {
        {
            let mut current = self.current.write();
            let next = current.insert(config.deep_clone());
            self.persist(next)?;
        }
        info!(
            inbounds = config.inbounds.len(),
            clients = config.clients.len(),
            "configuration applied"
        );
        self.supervisor.restart().await
    }

    /// Replace only the client list of the current configuration.
    pub async fn update_clients(&self, clients: &[Document]) -> AgentResult<()> {
        {
            let mut guard = self.current.write();
            let current = guard.as_mut().ok_or(AgentError::NotConfigured)?;
            current.clients = deep_clone_all(clients);
            self.persist(current)?;
        }
        info!(clients = clients.len(), "clients updated");
        self.supervisor.restart().await
    }

    /// Number of clients in the current configuration.
    pub fn client_count(&self) -> usize {
        self.current.read().as_ref().map_or(0, |c| c.clients.len())
    }

    pub fn snapshot(&self) -> Option<ProxyConfig> {
        self.current.read().as_ref().map(ProxyConfig::deep_clone)
    }

    fn persist(&self, config: &ProxyConfig) -> AgentResult<()> {
        let rendered = render(config, &self.paths);
        if let Some(dir) = self.paths.config_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        write_private(&self.paths.config_path, &serde_json::to_vec_pretty(&rendered)?)?;
        debug!(path = %self.paths.config_path.display(), "proxy config written");
        Ok(())
    }
}

/// Render the file the proxy engine reads.
///
/// The `log` section gets access/error paths and a level unless the pushed
/// config sets them. Extra top-level sections never override known ones.
pub fn render(config: &ProxyConfig, paths: &ProxyPaths) -> Document {
    let mut out = Document::new();

    let mut log = config.log.as_ref().map(deep_clone).unwrap_or_default();
    log.entry("access")
        .or_insert_with(|| Value::String(paths.log_dir.join("access.log").display().to_string()));
    log.entry("error")
        .or_insert_with(|| Value::String(paths.log_dir.join("error.log").display().to_string()));
    log.entry("loglevel")
        .or_insert_with(|| Value::String(paths.log_level.to_lowercase()));
    out.insert("log".into(), Value::Object(log));

    let mut inbounds = deep_clone_all(&config.inbounds);
    inject_clients(&mut inbounds, &config.clients);
    out.insert("inbounds".into(), objects(inbounds));
    out.insert("outbounds".into(), objects(deep_clone_all(&config.outbounds)));

    let sections = [
        ("routing", &config.routing),
        ("dns", &config.dns),
        ("policy", &config.policy),
        ("transport", &config.transport),
    ];
    for (key, section) in sections {
        if let Some(section) = section {
            out.insert(key.into(), Value::Object(deep_clone(section)));
        }
    }

    if let Some(extra) = &config.other_sections {
        for (key, value) in extra {
            if !out.contains_key(key) {
                out.insert(key.clone(), value.clone());
            }
        }
    }
    out
}

/// Put `clients` into each inbound's settings.
///
/// An existing `clients` or `users` key is replaced in place; otherwise the
/// list is added as `clients` for the protocols that take one.
pub fn inject_clients(inbounds: &mut [Document], clients: &[Document]) {
    if clients.is_empty() {
        return;
    }
    let list = || objects(deep_clone_all(clients));

    for inbound in inbounds {
        let takes_clients = get_str(inbound, "protocol").is_some_and(|p| CLIENT_PROTOCOLS.contains(&p));
        let Some(Value::Object(settings)) = inbound.get_mut("settings") else {
            continue;
        };
        if settings.contains_key("clients") {
            settings.insert("clients".into(), list());
        } else if settings.contains_key("users") {
            settings.insert("users".into(), list());
        } else if takes_clients {
            settings.insert("clients".into(), list());
        }
    }
}

fn objects(docs: Vec<Document>) -> Value {
    Value::Array(docs.into_iter().map(Value::Object).collect())
}
