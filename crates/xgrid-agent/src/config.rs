//! Agent configuration file.
//!
//! A JSON document owned by the operator. The agent rewrites it once, when a
//! registration hands it an operational `secret_key`.

use std::fs;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, AgentResult};

pub const DEFAULT_LISTEN_ADDR: &str = ":8080";
pub const DEFAULT_INSTALL_PATH: &str = "/usr/local/bin";
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_PROXY_CONFIG_PATH: &str = "/usr/local/etc/xray/config.json";
pub const DEFAULT_PROXY_LOG_DIR: &str = "/var/log/xray";
pub const DEFAULT_SERVICE_NAME: &str = "xray";
pub const DEFAULT_TELEMETRY_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_MAINTENANCE_INTERVAL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub master_url: String,
    pub node_id: String,
    pub node_name: String,
    pub registration_secret: String,
    pub secret_key: String,
    pub xray_version: String,
    pub install_path: String,
    pub listen_addr: String,
    pub log_level: String,
    pub proxy_config_path: String,
    pub proxy_log_dir: String,
    pub service_name: String,
    pub telemetry_interval_secs: u64,
    pub maintenance_interval_secs: u64,
}

impl AgentConfig {
    /// Read, default and validate the file at `path`.
    pub fn load(path: &Path) -> AgentResult<Self> {
        let raw = fs::read(path)?;
        let mut config: Self = serde_json::from_slice(&raw)?;
        config.apply_defaults();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_defaults(&mut self) {
        fill(&mut self.listen_addr, DEFAULT_LISTEN_ADDR);
        fill(&mut self.install_path, DEFAULT_INSTALL_PATH);
        fill(&mut self.log_level, DEFAULT_LOG_LEVEL);
        fill(&mut self.proxy_config_path, DEFAULT_PROXY_CONFIG_PATH);
        fill(&mut self.proxy_log_dir, DEFAULT_PROXY_LOG_DIR);
        fill(&mut self.service_name, DEFAULT_SERVICE_NAME);
        if self.telemetry_interval_secs == 0 {
            self.telemetry_interval_secs = DEFAULT_TELEMETRY_INTERVAL_SECS;
        }
        if self.maintenance_interval_secs == 0 {
            self.maintenance_interval_secs = DEFAULT_MAINTENANCE_INTERVAL_SECS;
        }
    }

    pub fn validate(&self) -> AgentResult<()> {
        let required = [
            ("master_url", &self.master_url),
            ("node_id", &self.node_id),
            ("node_name", &self.node_name),
            ("registration_secret", &self.registration_secret),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(AgentError::Config(format!("{field} is required")));
            }
        }
        Ok(())
    }

    /// Write the config back pretty-printed, readable by the owner only.
    pub fn save(&self, path: &Path) -> AgentResult<()> {
        write_private(path, &serde_json::to_vec_pretty(self)?)
    }

    /// Socket address for the RPC server. A bare `:port` binds every interface.
    pub fn listen_socket_addr(&self) -> AgentResult<SocketAddr> {
        let addr = self.listen_addr.trim();
        let addr = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };
        addr.parse()
            .map_err(|_| AgentError::Config(format!("invalid listen_addr {:?}", self.listen_addr)))
    }

    pub fn binary_path(&self) -> PathBuf {
        Path::new(&self.install_path).join("xray")
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_secs(self.telemetry_interval_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}

/// Write `data` to `path` with mode `0600`, creating or truncating it.
pub(crate) fn write_private(path: &Path, data: &[u8]) -> AgentResult<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(data)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

fn fill(field: &mut String, default: &str) {
    if field.trim().is_empty() {
        *field = default.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> &'static str {
        r#"{
            "master_url": "http://controller:8085",
            "node_id": "n1",
            "node_name": "Edge 1",
            "registration_secret": "reg"
        }"#
    }

    #[test]
    fn load_applies_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.json");
        fs::write(&path, minimal()).unwrap();

        let cfg = AgentConfig::load(&path).unwrap();
        assert_eq!(cfg.listen_addr, ":8080");
        assert_eq!(cfg.install_path, "/usr/local/bin");
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.proxy_config_path, DEFAULT_PROXY_CONFIG_PATH);
        assert_eq!(cfg.service_name, "xray");
        assert_eq!(cfg.telemetry_interval(), Duration::from_secs(60));
        assert_eq!(cfg.maintenance_interval(), Duration::from_secs(86_400));
        assert_eq!(cfg.binary_path(), PathBuf::from("/usr/local/bin/xray"));
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.json");
        fs::write(&path, r#"{"master_url": "http://c", "node_id": "n1", "node_name": "x"}"#).unwrap();

        let err = AgentConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("registration_secret"));
    }

    #[test]
    fn save_round_trips_with_owner_only_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.json");
        fs::write(&path, minimal()).unwrap();

        let mut cfg = AgentConfig::load(&path).unwrap();
        cfg.secret_key = "s1".into();
        cfg.save(&path).unwrap();

        let reloaded = AgentConfig::load(&path).unwrap();
        assert_eq!(reloaded, cfg);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn listen_addr_forms() {
        let mut cfg = AgentConfig {
            listen_addr: ":9000".into(),
            ..Default::default()
        };
        assert_eq!(cfg.listen_socket_addr().unwrap().to_string(), "0.0.0.0:9000");

        cfg.listen_addr = "127.0.0.1:7000".into();
        assert_eq!(cfg.listen_socket_addr().unwrap().port(), 7000);

        cfg.listen_addr = "nonsense".into();
        assert!(cfg.listen_socket_addr().is_err());
    }
}
