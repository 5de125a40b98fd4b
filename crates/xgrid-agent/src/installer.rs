//! Proxy engine installation.
//!
//! Downloads the release archive for the host architecture, unpacks the
//! binary and geo data, prepares the config and log directories, and
//! registers a systemd unit. Linux only.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::json;
use tracing::{info, warn};

use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult};
use crate::supervisor::run_command;

const RELEASE_BASE_URL: &str = "https://github.com/XTLS/Xray-core/releases";
const SHARE_DIR: &str = "/usr/local/share/xray";
const SYSTEMD_DIR: &str = "/etc/systemd/system";
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Installs and upgrades the proxy binary.
pub struct Installer {
    binary_path: PathBuf,
    config_path: PathBuf,
    log_dir: PathBuf,
    service_name: String,
    version: String,
    http: reqwest::Client,
}

impl Installer {
    pub fn from_config(config: &AgentConfig) -> AgentResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|e| AgentError::Download(e.to_string()))?;
        Ok(Self {
            binary_path: config.binary_path(),
            config_path: PathBuf::from(&config.proxy_config_path),
            log_dir: PathBuf::from(&config.proxy_log_dir),
            service_name: config.service_name.clone(),
            version: config.xray_version.clone(),
            http,
        })
    }

    /// Install when the binary is missing or reports a different version
    /// than the pinned one. An unpinned (`latest`) install is never upgraded.
    pub async fn ensure(&self) -> AgentResult<()> {
        if !cfg!(target_os = "linux") {
            return Err(AgentError::UnsupportedPlatform);
        }

        if self.binary_path.exists() {
            if wants_latest(&self.version) {
                return Ok(());
            }
            match self.installed_version_matches().await {
                Ok(true) => return Ok(()),
                Ok(false) => info!(version = %self.version, "proxy version mismatch, reinstalling"),
                Err(e) => warn!(error = %e, "failed to check installed proxy version"),
            }
        }

        self.install().await
    }

    async fn installed_version_matches(&self) -> AgentResult<bool> {
        let binary = self.binary_path.to_string_lossy();
        let output = run_command(&binary, &["-version"]).await?;
        Ok(version_matches(&output, &self.version))
    }

    async fn install(&self) -> AgentResult<()> {
        let arch = release_arch(std::env::consts::ARCH)
            .ok_or_else(|| AgentError::UnsupportedArch(std::env::consts::ARCH.to_string()))?;
        let url = download_url(&self.version, arch);
        info!(%url, "downloading proxy release");

        let workdir = tempfile::tempdir()?;
        let archive = workdir.path().join("xray.zip");
        self.download(&url, &archive).await?;

        let unpacked = workdir.path().join("unpacked");
        run_command(
            "unzip",
            &["-o", &archive.to_string_lossy(), "-d", &unpacked.to_string_lossy()],
        )
        .await?;

        self.place_files(&unpacked).await?;
        self.ensure_directories().await?;
        self.install_service().await?;
        info!(binary = %self.binary_path.display(), "proxy installed");
        Ok(())
    }

    async fn download(&self, url: &str, dest: &Path) -> AgentResult<()> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| AgentError::Download(e.to_string()))?;
        if resp.status() != reqwest::StatusCode::OK {
            return Err(AgentError::Download(format!(
                "unexpected status {} while downloading {url}",
                resp.status().as_u16()
            )));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| AgentError::Download(e.to_string()))?;
        tokio::fs::write(dest, &bytes).await?;
        Ok(())
    }

    async fn place_files(&self, unpacked: &Path) -> AgentResult<()> {
        if let Some(dir) = self.binary_path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::create_dir_all(SHARE_DIR).await?;

        tokio::fs::copy(unpacked.join("xray"), &self.binary_path).await?;
        set_mode(&self.binary_path, 0o755).await?;
        for data in ["geoip.dat", "geosite.dat"] {
            let src = unpacked.join(data);
            if src.exists() {
                tokio::fs::copy(&src, Path::new(SHARE_DIR).join(data)).await?;
            }
        }
        Ok(())
    }

    /// Create the config and log directories, and a minimal config file if
    /// none exists yet.
    async fn ensure_directories(&self) -> AgentResult<()> {
        if let Some(dir) = self.config_path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::create_dir_all(&self.log_dir).await?;

        if !self.config_path.exists() {
            let default = json!({
                "log": {
                    "access": self.log_dir.join("access.log"),
                    "error": self.log_dir.join("error.log"),
                    "loglevel": "warning",
                },
                "inbounds": [],
                "outbounds": [],
            });
            crate::config::write_private(&self.config_path, &serde_json::to_vec_pretty(&default)?)?;
        }
        Ok(())
    }

    async fn install_service(&self) -> AgentResult<()> {
        let unit_path = Path::new(SYSTEMD_DIR).join(format!("{}.service", self.service_name));
        tokio::fs::write(&unit_path, systemd_unit(&self.binary_path, &self.config_path)).await?;
        run_command("systemctl", &["daemon-reload"]).await?;
        run_command("systemctl", &["enable", "--now", &self.service_name]).await?;
        Ok(())
    }
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> AgentResult<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> AgentResult<()> {
    Ok(())
}

fn wants_latest(version: &str) -> bool {
    version.is_empty() || version.eq_ignore_ascii_case("latest")
}

/// Release asset suffix for a Rust target architecture.
pub fn release_arch(arch: &str) -> Option<&'static str> {
    match arch {
        "x86_64" => Some("64"),
        "aarch64" => Some("arm64-v8a"),
        "arm" => Some("arm32-v7a"),
        _ => None,
    }
}

/// Archive URL for `version` (`latest` or a tag, with or without the `v`).
pub fn download_url(version: &str, arch: &str) -> String {
    let segment = if wants_latest(version) {
        "latest/download".to_string()
    } else if version.starts_with('v') {
        format!("download/{version}")
    } else {
        format!("download/v{version}")
    };
    format!("{RELEASE_BASE_URL}/{segment}/Xray-linux-{arch}.zip")
}

/// Whether `-version` output names the desired version.
pub fn version_matches(output: &str, desired: &str) -> bool {
    let desired = desired.trim_start_matches('v');
    desired.is_empty() || output.contains(desired)
}

pub fn systemd_unit(binary: &Path, config: &Path) -> String {
    format!(
        "[Unit]
Description=Xray Service
After=network.target
Wants=network-online.target

[Service]
Type=simple
User=root
ExecStart={} run -config {}
Restart=on-failure
RestartSec=3

[Install]
WantedBy=multi-user.target
",
        binary.display(),
        config.display()
    )
}
