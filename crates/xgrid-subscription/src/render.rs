//! Renderers for the bundle formats.
//!
//! Every renderer takes the same ordered endpoint list. Missing stream
//! settings never fail a render; the corresponding fields are left out.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde_json::Value;
use xgrid_core::document::{Document, get_str};
use xgrid_core::StreamSettingsExt;
use xgrid_state::{ClientRecord, join_host_port};

use crate::endpoint::Endpoint;
use crate::error::{SubscriptionError, SubscriptionResult};

// ── JSON ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct JsonBundle<'a> {
    client: JsonClient<'a>,
    endpoints: &'a [Endpoint],
}

#[derive(Serialize)]
struct JsonClient<'a> {
    email: &'a str,
    uuid: &'a str,
}

/// Client identity plus the full endpoint array, indented.
pub fn render_json(client: &ClientRecord, endpoints: &[Endpoint]) -> SubscriptionResult<String> {
    let bundle = JsonBundle {
        client: JsonClient {
            email: &client.email,
            uuid: &client.uuid,
        },
        endpoints,
    };
    serde_json::to_string_pretty(&bundle).map_err(|e| SubscriptionError::Render {
        format: "json",
        message: e.to_string(),
    })
}

// ── Clash ──────────────────────────────────────────────────────────

/// Name of the single load-balancing group.
pub const CLASH_GROUP_NAME: &str = "VPN";

#[derive(Serialize)]
struct ClashConfig<'a> {
    proxies: Vec<ClashProxy<'a>>,
    #[serde(rename = "proxy-groups")]
    proxy_groups: Vec<ClashGroup<'a>>,
}

#[derive(Serialize)]
struct ClashProxy<'a> {
    name: &'a str,
    server: &'a str,
    port: u16,
    #[serde(rename = "type")]
    kind: &'a str,
    uuid: &'a str,
    cipher: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    tls: bool,
    #[serde(rename = "skip-cert-verify")]
    skip_cert_verify: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    network: Option<String>,
    #[serde(rename = "ws-path", skip_serializing_if = "Option::is_none")]
    ws_path: Option<String>,
    #[serde(rename = "ws-headers", skip_serializing_if = "Option::is_none")]
    ws_headers: Option<ClashWsHeaders>,
}

#[derive(Serialize)]
struct ClashWsHeaders {
    #[serde(rename = "Host")]
    host: String,
}

#[derive(Serialize)]
struct ClashGroup<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    strategy: &'a str,
    proxies: Vec<&'a str>,
}

/// Clash proxy type for an engine protocol name.
pub fn clash_type(protocol: &str) -> &str {
    match protocol {
        "shadowsocks" => "ss",
        other => other,
    }
}

/// One proxy per endpoint plus a round-robin group over all of them.
pub fn render_clash(client: &ClientRecord, endpoints: &[Endpoint]) -> SubscriptionResult<String> {
    let proxies = endpoints
        .iter()
        .map(|ep| {
            let stream = ep.stream();
            let (cipher, password) = if ep.protocol == "shadowsocks" {
                let method = get_str(&ep.settings, "method").unwrap_or("auto");
                (method.to_string(), Some(shadowsocks_password(ep, &client.uuid)))
            } else {
                ("auto".to_string(), None)
            };
            ClashProxy {
                name: &ep.name,
                server: &ep.host,
                port: ep.port,
                kind: clash_type(&ep.protocol),
                uuid: &client.uuid,
                cipher,
                password,
                tls: stream.tls_enabled(),
                skip_cert_verify: true,
                network: stream.network().map(str::to_string),
                ws_path: stream.ws_path().map(str::to_string),
                ws_headers: stream.ws_host().map(|host| ClashWsHeaders {
                    host: host.to_string(),
                }),
            }
        })
        .collect();

    let proxy_groups = if endpoints.is_empty() {
        Vec::new()
    } else {
        vec![ClashGroup {
            name: CLASH_GROUP_NAME,
            kind: "load-balance",
            strategy: "round-robin",
            proxies: endpoints.iter().map(|ep| ep.name.as_str()).collect(),
        }]
    };

    serde_yaml::to_string(&ClashConfig {
        proxies,
        proxy_groups,
    })
    .map_err(|e| SubscriptionError::Render {
        format: "clash",
        message: e.to_string(),
    })
}

// ── Share links ────────────────────────────────────────────────────

/// Newline-joined share links; endpoints without a link form are skipped.
pub fn render_links(client_uuid: &str, endpoints: &[Endpoint]) -> String {
    endpoints
        .iter()
        .filter_map(|ep| share_link(client_uuid, ep))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Share link for one endpoint, or `None` for protocols without one.
pub fn share_link(client_uuid: &str, ep: &Endpoint) -> Option<String> {
    let stream = ep.stream();
    match ep.protocol.as_str() {
        "vmess" => Some(vmess_link(client_uuid, ep, &stream)),
        "vless" => {
            let mut params = Vec::new();
            if let Some(network) = stream.network() {
                params.push(("type", network));
            }
            if stream.tls_enabled() {
                params.push(("security", "tls"));
            }
            if let Some(path) = stream.ws_path() {
                params.push(("path", path));
            }
            if let Some(host) = stream.ws_host() {
                params.push(("host", host));
            }
            Some(format!(
                "vless://{client_uuid}@{}{}#{}",
                join_host_port(&ep.host, ep.port),
                query_string(&params),
                urlencoding::encode(&ep.name)
            ))
        }
        "trojan" => {
            let params: Vec<_> = stream.ws_host().map(|host| ("sni", host)).into_iter().collect();
            Some(format!(
                "trojan://{client_uuid}@{}{}#{}",
                join_host_port(&ep.host, ep.port),
                query_string(&params),
                urlencoding::encode(&ep.name)
            ))
        }
        "shadowsocks" => {
            let method = get_str(&ep.settings, "method").unwrap_or_default();
            let password = shadowsocks_password(ep, client_uuid);
            let raw = format!("{method}:{password}@{}", join_host_port(&ep.host, ep.port));
            Some(format!(
                "ss://{}#{}",
                STANDARD.encode(raw),
                urlencoding::encode(&ep.name)
            ))
        }
        _ => None,
    }
}

fn vmess_link(client_uuid: &str, ep: &Endpoint, stream: &Document) -> String {
    let mut cfg = Document::new();
    cfg.insert("v".into(), Value::from("2"));
    cfg.insert("ps".into(), Value::from(ep.name.as_str()));
    cfg.insert("add".into(), Value::from(ep.host.as_str()));
    cfg.insert("port".into(), Value::from(ep.port.to_string()));
    cfg.insert("id".into(), Value::from(client_uuid));
    cfg.insert("aid".into(), Value::from("0"));
    cfg.insert("type".into(), Value::from("none"));
    if let Some(network) = stream.network() {
        cfg.insert("net".into(), Value::from(network));
    }
    if stream.tls_enabled() {
        cfg.insert("tls".into(), Value::from("tls"));
    }
    format!("vmess://{}", STANDARD.encode(Value::Object(cfg).to_string()))
}

/// Inbound password, falling back to the client UUID.
fn shadowsocks_password(ep: &Endpoint, client_uuid: &str) -> String {
    get_str(&ep.settings, "password")
        .filter(|p| !p.is_empty())
        .unwrap_or(client_uuid)
        .to_string()
}

/// `?k=v&k=v` with percent-encoded values, or empty when there are no params.
fn query_string(params: &[(&str, &str)]) -> String {
    if params.is_empty() {
        return String::new();
    }
    let joined = params
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    format!("?{joined}")
}
