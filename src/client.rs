//! HTTP client construction: TLS, mTLS, custom headers and connection
//! pool tuning on top of `reqwest`. DNS overrides and per-transfer handle
//! recycling live in `dns_cache`/`handle_pool`; this module wires a
//! `DnsCache`'s fixed overrides into the `reqwest::ClientBuilder` the same
//! way the teacher's `configure_dns_override` did for its single override
//! string.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::fs::File;
use std::io::Read;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::dns_cache::DnsCache;
use crate::utils::parse_headers_with_escapes;

/// Idle-connection tuning applied to the underlying `reqwest::Client`.
/// Distinct from `handle_pool::HandlePool`, which recycles per-transfer
/// scratch buffers rather than sockets.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_idle_per_host: usize,
    pub idle_timeout: Duration,
    pub tcp_keepalive: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 32,
            idle_timeout: Duration::from_secs(90),
            tcp_keepalive: Some(Duration::from_secs(60)),
        }
    }
}

impl PoolConfig {
    pub fn apply_to_builder(&self, mut builder: reqwest::ClientBuilder) -> reqwest::ClientBuilder {
        builder = builder
            .pool_max_idle_per_host(self.max_idle_per_host)
            .pool_idle_timeout(self.idle_timeout);
        if let Some(keepalive) = self.tcp_keepalive {
            builder = builder.tcp_keepalive(keepalive);
        }
        builder
    }
}

/// Configuration for building the HTTP client.
pub struct ClientConfig {
    pub skip_tls_verify: bool,
    pub dns_overrides: Vec<(String, u16, std::net::IpAddr)>,
    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
    pub custom_headers: Option<String>,
    pub pool_config: Option<PoolConfig>,
    pub connect_timeout: Option<Duration>,
    /// Mirrors `Request::follow_redirects`/`max_redirects` (§3): the
    /// redirect policy is a `reqwest::Client`-wide setting, so a run's
    /// single client is built from its request template's values rather
    /// than decided per transfer.
    pub follow_redirects: bool,
    pub max_redirects: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            skip_tls_verify: false,
            dns_overrides: Vec::new(),
            client_cert_path: None,
            client_key_path: None,
            custom_headers: None,
            pool_config: None,
            connect_timeout: None,
            follow_redirects: true,
            max_redirects: 10,
        }
    }
}

/// Result of building the client, includes parsed headers for logging.
pub struct ClientBuildResult {
    pub client: reqwest::Client,
    pub parsed_headers: HeaderMap,
}

/// Builds a reqwest HTTP client with the specified configuration.
pub fn build_client(
    config: &ClientConfig,
) -> Result<ClientBuildResult, Box<dyn std::error::Error + Send + Sync>> {
    let mut client_builder = reqwest::Client::builder();

    for (host, port, addr) in &config.dns_overrides {
        let socket_addr = SocketAddr::new(*addr, *port);
        client_builder = client_builder.resolve(host, socket_addr);
        tracing::debug!(host, %socket_addr, "applied dns override");
    }

    let redirect_policy = if config.follow_redirects {
        reqwest::redirect::Policy::limited(config.max_redirects as usize)
    } else {
        reqwest::redirect::Policy::none()
    };
    client_builder = client_builder.redirect(redirect_policy);

    client_builder = configure_mtls(
        client_builder,
        config.client_cert_path.as_deref(),
        config.client_key_path.as_deref(),
    )?;

    let parsed_headers = configure_custom_headers(config.custom_headers.as_deref())?;
    if !parsed_headers.is_empty() {
        client_builder = client_builder.default_headers(parsed_headers.clone());
        tracing::debug!(count = parsed_headers.len(), "configured custom default headers");
    }

    let pool_config = config.pool_config.clone().unwrap_or_default();
    client_builder = pool_config.apply_to_builder(client_builder);
    tracing::debug!(
        max_idle_per_host = pool_config.max_idle_per_host,
        idle_timeout_secs = pool_config.idle_timeout.as_secs(),
        "connection pool configured"
    );

    if let Some(connect_timeout) = config.connect_timeout {
        client_builder = client_builder.connect_timeout(connect_timeout);
    }

    let client = if config.skip_tls_verify {
        tracing::warn!("skipping TLS certificate verification");
        client_builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()?
    } else {
        client_builder.build()?
    };

    Ok(ClientBuildResult {
        client,
        parsed_headers,
    })
}

/// Builds a `ClientConfig::dns_overrides` list from a `DnsCache` that
/// already holds fixed overrides for the given hosts, mirroring the
/// teacher's `hostname:ip:port` override format but for many hosts.
pub fn dns_overrides_from_cache(
    cache: &DnsCache,
    hosts: &[(String, u16)],
) -> Vec<(String, u16, std::net::IpAddr)> {
    hosts
        .iter()
        .filter_map(|(host, port)| {
            cache
                .resolve(host, *port)
                .ok()
                .map(|addr| (host.clone(), *port, addr.ip()))
        })
        .collect()
}

fn configure_mtls(
    mut client_builder: reqwest::ClientBuilder,
    cert_path: Option<&str>,
    key_path: Option<&str>,
) -> Result<reqwest::ClientBuilder, Box<dyn std::error::Error + Send + Sync>> {
    match (cert_path, key_path) {
        (Some(cert_path), Some(key_path)) => {
            tracing::debug!(cert_path, key_path, "loading mTLS identity");

            let mut cert_file = File::open(cert_path).map_err(|e| {
                format!(
                    "Failed to open client certificate file '{}': {}",
                    cert_path, e
                )
            })?;
            let mut cert_pem_buf = Vec::new();
            cert_file.read_to_end(&mut cert_pem_buf).map_err(|e| {
                format!(
                    "Failed to read client certificate file '{}': {}",
                    cert_path, e
                )
            })?;

            let mut key_file = File::open(key_path)
                .map_err(|e| format!("Failed to open client key file '{}': {}", key_path, e))?;
            let mut key_pem_buf = Vec::new();
            key_file
                .read_to_end(&mut key_pem_buf)
                .map_err(|e| format!("Failed to read client key file '{}': {}", key_path, e))?;

            let mut cert_pem_cursor = std::io::Cursor::new(cert_pem_buf.as_slice());
            let certs_result: Vec<_> = rustls_pemfile::certs(&mut cert_pem_cursor).collect();
            if certs_result.is_empty() {
                return Err(format!("No PEM certificates found in {}", cert_path).into());
            }
            for cert in certs_result {
                if let Err(e) = cert {
                    return Err(format!(
                        "Failed to parse PEM certificates from '{}': {}",
                        cert_path, e
                    )
                    .into());
                }
            }

            let mut key_pem_cursor = std::io::Cursor::new(key_pem_buf.as_slice());
            let keys_result: Vec<_> =
                rustls_pemfile::pkcs8_private_keys(&mut key_pem_cursor).collect();
            if keys_result.is_empty() {
                return Err(format!(
                    "No PKCS#8 private keys found in '{}'. Ensure the file contains a valid PEM-encoded PKCS#8 private key.",
                    key_path
                ).into());
            }
            for key in keys_result {
                if let Err(e) = key {
                    return Err(format!(
                        "Failed to parse private key from '{}' as PKCS#8: {}. Please ensure the key is PEM-encoded and in PKCS#8 format.",
                        key_path, e
                    ).into());
                }
            }

            let mut combined_pem_buf = Vec::new();
            combined_pem_buf.extend_from_slice(&cert_pem_buf);
            if !cert_pem_buf.ends_with(b"\n") && !key_pem_buf.starts_with(b"\n") {
                combined_pem_buf.push(b'\n');
            }
            combined_pem_buf.extend_from_slice(&key_pem_buf);

            let identity = reqwest::Identity::from_pem(&combined_pem_buf)
                .map_err(|e| format!(
                    "Failed to create reqwest::Identity from PEM (cert+key): {}. Ensure the key is PKCS#8 and the certificate is valid.",
                    e
                ))?;

            client_builder = client_builder.identity(identity);
            tracing::info!("mTLS configured with client certificate and key");
        }
        (Some(_), None) => {
            return Err("client_cert_path is set, but client_key_path is missing for mTLS.".into());
        }
        (None, Some(_)) => {
            return Err("client_key_path is set, but client_cert_path is missing for mTLS.".into());
        }
        (None, None) => {}
    }

    Ok(client_builder)
}

fn configure_custom_headers(
    custom_headers_str: Option<&str>,
) -> Result<HeaderMap, Box<dyn std::error::Error + Send + Sync>> {
    let mut parsed_headers = HeaderMap::new();

    let headers_str = match custom_headers_str {
        Some(s) if !s.is_empty() => s,
        _ => return Ok(parsed_headers),
    };

    let header_pairs = parse_headers_with_escapes(headers_str);

    for header_pair_str in header_pairs {
        let header_pair_str_trimmed = header_pair_str.trim();
        if header_pair_str_trimmed.is_empty() {
            continue;
        }

        let parts: Vec<&str> = header_pair_str_trimmed.splitn(2, ':').collect();
        if parts.len() != 2 {
            return Err(format!(
                "Invalid header format in custom headers: '{}'. Expected 'Name:Value'.",
                header_pair_str_trimmed
            )
            .into());
        }

        let name_str = parts[0].trim();
        let value_str = parts[1].trim();

        if name_str.is_empty() {
            return Err(format!(
                "Invalid header format: Header name cannot be empty in '{}'.",
                header_pair_str_trimmed
            )
            .into());
        }

        let unescaped_value = value_str.replace("\\,", ",");

        let header_name = HeaderName::from_str(name_str)
            .map_err(|e| format!("Invalid header name: {}. Name: '{}'", e, name_str))?;
        let header_value = HeaderValue::from_str(&unescaped_value).map_err(|e| {
            format!(
                "Invalid header value for '{}': {}. Value: '{}'",
                name_str, e, unescaped_value
            )
        })?;

        parsed_headers.insert(header_name, header_value);
    }

    Ok(parsed_headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pool_config_has_sane_bounds() {
        let pool = PoolConfig::default();
        assert!(pool.max_idle_per_host > 0);
        assert!(pool.idle_timeout > Duration::from_secs(0));
    }

    #[test]
    fn build_client_without_overrides_succeeds() {
        let config = ClientConfig::default();
        let result = build_client(&config);
        assert!(result.is_ok());
    }

    #[test]
    fn build_client_accepts_redirects_disabled() {
        let config = ClientConfig {
            follow_redirects: false,
            ..ClientConfig::default()
        };
        assert!(build_client(&config).is_ok());
    }

    #[test]
    fn build_client_accepts_custom_redirect_limit() {
        let config = ClientConfig {
            follow_redirects: true,
            max_redirects: 3,
            ..ClientConfig::default()
        };
        assert!(build_client(&config).is_ok());
    }

    #[test]
    fn mtls_requires_both_cert_and_key() {
        let mut config = ClientConfig::default();
        config.client_cert_path = Some("/nonexistent/cert.pem".to_string());
        let result = build_client(&config);
        assert!(result.is_err());
    }

    #[test]
    fn custom_headers_parse_into_header_map() {
        let headers = configure_custom_headers(Some("X-Test: value, X-Other: other")).unwrap();
        assert_eq!(headers.get("x-test").unwrap(), "value");
        assert_eq!(headers.get("x-other").unwrap(), "other");
    }
}
