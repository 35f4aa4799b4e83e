//! TCP dialing with environment proxy support
//!
//! `HTTPS_PROXY` applies to wss targets and `HTTP_PROXY` to ws targets, with
//! `ALL_PROXY` as the fallback for both (upper or lower case). `NO_PROXY`
//! lists hosts or domain suffixes to reach directly. Loopback targets are
//! never proxied. Proxies are traversed with an HTTP CONNECT tunnel.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use http_body_util::Empty;
use hyper::header::{HOST, PROXY_AUTHORIZATION};
use hyper::upgrade::Upgraded;
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::IpAddr;
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tracing::{debug, Instrument};
use url::Url;

use crate::config::Parameters;
use crate::types::{Result, TransportError};

/// Byte stream the WebSocket handshake runs over
pub enum Route {
    Direct(TcpStream),
    /// CONNECT tunnel through an HTTP proxy
    Tunnel(TokioIo<Upgraded>),
}

/// Open a stream to `target`, tunnelling through a proxy if one applies
pub async fn connect(target: &Url, params: &Parameters) -> Result<Route> {
    let host = target
        .host_str()
        .ok_or_else(|| TransportError::Config(format!("url {} has no host", target)))?;
    let port = target
        .port_or_known_default()
        .ok_or_else(|| TransportError::Config(format!("url {} has no port", target)))?;

    match proxy_for(target, |key| std::env::var(key).ok()) {
        Some(proxy) => {
            let proxy_host = proxy
                .host_str()
                .ok_or_else(|| TransportError::Config(format!("proxy {} has no host", proxy)))?;
            let proxy_port = proxy.port_or_known_default().unwrap_or(80);
            debug!(
                "Tunneling to {}:{} through proxy {}:{}",
                host, port, proxy_host, proxy_port
            );
            let stream = open_tcp(proxy_host, proxy_port, params).await?;
            Ok(Route::Tunnel(tunnel(stream, host, port, &proxy).await?))
        }
        None => Ok(Route::Direct(open_tcp(host, port, params).await?)),
    }
}

/// Pick the proxy for `target` from environment-style `lookup`
pub fn proxy_for(target: &Url, lookup: impl Fn(&str) -> Option<String>) -> Option<Url> {
    let host = target.host_str()?;
    if is_loopback(host) {
        return None;
    }

    let no_proxy = lookup("NO_PROXY").or_else(|| lookup("no_proxy"));
    if no_proxy.is_some_and(|list| bypasses(host, &list)) {
        return None;
    }

    let keys: [&str; 4] = if target.scheme() == "wss" {
        ["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"]
    } else {
        ["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"]
    };
    let raw = keys
        .iter()
        .filter_map(|key| lookup(key))
        .find(|value| !value.trim().is_empty())?;
    let raw = raw.trim();

    // Bare host:port entries are common
    Url::parse(raw)
        .ok()
        .filter(|url| url.host_str().is_some())
        .or_else(|| Url::parse(&format!("http://{}", raw)).ok())
}

/// Whether `host` matches a `NO_PROXY` list
pub fn bypasses(host: &str, no_proxy: &str) -> bool {
    let host = host.to_ascii_lowercase();
    no_proxy
        .split(',')
        .map(|entry| entry.trim().to_ascii_lowercase())
        .filter(|entry| !entry.is_empty())
        .any(|entry| {
            if entry == "*" {
                return true;
            }
            let domain = entry.trim_start_matches('.');
            host == domain || host.ends_with(&format!(".{}", domain))
        })
}

fn is_loopback(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    bare_host(host)
        .parse::<IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}

/// Strip IPv6 brackets for resolution
fn bare_host(host: &str) -> &str {
    host.trim_start_matches('[').trim_end_matches(']')
}

async fn open_tcp(host: &str, port: u16, params: &Parameters) -> Result<TcpStream> {
    let recv_buffer = u32::try_from(params.read_buffer_size).unwrap_or(u32::MAX);
    let mut last_error = None;

    for addr in lookup_host((bare_host(host), port)).await? {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_recv_buffer_size(recv_buffer)?;

        match socket.connect(addr).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(e) => {
                debug!("Connect to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }

    Err(match last_error {
        Some(e) => TransportError::Dial(format!("{}:{}: {}", host, port, e)),
        None => TransportError::Dial(format!("{}:{} did not resolve", host, port)),
    })
}

/// Issue `CONNECT host:port` and take over the connection once the proxy
/// answers 200
async fn tunnel(
    stream: TcpStream,
    host: &str,
    port: u16,
    proxy: &Url,
) -> Result<TokioIo<Upgraded>> {
    let authority = format!("{}:{}", host, port);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| TransportError::Dial(format!("proxy handshake failed: {}", e)))?;
    tokio::spawn(
        async move {
            if let Err(e) = conn.with_upgrades().await {
                debug!("Proxy connection ended: {}", e);
            }
        }
        .in_current_span(),
    );

    let mut request = Request::builder()
        .method(Method::CONNECT)
        .uri(authority.as_str())
        .header(HOST, authority.as_str());
    if !proxy.username().is_empty() {
        let credentials = format!("{}:{}", proxy.username(), proxy.password().unwrap_or(""));
        request = request.header(
            PROXY_AUTHORIZATION,
            format!("Basic {}", STANDARD.encode(credentials)),
        );
    }
    let request = request
        .body(Empty::<Bytes>::new())
        .map_err(|e| TransportError::Config(format!("invalid CONNECT request: {}", e)))?;

    let response = sender
        .send_request(request)
        .await
        .map_err(|e| TransportError::Dial(format!("CONNECT to {} failed: {}", authority, e)))?;
    if response.status() != StatusCode::OK {
        return Err(TransportError::Handshake {
            status: Some(response.status().as_u16()),
            reason: format!("proxy refused CONNECT to {}", authority),
        });
    }

    let upgraded = hyper::upgrade::on(response)
        .await
        .map_err(|e| TransportError::Dial(format!("proxy tunnel failed: {}", e)))?;
    Ok(TokioIo::new(upgraded))
}
