//! Feed retrieval.
//!
//! URLs are validated before any request is made: only http(s) and webcal schemes are
//! accepted, iCloud/Google feeds must point at their provider's hosts, and custom feeds may
//! not resolve to loopback, link-local or private addresses. Redirects are followed by hand
//! so that every hop goes through the same private-address check.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use url::{Host, Url};

use crate::error::{MirrorError, MirrorResult};
use crate::feed::SourceKind;

const ICLOUD_HOSTS: &[&str] = &["icloud.com"];
const GOOGLE_HOSTS: &[&str] = &["google.com", "googleusercontent.com"];
const MAX_REDIRECTS: usize = 10;

/// Retrieves raw calendar text.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> MirrorResult<String>;
}

/// Plain HTTP GET with a bounded timeout covering the whole exchange.
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> MirrorResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("shiftmirror/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| MirrorError::FetchFailed(e.to_string()))?;

        Ok(HttpFetcher { client, timeout })
    }

    async fn get(&self, url: &Url) -> MirrorResult<String> {
        let mut current = url.clone();

        for _ in 0..=MAX_REDIRECTS {
            let response = self
                .client
                .get(current.clone())
                .send()
                .await
                .map_err(|e| MirrorError::FetchFailed(e.to_string()))?;

            let status = response.status();
            if status.is_redirection() {
                let next = redirect_target(&current, &response)?;
                check_redirect(&next).await?;
                tracing::debug!(from = %current, to = %next, "Following redirect");
                current = next;
                continue;
            }
            if !status.is_success() {
                return Err(MirrorError::FetchFailed(format!("HTTP {status}")));
            }

            return response
                .text()
                .await
                .map_err(|e| MirrorError::FetchFailed(e.to_string()));
        }

        Err(MirrorError::FetchFailed(format!(
            "More than {MAX_REDIRECTS} redirects"
        )))
    }
}

#[async_trait]
impl FeedFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> MirrorResult<String> {
        tracing::debug!(%url, "Fetching feed");
        within(self.timeout, self.get(url)).await
    }
}

/// Run feed I/O (DNS included) under `limit`, reporting overruns as [`MirrorError::FetchTimeout`].
pub async fn within<T, F>(limit: Duration, fut: F) -> MirrorResult<T>
where
    F: Future<Output = MirrorResult<T>>,
{
    timeout(limit, fut)
        .await
        .map_err(|_| MirrorError::FetchTimeout(limit.as_secs()))?
}

fn redirect_target(current: &Url, response: &reqwest::Response) -> MirrorResult<Url> {
    let status = response.status();
    let location = response
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| MirrorError::FetchFailed(format!("HTTP {status} without Location")))?;

    current
        .join(location)
        .map_err(|e| MirrorError::FetchFailed(format!("Bad redirect '{location}': {e}")))
}

/// Redirect hops never reach a non-public address, whatever kind of feed started the chain.
async fn check_redirect(url: &Url) -> MirrorResult<()> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(MirrorError::InvalidUrl(format!(
            "Redirect to unsupported scheme '{}'",
            url.scheme()
        )));
    }
    let host = url
        .host()
        .ok_or_else(|| MirrorError::InvalidUrl(format!("Redirect to {url} has no host")))?;

    reject_private_host(url, host).await
}

/// `webcal://` and `webcals://` are https in disguise.
pub fn normalize_feed_url(raw: &str) -> String {
    let trimmed = raw.trim();
    for prefix in ["webcals://", "webcal://"] {
        if trimmed
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
        {
            return format!("https://{}", &trimmed[prefix.len()..]);
        }
    }
    trimmed.to_string()
}

/// Normalize and check a feed URL for the given source kind.
pub async fn validate_feed_url(raw: &str, kind: SourceKind) -> MirrorResult<Url> {
    let url = Url::parse(&normalize_feed_url(raw))
        .map_err(|e| MirrorError::InvalidUrl(format!("{raw}: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(MirrorError::InvalidUrl(format!(
            "Unsupported scheme '{}'",
            url.scheme()
        )));
    }

    let host = url
        .host()
        .ok_or_else(|| MirrorError::InvalidUrl(format!("{raw}: missing host")))?;

    match kind {
        SourceKind::Icloud => require_provider_host(&host, ICLOUD_HOSTS)?,
        SourceKind::Google => require_provider_host(&host, GOOGLE_HOSTS)?,
        SourceKind::Custom => reject_private_host(&url, host).await?,
    }

    Ok(url)
}

fn require_provider_host(host: &Host<&str>, allowed: &[&str]) -> MirrorResult<()> {
    let ok = match host {
        Host::Domain(domain) => {
            let domain = domain.to_ascii_lowercase();
            allowed
                .iter()
                .any(|base| domain == *base || domain.ends_with(&format!(".{base}")))
        }
        _ => false,
    };

    if ok {
        Ok(())
    } else {
        Err(MirrorError::InvalidUrl(format!(
            "Host '{host}' does not belong to this provider"
        )))
    }
}

async fn reject_private_host(url: &Url, host: Host<&str>) -> MirrorResult<()> {
    let addrs: Vec<IpAddr> = match host {
        Host::Ipv4(ip) => vec![IpAddr::V4(ip)],
        Host::Ipv6(ip) => vec![IpAddr::V6(ip)],
        Host::Domain(domain) => {
            let port = url.port_or_known_default().unwrap_or(443);
            tokio::net::lookup_host((domain, port))
                .await
                .map_err(|e| MirrorError::FetchFailed(format!("Could not resolve {domain}: {e}")))?
                .map(|addr| addr.ip())
                .collect()
        }
    };

    if let Some(blocked) = addrs.iter().find(|ip| is_private_address(ip)) {
        return Err(MirrorError::InvalidUrl(format!(
            "Host resolves to a non-public address ({blocked})"
        )));
    }

    Ok(())
}

pub fn is_private_address(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => is_private_v6(v6),
    }
}

fn is_private_v4(ip: &Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // 100.64.0.0/10 carrier-grade NAT
        || (a == 100 && (b & 0xc0) == 64)
}

fn is_private_v6(ip: &Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_private_v4(&v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link-local
        || (first & 0xffc0) == 0xfe80
}
