//! Outbound URL validation for provider endpoints.

use std::net::{IpAddr, Ipv6Addr};

use url::{Host, Url};

use crate::error::{GeppettoError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboundUrlOptions {
    pub allow_http: bool,
    pub allow_local_networks: bool,
}

/// Reject URLs a provider client should never call: non-https schemes (http
/// only when allowed), missing hosts, and local or private destinations
/// unless local networks are allowed. Unspecified and multicast addresses
/// are always rejected.
pub fn validate_outbound_url(raw: &str, opts: OutboundUrlOptions) -> Result<Url> {
    let parsed =
        Url::parse(raw).map_err(|err| GeppettoError::config(format!("invalid URL: {err}")))?;

    match parsed.scheme() {
        "https" => {}
        "http" if opts.allow_http => {}
        "http" => return Err(GeppettoError::config("http scheme is not allowed")),
        other => {
            return Err(GeppettoError::config(format!(
                "unsupported URL scheme {other:?}"
            )))
        }
    }

    let ip = match parsed.host() {
        None => return Err(GeppettoError::config("URL host is required")),
        Some(Host::Domain(domain)) => {
            let host = domain.to_ascii_lowercase();
            if host.is_empty() {
                return Err(GeppettoError::config("URL host is required"));
            }
            if !opts.allow_local_networks
                && (host == "localhost" || host.ends_with(".localhost") || host.ends_with(".local"))
            {
                return Err(GeppettoError::config(format!(
                    "local hostname {host:?} is not allowed"
                )));
            }
            None
        }
        Some(Host::Ipv4(v4)) => Some(IpAddr::V4(v4)),
        Some(Host::Ipv6(v6)) => Some(match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        }),
    };

    if let Some(ip) = ip {
        if ip.is_unspecified() || ip.is_multicast() {
            return Err(GeppettoError::config(format!(
                "disallowed IP address {ip:?}"
            )));
        }
        if !opts.allow_local_networks && is_local_ip(ip) {
            return Err(GeppettoError::config(format!(
                "local network IP {ip} is not allowed"
            )));
        }
    }

    Ok(parsed)
}

fn is_local_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => v6.is_loopback() || is_unique_local(&v6) || is_unicast_link_local(&v6),
    }
}

fn is_unique_local(v6: &Ipv6Addr) -> bool {
    (v6.segments()[0] & 0xfe00) == 0xfc00
}

fn is_unicast_link_local(v6: &Ipv6Addr) -> bool {
    (v6.segments()[0] & 0xffc0) == 0xfe80
}
