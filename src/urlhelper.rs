//! URL/tunnel helper (C9, §4.9): pure functions choosing scheme+host+port
//! for clients, given tunnel-mode inputs. No I/O: the core does not start or
//! query tunnels, it only decides how to point clients at one.
//!
//! Grounded on the decision-table style of `displayNameWithConnectionType`
//! and `connectionURL` in the source tests bundled with the retrieval pack;
//! reimplemented here as plain functions per the "pure functions, no
//! singletons" design note (§9).

use std::net::IpAddr;

/// Inputs to `connectionURL`/`baseURL` (§4.9). All tunnel-related fields are
/// externally supplied; this module never queries a tunnel itself beyond the
/// optional, best-effort Tailscale IP lookup below.
#[derive(Debug, Clone)]
pub struct UrlContext {
    pub host: String,
    pub port: u16,
    pub tailscale_hostname: Option<String>,
    pub tailscale_ip: Option<String>,
    pub is_tailscale_enabled: bool,
    pub prefer_tailscale: bool,
    pub https_available: bool,
    pub is_public: bool,
    pub prefer_ssl: bool,
}

/// Brackets a raw IPv6 literal host for use in a URL authority, leaving
/// everything else (hostnames, already-bracketed literals) untouched.
fn bracket_if_ipv6(host: &str) -> String {
    if host.starts_with('[') {
        return host.to_string();
    }
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(_)) => format!("[{host}]"),
        _ => host.to_string(),
    }
}

/// `baseURL()` (§4.9): always plain HTTP at `host:port`, IPv6 bracketed.
pub fn base_url(ctx: &UrlContext) -> String {
    format!("http://{}:{}", bracket_if_ipv6(&ctx.host), ctx.port)
}

/// `connectionURL()` (§4.9), following the decision table exactly.
pub fn connection_url(ctx: &UrlContext) -> String {
    if ctx.prefer_ssl && ctx.https_available {
        if let Some(hostname) = ctx.tailscale_hostname.as_deref().filter(|h| !h.is_empty()) {
            return format!("https://{hostname}");
        }
        return format!("https://{}", bracket_if_ipv6(&ctx.host));
    }

    let preferred_host = if ctx.is_tailscale_enabled && ctx.prefer_tailscale {
        ctx.tailscale_ip.as_deref().filter(|ip| !ip.is_empty()).unwrap_or(&ctx.host)
    } else {
        &ctx.host
    };
    format!("http://{}:{}", bracket_if_ipv6(preferred_host), ctx.port)
}

/// `apiURL(path)` (§4.9): `connectionURL()` with `path` appended verbatim.
pub fn api_url(ctx: &UrlContext, path: &str) -> String {
    format!("{}{}", connection_url(ctx), path)
}

/// Whether `connectionURL` would produce an `https://` URL for `ctx`.
fn is_ssl_effective(ctx: &UrlContext) -> bool {
    ctx.prefer_ssl && ctx.https_available
}

/// Whether `connectionURL` routes through Tailscale without SSL.
fn is_tailscale_only(ctx: &UrlContext) -> bool {
    !is_ssl_effective(ctx) && ctx.is_tailscale_enabled && ctx.prefer_tailscale && ctx.tailscale_ip.is_some()
}

/// `displayNameWithConnectionType(name)` (§4.9): decorates `name` with a
/// glyph reflecting how a client would actually reach it. The Tailscale
/// glyph is suppressed whenever the SSL glyph already applies.
pub fn display_name_with_connection_type(ctx: &UrlContext, name: &str) -> String {
    if is_ssl_effective(ctx) {
        format!("{name} \u{1F512}")
    } else if ctx.is_public {
        format!("{name} \u{1F310}")
    } else if is_tailscale_only(ctx) {
        format!("{name} \u{1F517}")
    } else {
        name.to_string()
    }
}

/// Best-effort, cached lookup of the local Tailscale IPv4 address via the
/// `tailscale ip -4` subprocess. Returns `None` on any failure; callers
/// treat absence the same as Tailscale being unavailable.
pub fn probe_tailscale_ipv4() -> Option<String> {
    let output = std::process::Command::new("tailscale")
        .args(["ip", "-4"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let ip = String::from_utf8(output.stdout).ok()?;
    let ip = ip.trim();
    if ip.is_empty() {
        None
    } else {
        Some(ip.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_ctx() -> UrlContext {
        UrlContext {
            host: "192.168.1.5".into(),
            port: 4020,
            tailscale_hostname: None,
            tailscale_ip: None,
            is_tailscale_enabled: false,
            prefer_tailscale: false,
            https_available: false,
            is_public: false,
            prefer_ssl: false,
        }
    }

    #[test]
    fn base_url_is_always_http_with_ipv6_bracketed() {
        let ctx = base_ctx();
        assert_eq!(base_url(&ctx), "http://192.168.1.5:4020");

        let mut v6 = base_ctx();
        v6.host = "::1".into();
        assert_eq!(base_url(&v6), "http://[::1]:4020");
    }

    #[test]
    fn connection_url_prefers_tailscale_hostname_over_ssl_host() {
        let mut ctx = base_ctx();
        ctx.prefer_ssl = true;
        ctx.https_available = true;
        ctx.tailscale_hostname = Some("my-box.tailnet.ts.net".into());
        assert_eq!(connection_url(&ctx), "https://my-box.tailnet.ts.net");
    }

    #[test]
    fn connection_url_falls_back_to_plain_https_host() {
        let mut ctx = base_ctx();
        ctx.prefer_ssl = true;
        ctx.https_available = true;
        assert_eq!(connection_url(&ctx), "https://192.168.1.5");
    }

    #[test]
    fn connection_url_uses_tailscale_ip_when_preferred_and_no_ssl() {
        let mut ctx = base_ctx();
        ctx.is_tailscale_enabled = true;
        ctx.prefer_tailscale = true;
        ctx.tailscale_ip = Some("100.64.0.2".into());
        assert_eq!(connection_url(&ctx), "http://100.64.0.2:4020");
    }

    #[test]
    fn connection_url_without_https_available_behaves_like_prefer_ssl_no() {
        let mut ctx = base_ctx();
        ctx.prefer_ssl = true;
        ctx.https_available = false;
        assert_eq!(connection_url(&ctx), "http://192.168.1.5:4020");
    }

    #[test]
    fn api_url_appends_path_to_connection_url() {
        let ctx = base_ctx();
        assert_eq!(api_url(&ctx, "/api/sessions"), "http://192.168.1.5:4020/api/sessions");
    }

    #[test]
    fn display_name_shows_lock_glyph_when_ssl_effective() {
        let mut ctx = base_ctx();
        ctx.prefer_ssl = true;
        ctx.https_available = true;
        assert_eq!(display_name_with_connection_type(&ctx, "laptop"), "laptop \u{1F512}");
    }

    #[test]
    fn display_name_hides_tailscale_glyph_when_ssl_glyph_applies() {
        let mut ctx = base_ctx();
        ctx.prefer_ssl = true;
        ctx.https_available = true;
        ctx.is_tailscale_enabled = true;
        ctx.prefer_tailscale = true;
        ctx.tailscale_ip = Some("100.64.0.2".into());
        assert_eq!(display_name_with_connection_type(&ctx, "laptop"), "laptop \u{1F512}");
    }

    #[test]
    fn display_name_shows_tailscale_glyph_without_ssl() {
        let mut ctx = base_ctx();
        ctx.is_tailscale_enabled = true;
        ctx.prefer_tailscale = true;
        ctx.tailscale_ip = Some("100.64.0.2".into());
        assert_eq!(display_name_with_connection_type(&ctx, "laptop"), "laptop \u{1F517}");
    }

    #[test]
    fn display_name_shows_public_glyph_when_public_and_not_ssl() {
        let mut ctx = base_ctx();
        ctx.is_public = true;
        assert_eq!(display_name_with_connection_type(&ctx, "laptop"), "laptop \u{1F310}");
    }
}
