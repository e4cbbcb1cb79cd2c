//! HTML → PDF through headless Chromium, with SSRF checks on the target URL.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use async_trait::async_trait;
use tracing::{debug, warn};
use url::{Host, Url};

use super::{ConversionContext, ConvertedArtifact, Converter};
use crate::error::EngineError;
use crate::exec::CommandSpec;
use crate::tool::{Binary, JobOptions, ToolId};

const PAGE: &str = "page.pdf";

/// Parse and vet the `url` option.
///
/// Only absolute `http`/`https` URLs pass. With `hardened` set, literal
/// loopback/private/link-local hosts and `localhost` names are refused too.
pub fn validate_target_url(raw: &str, hardened: bool) -> Result<Url, EngineError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(EngineError::validation("Missing URL option for html-to-pdf."));
    }
    let url = Url::parse(raw).map_err(|_| EngineError::validation("Invalid URL option."))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(EngineError::validation("Only http/https URLs are allowed."));
    }
    let Some(host) = url.host() else {
        return Err(EngineError::validation("Invalid URL option."));
    };
    if hardened {
        let blocked = match host {
            Host::Domain(name) => {
                let name = name.trim_end_matches('.').to_ascii_lowercase();
                name == "localhost" || name.ends_with(".localhost")
            }
            Host::Ipv4(ip) => is_blocked_ip(IpAddr::V4(ip)),
            Host::Ipv6(ip) => is_blocked_ip(IpAddr::V6(ip)),
        };
        if blocked {
            return Err(blocked_target());
        }
    }
    Ok(url)
}

fn blocked_target() -> EngineError {
    EngineError::validation("URL targets a local or private network address, which is not allowed.")
}

/// Loopback, private, link-local, CGNAT, unspecified and broadcast ranges.
pub fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_blocked_v4(v4),
            None => is_blocked_v6(v6),
        },
    }
}

fn is_blocked_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || a == 0
        || (a == 100 && (b & 0xc0) == 64)
}

fn is_blocked_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
}

/// Resolve a domain host and refuse it if any address is internal.
async fn check_resolved(url: &Url) -> Result<(), EngineError> {
    let Some(Host::Domain(name)) = url.host() else {
        return Ok(());
    };
    let port = url.port_or_known_default().unwrap_or(80);
    let addrs = tokio::net::lookup_host((name, port))
        .await
        .map_err(|_| EngineError::validation(format!("Could not resolve host: {name}")))?;
    for addr in addrs {
        if is_blocked_ip(addr.ip()) {
            warn!(host = name, resolved = %addr.ip(), "html-to-pdf target resolves to internal address");
            return Err(blocked_target());
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChromiumConverter;

#[async_trait]
impl Converter for ChromiumConverter {
    fn tools(&self) -> &'static [ToolId] {
        &[ToolId::HtmlToPdf]
    }

    fn preflight(&self, _tool: ToolId, options: &JobOptions, hardened: bool) -> Result<(), EngineError> {
        validate_target_url(&options.get_str("url").unwrap_or_default(), hardened).map(|_| ())
    }

    async fn convert(&self, ctx: &ConversionContext<'_>) -> Result<ConvertedArtifact, EngineError> {
        let url = validate_target_url(&ctx.options.get_str("url").unwrap_or_default(), ctx.hardened)?;
        if ctx.hardened {
            check_resolved(&url).await?;
        }
        debug!(job_id = %ctx.job_id, host = url.host_str().unwrap_or_default(), "printing page");

        let output = ctx.output_path(PAGE);
        let spec = CommandSpec::new(Binary::Chromium)
            .args([
                "--headless",
                "--disable-gpu",
                "--disable-extensions",
                "--no-first-run",
                "--no-default-browser-check",
            ])
            .arg_with_path("--user-data-dir=", &ctx.workspace.root().join("chromium-profile"))
            .arg_with_path("--print-to-pdf=", &output)
            .arg(url.as_str());

        let advisory = ctx.execute(&spec).await?;
        ctx.expect_output(spec.program(), output, advisory).await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn only_http_and_https_pass() {
        for bad in ["javascript:alert(1)", "ftp://x", "file:///etc/passwd", "data:text/html,hi", "not a url", ""] {
            assert!(
                matches!(validate_target_url(bad, false), Err(EngineError::Validation(_))),
                "{bad} was accepted"
            );
        }
        let url = validate_target_url("https://example.com", true).unwrap();
        assert_eq!(url.as_str(), "https://example.com/");
    }

    #[test]
    fn hardened_mode_blocks_internal_hosts() {
        for target in [
            "http://127.0.0.1/admin",
            "http://localhost:3000",
            "http://api.localhost/",
            "http://10.1.2.3",
            "http://192.168.0.1",
            "http://172.16.0.1",
            "http://172.31.255.255",
            "http://169.254.169.254/latest/meta-data",
            "http://0.0.0.0",
            "http://[::1]/",
            "http://[fd00::1]/",
            "http://[::ffff:127.0.0.1]/",
            "http://2130706433/",
        ] {
            assert!(validate_target_url(target, true).is_err(), "{target} was accepted");
        }
        assert!(validate_target_url("http://172.32.0.1", true).is_ok());
        assert!(validate_target_url("http://127.0.0.1/admin", false).is_ok());
    }

    #[test]
    fn preflight_reads_url_option() {
        let missing = JobOptions::default();
        let err = ChromiumConverter
            .preflight(ToolId::HtmlToPdf, &missing, true)
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing URL option for html-to-pdf.");
        let ok = JobOptions::parse(Some(r#"{"url":"https://example.com"}"#)).unwrap();
        assert!(ChromiumConverter.preflight(ToolId::HtmlToPdf, &ok, true).is_ok());
    }

    #[test]
    fn cgnat_and_public_addresses() {
        assert!(is_blocked_ip("100.64.0.1".parse().unwrap()));
        assert!(!is_blocked_ip("100.128.0.1".parse().unwrap()));
        assert!(!is_blocked_ip("93.184.216.34".parse().unwrap()));
        assert!(!is_blocked_ip("2606:2800:220:1::".parse().unwrap()));
    }
}
