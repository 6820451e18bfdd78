use std::net::{IpAddr, Ipv6Addr};
use thiserror::Error;
use url::Url;

/// Reasons a candidate feed URL is refused before any request is made.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    #[error("URL has no host")]
    MissingHost,
    #[error("Localhost not allowed")]
    Localhost,
    #[error("Private address not allowed: {0}")]
    PrivateAddress(IpAddr),
}

/// Parse and vet a feed URL supplied by a user.
///
/// Only `http`/`https` URLs with a public host pass. Loopback, private,
/// link-local and unspecified addresses are refused, including IPv4 addresses
/// written in IPv6-mapped form. The fragment is dropped so that
/// `https://a.example/feed#top` and `https://a.example/feed` register as the
/// same feed.
///
/// ```
/// use gleaner::util::validate_url;
///
/// let url = validate_url("https://example.com/feed.xml#latest").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/feed.xml");
/// assert!(validate_url("http://10.0.0.1/feed").is_err());
/// ```
pub fn validate_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let mut url = Url::parse(url_str.trim())?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(UrlValidationError::UnsupportedScheme(url.scheme().to_owned()));
    }

    match url.host() {
        None => return Err(UrlValidationError::MissingHost),
        Some(url::Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            if domain == "localhost" || domain.ends_with(".localhost") {
                return Err(UrlValidationError::Localhost);
            }
        }
        Some(url::Host::Ipv4(ip)) => check_ip(IpAddr::V4(ip))?,
        Some(url::Host::Ipv6(ip)) => check_ip(unmap(ip))?,
    }

    url.set_fragment(None);
    Ok(url)
}

fn unmap(ip: Ipv6Addr) -> IpAddr {
    match ip.to_ipv4_mapped() {
        Some(v4) => IpAddr::V4(v4),
        None => IpAddr::V6(ip),
    }
}

fn check_ip(ip: IpAddr) -> Result<(), UrlValidationError> {
    if ip.is_loopback() {
        return Err(UrlValidationError::Localhost);
    }
    let private = match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_link_local() || v4.is_unspecified(),
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            // fc00::/7 unique local, fe80::/10 link local
            v6.is_unspecified() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
    };
    if private {
        return Err(UrlValidationError::PrivateAddress(ip));
    }
    Ok(())
}
