use mailparse::MailAddr;
use std::net::{IpAddr, SocketAddr};

/// Header set by reverse proxies with the originating client address.
pub const FORWARDED_FOR: &str = "x-forwarded-for";

/// Extracts the email address from a `Name <addr>` or bare `addr` string.
///
/// Return `None` if parsing fails.
///
/// Returns the first address if multiple are present.
pub fn extract_address(input: &str) -> Option<String> {
    mailparse::addrparse(input.trim())
        .ok()
        .and_then(|addr| match addr.first() {
            Some(MailAddr::Single(single)) => Some(single.addr.clone()),
            Some(MailAddr::Group(group)) => group.addrs.first().map(|single| single.addr.clone()),
            None => None,
        })
}

/// Resolves the identity a submission is rate-limited by.
///
/// Uses the first entry of the forwarded-for header when it is an IP address,
/// with or without a port, otherwise the address of the connection.
pub fn resolve_identity(forwarded_for: Option<&str>, peer: SocketAddr) -> String {
    forwarded_for
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .and_then(|first| {
            first
                .parse::<IpAddr>()
                .or_else(|_| first.parse::<SocketAddr>().map(|addr| addr.ip()))
                .ok()
        })
        .unwrap_or_else(|| peer.ip())
        .to_string()
}
