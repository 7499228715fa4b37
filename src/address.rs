use mailparse::MailAddr;

/// Bucket used when a recipient header carries no parseable address.
pub const UNKNOWN_DOMAIN: &str = "(unknown)";

/// Extract the domain of the first mailbox in an address header value.
///
/// Accepts bare addresses (`a@x.com`), display-name forms
/// (`"Alice" <a@x.com>`), lists and groups. The domain is lowercased.
/// Returns `None` when no address with a non-empty domain can be found.
pub fn parse_domain(address: &str) -> Option<String> {
    let first = first_address(address).unwrap_or_else(|| address.trim().to_string());
    domain_of(&first)
}

/// The first mailbox address found in a header value, if any.
pub fn first_address(header: &str) -> Option<String> {
    let list = mailparse::addrparse(header).ok()?;
    list.iter().find_map(|addr| match addr {
        MailAddr::Single(info) => Some(info.addr.clone()),
        MailAddr::Group(group) => group.addrs.first().map(|info| info.addr.clone()),
    })
}

fn domain_of(addr: &str) -> Option<String> {
    let (_, domain) = addr.rsplit_once('@')?;
    let domain = domain.trim().trim_end_matches('>').trim_end_matches('.');
    if domain.is_empty() || !domain.contains('.') || domain.contains(char::is_whitespace) {
        return None;
    }
    Some(domain.to_ascii_lowercase())
}
