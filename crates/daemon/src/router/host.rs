/// Host-header parsing for the public listener
///
/// `example.3th.ws` names blockchain-registered content directly;
/// `onion.example.3th.ws` asks for a redirect to its hidden-service
/// address instead.

/// A parsed gateway request name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedName {
    /// Registered label with the gateway suffix removed.
    pub label: String,
    /// True when the onion marker prefix asked for a redirect.
    pub onion_mode: bool,
}

/// Split a Host header into the registered label and mode.
///
/// Returns `None` for the bare gateway domain and for hosts outside the
/// gateway suffix entirely.
pub fn parse_host(host: &str, suffix: &str, marker: &str) -> Option<RequestedName> {
    let host = host
        .rsplit_once(':')
        .map(|(name, _port)| name)
        .unwrap_or(host)
        .trim()
        .to_lowercase();

    let subdomain = host.strip_suffix(&format!(".{}", suffix))?;
    if subdomain.is_empty() {
        return None;
    }

    let marker_prefix = format!("{}.", marker);
    if let Some(label) = subdomain.strip_prefix(&marker_prefix) {
        if label.is_empty() {
            return None;
        }
        return Some(RequestedName {
            label: label.to_string(),
            onion_mode: true,
        });
    }

    Some(RequestedName {
        label: subdomain.to_string(),
        onion_mode: false,
    })
}
