//! Discovery datagram codec.
//!
//! Discovery is an SSDP-flavoured exchange over UDP multicast: the searching
//! side broadcasts an `M-SEARCH` datagram carrying a service-type token, a
//! responder whose token matches replies unicast with its bare sensor id.
//! This module only builds and parses the datagrams; the sockets live with
//! the hub (searcher) and sensor (responder) crates.

use crate::defaults;

/// A parsed `M-SEARCH` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRequest {
    pub host: Option<String>,
    pub st: Option<String>,
    pub mx: Option<u32>,
    pub man: Option<String>,
}

impl DiscoveryRequest {
    /// Whether this request is searching for our service.
    pub fn service_matches(&self) -> bool {
        self.st.as_deref() == Some(defaults::SERVICE_TOKEN)
    }

    /// Parse a datagram. Returns `None` for anything that is not an
    /// `M-SEARCH` request; a malformed datagram is silence, never an error.
    ///
    /// Header parsing is line-oriented and tolerant: unknown headers are
    /// ignored, values are everything after the first `:` (the `HOST`
    /// value itself contains one), surrounding whitespace is dropped.
    pub fn parse(datagram: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(datagram).ok()?;
        let mut lines = text.lines();

        let start = lines.next()?.trim();
        if !start.starts_with("M-SEARCH") {
            return None;
        }

        let mut request = Self {
            host: None,
            st: None,
            mx: None,
            man: None,
        };

        for line in lines {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match name.trim().to_uppercase().as_str() {
                "HOST" => request.host = Some(value.to_string()),
                "ST" => request.st = Some(value.to_string()),
                "MX" => request.mx = value.parse().ok(),
                "MAN" => request.man = Some(value.trim_matches('"').to_string()),
                _ => {}
            }
        }

        Some(request)
    }
}

/// Render the `M-SEARCH` request the searching side broadcasts.
pub fn build_search_request(group: &str, port: u16) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST:{group}:{port}\r\n\
         ST:{st}\r\n\
         MX:{mx}\r\n\
         MAN:\"ssdp:discover\"\r\n\
         \r\n",
        group = group,
        port = port,
        st = defaults::SERVICE_TOKEN,
        mx = defaults::DISCOVERY_MX,
    )
}

/// Parse a discovery reply: the bare sensor id string.
///
/// Returns `None` for empty or non-UTF-8 bodies.
pub fn parse_search_reply(datagram: &[u8]) -> Option<String> {
    let id = std::str::from_utf8(datagram).ok()?.trim();
    if id.is_empty() {
        return None;
    }
    Some(id.to_string())
}
