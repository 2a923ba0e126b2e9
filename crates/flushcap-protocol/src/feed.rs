//! Changes feed addressing.

/// Path of the changes feed on every instance.
pub const CHANGES_PATH: &str = "/changes";

/// Turns a configured forward target into a WebSocket URL.
///
/// Accepts `host:port`, `ws://`/`wss://` URLs, or `http://`/`https://` URLs
/// (mapped to their WebSocket counterparts). When the URL has no path the
/// changes feed path is appended.
pub fn changes_feed_url(address: &str) -> String {
    let address = address.trim();
    let (scheme, rest) = match address.split_once("://") {
        Some(("http", rest)) => ("ws", rest),
        Some(("https", rest)) => ("wss", rest),
        Some((scheme, rest)) => (scheme, rest),
        None => ("ws", address),
    };

    let rest = rest.trim_end_matches('/');
    if rest.contains('/') {
        format!("{scheme}://{rest}")
    } else {
        format!("{scheme}://{rest}{CHANGES_PATH}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_port_gets_scheme_and_path() {
        assert_eq!(
            changes_feed_url("10.0.0.7:8080"),
            "ws://10.0.0.7:8080/changes"
        );
    }

    #[test]
    fn test_http_schemes_are_mapped() {
        assert_eq!(
            changes_feed_url("http://toilets.local"),
            "ws://toilets.local/changes"
        );
        assert_eq!(
            changes_feed_url("https://toilets.example.com/"),
            "wss://toilets.example.com/changes"
        );
    }

    #[test]
    fn test_explicit_path_is_kept() {
        assert_eq!(
            changes_feed_url("ws://upstream:9000/changes"),
            "ws://upstream:9000/changes"
        );
        assert_eq!(
            changes_feed_url("wss://upstream/feed/v1"),
            "wss://upstream/feed/v1"
        );
    }
}
