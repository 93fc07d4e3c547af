//! Destination encoded in the first host label.
//!
//! `https---api-example-com---alice.gw.example` decodes to scheme `https`,
//! host `api.example.com`, user `alice`. Inside the host part `-` stands
//! for `.` and `--` for a literal `-`. An optional port segment may sit
//! between host and user: `http---localhost---8080---alice`.
//!
//! Segments are separated by runs of exactly three dashes. Any other run of
//! `n` dashes belongs to the host and decodes to `n / 2` literal dashes,
//! followed by a dot when `n` is odd, so `xn----p1ai-example` is
//! `xn--p1ai.example`.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedDestination {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    pub user: String,
}

impl EncodedDestination {
    /// `scheme://host[:port]`
    pub fn origin(&self) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}", self.scheme, self.host, port),
            None => format!("{}://{}", self.scheme, self.host),
        }
    }
}

/// Decode `-` → `.` and `--` → `-`.
pub fn decode_host(encoded: &str) -> String {
    let mut host = String::with_capacity(encoded.len());
    let mut chars = encoded.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '-' {
            if chars.peek() == Some(&'-') {
                chars.next();
                host.push('-');
            } else {
                host.push('.');
            }
        } else {
            host.push(c);
        }
    }
    host
}

/// Split `label` at runs of exactly three dashes.
fn segments(label: &str) -> Vec<&str> {
    let bytes = label.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'-' {
            i += 1;
            continue;
        }
        let run = i;
        while i < bytes.len() && bytes[i] == b'-' {
            i += 1;
        }
        if i - run == 3 {
            parts.push(&label[start..run]);
            start = i;
        }
    }
    parts.push(&label[start..]);
    parts
}

/// Parse the first label of `host_header`, if it carries an encoding.
pub fn parse(host_header: &str) -> Option<EncodedDestination> {
    let host = host_header.split(':').next().unwrap_or(host_header);
    let label = host.split('.').next()?;
    let parts = segments(label);
    let (scheme, encoded_host, port, user) = match parts.as_slice() {
        [scheme, host, user] => (*scheme, *host, None, *user),
        [scheme, host, port, user] => (*scheme, *host, Some(*port), *user),
        _ => return None,
    };
    if scheme.is_empty() || encoded_host.is_empty() || user.is_empty() {
        return None;
    }
    let port = match port {
        Some(p) => Some(p.parse::<u16>().ok()?),
        None => None,
    };
    Some(EncodedDestination {
        scheme: scheme.to_ascii_lowercase(),
        host: decode_host(encoded_host),
        port,
        user: user.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_dots_and_dashes() {
        assert_eq!(decode_host("api-example-com"), "api.example.com");
        assert_eq!(decode_host("my--api-example-com"), "my-api.example.com");
        assert_eq!(decode_host("a----b"), "a--b");
    }

    #[test]
    fn parses_first_label() {
        let parsed = parse("https---my--api-example-com---alice.gw.example:8443").unwrap();
        assert_eq!(parsed.scheme, "https");
        assert_eq!(parsed.host, "my-api.example.com");
        assert_eq!(parsed.user, "alice");
        assert_eq!(parsed.origin(), "https://my-api.example.com");
    }

    #[test]
    fn escaped_dash_runs_stay_in_the_host() {
        let parsed = parse("https---xn----p1ai-example---alice.gw.example").unwrap();
        assert_eq!(parsed.host, "xn--p1ai.example");
        assert_eq!(parsed.user, "alice");
        assert_eq!(parsed.port, None);

        let parsed = parse("http---xn----80ak6aa92e-com---8443---bob").unwrap();
        assert_eq!(parsed.origin(), "http://xn--80ak6aa92e.com:8443");

        assert_eq!(segments("a-----b---c"), vec!["a-----b", "c"]);
    }

    #[test]
    fn optional_port_segment() {
        let parsed = parse("http---127-0-0-1---8080---bob.localhost").unwrap();
        assert_eq!(parsed.host, "127.0.0.1");
        assert_eq!(parsed.port, Some(8080));
        assert_eq!(parsed.origin(), "http://127.0.0.1:8080");
        assert!(parse("http---host---notaport---bob").is_none());
    }

    #[test]
    fn plain_hosts_are_not_encodings() {
        assert!(parse("gateway.example.com").is_none());
        assert!(parse("localhost:8080").is_none());
        assert!(parse("https------alice").is_none());
    }
}
