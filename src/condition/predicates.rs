//! Built-in predicates other than endpoint globbing.
//!
//! Each predicate is built once from its typed options when configuration is
//! loaded; evaluation only reads the telemetry tree.

use std::collections::BTreeMap;
use std::net::IpAddr;

use rand::Rng;
use serde::Deserialize;
use serde_json::Value;
use serde_json_path::JsonPath;

use crate::condition::{EvaluationError, Predicate};
use crate::telemetry::{AnalyzableContent, Body, Header};

/// Default size cap for JSON body inspection (1 MiB).
pub const DEFAULT_JSON_BODY_LIMIT: usize = 1024 * 1024;

/// Which side of the exchange a predicate inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    #[default]
    Request,
    Response,
}

fn side_header(content: &AnalyzableContent, side: Side) -> Result<&Header, EvaluationError> {
    match side {
        Side::Request => content
            .request()
            .map(|r| &r.header)
            .ok_or(EvaluationError::MissingComponent("request")),
        Side::Response => content
            .response()
            .map(|r| &r.header)
            .ok_or(EvaluationError::MissingComponent("response")),
    }
}

fn side_body(content: &AnalyzableContent, side: Side) -> Result<&Body, EvaluationError> {
    match side {
        Side::Request => content
            .request()
            .map(|r| &r.body)
            .ok_or(EvaluationError::MissingComponent("request")),
        Side::Response => content
            .response()
            .map(|r| &r.body)
            .ok_or(EvaluationError::MissingComponent("response")),
    }
}

/// A single string or a list of strings in options.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }
}

// --- Initiator IP ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IpBlock {
    network: IpAddr,
    prefix: u8,
}

impl IpBlock {
    fn parse(raw: &str) -> Result<Self, EvaluationError> {
        let invalid = |reason: String| EvaluationError::InvalidOption {
            option: "allowed",
            reason,
        };
        let (addr, prefix) = match raw.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (raw, None),
        };
        let network: IpAddr = addr
            .trim()
            .parse()
            .map_err(|_| invalid(format!("`{}` is not an IP address", raw)))?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(p) => p
                .trim()
                .parse::<u8>()
                .ok()
                .filter(|p| *p <= max)
                .ok_or_else(|| invalid(format!("`{}` has an invalid prefix length", raw)))?,
            None => max,
        };
        Ok(Self { network, prefix })
    }

    fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                prefix_eq(u32::from(net) as u128, u32::from(ip) as u128, self.prefix, 32)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                prefix_eq(u128::from(net), u128::from(ip), self.prefix, 128)
            }
            (IpAddr::V6(net), IpAddr::V4(ip)) => net
                .to_ipv4_mapped()
                .map(|net| self.prefix >= 96 && prefix_eq(u32::from(net) as u128, u32::from(ip) as u128, self.prefix - 96, 32))
                .unwrap_or(false),
            (IpAddr::V4(_), IpAddr::V6(ip)) => ip
                .to_ipv4_mapped()
                .map(|ip| self.contains(IpAddr::V4(ip)))
                .unwrap_or(false),
        }
    }
}

fn prefix_eq(a: u128, b: u128, prefix: u8, width: u8) -> bool {
    if prefix == 0 {
        return true;
    }
    let shift = u32::from(width - prefix);
    (a >> shift) == (b >> shift)
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitiatorIpOptions {
    pub allowed: Vec<String>,
}

/// True when the client address is in the allow-list (addresses or CIDR blocks).
#[derive(Debug, Clone)]
pub struct InitiatorIpPredicate {
    allowed: Vec<IpBlock>,
}

impl InitiatorIpPredicate {
    pub fn new(options: InitiatorIpOptions) -> Result<Self, EvaluationError> {
        let allowed = options
            .allowed
            .iter()
            .map(|raw| IpBlock::parse(raw))
            .collect::<Result<_, _>>()?;
        Ok(Self { allowed })
    }
}

impl Predicate for InitiatorIpPredicate {
    fn class(&self) -> &'static str {
        "initiator_ip"
    }

    fn self_evaluate(&self, content: &AnalyzableContent) -> Result<bool, EvaluationError> {
        let ip = content
            .request()
            .ok_or(EvaluationError::MissingComponent("request"))?
            .remote_addr
            .ok_or_else(|| EvaluationError::MalformedInput("remote address unknown".into()))?;
        Ok(self.allowed.iter().any(|block| block.contains(ip)))
    }
}

// --- Header field ---

#[derive(Debug, Clone, Deserialize)]
pub struct HeaderOptions {
    #[serde(default)]
    pub side: Side,
    pub name: String,
    pub values: OneOrMany,
}

/// Exact, order-sensitive match of a header's trimmed value segments.
#[derive(Debug, Clone)]
pub struct HeaderPredicate {
    side: Side,
    name: String,
    expected: Vec<String>,
}

impl HeaderPredicate {
    pub fn new(options: HeaderOptions) -> Result<Self, EvaluationError> {
        if options.name.trim().is_empty() {
            return Err(EvaluationError::InvalidOption {
                option: "name",
                reason: "header name is empty".into(),
            });
        }
        Ok(Self {
            side: options.side,
            name: options.name,
            expected: options
                .values
                .into_vec()
                .into_iter()
                .map(|v| v.trim().to_string())
                .collect(),
        })
    }
}

impl Predicate for HeaderPredicate {
    fn class(&self) -> &'static str {
        "header"
    }

    fn self_evaluate(&self, content: &AnalyzableContent) -> Result<bool, EvaluationError> {
        let header = side_header(content, self.side)?;
        Ok(header
            .field(&self.name)
            .map(|field| field.segments() == self.expected)
            .unwrap_or(false))
    }
}

// --- Query parameters ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMatchMode {
    /// The query holds exactly the expected parameters and values.
    All,
    /// The query holds at least the expected parameters and values.
    #[default]
    Contains,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryOptions {
    pub parameters: BTreeMap<String, OneOrMany>,
    #[serde(default)]
    pub mode: QueryMatchMode,
}

type ParameterSet = BTreeMap<String, Vec<String>>;

fn parse_query(query: &str) -> ParameterSet {
    let mut set = ParameterSet::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        set.entry(key.into_owned()).or_default().push(value.into_owned());
    }
    for values in set.values_mut() {
        values.sort();
    }
    set
}

/// Order-insensitive comparison of query parameters.
#[derive(Debug, Clone)]
pub struct QueryParameterPredicate {
    expected: ParameterSet,
    mode: QueryMatchMode,
}

impl QueryParameterPredicate {
    pub fn new(options: QueryOptions) -> Result<Self, EvaluationError> {
        if options.parameters.is_empty() {
            return Err(EvaluationError::InvalidOption {
                option: "parameters",
                reason: "no parameters given".into(),
            });
        }
        let expected = options
            .parameters
            .into_iter()
            .map(|(key, values)| {
                let mut values = values.into_vec();
                values.sort();
                (key, values)
            })
            .collect();
        Ok(Self {
            expected,
            mode: options.mode,
        })
    }
}

/// `needles` ⊆ `haystack` as multisets; both sorted.
fn is_sub_multiset(needles: &[String], haystack: &[String]) -> bool {
    let mut rest = haystack.iter();
    needles.iter().all(|needle| rest.by_ref().any(|h| h == needle))
}

impl Predicate for QueryParameterPredicate {
    fn class(&self) -> &'static str {
        "query_parameter"
    }

    fn self_evaluate(&self, content: &AnalyzableContent) -> Result<bool, EvaluationError> {
        let request = content
            .request()
            .ok_or(EvaluationError::MissingComponent("request"))?;
        let actual = parse_query(request.query.as_deref().unwrap_or(""));

        Ok(match self.mode {
            QueryMatchMode::All => actual == self.expected,
            QueryMatchMode::Contains => self.expected.iter().all(|(key, values)| {
                actual
                    .get(key)
                    .map(|present| is_sub_multiset(values, present))
                    .unwrap_or(false)
            }),
        })
    }
}

// --- JSON body ---

#[derive(Debug, Clone, Deserialize)]
pub struct JsonBodyOptions {
    #[serde(default)]
    pub side: Side,
    pub path: String,
    pub expected: Value,
    #[serde(default)]
    pub max_body_size: Option<usize>,
}

/// Evaluates a JSONPath against the body and compares the results.
///
/// Matches when the result list equals `[expected]`, or equals `expected`
/// itself when that is an array.
#[derive(Debug, Clone)]
pub struct JsonBodyPredicate {
    side: Side,
    path: JsonPath,
    expected: Value,
    max_body_size: usize,
}

impl JsonBodyPredicate {
    pub fn new(options: JsonBodyOptions, default_limit: usize) -> Result<Self, EvaluationError> {
        let path = JsonPath::parse(&options.path).map_err(|e| EvaluationError::InvalidOption {
            option: "path",
            reason: e.to_string(),
        })?;
        Ok(Self {
            side: options.side,
            path,
            expected: options.expected,
            max_body_size: options.max_body_size.unwrap_or(default_limit),
        })
    }
}

impl Predicate for JsonBodyPredicate {
    fn class(&self) -> &'static str {
        "json_body"
    }

    fn self_evaluate(&self, content: &AnalyzableContent) -> Result<bool, EvaluationError> {
        let body = side_body(content, self.side)?;
        if !body.is_analyzable() {
            return Err(EvaluationError::BodyNotAnalyzable);
        }
        if body.retained_length() > self.max_body_size {
            return Err(EvaluationError::BodyTooLarge {
                size: body.retained_length(),
                limit: self.max_body_size,
            });
        }
        let document: Value = serde_json::from_slice(body.as_slice())
            .map_err(|e| EvaluationError::MalformedInput(format!("body is not JSON: {}", e)))?;

        let found: Vec<&Value> = self.path.query(&document).all();
        let single = found.len() == 1 && found[0] == &self.expected;
        let list = match &self.expected {
            Value::Array(items) => items.iter().eq(found.iter().copied()),
            _ => false,
        };
        Ok(single || list)
    }
}

// --- Random ---

#[derive(Debug, Clone, Deserialize)]
pub struct RandomOptions {
    pub percentage: f64,
}

/// Weighted coin flip: true with `percentage` percent probability.
#[derive(Debug, Clone)]
pub struct RandomPredicate {
    percentage: f64,
}

impl RandomPredicate {
    pub fn new(options: RandomOptions) -> Result<Self, EvaluationError> {
        if !(0.0..=100.0).contains(&options.percentage) {
            return Err(EvaluationError::InvalidOption {
                option: "percentage",
                reason: format!("{} is outside 0..=100", options.percentage),
            });
        }
        Ok(Self {
            percentage: options.percentage,
        })
    }
}

impl Predicate for RandomPredicate {
    fn class(&self) -> &'static str {
        "random"
    }

    fn self_evaluate(&self, _content: &AnalyzableContent) -> Result<bool, EvaluationError> {
        let draw: f64 = rand::thread_rng().gen_range(0.0..100.0);
        Ok(draw < self.percentage)
    }
}

// --- Status code ---

/// A three-character status pattern, `X` matching any digit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPattern([Option<u8>; 3]);

impl StatusPattern {
    pub fn parse(raw: &str) -> Result<Self, EvaluationError> {
        let invalid = || EvaluationError::InvalidOption {
            option: "patterns",
            reason: format!("`{}` is not a status pattern", raw),
        };
        let chars: Vec<char> = raw.trim().chars().collect();
        if chars.len() != 3 {
            return Err(invalid());
        }
        let mut digits = [None; 3];
        for (slot, c) in digits.iter_mut().zip(chars) {
            *slot = match c {
                'x' | 'X' => None,
                d => Some(d.to_digit(10).ok_or_else(invalid)? as u8),
            };
        }
        Ok(Self(digits))
    }

    pub fn matches(&self, status: u16) -> bool {
        let digits = [
            (status / 100 % 10) as u8,
            (status / 10 % 10) as u8,
            (status % 10) as u8,
        ];
        status < 1000
            && self
                .0
                .iter()
                .zip(digits)
                .all(|(expected, actual)| expected.map_or(true, |e| e == actual))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusCodeOptions {
    pub patterns: Vec<String>,
}

/// Matches the effective response status against patterns like `4XX`.
#[derive(Debug, Clone)]
pub struct StatusCodePredicate {
    patterns: Vec<StatusPattern>,
}

impl StatusCodePredicate {
    pub fn new(options: StatusCodeOptions) -> Result<Self, EvaluationError> {
        let patterns = options
            .patterns
            .iter()
            .map(|p| StatusPattern::parse(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }
}

impl Predicate for StatusCodePredicate {
    fn class(&self) -> &'static str {
        "status_code"
    }

    fn self_evaluate(&self, content: &AnalyzableContent) -> Result<bool, EvaluationError> {
        let status = content
            .effective_status()
            .ok_or(EvaluationError::MissingComponent("response status"))?;
        Ok(self.patterns.iter().any(|p| p.matches(status)))
    }
}

// --- Destination round trip (SLA) ---

#[derive(Debug, Clone, Deserialize)]
pub struct RoundTripOptions {
    #[serde(default)]
    pub slower_than_ms: Option<u64>,
    #[serde(default)]
    pub faster_than_ms: Option<u64>,
}

/// Compares the destination round trip against thresholds.
#[derive(Debug, Clone)]
pub struct RoundTripPredicate {
    slower_than: Option<f64>,
    faster_than: Option<f64>,
}

impl RoundTripPredicate {
    pub fn new(options: RoundTripOptions) -> Result<Self, EvaluationError> {
        if options.slower_than_ms.is_none() && options.faster_than_ms.is_none() {
            return Err(EvaluationError::InvalidOption {
                option: "slower_than_ms",
                reason: "one of slower_than_ms / faster_than_ms is required".into(),
            });
        }
        Ok(Self {
            slower_than: options.slower_than_ms.map(|ms| ms as f64 / 1000.0),
            faster_than: options.faster_than_ms.map(|ms| ms as f64 / 1000.0),
        })
    }
}

impl Predicate for RoundTripPredicate {
    fn class(&self) -> &'static str {
        "destination_round_trip"
    }

    fn self_evaluate(&self, content: &AnalyzableContent) -> Result<bool, EvaluationError> {
        let rtt = content
            .timing()
            .ok_or(EvaluationError::MissingComponent("timing"))?
            .destination_round_trip()
            .ok_or_else(|| EvaluationError::MalformedInput("no destination round trip recorded".into()))?;
        Ok(self.slower_than.map_or(true, |t| rtt > t) && self.faster_than.map_or(true, |t| rtt < t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{Component, RequestInfo, ResponseInfo, Timing};
    use serde_json::json;

    fn with_request(f: impl FnOnce(&mut RequestInfo)) -> AnalyzableContent {
        let mut request = RequestInfo::new("GET", "/", 1024);
        f(&mut request);
        let mut content = AnalyzableContent::new();
        content.add_component(Component::Request(request));
        content
    }

    fn with_response(f: impl FnOnce(&mut ResponseInfo)) -> AnalyzableContent {
        let mut response = ResponseInfo::new(1024);
        f(&mut response);
        let mut content = AnalyzableContent::new();
        content.add_component(Component::Response(response));
        content
    }

    #[test]
    fn initiator_ip_exact_and_cidr() {
        let predicate = InitiatorIpPredicate::new(InitiatorIpOptions {
            allowed: vec!["10.0.0.0/8".into(), "192.168.1.7".into(), "2001:db8::/32".into()],
        })
        .unwrap();

        for (ip, expected) in [
            ("10.42.1.1", true),
            ("11.0.0.1", false),
            ("192.168.1.7", true),
            ("192.168.1.8", false),
            ("2001:db8::1", true),
            ("2001:db9::1", false),
            ("::ffff:10.1.2.3", true),
        ] {
            let content = with_request(|r| r.remote_addr = Some(ip.parse().unwrap()));
            assert_eq!(predicate.self_evaluate(&content).unwrap(), expected, "{}", ip);
        }
    }

    #[test]
    fn initiator_ip_rejects_bad_entries() {
        assert!(InitiatorIpPredicate::new(InitiatorIpOptions {
            allowed: vec!["10.0.0.0/33".into()],
        })
        .is_err());
        assert!(InitiatorIpPredicate::new(InitiatorIpOptions {
            allowed: vec!["not-an-ip".into()],
        })
        .is_err());
    }

    #[test]
    fn header_match_is_trimmed_and_ordered() {
        let predicate = HeaderPredicate::new(HeaderOptions {
            side: Side::Request,
            name: "accept".into(),
            values: OneOrMany::Many(vec!["text/html".into(), " application/json".into()]),
        })
        .unwrap();

        let content = with_request(|r| r.header.add("Accept", "text/html ,  application/json"));
        assert!(predicate.self_evaluate(&content).unwrap());

        let content = with_request(|r| r.header.add("Accept", "application/json, text/html"));
        assert!(!predicate.self_evaluate(&content).unwrap());

        let content = with_request(|_| {});
        assert!(!predicate.self_evaluate(&content).unwrap());
    }

    #[test]
    fn header_on_response_side_needs_response() {
        let predicate = HeaderPredicate::new(HeaderOptions {
            side: Side::Response,
            name: "content-type".into(),
            values: OneOrMany::One("application/json".into()),
        })
        .unwrap();
        assert_eq!(
            predicate.self_evaluate(&with_request(|_| {})),
            Err(EvaluationError::MissingComponent("response"))
        );
        let content = with_response(|r| r.header.add("Content-Type", "application/json"));
        assert!(predicate.self_evaluate(&content).unwrap());
    }

    fn query_predicate(mode: QueryMatchMode) -> QueryParameterPredicate {
        let options: QueryOptions = serde_json::from_value(json!({
            "parameters": {"tag": ["b", "a"], "page": "1"},
            "mode": mode_name(mode),
        }))
        .unwrap();
        QueryParameterPredicate::new(options).unwrap()
    }

    fn mode_name(mode: QueryMatchMode) -> &'static str {
        match mode {
            QueryMatchMode::All => "all",
            QueryMatchMode::Contains => "contains",
        }
    }

    #[test]
    fn query_all_requires_exact_set() {
        let predicate = query_predicate(QueryMatchMode::All);
        let content = with_request(|r| r.query = Some("page=1&tag=a&tag=b".into()));
        assert!(predicate.self_evaluate(&content).unwrap());

        let content = with_request(|r| r.query = Some("page=1&tag=a&tag=b&extra=1".into()));
        assert!(!predicate.self_evaluate(&content).unwrap());

        let content = with_request(|r| r.query = Some("page=1&tag=a".into()));
        assert!(!predicate.self_evaluate(&content).unwrap());
    }

    #[test]
    fn query_contains_accepts_superset() {
        let predicate = query_predicate(QueryMatchMode::Contains);
        let content = with_request(|r| r.query = Some("extra=1&tag=b&tag=c&tag=a&page=1".into()));
        assert!(predicate.self_evaluate(&content).unwrap());

        let content = with_request(|r| r.query = Some("tag=a&page=1".into()));
        assert!(!predicate.self_evaluate(&content).unwrap());

        let content = with_request(|r| r.query = None);
        assert!(!predicate.self_evaluate(&content).unwrap());
    }

    fn json_predicate(path: &str, expected: Value) -> JsonBodyPredicate {
        JsonBodyPredicate::new(
            JsonBodyOptions {
                side: Side::Request,
                path: path.into(),
                expected,
                max_body_size: None,
            },
            DEFAULT_JSON_BODY_LIMIT,
        )
        .unwrap()
    }

    #[test]
    fn json_body_single_and_list_results() {
        let content = with_request(|r| {
            r.body.write(br#"{"user":{"role":"admin"},"items":[{"id":1},{"id":2}]}"#)
        });
        assert!(json_predicate("$.user.role", json!("admin"))
            .self_evaluate(&content)
            .unwrap());
        assert!(!json_predicate("$.user.role", json!("guest"))
            .self_evaluate(&content)
            .unwrap());
        assert!(json_predicate("$.items[*].id", json!([1, 2]))
            .self_evaluate(&content)
            .unwrap());
        assert!(!json_predicate("$.items[*].id", json!([2, 1]))
            .self_evaluate(&content)
            .unwrap());
    }

    #[test]
    fn json_body_refuses_unusable_bodies() {
        let predicate = json_predicate("$.a", json!(1));

        let content = with_request(|r| r.body.write(b"not json"));
        assert!(matches!(
            predicate.self_evaluate(&content),
            Err(EvaluationError::MalformedInput(_))
        ));

        let mut request = RequestInfo::new("POST", "/", 4);
        request.body.write(br#"{"a":1}"#);
        let mut content = AnalyzableContent::new();
        content.add_component(Component::Request(request));
        assert_eq!(
            predicate.self_evaluate(&content),
            Err(EvaluationError::BodyNotAnalyzable)
        );

        let small = JsonBodyPredicate::new(
            JsonBodyOptions {
                side: Side::Request,
                path: "$.a".into(),
                expected: json!(1),
                max_body_size: Some(3),
            },
            DEFAULT_JSON_BODY_LIMIT,
        )
        .unwrap();
        let content = with_request(|r| r.body.write(br#"{"a":1}"#));
        assert!(matches!(
            small.self_evaluate(&content),
            Err(EvaluationError::BodyTooLarge { size: 7, limit: 3 })
        ));
    }

    #[test]
    fn json_body_rejects_invalid_path() {
        let err = JsonBodyPredicate::new(
            JsonBodyOptions {
                side: Side::Request,
                path: "$[".into(),
                expected: json!(1),
                max_body_size: None,
            },
            DEFAULT_JSON_BODY_LIMIT,
        )
        .unwrap_err();
        assert!(matches!(err, EvaluationError::InvalidOption { option: "path", .. }));
    }

    #[test]
    fn random_extremes() {
        let content = AnalyzableContent::new();
        let never = RandomPredicate::new(RandomOptions { percentage: 0.0 }).unwrap();
        let always = RandomPredicate::new(RandomOptions { percentage: 100.0 }).unwrap();
        for _ in 0..200 {
            assert!(!never.self_evaluate(&content).unwrap());
            assert!(always.self_evaluate(&content).unwrap());
        }
        assert!(RandomPredicate::new(RandomOptions { percentage: 101.0 }).is_err());
    }

    #[test]
    fn status_patterns_digit_by_digit() {
        let p = StatusPattern::parse("4XX").unwrap();
        assert!(p.matches(404));
        assert!(p.matches(400));
        assert!(!p.matches(500));

        let p = StatusPattern::parse("200").unwrap();
        assert!(p.matches(200));
        assert!(!p.matches(201));

        let p = StatusPattern::parse("5x3").unwrap();
        assert!(p.matches(503));
        assert!(!p.matches(502));

        assert!(StatusPattern::parse("4XXX").is_err());
        assert!(StatusPattern::parse("4Y0").is_err());
    }

    #[test]
    fn status_predicate_uses_effective_status() {
        let predicate = StatusCodePredicate::new(StatusCodeOptions {
            patterns: vec!["2XX".into()],
        })
        .unwrap();

        let mut content = with_response(|r| r.set_destination_status(500));
        assert!(!predicate.self_evaluate(&content).unwrap());
        content.execution_mut().set_status_code("204");
        assert!(predicate.self_evaluate(&content).unwrap());

        assert!(predicate.self_evaluate(&AnalyzableContent::new()).is_err());
    }

    #[test]
    fn round_trip_thresholds() {
        let predicate = RoundTripPredicate::new(RoundTripOptions {
            slower_than_ms: Some(200),
            faster_than_ms: None,
        })
        .unwrap();

        let mut content = AnalyzableContent::new();
        let mut timing = Timing::started();
        timing.set_round_trip(0.5);
        content.add_component(Component::Timing(timing));
        assert!(predicate.self_evaluate(&content).unwrap());

        content.timing_mut().unwrap().set_round_trip(0.1);
        assert!(!predicate.self_evaluate(&content).unwrap());
    }
}
