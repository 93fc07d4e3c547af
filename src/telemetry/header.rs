//! Header component.
//!
//! # Responsibilities
//! - Keep header lines in insertion order for emission
//! - Case-insensitive lookup by name
//! - Merge repeated values of list-valued headers into one line
//!
//! # Design Decisions
//! - The field variant is fixed at insertion time from a static table
//! - Single-valued names never merge: a repeated `add` is a sibling line,
//!   which keeps `Set-Cookie` lines separate on the wire
//! - Raw values are stored untouched; splitting happens only on comparison

use serde_json::Value;

use crate::telemetry::{LogMap, TelemetryComponent};

/// Names whose repeated values are joined with `,`.
const COMMA_SEPARATED: &[&str] = &[
    "accept",
    "accept-charset",
    "accept-encoding",
    "accept-language",
    "accept-ranges",
    "access-control-allow-headers",
    "access-control-allow-methods",
    "access-control-expose-headers",
    "allow",
    "cache-control",
    "connection",
    "content-encoding",
    "content-language",
    "expect",
    "if-match",
    "if-none-match",
    "pragma",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "vary",
    "via",
    "warning",
];

/// Names whose repeated values are joined with `;`.
const SEMICOLON_SEPARATED: &[&str] = &["cookie"];

/// How a header line holds its values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// One value per line.
    Single,
    /// `a,b,c`
    CommaList,
    /// `a; b; c`
    SemicolonList,
}

impl FieldKind {
    /// Classify a header name using the standard-header table.
    pub fn classify(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if COMMA_SEPARATED.contains(&lower.as_str()) {
            FieldKind::CommaList
        } else if SEMICOLON_SEPARATED.contains(&lower.as_str()) {
            FieldKind::SemicolonList
        } else {
            FieldKind::Single
        }
    }

    /// Separator used when rendering the values of one line.
    pub fn join_separator(&self) -> &'static str {
        match self {
            FieldKind::Single => "",
            FieldKind::CommaList => ",",
            FieldKind::SemicolonList => "; ",
        }
    }

    /// Character used to split a rendered line back into segments.
    pub fn split_char(&self) -> Option<char> {
        match self {
            FieldKind::Single => None,
            FieldKind::CommaList => Some(','),
            FieldKind::SemicolonList => Some(';'),
        }
    }
}

/// One header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    name: String,
    kind: FieldKind,
    values: Vec<String>,
}

impl HeaderField {
    /// Create an empty field; its variant comes from the classification table.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let kind = FieldKind::classify(&name);
        Self {
            name,
            kind,
            values: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Add values to this line.
    ///
    /// On an empty field the values become the content; otherwise they are
    /// appended after the existing ones. Duplicates are kept.
    pub fn add<I, S>(&mut self, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.values.extend(values.into_iter().map(Into::into));
    }

    /// Replace the content of this line.
    pub fn set(&mut self, value: impl Into<String>) {
        self.values.clear();
        self.values.push(value.into());
    }

    /// Rendered value as it goes on the wire.
    pub fn value(&self) -> String {
        self.values.join(self.kind.join_separator())
    }

    /// Value segments split on the variant separator, each trimmed.
    pub fn segments(&self) -> Vec<String> {
        let rendered = self.value();
        match self.kind.split_char() {
            Some(sep) => rendered.split(sep).map(|s| s.trim().to_string()).collect(),
            None => vec![rendered.trim().to_string()],
        }
    }

    fn matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// Ordered collection of header lines for one side of the exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    fields: Vec<HeaderField>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value for `name`.
    ///
    /// List-valued names merge into the first existing line; single-valued
    /// names get a new sibling line.
    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        self.add_values(name, [value.into()]);
    }

    /// Add several values for `name` at once.
    pub fn add_values<I, S>(&mut self, name: &str, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let kind = FieldKind::classify(name);
        if kind != FieldKind::Single {
            if let Some(field) = self.fields.iter_mut().find(|f| f.matches(name)) {
                field.add(values);
                return;
            }
        }
        let mut field = HeaderField::new(name);
        field.add(values);
        self.fields.push(field);
    }

    /// Replace every line for `name` with a single line holding `value`.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.fields.iter().position(|f| f.matches(name)) {
            Some(pos) => {
                self.fields[pos].set(value);
                let mut index = 0;
                self.fields.retain(|f| {
                    let keep = index <= pos || !f.matches(name);
                    index += 1;
                    keep
                });
            }
            None => {
                let mut field = HeaderField::new(name);
                field.set(value);
                self.fields.push(field);
            }
        }
    }

    /// Remove all lines for `name`. Returns how many were removed.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.fields.len();
        self.fields.retain(|f| !f.matches(name));
        before - self.fields.len()
    }

    /// Rendered value of the first line for `name`.
    pub fn get(&self, name: &str) -> Option<String> {
        self.field(name).map(HeaderField::value)
    }

    /// Rendered values of every line for `name`, in order.
    pub fn get_all(&self, name: &str) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.matches(name))
            .map(HeaderField::value)
            .collect()
    }

    pub fn field(&self, name: &str) -> Option<&HeaderField> {
        self.fields.iter().find(|f| f.matches(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn fields(&self) -> &[HeaderField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// `(name, value)` pairs in emission order, one per line.
    pub fn lines(&self) -> impl Iterator<Item = (&str, String)> {
        self.fields
            .iter()
            .filter(|f| !f.is_empty())
            .map(|f| (f.name(), f.value()))
    }
}

impl TelemetryComponent for Header {
    fn name(&self) -> &'static str {
        "header"
    }

    fn own_data(&self) -> LogMap {
        let lines: Vec<Value> = self
            .lines()
            .map(|(name, value)| Value::String(format!("{}: {}", name, value)))
            .collect();
        let mut data = LogMap::new();
        data.insert(String::new(), Value::Array(lines));
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comma_field_merges_values() {
        let mut field = HeaderField::new("Accept");
        assert_eq!(field.kind(), FieldKind::CommaList);
        field.add(["a", "b"]);
        assert_eq!(field.value(), "a,b");
        field.add(["c"]);
        assert_eq!(field.value(), "a,b,c");
        field.add(["c"]);
        assert_eq!(field.value(), "a,b,c,c");
    }

    #[test]
    fn cookie_uses_semicolons() {
        let mut header = Header::new();
        header.add("Cookie", "a=1");
        header.add("cookie", "b=2");
        assert_eq!(header.len(), 1);
        assert_eq!(header.get("COOKIE").unwrap(), "a=1; b=2");
        assert_eq!(header.field("cookie").unwrap().segments(), vec!["a=1", "b=2"]);
    }

    #[test]
    fn set_cookie_lines_stay_separate() {
        let mut header = Header::new();
        header.add("Set-Cookie", "a=1");
        header.add("Content-Type", "text/plain");
        header.add("Set-Cookie", "b=2");
        assert_eq!(header.len(), 3);
        assert_eq!(header.get_all("set-cookie"), vec!["a=1", "b=2"]);

        let names: Vec<&str> = header.lines().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Set-Cookie", "Content-Type", "Set-Cookie"]);
    }

    #[test]
    fn set_replaces_all_lines_in_place() {
        let mut header = Header::new();
        header.add("X-A", "1");
        header.add("Set-Cookie", "a=1");
        header.add("Set-Cookie", "b=2");
        header.add("X-B", "2");
        header.set("set-cookie", "c=3");

        let lines: Vec<(String, String)> = header
            .lines()
            .map(|(n, v)| (n.to_string(), v))
            .collect();
        assert_eq!(
            lines,
            vec![
                ("X-A".to_string(), "1".to_string()),
                ("Set-Cookie".to_string(), "c=3".to_string()),
                ("X-B".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn remove_is_case_insensitive() {
        let mut header = Header::new();
        header.add("Host", "example.com");
        header.add("Accept", "text/html");
        assert_eq!(header.remove("HOST"), 1);
        assert!(!header.contains("host"));
        assert!(header.contains("accept"));
    }

    #[test]
    fn segments_are_trimmed() {
        let mut header = Header::new();
        header.add("Accept", "text/html, application/json ");
        assert_eq!(
            header.field("accept").unwrap().segments(),
            vec!["text/html", "application/json"]
        );
    }
}
