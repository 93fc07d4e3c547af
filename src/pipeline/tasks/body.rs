use serde::Deserialize;
use serde_json::Value;

use crate::condition::predicates::Side;
use crate::pipeline::tasks::{body_mut, header_mut, parse_options};
use crate::pipeline::{Phase, TaskError, TaskHandler};
use crate::telemetry::AnalyzableContent;

#[derive(Debug, Deserialize)]
struct ReplaceBodyOptions {
    #[serde(default = "response_side")]
    side: Side,
    body: String,
    #[serde(default)]
    content_type: Option<String>,
}

fn response_side() -> Side {
    Side::Response
}

/// Replaces a body with fixed content.
pub struct ReplaceBody;

impl TaskHandler for ReplaceBody {
    fn name(&self) -> &'static str {
        "replace_body"
    }

    fn validate(&self, options: &Value) -> Result<(), TaskError> {
        parse_options::<ReplaceBodyOptions>(options).map(|_| ())
    }

    fn execute(
        &self,
        content: &mut AnalyzableContent,
        options: &Value,
        _phase: Phase,
    ) -> Result<(), TaskError> {
        let options: ReplaceBodyOptions = parse_options(options)?;
        body_mut(content, options.side)?.set_body(options.body);
        if let Some(content_type) = options.content_type {
            header_mut(content, options.side)?.set("Content-Type", content_type);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{Component, ResponseInfo};
    use bytes::Bytes;
    use serde_json::json;

    #[test]
    fn replaces_response_body_even_when_overflowed() {
        let mut content = AnalyzableContent::new();
        let mut response = ResponseInfo::new(4);
        response.body.write(b"way past the cap");
        content.add_component(Component::Response(response));

        ReplaceBody
            .execute(
                &mut content,
                &json!({"body": "{}", "content_type": "application/json"}),
                Phase::StartedReceiving,
            )
            .unwrap();

        let response = content.response().unwrap();
        assert!(response.body.is_analyzable());
        assert_eq!(response.body.get_body(), Bytes::from_static(b"{}"));
        assert_eq!(response.header.get("content-type").unwrap(), "application/json");
    }
}
