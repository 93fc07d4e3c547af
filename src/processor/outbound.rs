//! Outbound leg: telemetry tree → reqwest request, reqwest response →
//! telemetry tree.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{stream, StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;

use crate::config::GatewayConfig;
use crate::emission::BodySource;
use crate::telemetry::{Header, RequestInfo, ResponseInfo};

/// Request headers the transport manages itself.
const NOT_FORWARDED: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-connection",
    "content-length",
    "transfer-encoding",
    "upgrade",
    "te",
];

#[derive(Debug, thiserror::Error)]
pub enum OutboundError {
    #[error("no destination resolved")]
    NoDestination,

    #[error("invalid method `{0}`")]
    InvalidMethod(String),

    #[error("destination did not answer within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

/// Build the shared destination client.
pub fn build_client(config: &GatewayConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
        .pool_idle_timeout(Duration::from_secs(config.timeouts.idle_secs))
        .build()
}

pub fn forwarded_headers(header: &Header) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in header.lines() {
        if NOT_FORWARDED.iter().any(|h| h.eq_ignore_ascii_case(name)) {
            continue;
        }
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                map.append(name, value);
            }
            _ => tracing::trace!(name, "Dropping header that cannot be forwarded"),
        }
    }
    map
}

/// How the request body reaches the destination.
pub enum OutboundBody {
    None,
    Full(Bytes),
    /// Already-read prefix, then whatever arrives on the channel.
    Streamed {
        prefix: Vec<Bytes>,
        rest: mpsc::Receiver<io::Result<Bytes>>,
    },
}

impl OutboundBody {
    fn into_reqwest(self) -> Option<reqwest::Body> {
        match self {
            OutboundBody::None => None,
            OutboundBody::Full(bytes) => Some(reqwest::Body::from(bytes)),
            OutboundBody::Streamed { prefix, rest } => {
                let prefix = stream::iter(prefix.into_iter().map(Ok::<_, io::Error>));
                let rest = stream::unfold(rest, |mut rx| async move {
                    rx.recv().await.map(|item| (item, rx))
                });
                Some(reqwest::Body::wrap_stream(prefix.chain(rest)))
            }
        }
    }
}

/// Build the outbound request from the (task-mutated) request component.
pub fn build_request(
    client: &reqwest::Client,
    request: &RequestInfo,
    body: OutboundBody,
) -> Result<reqwest::RequestBuilder, OutboundError> {
    let url = request.destination.clone().ok_or(OutboundError::NoDestination)?;
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
        .map_err(|_| OutboundError::InvalidMethod(request.method.clone()))?;
    let mut builder = client
        .request(method, url)
        .headers(forwarded_headers(&request.header));
    if let Some(body) = body.into_reqwest() {
        builder = builder.body(body);
    }
    Ok(builder)
}

/// Send and wait for the response head.
pub async fn send(
    builder: reqwest::RequestBuilder,
    head_timeout: Duration,
) -> Result<reqwest::Response, OutboundError> {
    match tokio::time::timeout(head_timeout, builder.send()).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(OutboundError::Timeout(head_timeout)),
    }
}

/// Response component from a destination response head.
pub fn response_info(response: &reqwest::Response, capture_limit: usize) -> ResponseInfo {
    let mut info = ResponseInfo::new(capture_limit);
    info.set_destination_status(response.status().as_u16());
    for (name, value) in response.headers() {
        info.header
            .add(name.as_str(), String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    info
}

pub type ResponseReader = StreamReader<
    futures_util::stream::BoxStream<'static, io::Result<Bytes>>,
    Bytes,
>;

/// The response body as a source. reqwest has already removed any
/// transfer coding, so the body simply runs until the stream ends.
pub fn response_source(response: reqwest::Response) -> BodySource<ResponseReader> {
    let stream = response
        .bytes_stream()
        .map_err(io::Error::other)
        .boxed();
    BodySource::UntilEof(StreamReader::new(stream))
}
