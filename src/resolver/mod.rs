//! Web service resolution: which destination, which user, which service.
//!
//! # Responsibilities
//! - Derive the destination URL from the `PP_*` query parameters or from a
//!   subdomain encoding
//! - Strip every `PP_*` parameter from the forwarded query
//! - Pick the user's web service with the longest matching destination
//!   prefix, or a pass-through service when none matches
//!
//! # Design Decisions
//! - Query parameters win over the subdomain encoding; `PP_USER` wins over
//!   the user segment of the subdomain
//! - Non-gateway query pieces are forwarded in their original encoding
//! - The directory is immutable and swapped whole on reload

pub mod subdomain;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use url::Url;

use crate::config::GatewayConfig;
use crate::pipeline::{PhaseRunner, Registry};
use crate::telemetry::WebServiceIdentity;

pub const PARAM_PREFIX: &str = "PP_";
pub const PARAM_DESTINATION_URL: &str = "PP_DESTINATION_URL";
pub const PARAM_SCHEME_AND_HOST: &str = "PP_DESTINATION_SCHEME_AND_HOST";
pub const PARAM_USER: &str = "PP_USER";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("no destination given")]
    MissingDestination,

    #[error("invalid destination `{0}`")]
    InvalidDestination(String),

    #[error("no user given")]
    MissingUser,

    #[error("unknown user `{0}`")]
    UnknownUser(String),
}

impl ResolveError {
    pub fn status_code(&self) -> u16 {
        match self {
            ResolveError::UnknownUser(_) => 403,
            _ => 400,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ResolveError::MissingDestination => "missing_destination",
            ResolveError::InvalidDestination(_) => "invalid_destination",
            ResolveError::MissingUser => "missing_user",
            ResolveError::UnknownUser(_) => "unknown_user",
        }
    }

    /// JSON body of the rejection sent to the client.
    pub fn to_json(&self) -> String {
        serde_json::json!({
            "error": self.code(),
            "message": self.to_string(),
        })
        .to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("web service `{id}`: invalid destination `{destination}`: {source}")]
    InvalidServiceDestination {
        id: String,
        destination: String,
        source: url::ParseError,
    },
}

/// A configured (or pass-through) web service with its compiled tasks.
pub struct WebService {
    pub id: Option<String>,
    pub user: String,
    /// Normalized destination prefix, without trailing slash.
    pub prefix: String,
    pub runner: PhaseRunner,
}

impl WebService {
    fn pass_through(user: &str) -> Self {
        Self {
            id: None,
            user: user.to_string(),
            prefix: String::new(),
            runner: PhaseRunner::empty(),
        }
    }

    pub fn identity(&self) -> WebServiceIdentity {
        WebServiceIdentity {
            id: self.id.clone(),
            user: self.user.clone(),
        }
    }

    fn matches(&self, destination: &str) -> bool {
        if self.prefix.is_empty() || !destination.starts_with(&self.prefix) {
            return false;
        }
        matches!(
            destination[self.prefix.len()..].chars().next(),
            None | Some('/') | Some('?') | Some('#')
        )
    }
}

impl std::fmt::Debug for WebService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebService")
            .field("id", &self.id)
            .field("user", &self.user)
            .field("prefix", &self.prefix)
            .field("tasks", &self.runner.task_count())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceSummary {
    pub id: String,
    pub user: String,
    pub destination: String,
    pub tasks: usize,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub destination: Url,
    pub service: Arc<WebService>,
}

impl Resolution {
    pub fn forwarded_query(&self) -> Option<String> {
        self.destination.query().map(str::to_string)
    }
}

#[derive(Debug, Default)]
pub struct ServiceDirectory {
    users: HashSet<String>,
    /// Per user, longest prefix first.
    services: HashMap<String, Vec<Arc<WebService>>>,
    pass_through: HashMap<String, Arc<WebService>>,
}

impl ServiceDirectory {
    pub fn build(config: &GatewayConfig, registry: &Registry) -> Result<Self, DirectoryError> {
        let mut directory = Self::default();
        for user in &config.users {
            directory.users.insert(user.id.clone());
            directory
                .pass_through
                .insert(user.id.clone(), Arc::new(WebService::pass_through(&user.id)));
        }

        for service in &config.web_services {
            let url = Url::parse(&service.destination).map_err(|source| {
                DirectoryError::InvalidServiceDestination {
                    id: service.id.clone(),
                    destination: service.destination.clone(),
                    source,
                }
            })?;
            let compiled = WebService {
                id: Some(service.id.clone()),
                user: service.user.clone(),
                prefix: url.as_str().trim_end_matches('/').to_string(),
                runner: registry.compile_events(&service.events),
            };
            tracing::debug!(
                id = %service.id,
                user = %service.user,
                prefix = %compiled.prefix,
                tasks = compiled.runner.task_count(),
                "Web service compiled"
            );
            directory
                .services
                .entry(service.user.clone())
                .or_default()
                .push(Arc::new(compiled));
        }

        for services in directory.services.values_mut() {
            services.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        }
        Ok(directory)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn service_count(&self) -> usize {
        self.services.values().map(Vec::len).sum()
    }

    pub fn summaries(&self) -> Vec<ServiceSummary> {
        let mut summaries: Vec<ServiceSummary> = self
            .services
            .values()
            .flatten()
            .map(|service| ServiceSummary {
                id: service.id.clone().unwrap_or_default(),
                user: service.user.clone(),
                destination: service.prefix.clone(),
                tasks: service.runner.task_count(),
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    /// Resolve an inbound request target.
    pub fn resolve(
        &self,
        host: Option<&str>,
        path: &str,
        query: Option<&str>,
    ) -> Result<Resolution, ResolveError> {
        let split = split_query(query.unwrap_or_default());
        let encoded = host.and_then(subdomain::parse);

        let mut destination = if let Some(url) = &split.destination_url {
            parse_destination(url)?
        } else if let Some(origin) = &split.scheme_and_host {
            parse_destination(&format!("{}{}", origin.trim_end_matches('/'), path))?
        } else if let Some(encoded) = &encoded {
            parse_destination(&format!("{}{}", encoded.origin(), path))?
        } else {
            return Err(ResolveError::MissingDestination);
        };

        if let Some(forwarded) = split.forwarded {
            let merged = match destination.query() {
                Some(existing) if !existing.is_empty() => format!("{existing}&{forwarded}"),
                _ => forwarded,
            };
            destination.set_query(Some(&merged));
        }

        let user = split
            .user
            .or_else(|| encoded.map(|e| e.user))
            .ok_or(ResolveError::MissingUser)?;
        if !self.users.contains(&user) {
            return Err(ResolveError::UnknownUser(user));
        }

        let service = self
            .services
            .get(&user)
            .and_then(|services| services.iter().find(|s| s.matches(destination.as_str())))
            .or_else(|| self.pass_through.get(&user))
            .cloned()
            .unwrap_or_else(|| Arc::new(WebService::pass_through(&user)));

        Ok(Resolution {
            destination,
            service,
        })
    }
}

#[derive(Debug, Default)]
struct SplitQuery {
    destination_url: Option<String>,
    scheme_and_host: Option<String>,
    user: Option<String>,
    /// Everything else, in its original encoding.
    forwarded: Option<String>,
}

fn split_query(raw: &str) -> SplitQuery {
    let mut split = SplitQuery::default();
    let mut kept: Vec<&str> = Vec::new();
    for piece in raw.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = url::form_urlencoded::parse(piece.as_bytes())
            .next()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .unwrap_or_default();
        if !key.starts_with(PARAM_PREFIX) {
            kept.push(piece);
            continue;
        }
        match key.as_str() {
            PARAM_DESTINATION_URL => split.destination_url = Some(value),
            PARAM_SCHEME_AND_HOST => split.scheme_and_host = Some(value),
            PARAM_USER => split.user = Some(value),
            other => tracing::trace!(param = other, "Dropping unknown gateway parameter"),
        }
    }
    if !kept.is_empty() {
        split.forwarded = Some(kept.join("&"));
    }
    split
}

fn parse_destination(raw: &str) -> Result<Url, ResolveError> {
    let url = Url::parse(raw).map_err(|_| ResolveError::InvalidDestination(raw.to_string()))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        _ => Err(ResolveError::InvalidDestination(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{UserConfig, WebServiceConfig};

    fn directory() -> ServiceDirectory {
        let mut config = GatewayConfig::default();
        config.users = vec![
            UserConfig { id: "alice".into(), name: None },
            UserConfig { id: "bob".into(), name: None },
        ];
        let service = |id: &str, user: &str, destination: &str| WebServiceConfig {
            id: id.into(),
            user: user.into(),
            destination: destination.into(),
            events: Default::default(),
        };
        config.web_services = vec![
            service("api", "alice", "https://api.example.com"),
            service("api-v2", "alice", "https://api.example.com/v2/"),
            service("bob-api", "bob", "https://api.example.com/v2"),
        ];
        ServiceDirectory::build(&config, &Registry::default()).unwrap()
    }

    #[test]
    fn destination_url_parameter() {
        let resolution = directory()
            .resolve(
                Some("gateway.local"),
                "/ignored",
                Some("PP_DESTINATION_URL=https%3A%2F%2Fapi.example.com%2Fv2%2Fusers%3Fa%3D1&PP_USER=alice&b=2"),
            )
            .unwrap();
        assert_eq!(resolution.destination.as_str(), "https://api.example.com/v2/users?a=1&b=2");
        assert_eq!(resolution.service.id.as_deref(), Some("api-v2"));
        assert_eq!(resolution.forwarded_query().as_deref(), Some("a=1&b=2"));
    }

    #[test]
    fn scheme_and_host_parameter_keeps_path() {
        let resolution = directory()
            .resolve(
                None,
                "/v1/orders",
                Some("x=%20y&PP_DESTINATION_SCHEME_AND_HOST=https://api.example.com&PP_USER=alice"),
            )
            .unwrap();
        assert_eq!(resolution.destination.as_str(), "https://api.example.com/v1/orders?x=%20y");
        assert_eq!(resolution.service.id.as_deref(), Some("api"));
    }

    #[test]
    fn subdomain_encoding() {
        let resolution = directory()
            .resolve(Some("https---api-example-com---bob.gw.example"), "/v2/items", None)
            .unwrap();
        assert_eq!(resolution.destination.as_str(), "https://api.example.com/v2/items");
        assert_eq!(resolution.service.user, "bob");
        assert_eq!(resolution.service.id.as_deref(), Some("bob-api"));
    }

    #[test]
    fn prefix_match_respects_boundaries() {
        let dir = directory();
        let resolution = dir
            .resolve(None, "/v20", Some("PP_DESTINATION_SCHEME_AND_HOST=https://api.example.com&PP_USER=bob"))
            .unwrap();
        assert_eq!(resolution.service.id, None);

        let resolution = dir
            .resolve(None, "/", Some("PP_DESTINATION_SCHEME_AND_HOST=https://api.example.com.evil.net&PP_USER=alice"))
            .unwrap();
        assert_eq!(resolution.service.id, None);
        assert_eq!(resolution.service.runner.task_count(), 0);
    }

    #[test]
    fn rejections() {
        let dir = directory();
        assert_eq!(dir.resolve(Some("gateway.local"), "/", None).unwrap_err(), ResolveError::MissingDestination);

        let err = dir
            .resolve(None, "/", Some("PP_DESTINATION_URL=ftp://files.example.com&PP_USER=alice"))
            .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidDestination(_)));
        assert_eq!(err.status_code(), 400);

        let err = dir
            .resolve(None, "/", Some("PP_DESTINATION_URL=https://a.example.com&PP_USER=mallory"))
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
        let body: serde_json::Value = serde_json::from_str(&err.to_json()).unwrap();
        assert_eq!(body["error"], "unknown_user");

        assert_eq!(
            dir.resolve(None, "/", Some("PP_DESTINATION_URL=https://a.example.com")).unwrap_err(),
            ResolveError::MissingUser
        );
    }

    #[test]
    fn gateway_parameters_are_stripped() {
        let split = split_query("PP_USER=a&keep=1&PP_TRACE=on&also=%26");
        assert_eq!(split.forwarded.as_deref(), Some("keep=1&also=%26"));
        assert_eq!(split.user.as_deref(), Some("a"));
        assert!(split_query("PP_USER=a").forwarded.is_none());
    }
}
