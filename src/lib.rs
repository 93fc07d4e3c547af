//! PassePlat gateway library: an intercepting HTTP gateway that runs
//! configurable, condition-gated tasks around every exchange and streams
//! responses back to the client.

// Exchange model
pub mod condition;
pub mod pipeline;
pub mod telemetry;

// Request path
pub mod emission;
pub mod gateway;
pub mod processor;
pub mod resolver;

// Cross-cutting concerns
pub mod admin;
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use config::GatewayConfig;
pub use gateway::Gateway;
pub use lifecycle::Shutdown;
