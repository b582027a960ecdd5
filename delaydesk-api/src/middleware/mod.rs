pub mod auth;

pub use auth::{agent_auth_middleware, AgentClaims};
