pub mod auth;
pub mod hub;
pub mod rest;
pub mod wire;

pub use auth::TokenManager;
pub use hub::{HubConfig, StreamConsumer};
pub use rest::RestGateway;
