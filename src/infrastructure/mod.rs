pub mod core;
pub mod gateway;
pub mod mock;
pub mod observability;
pub mod persistence;
