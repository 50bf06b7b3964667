pub mod auth;
pub mod client;
pub mod config;
pub mod content_store;
pub mod credentials;
pub mod error;
pub mod soap;

pub use client::{CheckoutFailure, CheckoutResult, VersionControlClient};
pub use config::ConnectionConfig;
pub use credentials::Credentials;
pub use error::{FaultSubcode, TfsError, TfsResult};
