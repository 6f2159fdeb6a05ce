//! Handler modules, one per API surface area. Wiring into an [`axum::Router`] happens in
//! [`crate::web_server`].

pub mod fs;
pub mod health;
pub mod remotes;
pub mod sessions;
pub mod stream;
