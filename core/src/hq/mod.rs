//! HQ federation: remote registration/heartbeat tracking and session-id-namespaced proxying.

pub mod proxy;
pub mod registry;

pub use registry::{parse_namespaced, format_namespaced, RegisterRemote, Remote, RemoteRegistry, RemoteStatus};
