pub mod core;
pub mod exchanges;
pub mod utils;

pub use core::{
    config::SessionConfig,
    errors::{ConnectFailure, ConnectPhase, SessionError},
    kernel::{BlockingQueue, ConnectionState, StatsSnapshot},
    session::Session,
    types::{MessageKind, RpcMessage, RpcRequest},
};
