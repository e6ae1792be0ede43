pub mod requests;
pub mod types;

// Re-export main components
pub use requests::{
    auth_request, cancel_request, channel_name, order_book_request, subscribe_request,
    unsubscribe_all_request, OrderRequest,
};
pub use types::{BookDepth, Direction, LinkedOrderType, OrderType, TimeInForce, Trigger};

/// Environment prefix for Deribit credentials, e.g. `DERIBIT_CLIENT_ID`
pub const ENV_PREFIX: &str = "DERIBIT";
