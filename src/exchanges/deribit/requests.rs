use crate::core::config::SessionConfig;
use crate::core::errors::SessionError;
use crate::core::types::RpcRequest;
use crate::exchanges::deribit::types::{
    BookDepth, Direction, LinkedOrderType, OrderType, TimeInForce, Trigger,
};
use serde_json::{json, Map, Value};

pub const MAX_LABEL_LEN: usize = 64;

/// Trigger prices move in steps of this size
pub const TRIGGER_TICK: f64 = 0.1;

fn invalid(message: impl Into<String>) -> SessionError {
    SessionError::InvalidParameters(message.into())
}

/// `public/auth` with the client-credentials grant
pub fn auth_request(config: &SessionConfig) -> RpcRequest {
    RpcRequest::new(
        "public/auth",
        json!({
            "grant_type": "client_credentials",
            "client_id": config.client_id(),
            "client_secret": config.client_secret(),
        }),
    )
}

/// Parameters for `private/buy` / `private/sell`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OrderRequest {
    pub direction: Option<Direction>,
    pub instrument_name: String,
    pub order_type: OrderType,
    pub amount: Option<f64>,
    pub contracts: Option<f64>,
    pub price: Option<f64>,
    pub trigger_price: Option<f64>,
    pub trigger: Option<Trigger>,
    pub label: Option<String>,
    pub post_only: Option<bool>,
    pub reject_post_only: Option<bool>,
    pub mmp: Option<bool>,
    pub reduce_only: Option<bool>,
    pub time_in_force: Option<TimeInForce>,
    pub max_show: Option<f64>,
    pub valid_until: Option<i64>,
    pub trigger_offset: Option<f64>,
    pub linked_order_type: Option<LinkedOrderType>,
}

impl OrderRequest {
    pub fn new(direction: Direction, instrument_name: impl Into<String>) -> Self {
        Self {
            direction: Some(direction),
            instrument_name: instrument_name.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<Direction, SessionError> {
        let direction = self
            .direction
            .ok_or_else(|| invalid("missing 'direction', must be 'buy' or 'sell'"))?;

        if self.instrument_name.is_empty() {
            return Err(invalid("missing 'instrument_name'"));
        }

        match (self.amount, self.contracts) {
            (None, None) => {
                return Err(invalid(
                    "at least one of 'amount' or 'contracts' must be provided",
                ))
            }
            (Some(amount), Some(contracts)) if (amount - contracts).abs() > f64::EPSILON => {
                return Err(invalid(
                    "'amount' and 'contracts' must match if both are provided",
                ))
            }
            _ => {}
        }

        for (name, value) in [
            ("amount", self.amount),
            ("contracts", self.contracts),
            ("price", self.price),
            ("trigger_price", self.trigger_price),
            ("trigger_offset", self.trigger_offset),
        ] {
            if matches!(value, Some(v) if v <= 0.0 || !v.is_finite()) {
                return Err(invalid(format!("'{}' must be a positive number", name)));
            }
        }

        if self.order_type.requires_price() && self.price.is_none() {
            return Err(invalid(format!(
                "missing 'price', required for {} orders",
                self.order_type
            )));
        }

        if self.order_type.is_stop() {
            match self.trigger_price {
                Some(trigger_price) if on_tick(trigger_price) => {}
                _ => {
                    return Err(invalid(
                        "missing or invalid 'trigger_price', must be positive with tick size 0.1",
                    ))
                }
            }
        }

        if self.order_type == OrderType::StopLimit && self.trigger.is_none() {
            return Err(invalid(
                "missing 'trigger', must be one of index_price, mark_price, last_price",
            ));
        }

        if let Some(label) = &self.label {
            if label.chars().count() > MAX_LABEL_LEN {
                return Err(invalid("'label' must not exceed 64 characters"));
            }
        }

        Ok(direction)
    }

    /// Validate and build the JSON-RPC request
    pub fn into_request(self) -> Result<RpcRequest, SessionError> {
        let direction = self.validate()?;
        let mut params = Map::new();

        params.insert("instrument_name".into(), json!(self.instrument_name));
        params.insert("type".into(), json!(self.order_type));
        insert(&mut params, "amount", self.amount);
        insert(&mut params, "contracts", self.contracts);
        insert(&mut params, "price", self.price);

        if self.order_type.requires_price() {
            insert(&mut params, "post_only", self.post_only);
            // Only meaningful together with post_only
            if self.post_only == Some(true) {
                insert(&mut params, "reject_post_only", self.reject_post_only);
            }
            insert(&mut params, "mmp", self.mmp);
        }

        if self.order_type.is_stop() {
            insert(&mut params, "trigger_price", self.trigger_price);
            insert(&mut params, "trigger", self.trigger);
            insert(&mut params, "trigger_offset", self.trigger_offset);
        }

        insert(&mut params, "reduce_only", self.reduce_only);
        insert(&mut params, "time_in_force", self.time_in_force);
        insert(&mut params, "label", self.label);
        insert(&mut params, "max_show", self.max_show);
        insert(&mut params, "valid_until", self.valid_until);
        insert(&mut params, "linked_order_type", self.linked_order_type);

        Ok(RpcRequest::new(direction.method(), Value::Object(params)))
    }
}

fn insert<T: serde::Serialize>(params: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(value) = value {
        params.insert(key.to_string(), json!(value));
    }
}

fn on_tick(price: f64) -> bool {
    let ticks = price / TRIGGER_TICK;
    (ticks - ticks.round()).abs() < 1e-6
}

/// `private/cancel` for one order id
pub fn cancel_request(order_id: &str) -> Result<RpcRequest, SessionError> {
    if order_id.trim().is_empty() {
        return Err(invalid("missing 'order_id'"));
    }
    Ok(RpcRequest::new(
        "private/cancel",
        json!({ "order_id": order_id }),
    ))
}

pub fn order_book_request(
    instrument_name: &str,
    depth: BookDepth,
) -> Result<RpcRequest, SessionError> {
    if instrument_name.is_empty() {
        return Err(invalid("missing 'instrument_name'"));
    }
    Ok(RpcRequest::new(
        "public/get_order_book",
        json!({ "instrument_name": instrument_name, "depth": depth }),
    ))
}

/// Channel name in Deribit's dotted form, e.g. `book.BTC-PERPETUAL.100ms`
pub fn channel_name(channel: &str, instrument_name: &str, interval: Option<&str>) -> String {
    match interval {
        Some(interval) => format!("{}.{}.{}", channel, instrument_name, interval),
        None => format!("{}.{}", channel, instrument_name),
    }
}

pub fn subscribe_request(channels: &[String]) -> Result<RpcRequest, SessionError> {
    if channels.is_empty() {
        return Err(invalid("at least one channel is required"));
    }
    Ok(RpcRequest::new(
        "private/subscribe",
        json!({ "channels": channels }),
    ))
}

pub fn unsubscribe_all_request() -> RpcRequest {
    RpcRequest::new("private/unsubscribe_all", json!({}))
}
