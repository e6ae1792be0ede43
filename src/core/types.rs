use crate::core::errors::SessionError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const JSONRPC_VERSION: &str = "2.0";

/// Method name carried by server-pushed feed notifications
pub const SUBSCRIPTION_METHOD: &str = "subscription";

/// JSON-RPC 2.0 request envelope
///
/// Every request gets a fresh UUID v4 id so responses can be told apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Uuid::new_v4().to_string(),
            method: method.into(),
            params,
        }
    }

    /// Serialize to the wire text
    pub fn to_text(&self) -> Result<String, SessionError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Derived kind of an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// `method == "subscription"`
    Subscription,
    /// Anything else: a reply to the auth request or to a sent request
    Response,
}

/// Any inbound JSON document, with accessors for the JSON-RPC envelope fields
///
/// Inbound text is kept as an untyped value: any well-formed JSON is a valid
/// message and its kind is derived, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RpcMessage(Value);

impl RpcMessage {
    pub fn parse(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload).map(Self)
    }

    pub fn kind(&self) -> MessageKind {
        if self.method() == Some(SUBSCRIPTION_METHOD) {
            MessageKind::Subscription
        } else {
            MessageKind::Response
        }
    }

    pub fn is_subscription(&self) -> bool {
        self.kind() == MessageKind::Subscription
    }

    pub fn method(&self) -> Option<&str> {
        self.0.get("method").and_then(Value::as_str)
    }

    /// Request id normalised to a string key
    pub fn id(&self) -> Option<String> {
        match self.0.get("id")? {
            Value::String(id) => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }

    pub fn params(&self) -> Option<&Value> {
        self.0.get("params")
    }

    pub fn result(&self) -> Option<&Value> {
        self.0.get("result")
    }

    pub fn error(&self) -> Option<RpcError> {
        self.0
            .get("error")
            .and_then(|e| serde_json::from_value(e.clone()).ok())
    }

    /// Feed channel of a subscription notification
    pub fn channel(&self) -> Option<&str> {
        self.params()?.get("channel").and_then(Value::as_str)
    }

    /// Feed payload of a subscription notification
    pub fn data(&self) -> Option<&Value> {
        self.params()?.get("data")
    }

    /// Non-empty `result.access_token`, if present
    pub fn access_token(&self) -> Option<&str> {
        self.result()?
            .get("access_token")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
    }

    pub const fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for RpcMessage {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for RpcMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_envelope() {
        let request = RpcRequest::new("public/test", json!({}));
        let value: Value = serde_json::from_str(&request.to_text().unwrap()).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["method"], "public/test");
        assert_eq!(value["id"].as_str().unwrap().len(), 36);
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = RpcRequest::new("public/test", Value::Null);
        let b = RpcRequest::new("public/test", Value::Null);
        assert_ne!(a.id, b.id);
        assert!(!a.to_text().unwrap().contains("params"));
    }

    #[test]
    fn test_subscription_kind_ignores_other_fields() {
        let msg = RpcMessage::from(json!({
            "jsonrpc": "2.0",
            "id": "7",
            "method": "subscription",
            "result": {"access_token": "tok"},
            "params": {"channel": "ticker.BTC-PERPETUAL.100ms", "data": {"last_price": 1.0}}
        }));
        assert_eq!(msg.kind(), MessageKind::Subscription);
        assert_eq!(msg.channel(), Some("ticker.BTC-PERPETUAL.100ms"));
        assert_eq!(msg.data().unwrap()["last_price"], 1.0);
    }

    #[test]
    fn test_response_accessors() {
        let msg = RpcMessage::parse(
            br#"{"jsonrpc":"2.0","id":42,"error":{"code":13009,"message":"unauthorized"}}"#,
        )
        .unwrap();
        assert_eq!(msg.kind(), MessageKind::Response);
        assert_eq!(msg.id().as_deref(), Some("42"));
        let error = msg.error().unwrap();
        assert_eq!(error.code, 13009);
        assert_eq!(error.message, "unauthorized");
        assert!(msg.access_token().is_none());
    }

    #[test]
    fn test_access_token_must_be_non_empty_string() {
        let ok = RpcMessage::from(json!({"result": {"access_token": "abc"}}));
        let empty = RpcMessage::from(json!({"result": {"access_token": ""}}));
        let number = RpcMessage::from(json!({"result": {"access_token": 12}}));
        assert_eq!(ok.access_token(), Some("abc"));
        assert!(empty.access_token().is_none());
        assert!(number.access_token().is_none());
    }

    #[test]
    fn test_non_object_json_is_a_response() {
        let msg = RpcMessage::parse(b"[1,2,3]").unwrap();
        assert_eq!(msg.kind(), MessageKind::Response);
        assert!(msg.id().is_none());
    }
}
