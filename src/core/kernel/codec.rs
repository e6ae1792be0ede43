use crate::core::types::{MessageKind, RpcMessage};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// What a raw WebSocket frame means to the read loop
#[derive(Debug)]
pub enum Frame {
    /// Full message bytes from a text or binary frame
    Payload(Vec<u8>),
    /// Ping/pong; answered by the protocol layer
    Control,
    /// Peer started the closing handshake
    Close(Option<CloseFrame<'static>>),
}

/// Where one inbound message goes
#[derive(Debug)]
pub enum Inbound {
    /// Not JSON: log and discard
    Malformed(serde_json::Error),
    /// `method == "subscription"`: feed queue
    Feed(RpcMessage),
    /// First non-subscription message while the access token is unset
    Auth(RpcMessage),
    /// Everything else: inbox
    Response(RpcMessage),
}

/// Wrap outbound JSON text for the wire
pub fn encode_text(text: String) -> Message {
    Message::Text(text)
}

pub fn decode_frame(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Payload(text.into_bytes()),
        Message::Binary(data) => Frame::Payload(data),
        Message::Close(frame) => Frame::Close(frame),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Frame::Control,
    }
}

/// Classify one payload, rules evaluated in order:
/// parse failure, subscription, auth response (token unset), response.
pub fn classify(payload: &[u8], authenticated: bool) -> Inbound {
    let message = match RpcMessage::parse(payload) {
        Ok(message) => message,
        Err(e) => return Inbound::Malformed(e),
    };

    match message.kind() {
        MessageKind::Subscription => Inbound::Feed(message),
        MessageKind::Response if !authenticated => Inbound::Auth(message),
        MessageKind::Response => Inbound::Response(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUBSCRIPTION: &[u8] =
        br#"{"jsonrpc":"2.0","method":"subscription","params":{"channel":"x","data":{}}}"#;
    const AUTH_REPLY: &[u8] =
        br#"{"jsonrpc":"2.0","id":"1","result":{"access_token":"tok","expires_in":900}}"#;

    #[test]
    fn test_malformed_payload() {
        assert!(matches!(classify(b"{not json", true), Inbound::Malformed(_)));
        assert!(matches!(classify(b"", false), Inbound::Malformed(_)));
    }

    #[test]
    fn test_subscription_routes_to_feed_even_when_unauthenticated() {
        assert!(matches!(classify(SUBSCRIPTION, false), Inbound::Feed(_)));
        assert!(matches!(classify(SUBSCRIPTION, true), Inbound::Feed(_)));
    }

    #[test]
    fn test_first_response_is_auth_while_unauthenticated() {
        match classify(AUTH_REPLY, false) {
            Inbound::Auth(message) => assert_eq!(message.access_token(), Some("tok")),
            other => panic!("Expected auth classification, got {:?}", other),
        }
    }

    #[test]
    fn test_response_after_authentication_goes_to_inbox() {
        assert!(matches!(classify(AUTH_REPLY, true), Inbound::Response(_)));
        assert!(matches!(
            classify(br#"{"jsonrpc":"2.0","method":"heartbeat","params":{}}"#, true),
            Inbound::Response(_)
        ));
    }

    #[test]
    fn test_decode_frame_variants() {
        assert!(matches!(
            decode_frame(Message::Text("{}".to_string())),
            Frame::Payload(ref bytes) if bytes == b"{}"
        ));
        assert!(matches!(
            decode_frame(Message::Binary(vec![1, 2])),
            Frame::Payload(ref bytes) if bytes == &[1, 2]
        ));
        assert!(matches!(decode_frame(Message::Ping(vec![])), Frame::Control));
        assert!(matches!(decode_frame(Message::Close(None)), Frame::Close(None)));
    }
}
