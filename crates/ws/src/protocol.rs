use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tickerflow_core::market::entity::Tick;

/// # Summary
/// 客户端 -> 服务端的文本帧，以 `type` 字段判别。
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { symbols: Vec<String> },
    Unsubscribe { symbols: Vec<String> },
    Ping,
}

/// # Summary
/// 服务端 -> 客户端的文本帧。
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected { message: String },
    Subscribed { symbols: Vec<String> },
    Unsubscribed { symbols: Vec<String> },
    Price {
        symbol: String,
        price: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        change24h: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        change_percent24h: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        high24h: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        low24h: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        volume24h: Option<f64>,
        timestamp: DateTime<Utc>,
    },
    Pong,
    Error { code: WsErrorCode, message: String },
}

/// # Summary
/// WS 协议层的错误种类，与 HTTP 错误分类表彼此独立，不借由
/// [`tickerflow_core::error::CoreError`] 派生。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WsErrorCode {
    InvalidMessage,
    ParseError,
    InvalidSymbols,
    LimitExceeded,
    BadRequest,
}

impl ServerMessage {
    pub fn from_tick(tick: &Tick) -> Self {
        ServerMessage::Price {
            symbol: tick.symbol.as_str().to_string(),
            price: tick.price,
            change24h: tick.change_24h,
            change_percent24h: tick.change_percent_24h,
            high24h: tick.high_24h,
            low24h: tick.low_24h,
            volume24h: tick.volume_24h,
            timestamp: tick.timestamp,
        }
    }

    pub fn error(code: WsErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","code":"INTERNAL","message":"serialization failed"}"#.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_subscribe_message_parses_from_json() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","symbols":["BTCUSDT"]}"#).unwrap();
        matches!(msg, ClientMessage::Subscribe { .. });
    }

    #[test]
    fn client_ping_message_parses_without_payload() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
    }

    #[test]
    fn error_message_serializes_screaming_snake_case_code() {
        let msg = ServerMessage::error(WsErrorCode::LimitExceeded, "too many symbols");
        let json = msg.to_json();
        assert!(json.contains("\"LIMIT_EXCEEDED\""));
    }

    #[test]
    fn price_message_omits_absent_optional_fields() {
        use tickerflow_core::common::Symbol;
        let tick = Tick {
            symbol: Symbol::parse("BTCUSDT").unwrap(),
            price: 1.0,
            change_24h: None,
            change_percent_24h: None,
            high_24h: None,
            low_24h: None,
            volume_24h: None,
            timestamp: Utc::now(),
        };
        let json = ServerMessage::from_tick(&tick).to_json();
        assert!(!json.contains("change24h"));
    }
}
