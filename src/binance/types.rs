use serde::Deserialize;

use crate::model::trade::Trade;

/// Deserialize Binance string-encoded numbers to f64.
pub fn string_to_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse::<f64>().map_err(serde::de::Error::custom)
}

/// One aggregate trade as sent on `<symbol>@aggTrade` streams and by the
/// aggTrades REST endpoint. Stream events carry `"e": "aggTrade"`; REST rows
/// omit the field, so it defaults to empty.
#[derive(Debug, Clone, Deserialize)]
pub struct AggTradeEvent {
    #[serde(rename = "e", default)]
    pub event_type: String,
    #[serde(rename = "a")]
    pub agg_trade_id: i64,
    #[serde(rename = "p", deserialize_with = "string_to_f64")]
    pub price: f64,
    #[serde(rename = "q", deserialize_with = "string_to_f64")]
    pub qty: f64,
    #[serde(rename = "T")]
    pub trade_time: i64,
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

impl AggTradeEvent {
    pub fn is_agg_trade(&self) -> bool {
        self.event_type.is_empty() || self.event_type == "aggTrade"
    }

    pub fn into_trade(self) -> Trade {
        Trade {
            id: self.agg_trade_id,
            price: self.price,
            qty: self.qty,
            time_ms: self.trade_time,
            is_buyer_maker: self.is_buyer_maker,
        }
    }
}

/// Decode one raw stream payload into an aggregate-trade event.
///
/// Accepts both the bare event shape and the combined-stream envelope
/// (`{"stream": ..., "data": {...}}`). Returns `None` for payloads that are
/// not aggregate trades (subscription acks, other event types, junk).
pub fn decode_stream_message(text: &str) -> Option<AggTradeEvent> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let payload = value.get("data").cloned().unwrap_or(value);
    let event: AggTradeEvent = serde_json::from_value(payload).ok()?;
    event.is_agg_trade().then_some(event)
}
