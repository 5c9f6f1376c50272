use serde_json::{Value, json};

/// Kraken rejects oversized subscription payloads; larger requests are
/// split into chunks of this many pairs.
pub const MAX_PAIRS_PER_SUBSCRIBE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelName {
    Ticker,
    Trade,
    Ohlc { interval_minutes: u32 },
}

impl ChannelName {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelName::Ticker => "ticker",
            ChannelName::Trade => "trade",
            ChannelName::Ohlc { .. } => "ohlc",
        }
    }

    /// Parses the channel name the server reports, e.g. "ticker" or "ohlc-5".
    pub fn parse(name: &str) -> Option<ChannelName> {
        if name == "ticker" {
            return Some(ChannelName::Ticker);
        }
        if name == "trade" {
            return Some(ChannelName::Trade);
        }
        if let Some(rest) = name.strip_prefix("ohlc") {
            let interval = rest
                .strip_prefix('-')
                .and_then(|s| s.parse::<u32>().ok())
                .unwrap_or(1);
            return Some(ChannelName::Ohlc {
                interval_minutes: interval,
            });
        }
        None
    }

    fn subscription(&self) -> Value {
        match self {
            ChannelName::Ticker => json!({ "name": "ticker" }),
            ChannelName::Trade => json!({ "name": "trade" }),
            ChannelName::Ohlc { interval_minutes } => {
                json!({ "name": "ohlc", "interval": interval_minutes })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickerUpdate {
    pub pair: String,
    pub last: f64,
    pub open_24h: f64,
    pub change_24h: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeUpdate {
    pub pair: String,
    pub price: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandleUpdate {
    pub pair: String,
    pub close: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    SystemStatus {
        status: String,
    },
    SubscriptionStatus {
        pair: String,
        channel: String,
        status: String,
        error: Option<String>,
    },
    Heartbeat,
    Pong,
    Ticker(TickerUpdate),
    Trade(TradeUpdate),
    Candle(CandleUpdate),
    Ignored,
}

/// Parses one frame of the feed. Control frames are objects carrying an
/// `event` key; data frames are `[channelId, payload, channelName, pair]`.
pub fn parse_inbound(text: &str) -> Option<Inbound> {
    let v: Value = serde_json::from_str(text).ok()?;

    if let Some(event) = v.get("event").and_then(|e| e.as_str()) {
        return Some(match event {
            "systemStatus" => Inbound::SystemStatus {
                status: str_field(&v, "status").unwrap_or_else(|| "unknown".to_string()),
            },
            "subscriptionStatus" => Inbound::SubscriptionStatus {
                pair: str_field(&v, "pair").unwrap_or_default(),
                channel: str_field(&v, "channelName").unwrap_or_default(),
                status: str_field(&v, "status").unwrap_or_default(),
                error: str_field(&v, "errorMessage"),
            },
            "heartbeat" => Inbound::Heartbeat,
            "pong" => Inbound::Pong,
            _ => Inbound::Ignored,
        });
    }

    let frame = v.as_array()?;
    if frame.len() < 4 {
        return None;
    }

    // channelName and pair trail the payload; some channels insert extra
    // payload elements, so index from the end.
    let channel = frame[frame.len() - 2].as_str()?;
    let pair = frame[frame.len() - 1].as_str()?.to_string();
    let payload = &frame[1];

    if channel == "ticker" {
        let last = indexed_num(payload, "c", 0)?;
        // o[1] is the 24h open; o[0] (today's open) is the fallback
        let open_24h = indexed_num(payload, "o", 1).or_else(|| indexed_num(payload, "o", 0))?;
        let change_24h = if open_24h != 0.0 {
            (last - open_24h) / open_24h * 100.0
        } else {
            0.0
        };
        return Some(Inbound::Ticker(TickerUpdate {
            pair,
            last,
            open_24h,
            change_24h,
        }));
    }

    if channel == "trade" {
        // payload: [[price, volume, time, side, orderType, misc], ...]
        let first = payload.as_array()?.first()?.as_array()?;
        let price = num_value(first.first()?)?;
        let volume = num_value(first.get(1)?)?;
        return Some(Inbound::Trade(TradeUpdate {
            pair,
            price,
            volume,
        }));
    }

    if channel.starts_with("ohlc") {
        // payload: [time, etime, open, high, low, close, vwap, volume, count]
        let close = num_value(payload.as_array()?.get(5)?)?;
        return Some(Inbound::Candle(CandleUpdate { pair, close }));
    }

    Some(Inbound::Ignored)
}

/// Builds the subscribe payloads for `pairs`, chunked to the per-message cap.
pub fn subscribe_messages(pairs: &[String], channel: ChannelName) -> Vec<String> {
    pairs
        .chunks(MAX_PAIRS_PER_SUBSCRIBE)
        .map(|chunk| {
            json!({
                "event": "subscribe",
                "pair": chunk,
                "subscription": channel.subscription(),
            })
            .to_string()
        })
        .collect()
}

pub fn unsubscribe_messages(pairs: &[String], channel: ChannelName) -> Vec<String> {
    pairs
        .chunks(MAX_PAIRS_PER_SUBSCRIBE)
        .map(|chunk| {
            json!({
                "event": "unsubscribe",
                "pair": chunk,
                "subscription": channel.subscription(),
            })
            .to_string()
        })
        .collect()
}

pub fn ping_message() -> String {
    json!({ "event": "ping" }).to_string()
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(|f| f.as_str()).map(|s| s.to_string())
}

/// Numbers arrive as strings inside payload arrays, e.g. `"c":["50100.5","0.02"]`.
fn indexed_num(payload: &Value, key: &str, idx: usize) -> Option<f64> {
    num_value(payload.get(key)?.get(idx)?)
}

fn num_value(v: &Value) -> Option<f64> {
    match v {
        Value::String(s) => s.parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_control_frames() {
        assert_eq!(
            parse_inbound(r#"{"event":"heartbeat"}"#),
            Some(Inbound::Heartbeat)
        );
        assert_eq!(parse_inbound(r#"{"event":"pong","reqid":7}"#), Some(Inbound::Pong));
        assert_eq!(
            parse_inbound(r#"{"event":"systemStatus","status":"online","version":"1.9.0"}"#),
            Some(Inbound::SystemStatus {
                status: "online".to_string()
            })
        );
    }

    #[test]
    fn parses_subscription_status_error() {
        let msg = r#"{"event":"subscriptionStatus","pair":"XBT/USD","channelName":"ticker","status":"error","errorMessage":"Subscription depth not supported"}"#;
        match parse_inbound(msg) {
            Some(Inbound::SubscriptionStatus {
                pair,
                channel,
                status,
                error,
            }) => {
                assert_eq!(pair, "XBT/USD");
                assert_eq!(channel, "ticker");
                assert_eq!(status, "error");
                assert!(error.is_some());
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn parses_ticker_frame_and_derives_change() {
        let msg = r#"[42,{"a":["50100.1","1","1.0"],"b":["50099.9","1","1.0"],"c":["50000.0","0.01"],"o":["49000.0","40000.0"]},"ticker","XBT/USD"]"#;
        match parse_inbound(msg) {
            Some(Inbound::Ticker(t)) => {
                assert_eq!(t.pair, "XBT/USD");
                assert_eq!(t.last, 50000.0);
                assert_eq!(t.open_24h, 40000.0);
                assert!((t.change_24h - 25.0).abs() < 1e-9);
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn parses_trade_frame() {
        let msg = r#"[17,[["50000.5","0.25","1700000000.123","s","l",""]],"trade","ETH/USD"]"#;
        match parse_inbound(msg) {
            Some(Inbound::Trade(t)) => {
                assert_eq!(t.pair, "ETH/USD");
                assert_eq!(t.price, 50000.5);
                assert_eq!(t.volume, 0.25);
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn parses_ohlc_frame_with_suffixed_channel_name() {
        let msg = r#"[55,["1700000000.0","1700000060.0","100.0","101.0","99.0","100.5","100.2","12.0",42],"ohlc-1","ETH/USD"]"#;
        match parse_inbound(msg) {
            Some(Inbound::Candle(c)) => {
                assert_eq!(c.pair, "ETH/USD");
                assert_eq!(c.close, 100.5);
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn chunks_oversized_subscribe_requests() {
        let pairs: Vec<String> = ["XBT/USD", "ETH/USD", "SOL/USD", "ADA/USD"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let msgs = subscribe_messages(&pairs, ChannelName::Ticker);
        assert_eq!(msgs.len(), 2);

        let first: Value = serde_json::from_str(&msgs[0]).unwrap();
        assert_eq!(first["event"], "subscribe");
        assert_eq!(first["pair"].as_array().unwrap().len(), 3);
        assert_eq!(first["subscription"]["name"], "ticker");

        let second: Value = serde_json::from_str(&msgs[1]).unwrap();
        assert_eq!(second["pair"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn ohlc_subscription_carries_interval() {
        let msgs = subscribe_messages(
            &["XBT/USD".to_string()],
            ChannelName::Ohlc {
                interval_minutes: 5,
            },
        );
        let v: Value = serde_json::from_str(&msgs[0]).unwrap();
        assert_eq!(v["subscription"]["interval"], 5);
        assert_eq!(ChannelName::parse("ohlc-5"), Some(ChannelName::Ohlc { interval_minutes: 5 }));
    }
}
