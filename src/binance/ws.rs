use anyhow::{Context, Result};
use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite;

use crate::model::trade::{Instrument, Trade};

use super::types::decode_stream_message;

/// A single `@aggTrade` stream subscription for one instrument.
///
/// Holds only the stream URL; each call to [`run_once`](Self::run_once) is
/// one connection attempt plus read loop. Reconnection policy lives with the
/// caller, which needs to run a gap catch-up between sessions.
pub struct AggTradeStream {
    url: String,
    instrument: Instrument,
}

impl AggTradeStream {
    pub fn new(ws_base_url: &str, instrument: Instrument) -> Self {
        let url = format!(
            "{}/{}@aggTrade",
            ws_base_url.trim_end_matches('/'),
            instrument.symbol_lower()
        );
        Self { url, instrument }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Connect and read until the connection drops or shutdown is signalled.
    ///
    /// Flips `connected_tx` to `true` once the handshake succeeds so the
    /// caller can start catch-up knowing live coverage has begun. Returns
    /// `Ok(())` only for deliberate shutdown; a dropped connection is an
    /// error so the caller reconnects.
    pub async fn run_once(
        &self,
        trade_tx: &mpsc::Sender<Trade>,
        connected_tx: &watch::Sender<bool>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let (ws_stream, _resp) = tokio_tungstenite::connect_async(&self.url)
            .await
            .context("WebSocket connect failed")?;

        tracing::info!(instrument = %self.instrument, url = %self.url, "stream connected");
        let _ = connected_tx.send(true);

        let (_write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(tungstenite::Message::Text(text))) => {
                            let Some(event) = decode_stream_message(&text) else {
                                tracing::debug!(instrument = %self.instrument, "ignoring non-trade message");
                                continue;
                            };
                            if trade_tx.send(event.into_trade()).await.is_err() {
                                // Receiver gone means the worker is winding down.
                                return Ok(());
                            }
                        }
                        Some(Ok(tungstenite::Message::Ping(_))) => {
                            // tokio-tungstenite answers pings automatically
                        }
                        Some(Ok(tungstenite::Message::Close(frame))) => {
                            return Err(anyhow::anyhow!("server closed stream: {:?}", frame));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return Err(anyhow::anyhow!("WebSocket read error: {}", e));
                        }
                        None => {
                            return Err(anyhow::anyhow!("WebSocket stream ended"));
                        }
                    }
                }
                _ = shutdown.changed() => {
                    return Ok(());
                }
            }
        }
    }
}
