use serde::{Deserialize, Serialize};

/// Field order of one cluster row inside the stored `clusters` JSON.
/// Consumers index into rows by these positions.
pub const CLUSTER_FIELDS: [&str; 5] = ["price", "volume", "ask", "bid", "delta"];

/// Per-price-level volume breakdown within one candle bucket.
///
/// `bid` is volume where the buyer was maker (seller-initiated), `ask` the
/// taker-initiated remainder; `volume = bid + ask` and `delta = ask - bid`.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceLevel {
    pub price: f64,
    pub volume: f64,
    pub ask: f64,
    pub bid: f64,
    pub delta: f64,
}

impl PriceLevel {
    /// Array layout matching [`CLUSTER_FIELDS`].
    pub fn to_row(&self) -> [f64; 5] {
        [self.price, self.volume, self.ask, self.bid, self.delta]
    }

    pub fn from_row(row: [f64; 5]) -> Self {
        Self {
            price: row[0],
            volume: row[1],
            ask: row[2],
            bid: row[3],
            delta: row[4],
        }
    }
}

/// One materialized candle row. Fully derived from the trade log; candle
/// tables are disposable caches, never a source of truth.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub delta: f64,
    pub cvd: f64,
    /// Price levels touched in this bucket, sorted by price descending.
    pub levels: Vec<PriceLevel>,
}

impl Candle {
    /// Serialize the price levels as the `clusters` JSON stored alongside
    /// the candle row: `[[price, volume, ask, bid, delta], ...]`.
    pub fn clusters_json(&self) -> serde_json::Result<String> {
        let rows: Vec<ClusterRow> = self.levels.iter().map(|l| ClusterRow(l.to_row())).collect();
        serde_json::to_string(&rows)
    }
}

/// Decode a stored `clusters` JSON column back into price levels.
pub fn parse_clusters(json: &str) -> serde_json::Result<Vec<PriceLevel>> {
    let rows: Vec<ClusterRow> = serde_json::from_str(json)?;
    Ok(rows.into_iter().map(|r| PriceLevel::from_row(r.0)).collect())
}

#[derive(Serialize, Deserialize)]
#[serde(transparent)]
struct ClusterRow([f64; 5]);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clusters_json_preserves_field_order() {
        let candle = Candle {
            open_time: 0,
            open: 100.0,
            high: 105.0,
            low: 100.0,
            close: 105.0,
            volume: 3.0,
            delta: -1.0,
            cvd: -1.0,
            levels: vec![
                PriceLevel {
                    price: 105.0,
                    volume: 2.0,
                    ask: 0.0,
                    bid: 2.0,
                    delta: -2.0,
                },
                PriceLevel {
                    price: 100.0,
                    volume: 1.0,
                    ask: 1.0,
                    bid: 0.0,
                    delta: 1.0,
                },
            ],
        };
        let json = candle.clusters_json().unwrap();
        assert_eq!(json, "[[105.0,2.0,0.0,2.0,-2.0],[100.0,1.0,1.0,0.0,1.0]]");

        let parsed = parse_clusters(&json).unwrap();
        assert_eq!(parsed, candle.levels);
    }

    #[test]
    fn empty_clusters_roundtrip() {
        let candle = Candle {
            open_time: 0,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 0.0,
            delta: 0.0,
            cvd: 0.0,
            levels: vec![],
        };
        assert_eq!(candle.clusters_json().unwrap(), "[]");
        assert!(parse_clusters("[]").unwrap().is_empty());
    }

    #[test]
    fn cluster_field_positions_are_stable() {
        assert_eq!(CLUSTER_FIELDS, ["price", "volume", "ask", "bid", "delta"]);
        let level = PriceLevel {
            price: 1.0,
            volume: 2.0,
            ask: 3.0,
            bid: 4.0,
            delta: -1.0,
        };
        assert_eq!(level.to_row(), [1.0, 2.0, 3.0, 4.0, -1.0]);
        assert_eq!(PriceLevel::from_row(level.to_row()), level);
    }
}
