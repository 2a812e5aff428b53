//! Trade journal - write-only projection of executed trades
//!
//! The in-memory room is the only live source of truth. Journal writes
//! happen after the fact and their failures never reach the game.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use crate::core::{CompanyId, PlayerId, Result, Side};
use crate::market::TradeReceipt;
use crate::room::Player;

/// One executed share trade as the history endpoint stores it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRecord {
    pub room_code: String,
    pub player_id: PlayerId,
    pub player_name: String,
    #[serde(rename = "type")]
    pub side: Side,
    pub company_id: CompanyId,
    pub symbol: String,
    pub quantity: u64,
    pub price: Decimal,
    pub total: Decimal,
    pub executed_at: DateTime<Utc>,
}

impl TradeRecord {
    /// `None` for rejected orders.
    pub fn from_receipt(room_code: &str, player: &Player, receipt: &TradeReceipt) -> Option<Self> {
        let fill = receipt.outcome.as_ref().ok()?;
        Some(Self {
            room_code: room_code.to_string(),
            player_id: player.id,
            player_name: player.name.clone(),
            side: receipt.side?,
            company_id: receipt.company_id?,
            symbol: receipt.company_symbol.clone()?,
            quantity: receipt.quantity?,
            price: receipt.price_at_moment?,
            total: fill.total,
            executed_at: Utc::now(),
        })
    }
}

/// Sink for executed trades
#[async_trait]
pub trait TradeJournal: Send + Sync {
    async fn record(&self, trade: &TradeRecord) -> Result<()>;

    fn name(&self) -> &str;
}

/// Journal that only logs.
#[derive(Debug, Default)]
pub struct LogJournal;

#[async_trait]
impl TradeJournal for LogJournal {
    async fn record(&self, trade: &TradeRecord) -> Result<()> {
        info!(
            "📒 [{}] {} {} {} x{} @ {} = {}",
            trade.room_code, trade.player_name, trade.side, trade.symbol, trade.quantity, trade.price, trade.total
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Journal posting each trade to the transaction-history endpoint.
pub struct RestJournal {
    url: String,
    client: reqwest::Client,
}

impl RestJournal {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TradeJournal for RestJournal {
    async fn record(&self, trade: &TradeRecord) -> Result<()> {
        let resp = self.client.post(&self.url).json(trade).send().await?;
        if let Err(e) = resp.error_for_status_ref() {
            warn!("Trade journal rejected {} {}: {}", trade.room_code, trade.symbol, e);
            return Err(e.into());
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "rest"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ConnId, SessionToken};
    use crate::market::TradeError;
    use crate::market::trade::TradeFill;

    fn player() -> Player {
        Player {
            id: PlayerId(2),
            name: "bia".into(),
            character_id: 4,
            conn: Some(ConnId::new()),
            token: SessionToken::mint(),
            away_secs: 0,
        }
    }

    fn receipt(outcome: std::result::Result<TradeFill, TradeError>) -> TradeReceipt {
        TradeReceipt {
            side: Some(Side::Buy),
            company_id: Some(CompanyId(3)),
            company_name: Some("Curva".into()),
            company_symbol: Some("CRVA".into()),
            quantity: Some(5),
            price_at_moment: Some(Decimal::from(100)),
            outcome,
        }
    }

    #[test]
    fn test_record_from_fill() {
        let fill = TradeFill {
            total: Decimal::from(500),
            cash_after: Decimal::from(500),
            holding_after: 5,
            available_after: 95,
        };
        let rec = TradeRecord::from_receipt("ROOM1", &player(), &receipt(Ok(fill))).unwrap();
        assert_eq!(rec.player_id, PlayerId(2));
        assert_eq!(rec.total, Decimal::from(500));

        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["type"], "BUY");
        assert_eq!(json["roomCode"], "ROOM1");
    }

    #[test]
    fn test_rejected_receipt_not_journalled() {
        let r = receipt(Err(TradeError::InsufficientShares { available: 0 }));
        assert!(TradeRecord::from_receipt("ROOM1", &player(), &r).is_none());
    }

    #[tokio::test]
    async fn test_log_journal_accepts() {
        let fill = TradeFill {
            total: Decimal::from(500),
            cash_after: Decimal::ZERO,
            holding_after: 5,
            available_after: 95,
        };
        let rec = TradeRecord::from_receipt("ROOM1", &player(), &receipt(Ok(fill))).unwrap();
        assert!(LogJournal.record(&rec).await.is_ok());
    }
}
