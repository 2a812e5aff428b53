//! Trade engine - validates and applies buy/sell orders against a room's
//! shared share pool and a player's cash and holdings.
//!
//! Every check runs before any mutation, so a rejected order leaves the store
//! exactly as it found it. Trades never move prices.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::store::RoomStore;
use crate::core::{CompanyId, PlayerId, Side};

/// Largest quantity a single order may carry.
const MAX_ORDER_QUANTITY: f64 = 1_000_000_000.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TradeError {
    #[error("Invalid request")]
    InvalidRequest,

    #[error("Company not found")]
    UnknownCompany,

    #[error("Insufficient available shares: only {available} left")]
    InsufficientShares { available: u64 },

    #[error("Insufficient funds: {required} required, {available} available")]
    InsufficientFunds { required: Decimal, available: Decimal },

    #[error("Insufficient holdings: you hold {held}")]
    InsufficientHoldings { held: u64 },

    #[error("Portfolio not initialized")]
    NoPortfolio,

    #[error("The market is closed")]
    MarketClosed,

    #[error("Trading opens after the news phase")]
    NewsPhase,
}

/// Order as it arrives on the wire; fields are checked by [`TradeOrder::validate`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeOrder {
    #[serde(default)]
    pub company_id: Option<Value>,
    #[serde(default, rename = "type")]
    pub side: Option<Value>,
    #[serde(default)]
    pub quantity: Option<Value>,
}

/// An order whose fields are all well-formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedOrder {
    pub company: CompanyId,
    pub side: Side,
    pub quantity: u64,
}

/// Positive whole number, or `None`.
pub fn parse_quantity(quantity: Option<f64>) -> Option<u64> {
    match quantity {
        Some(q) if q.is_finite() && q > 0.0 && q.fract() == 0.0 && q <= MAX_ORDER_QUANTITY => {
            Some(q as u64)
        }
        _ => None,
    }
}

impl TradeOrder {
    pub fn new(company: CompanyId, side: Side, quantity: u64) -> Self {
        Self {
            company_id: Some(Value::from(company.0)),
            side: Some(Value::from(side.to_string())),
            quantity: Some(Value::from(quantity)),
        }
    }

    fn company(&self) -> Option<CompanyId> {
        match self.company_id.as_ref()? {
            Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .map(CompanyId)
    }

    fn side(&self) -> Option<Side> {
        self.side.as_ref()?.as_str().and_then(Side::parse)
    }

    fn quantity(&self) -> Option<u64> {
        parse_quantity(self.quantity.as_ref().and_then(Value::as_f64))
    }

    pub fn validate(&self) -> Result<ValidatedOrder, TradeError> {
        match (self.company(), self.side(), self.quantity()) {
            (Some(company), Some(side), Some(quantity)) => Ok(ValidatedOrder {
                company,
                side,
                quantity,
            }),
            _ => Err(TradeError::InvalidRequest),
        }
    }
}

/// Post-trade figures of a successful order.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeFill {
    pub total: Decimal,
    pub cash_after: Decimal,
    pub holding_after: u64,
    pub available_after: u64,
}

/// Outcome of one order plus the context needed to describe it to the player.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeReceipt {
    pub side: Option<Side>,
    pub company_id: Option<CompanyId>,
    pub company_name: Option<String>,
    pub company_symbol: Option<String>,
    pub quantity: Option<u64>,
    pub price_at_moment: Option<Decimal>,
    pub outcome: Result<TradeFill, TradeError>,
}

impl TradeReceipt {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn error(&self) -> Option<&TradeError> {
        self.outcome.as_ref().err()
    }

    /// A rejection carrying whatever context the order and store provide.
    pub fn rejected(store: &RoomStore, order: &TradeOrder, err: TradeError) -> Self {
        let company_id = order.company();
        let company = company_id.and_then(|id| store.company(id));
        Self {
            side: order.side(),
            company_id,
            company_name: company.map(|c| c.name.clone()),
            company_symbol: company.map(|c| c.symbol.clone()),
            quantity: order.quantity(),
            price_at_moment: company.map(|c| c.price),
            outcome: Err(err),
        }
    }
}

/// Apply one order for `player`.
pub fn apply_trade(store: &mut RoomStore, player: PlayerId, order: &TradeOrder) -> TradeReceipt {
    let valid = match order.validate() {
        Ok(v) => v,
        Err(e) => return TradeReceipt::rejected(store, order, e),
    };
    let Some(company) = store.company(valid.company).cloned() else {
        return TradeReceipt::rejected(store, order, TradeError::UnknownCompany);
    };

    let outcome = execute(store, player, &valid, company.price);
    match &outcome {
        Ok(fill) => debug!(
            "{} {} {} x {} @ {} = {}",
            player, valid.side, valid.quantity, company.symbol, company.price, fill.total
        ),
        Err(e) => debug!(
            "{} {} {} x {} rejected: {}",
            player, valid.side, valid.quantity, company.symbol, e
        ),
    }

    TradeReceipt {
        side: Some(valid.side),
        company_id: Some(company.id),
        company_name: Some(company.name),
        company_symbol: Some(company.symbol),
        quantity: Some(valid.quantity),
        price_at_moment: Some(company.price),
        outcome,
    }
}

fn execute(
    store: &mut RoomStore,
    player: PlayerId,
    order: &ValidatedOrder,
    price: Decimal,
) -> Result<TradeFill, TradeError> {
    let total = price * Decimal::from(order.quantity);
    let available = store.available(order.company);
    let portfolio = store
        .portfolios
        .get_mut(&player)
        .ok_or(TradeError::NoPortfolio)?;

    let (holding_after, available_after) = match order.side {
        Side::Buy => {
            if available < order.quantity {
                return Err(TradeError::InsufficientShares { available });
            }
            if portfolio.cash < total {
                return Err(TradeError::InsufficientFunds {
                    required: total,
                    available: portfolio.cash,
                });
            }
            portfolio.cash -= total;
            let held = portfolio.holdings.entry(order.company).or_insert(0);
            *held += order.quantity;
            (*held, available - order.quantity)
        }
        Side::Sell => {
            let held = portfolio.quantity(order.company);
            if held < order.quantity {
                return Err(TradeError::InsufficientHoldings { held });
            }
            portfolio.cash += total;
            let remaining = held - order.quantity;
            // Clean up zero positions
            if remaining == 0 {
                portfolio.holdings.remove(&order.company);
            } else {
                portfolio.holdings.insert(order.company, remaining);
            }
            (remaining, available + order.quantity)
        }
    };
    let cash_after = portfolio.cash;
    store.pool.insert(order.company, available_after);

    Ok(TradeFill {
        total,
        cash_after,
        holding_after,
        available_after,
    })
}

/// Apply `orders` one after another against the same store.
///
/// There is no all-or-nothing guarantee: each order sees the effects of the
/// ones before it, and a rejected order does not undo earlier fills.
pub fn apply_bulk(store: &mut RoomStore, player: PlayerId, orders: &[TradeOrder]) -> Vec<TradeReceipt> {
    orders
        .iter()
        .map(|order| apply_trade(store, player, order))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CompanyListing;
    use crate::market::store::Portfolio;

    const ACME: CompanyId = CompanyId(1);
    const ME: PlayerId = PlayerId(1);

    fn store_with(cash: i64, price: i64, pool: u64) -> RoomStore {
        let listing = CompanyListing {
            id: ACME,
            symbol: "ACME".into(),
            name: "Acme Corp".into(),
            current_price: Decimal::from(price),
            base_price: Decimal::from(price),
            sector: "Industrials".into(),
        };
        let mut store = RoomStore::new();
        store.open_market(&[listing], [ME, PlayerId(2)], Decimal::from(cash), pool);
        store
    }

    fn give(store: &mut RoomStore, qty: u64) {
        store.portfolios.get_mut(&ME).unwrap().holdings.insert(ACME, qty);
        let pool = store.pool.get_mut(&ACME).unwrap();
        *pool -= qty;
    }

    fn me(store: &RoomStore) -> &Portfolio {
        &store.portfolios[&ME]
    }

    #[test]
    fn test_buy_success() {
        let mut store = store_with(1_000, 100, 100);
        let receipt = apply_trade(&mut store, ME, &TradeOrder::new(ACME, Side::Buy, 5));

        assert!(receipt.is_success());
        assert_eq!(me(&store).cash, Decimal::from(500));
        assert_eq!(me(&store).quantity(ACME), 5);
        assert_eq!(store.available(ACME), 95);
        assert_eq!(receipt.company_symbol.as_deref(), Some("ACME"));
        assert_eq!(receipt.price_at_moment, Some(Decimal::from(100)));
        assert!(store.supply_is_conserved());
    }

    #[test]
    fn test_buy_insufficient_funds() {
        let mut store = store_with(100, 100, 100);
        let receipt = apply_trade(&mut store, ME, &TradeOrder::new(ACME, Side::Buy, 5));

        assert!(matches!(receipt.error(), Some(TradeError::InsufficientFunds { .. })));
        assert_eq!(me(&store).cash, Decimal::from(100));
        assert_eq!(store.available(ACME), 100);
        assert!(me(&store).holdings.is_empty());
        assert_eq!(receipt.company_name.as_deref(), Some("Acme Corp"));
    }

    #[test]
    fn test_buy_insufficient_shares() {
        let mut store = store_with(1_000_000, 1, 3);
        let receipt = apply_trade(&mut store, ME, &TradeOrder::new(ACME, Side::Buy, 4));

        assert_eq!(receipt.error(), Some(&TradeError::InsufficientShares { available: 3 }));
        assert_eq!(me(&store).cash, Decimal::from(1_000_000));
    }

    #[test]
    fn test_sell_success() {
        let mut store = store_with(0, 100, 100);
        give(&mut store, 10);

        let receipt = apply_trade(&mut store, ME, &TradeOrder::new(ACME, Side::Sell, 4));

        assert!(receipt.is_success());
        assert_eq!(me(&store).cash, Decimal::from(400));
        assert_eq!(me(&store).quantity(ACME), 6);
        assert_eq!(store.available(ACME), 94);
        assert!(store.supply_is_conserved());
    }

    #[test]
    fn test_sell_all_removes_entry() {
        let mut store = store_with(0, 100, 100);
        give(&mut store, 4);

        apply_trade(&mut store, ME, &TradeOrder::new(ACME, Side::Sell, 4));
        assert!(!me(&store).holdings.contains_key(&ACME));
        assert_eq!(store.available(ACME), 100);
    }

    #[test]
    fn test_sell_insufficient_holdings() {
        let mut store = store_with(50, 100, 100);
        give(&mut store, 3);

        let receipt = apply_trade(&mut store, ME, &TradeOrder::new(ACME, Side::Sell, 5));

        assert_eq!(receipt.error(), Some(&TradeError::InsufficientHoldings { held: 3 }));
        assert_eq!(me(&store).cash, Decimal::from(50));
        assert_eq!(me(&store).quantity(ACME), 3);
        assert_eq!(store.available(ACME), 97);
    }

    #[test]
    fn test_invalid_requests_touch_nothing() {
        let mut store = store_with(1_000, 100, 100);
        let orders = [
            TradeOrder::default(),
            TradeOrder {
                side: Some(Value::from("HOLD")),
                ..TradeOrder::new(ACME, Side::Buy, 1)
            },
            TradeOrder {
                quantity: Some(Value::from(-2)),
                ..TradeOrder::new(ACME, Side::Buy, 1)
            },
            TradeOrder {
                quantity: Some(Value::from(1.5)),
                ..TradeOrder::new(ACME, Side::Buy, 1)
            },
            TradeOrder {
                company_id: None,
                ..TradeOrder::new(ACME, Side::Buy, 1)
            },
        ];
        for order in &orders {
            let receipt = apply_trade(&mut store, ME, order);
            assert_eq!(receipt.error(), Some(&TradeError::InvalidRequest));
        }
        assert_eq!(me(&store).cash, Decimal::from(1_000));
        assert_eq!(store.available(ACME), 100);
    }

    #[test]
    fn test_unknown_company_and_missing_portfolio() {
        let mut store = store_with(1_000, 100, 100);
        let receipt = apply_trade(&mut store, ME, &TradeOrder::new(CompanyId(77), Side::Buy, 1));
        assert_eq!(receipt.error(), Some(&TradeError::UnknownCompany));

        let receipt = apply_trade(&mut store, PlayerId(42), &TradeOrder::new(ACME, Side::Buy, 1));
        assert_eq!(receipt.error(), Some(&TradeError::NoPortfolio));
        assert_eq!(store.available(ACME), 100);
    }

    #[test]
    fn test_wire_order_parsing() {
        let order: TradeOrder =
            serde_json::from_str(r#"{"companyId":"1","type":"buy","quantity":2}"#).unwrap();
        assert_eq!(
            order.validate(),
            Ok(ValidatedOrder {
                company: ACME,
                side: Side::Buy,
                quantity: 2
            })
        );
    }

    #[test]
    fn test_bulk_is_sequential_without_rollback() {
        let mut store = store_with(1_000, 100, 100);
        let orders = [
            TradeOrder::new(ACME, Side::Buy, 6),
            TradeOrder::new(ACME, Side::Sell, 2),
            TradeOrder::new(ACME, Side::Buy, 10), // 600 cash left, needs 1000
            TradeOrder::new(ACME, Side::Sell, 4),
        ];

        let receipts = apply_bulk(&mut store, ME, &orders);

        let ok: Vec<bool> = receipts.iter().map(TradeReceipt::is_success).collect();
        assert_eq!(ok, vec![true, true, false, true]);
        assert_eq!(me(&store).cash, Decimal::from(1_000));
        assert!(me(&store).holdings.is_empty());
        assert_eq!(store.available(ACME), 100);
    }

    #[test]
    fn test_conservation_over_random_mix() {
        let mut store = store_with(5_000, 25, 50);
        for i in 0..40u64 {
            let player = if i % 3 == 0 { PlayerId(2) } else { ME };
            let side = if i % 2 == 0 { Side::Buy } else { Side::Sell };
            apply_trade(&mut store, player, &TradeOrder::new(ACME, side, 1 + i % 7));
            assert!(store.supply_is_conserved());
            assert!(store.portfolios.values().all(|p| p.cash >= Decimal::ZERO));
        }
    }
}
