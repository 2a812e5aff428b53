//! Fixed-income ledger - round-1 bond issuance, purchases and maturity payouts.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::store::{Portfolio, RoomStore};
use super::trade::parse_quantity;
use crate::core::PlayerId;

/// The only round in which offers are on sale.
pub const ISSUANCE_ROUND: u8 = 1;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FixedIncomeError {
    #[error("Fixed income offers are only available in round 1")]
    NotRoundOne,

    #[error("The market is closed")]
    MarketClosed,

    #[error("Invalid request")]
    InvalidRequest,

    #[error("Offer not found")]
    OfferNotFound,

    #[error("Insufficient remaining units: {remaining} left")]
    InsufficientUnits { remaining: u64 },

    #[error("Insufficient funds: {required} required, {available} available")]
    InsufficientFunds { required: Decimal, available: Decimal },

    #[error("Portfolio not initialized")]
    NoPortfolio,
}

/// Issuance template; one offer is materialised from it per game.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixedIncomeTemplate {
    pub id: String,
    pub issuer: String,
    pub unit_price: Decimal,
    pub interest_rate: Decimal,
    /// Rounds until maturity
    pub term_months: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixedIncomeOffer {
    pub id: String,
    pub issuer: String,
    pub unit_price: Decimal,
    pub interest_rate: Decimal,
    pub term_months: u32,
    pub remaining_units: u64,
}

/// A purchased bond lot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixedIncomeHolding {
    pub offer_id: String,
    pub issuer: String,
    pub unit_price: Decimal,
    pub interest_rate: Decimal,
    pub term_months: u32,
    pub remaining_months: u32,
    pub quantity: u64,
}

impl FixedIncomeHolding {
    /// Face value; bonds are never marked to market.
    pub fn face_value(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BondPurchase {
    pub offer: FixedIncomeOffer,
    pub quantity: u64,
    pub total_cost: Decimal,
}

/// A matured lot paid back to its owner.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Payout {
    #[serde(skip)]
    pub player: PlayerId,
    pub offer_id: String,
    pub issuer: String,
    pub principal: Decimal,
    pub interest: Decimal,
}

/// Fresh catalog with `units` of every template on sale.
pub fn issue_offers(templates: &[FixedIncomeTemplate], units: u64) -> Vec<FixedIncomeOffer> {
    templates
        .iter()
        .map(|t| FixedIncomeOffer {
            id: t.id.clone(),
            issuer: t.issuer.clone(),
            unit_price: t.unit_price,
            interest_rate: t.interest_rate,
            term_months: t.term_months,
            remaining_units: units,
        })
        .collect()
}

/// Buy `quantity` units of `offer_id` for `player`.
///
/// Checks run in a fixed order and nothing is mutated unless all pass.
pub fn purchase(
    store: &mut RoomStore,
    round: u8,
    player: PlayerId,
    offer_id: Option<&str>,
    quantity: Option<f64>,
) -> Result<BondPurchase, FixedIncomeError> {
    if round != ISSUANCE_ROUND {
        return Err(FixedIncomeError::NotRoundOne);
    }
    let (offer_id, quantity) = match (offer_id, parse_quantity(quantity)) {
        (Some(id), Some(q)) if !id.is_empty() => (id, q),
        _ => return Err(FixedIncomeError::InvalidRequest),
    };

    let idx = store
        .offers
        .iter()
        .position(|o| o.id == offer_id)
        .ok_or(FixedIncomeError::OfferNotFound)?;
    let offer = &store.offers[idx];
    if offer.remaining_units < quantity {
        return Err(FixedIncomeError::InsufficientUnits {
            remaining: offer.remaining_units,
        });
    }

    let total_cost = offer.unit_price * Decimal::from(quantity);
    let portfolio = store
        .portfolios
        .get_mut(&player)
        .ok_or(FixedIncomeError::NoPortfolio)?;
    if portfolio.cash < total_cost {
        return Err(FixedIncomeError::InsufficientFunds {
            required: total_cost,
            available: portfolio.cash,
        });
    }

    portfolio.cash -= total_cost;
    let offer = &mut store.offers[idx];
    offer.remaining_units -= quantity;
    let offer = offer.clone();

    let lots = store.bonds.entry(player).or_default();
    match lots
        .iter_mut()
        .find(|h| h.offer_id == offer.id && h.term_months == offer.term_months)
    {
        Some(lot) => lot.quantity += quantity,
        None => lots.push(FixedIncomeHolding {
            offer_id: offer.id.clone(),
            issuer: offer.issuer.clone(),
            unit_price: offer.unit_price,
            interest_rate: offer.interest_rate,
            term_months: offer.term_months,
            remaining_months: offer.term_months,
            quantity,
        }),
    }

    debug!(
        "{} bought {} x {} for {} ({} left)",
        player, quantity, offer.id, total_cost, offer.remaining_units
    );

    Ok(BondPurchase {
        offer,
        quantity,
        total_cost,
    })
}

/// Age every lot by one round and pay out the ones that matured.
///
/// Principal plus `principal * interest_rate` is credited to the owner's cash
/// and the lot is removed; all other lots keep their decremented term.
pub fn process_maturity(
    bonds: &mut HashMap<PlayerId, Vec<FixedIncomeHolding>>,
    portfolios: &mut HashMap<PlayerId, Portfolio>,
) -> Vec<Payout> {
    let mut owners: Vec<PlayerId> = bonds.keys().copied().collect();
    owners.sort();

    let mut payouts = Vec::new();
    for player in owners {
        let Some(lots) = bonds.get_mut(&player) else {
            continue;
        };

        let mut kept = Vec::with_capacity(lots.len());
        for mut lot in lots.drain(..) {
            lot.remaining_months = lot.remaining_months.saturating_sub(1);
            if lot.remaining_months > 0 {
                kept.push(lot);
                continue;
            }

            let principal = lot.face_value();
            let interest = principal * lot.interest_rate;
            match portfolios.get_mut(&player) {
                Some(p) => p.cash += principal + interest,
                None => warn!("{} matured {} with no portfolio to credit", player, lot.offer_id),
            }
            info!(
                "💰 {} matured {} x {}: principal={} interest={}",
                player, lot.quantity, lot.offer_id, principal, interest
            );
            payouts.push(Payout {
                player,
                offer_id: lot.offer_id,
                issuer: lot.issuer,
                principal,
                interest,
            });
        }
        *lots = kept;
    }

    bonds.retain(|_, lots| !lots.is_empty());
    payouts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::catalog::{default_companies, fixed_income_templates};

    fn open_store(cash: i64) -> RoomStore {
        let mut store = RoomStore::new();
        store.open_market(&default_companies(), [PlayerId(1), PlayerId(2)], Decimal::from(cash), 100);
        store.offers = issue_offers(&fixed_income_templates(), 200);
        store
    }

    fn lot(remaining_months: u32) -> FixedIncomeHolding {
        FixedIncomeHolding {
            offer_id: "TEST".into(),
            issuer: "Test Issuer".into(),
            unit_price: Decimal::from(100),
            interest_rate: Decimal::new(1, 1),
            term_months: remaining_months,
            remaining_months,
            quantity: 2,
        }
    }

    #[test]
    fn test_issue_offers() {
        let offers = issue_offers(&fixed_income_templates(), 200);
        assert_eq!(offers.len(), fixed_income_templates().len());
        assert!(offers.iter().all(|o| o.remaining_units == 200));
    }

    #[test]
    fn test_purchase_debits_and_records() {
        let mut store = open_store(10_000);
        let p = purchase(&mut store, 1, PlayerId(1), Some("MUNI-3R"), Some(4.0)).unwrap();

        assert_eq!(p.total_cost, Decimal::from(2_000));
        assert_eq!(p.offer.remaining_units, 196);
        assert_eq!(store.portfolios[&PlayerId(1)].cash, Decimal::from(8_000));
        let lots = &store.bonds[&PlayerId(1)];
        assert_eq!(lots.len(), 1);
        assert_eq!(lots[0].remaining_months, 3);
        assert_eq!(lots[0].quantity, 4);
    }

    #[test]
    fn test_purchase_merges_same_offer() {
        let mut store = open_store(10_000);
        purchase(&mut store, 1, PlayerId(1), Some("CDB-DLTA-1R"), Some(3.0)).unwrap();
        purchase(&mut store, 1, PlayerId(1), Some("CDB-DLTA-1R"), Some(2.0)).unwrap();

        let lots = &store.bonds[&PlayerId(1)];
        assert_eq!(lots.len(), 1);
        assert_eq!(lots[0].quantity, 5);
    }

    #[test]
    fn test_purchase_rejections() {
        let mut store = open_store(1_000);

        assert_eq!(
            purchase(&mut store, 2, PlayerId(1), Some("TSY-2R"), Some(1.0)),
            Err(FixedIncomeError::NotRoundOne)
        );
        assert_eq!(
            purchase(&mut store, 1, PlayerId(1), Some("TSY-2R"), Some(0.0)),
            Err(FixedIncomeError::InvalidRequest)
        );
        assert_eq!(
            purchase(&mut store, 1, PlayerId(1), None, Some(1.0)),
            Err(FixedIncomeError::InvalidRequest)
        );
        assert_eq!(
            purchase(&mut store, 1, PlayerId(1), Some("NOPE"), Some(1.0)),
            Err(FixedIncomeError::OfferNotFound)
        );
        assert_eq!(
            purchase(&mut store, 1, PlayerId(1), Some("TSY-2R"), Some(201.0)),
            Err(FixedIncomeError::InsufficientUnits { remaining: 200 })
        );
        assert!(matches!(
            purchase(&mut store, 1, PlayerId(1), Some("TSY-2R"), Some(2.0)),
            Err(FixedIncomeError::InsufficientFunds { .. })
        ));
        assert_eq!(
            purchase(&mut store, 1, PlayerId(9), Some("TSY-2R"), Some(1.0)),
            Err(FixedIncomeError::NoPortfolio)
        );

        // nothing moved
        assert_eq!(store.portfolios[&PlayerId(1)].cash, Decimal::from(1_000));
        assert!(store.offers.iter().all(|o| o.remaining_units == 200));
        assert!(store.bonds.is_empty());
    }

    #[test]
    fn test_maturity_pays_principal_and_interest() {
        let mut store = open_store(1_000);
        store.bonds.insert(PlayerId(1), vec![lot(1)]);

        let payouts = process_maturity(&mut store.bonds, &mut store.portfolios);

        assert_eq!(payouts.len(), 1);
        assert_eq!(payouts[0].principal, Decimal::from(200));
        assert_eq!(payouts[0].interest, Decimal::from(20));
        assert_eq!(store.portfolios[&PlayerId(1)].cash, Decimal::from(1_220));
        assert!(store.bonds.is_empty());
    }

    #[test]
    fn test_maturity_counts_down_over_rounds() {
        let mut store = open_store(1_000);
        store.bonds.insert(PlayerId(2), vec![lot(3)]);

        for _ in 0..2 {
            let payouts = process_maturity(&mut store.bonds, &mut store.portfolios);
            assert!(payouts.is_empty());
        }
        assert_eq!(store.bonds[&PlayerId(2)][0].remaining_months, 1);
        assert_eq!(store.portfolios[&PlayerId(2)].cash, Decimal::from(1_000));

        let payouts = process_maturity(&mut store.bonds, &mut store.portfolios);
        assert_eq!(payouts.len(), 1);
        assert_eq!(payouts[0].player, PlayerId(2));
        assert!(!store.bonds.contains_key(&PlayerId(2)));
        assert_eq!(store.portfolios[&PlayerId(2)].cash, Decimal::from(1_220));
    }

    #[test]
    fn test_maturity_keeps_unmatured_lots() {
        let mut store = open_store(0);
        store.bonds.insert(PlayerId(1), vec![lot(1), lot(4)]);

        let payouts = process_maturity(&mut store.bonds, &mut store.portfolios);
        assert_eq!(payouts.len(), 1);
        let lots = &store.bonds[&PlayerId(1)];
        assert_eq!(lots.len(), 1);
        assert_eq!(lots[0].remaining_months, 3);
    }
}
