//! Price engine - per-round price moves and rare market-wide shocks.
//!
//! Stateless: every call reads the room's prices, draws from the supplied RNG,
//! and writes the new prices back. Prices never drop below one tick
//! (0.0001), so repeated crashes or splits approach that floor but never
//! reach zero.

use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::core::{Company, CompanyId};

/// Decimal places kept on live prices.
const PRICE_DP: u32 = 4;
/// Smallest representable price.
const MIN_PRICE: Decimal = Decimal::from_parts(1, 0, 0, false, PRICE_DP);
/// Decimal places kept on drawn multipliers.
const FACTOR_DP: u32 = 6;

/// Normal round: each price moves independently within ±10%.
const NORMAL_SWING: f64 = 0.10;
/// Boom / crash magnitude range.
const SHOCK_MIN: f64 = 0.15;
const SHOCK_MAX: f64 = 0.25;

/// Market-wide shock applied to every company in the room at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpecialEvent {
    Boom,
    Crash,
    Split,
    ContraSplit,
}

impl SpecialEvent {
    /// Map a uniform draw in [0, 1) to an event; ~96% of draws map to none.
    pub fn from_roll(roll: f64) -> Option<Self> {
        if roll < 0.01 {
            Some(SpecialEvent::Boom)
        } else if roll < 0.02 {
            Some(SpecialEvent::Crash)
        } else if roll < 0.03 {
            Some(SpecialEvent::Split)
        } else if roll < 0.04 {
            Some(SpecialEvent::ContraSplit)
        } else {
            None
        }
    }

    fn message(&self, change: Decimal) -> String {
        let pct = (change * Decimal::ONE_HUNDRED).abs().round_dp(1);
        match self {
            SpecialEvent::Boom => format!("Market boom! Every stock rallied {}%", pct),
            SpecialEvent::Crash => format!("Market crash! Every stock fell {}%", pct),
            SpecialEvent::Split => "Stock split! Every share price was halved".to_string(),
            SpecialEvent::ContraSplit => {
                "Reverse split! Every share price was doubled".to_string()
            }
        }
    }
}

impl std::fmt::Display for SpecialEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SpecialEvent::Boom => "boom",
            SpecialEvent::Crash => "crash",
            SpecialEvent::Split => "split",
            SpecialEvent::ContraSplit => "contra-split",
        };
        f.write_str(s)
    }
}

/// The per-round special-event roll.
pub fn roll_special_event<R: Rng + ?Sized>(rng: &mut R) -> Option<SpecialEvent> {
    SpecialEvent::from_roll(rng.random::<f64>())
}

/// One company's move in one round.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceChange {
    pub company_id: CompanyId,
    pub symbol: String,
    pub old_price: Decimal,
    pub new_price: Decimal,
    /// Relative change, e.g. -0.5 for a split
    pub change: Decimal,
    pub event_type: Option<SpecialEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// All moves of one round settlement.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceMoves {
    pub special_event: Option<SpecialEvent>,
    pub changes: Vec<PriceChange>,
}

impl PriceMoves {
    /// Message of the round's special event, if any.
    pub fn event_message(&self) -> Option<&str> {
        self.changes.first().and_then(|c| c.message.as_deref())
    }
}

fn to_factor(x: f64) -> Decimal {
    Decimal::from_f64(x)
        .map(|d| d.round_dp(FACTOR_DP))
        .unwrap_or(Decimal::ONE)
}

/// Multiplier every company shares under `event`.
fn shock_factor<R: Rng + ?Sized>(event: SpecialEvent, rng: &mut R) -> Decimal {
    match event {
        SpecialEvent::Boom => to_factor(1.0 + rng.random_range(SHOCK_MIN..SHOCK_MAX)),
        SpecialEvent::Crash => to_factor(1.0 - rng.random_range(SHOCK_MIN..SHOCK_MAX)),
        SpecialEvent::Split => Decimal::new(5, 1),
        SpecialEvent::ContraSplit => Decimal::TWO,
    }
}

/// Move every company's price for one round and report the moves.
pub fn generate_price_changes<R: Rng + ?Sized>(
    companies: &mut BTreeMap<CompanyId, Company>,
    rng: &mut R,
) -> PriceMoves {
    let event = roll_special_event(rng);
    generate_with_event(companies, event, rng)
}

/// Same as [`generate_price_changes`] with the event roll already made.
pub fn generate_with_event<R: Rng + ?Sized>(
    companies: &mut BTreeMap<CompanyId, Company>,
    event: Option<SpecialEvent>,
    rng: &mut R,
) -> PriceMoves {
    let shared = event.map(|e| shock_factor(e, rng));

    let changes = companies
        .values_mut()
        .map(|company| {
            let factor = match shared {
                Some(f) => f,
                None => to_factor(1.0 + rng.random_range(-NORMAL_SWING..NORMAL_SWING)),
            };
            let old_price = company.price;
            let new_price = (old_price * factor).round_dp(PRICE_DP).max(MIN_PRICE);
            company.price = new_price;

            let change = factor - Decimal::ONE;
            PriceChange {
                company_id: company.id,
                symbol: company.symbol.clone(),
                old_price,
                new_price,
                change,
                event_type: event,
                message: event.map(|e| e.message(change)),
            }
        })
        .collect();

    PriceMoves {
        special_event: event,
        changes,
    }
}
