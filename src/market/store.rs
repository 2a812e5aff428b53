//! Per-room market state - the context every engine call receives.
//!
//! One `RoomStore` per room holds the live prices, the shared share pool,
//! every player's portfolio and bond lots. Engines own no state of their own;
//! they borrow the store mutably for the span of one request.

use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};

use super::fixed_income::{FixedIncomeHolding, FixedIncomeOffer};
use crate::core::{Company, CompanyId, CompanyListing, PlayerId};

/// A player's cash and share positions.
#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    pub cash: Decimal,
    /// Only strictly positive quantities are stored
    pub holdings: BTreeMap<CompanyId, u64>,
}

impl Portfolio {
    pub fn new(cash: Decimal) -> Self {
        Self {
            cash,
            holdings: BTreeMap::new(),
        }
    }

    pub fn quantity(&self, company: CompanyId) -> u64 {
        self.holdings.get(&company).copied().unwrap_or(0)
    }
}

#[derive(Debug, Default)]
pub struct RoomStore {
    /// Listed companies with the room's live price
    pub companies: BTreeMap<CompanyId, Company>,
    /// Shares still available for purchase
    pub pool: BTreeMap<CompanyId, u64>,
    /// Float per company fixed at game start
    initial_supply: BTreeMap<CompanyId, u64>,
    pub portfolios: HashMap<PlayerId, Portfolio>,
    /// Fixed-income offers currently on sale (round 1 only)
    pub offers: Vec<FixedIncomeOffer>,
    pub bonds: HashMap<PlayerId, Vec<FixedIncomeHolding>>,
}

impl RoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Materialise prices, pool and portfolios at game start.
    ///
    /// Anything left from a previous call is replaced.
    pub fn open_market(
        &mut self,
        listings: &[CompanyListing],
        players: impl IntoIterator<Item = PlayerId>,
        initial_cash: Decimal,
        shares_per_company: u64,
    ) {
        self.companies = listings.iter().map(|l| (l.id, Company::from(l))).collect();
        self.pool = listings.iter().map(|l| (l.id, shares_per_company)).collect();
        self.initial_supply = self.pool.clone();
        self.portfolios = players
            .into_iter()
            .map(|id| (id, Portfolio::new(initial_cash)))
            .collect();
        self.offers.clear();
        self.bonds.clear();
    }

    pub fn is_open(&self) -> bool {
        !self.companies.is_empty()
    }

    pub fn company(&self, id: CompanyId) -> Option<&Company> {
        self.companies.get(&id)
    }

    pub fn available(&self, id: CompanyId) -> u64 {
        self.pool.get(&id).copied().unwrap_or(0)
    }

    pub fn initial_supply(&self, id: CompanyId) -> u64 {
        self.initial_supply.get(&id).copied().unwrap_or(0)
    }

    /// Snapshot of the pool for `stocksUpdate`.
    pub fn available_shares(&self) -> BTreeMap<CompanyId, u64> {
        self.pool.clone()
    }

    /// Shares of `id` held across all portfolios.
    pub fn held(&self, id: CompanyId) -> u64 {
        self.portfolios.values().map(|p| p.quantity(id)).sum()
    }

    /// pool + Σ holdings == initial float, for every company.
    pub fn supply_is_conserved(&self) -> bool {
        self.initial_supply
            .iter()
            .all(|(&id, &supply)| self.available(id) + self.held(id) == supply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::catalog::default_companies;

    #[test]
    fn test_open_market() {
        let mut store = RoomStore::new();
        assert!(!store.is_open());

        let listings = default_companies();
        store.open_market(&listings, [PlayerId(1), PlayerId(2)], Decimal::from(10_000), 500);

        assert!(store.is_open());
        assert_eq!(store.portfolios.len(), 2);
        assert_eq!(store.portfolios[&PlayerId(2)].cash, Decimal::from(10_000));
        for l in &listings {
            assert_eq!(store.available(l.id), 500);
            assert_eq!(store.initial_supply(l.id), 500);
            assert_eq!(store.company(l.id).map(|c| c.price), Some(l.current_price));
        }
        assert!(store.supply_is_conserved());
    }

    #[test]
    fn test_conservation_detects_leak() {
        let mut store = RoomStore::new();
        store.open_market(&default_companies(), [PlayerId(1)], Decimal::from(100), 10);

        let id = CompanyId(1);
        store.pool.insert(id, 7);
        assert!(!store.supply_is_conserved());

        store
            .portfolios
            .get_mut(&PlayerId(1))
            .unwrap()
            .holdings
            .insert(id, 3);
        assert!(store.supply_is_conserved());
    }
}
