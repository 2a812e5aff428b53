//! Portfolio projection and end-of-game ranking.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use super::fixed_income::FixedIncomeHolding;
use super::store::RoomStore;
use crate::core::{CompanyId, PlayerId};

/// Why a snapshot was pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SnapshotStage {
    Opening,
    Trade,
    FixedIncome,
    RoundEnd,
    Payout,
    Request,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingView {
    pub company_id: CompanyId,
    pub symbol: String,
    pub name: String,
    pub quantity: u64,
    pub current_price: Decimal,
    pub total_value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BondView {
    #[serde(flatten)]
    pub holding: FixedIncomeHolding,
    pub current_value: Decimal,
}

/// Read-only valuation of one player at current prices.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSnapshot {
    pub cash: Decimal,
    pub holdings: Vec<HoldingView>,
    pub fixed_income_holdings: Vec<BondView>,
    pub portfolio_value: Decimal,
    pub fixed_income_value: Decimal,
    pub total_value: Decimal,
    pub stage: SnapshotStage,
}

/// Value `player`'s portfolio; `None` until the market has been opened for them.
pub fn snapshot(store: &RoomStore, player: PlayerId, stage: SnapshotStage) -> Option<PortfolioSnapshot> {
    let portfolio = store.portfolios.get(&player)?;

    let holdings: Vec<HoldingView> = portfolio
        .holdings
        .iter()
        .filter_map(|(&id, &quantity)| {
            let company = store.company(id)?;
            Some(HoldingView {
                company_id: id,
                symbol: company.symbol.clone(),
                name: company.name.clone(),
                quantity,
                current_price: company.price,
                total_value: company.price * Decimal::from(quantity),
            })
        })
        .collect();

    let fixed_income_holdings: Vec<BondView> = store
        .bonds
        .get(&player)
        .map(|lots| {
            lots.iter()
                .map(|lot| BondView {
                    current_value: lot.face_value(),
                    holding: lot.clone(),
                })
                .collect()
        })
        .unwrap_or_default();

    let portfolio_value: Decimal = holdings.iter().map(|h| h.total_value).sum();
    let fixed_income_value: Decimal = fixed_income_holdings.iter().map(|b| b.current_value).sum();

    Some(PortfolioSnapshot {
        cash: portfolio.cash,
        total_value: portfolio.cash + portfolio_value + fixed_income_value,
        holdings,
        fixed_income_holdings,
        portfolio_value,
        fixed_income_value,
        stage,
    })
}

fn cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// One row of the final leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalResultEntry {
    pub player_id: PlayerId,
    pub name: String,
    pub cash: Decimal,
    pub portfolio_value: Decimal,
    pub fixed_income_value: Decimal,
    pub final_value: Decimal,
    pub rank: usize,
}

/// Rank every player with a portfolio by final value, highest first.
///
/// Values are rounded to cents, half away from zero, before sorting; ties
/// keep input order.
pub fn final_results<'a>(
    players: impl IntoIterator<Item = (PlayerId, &'a str)>,
    store: &RoomStore,
) -> Vec<FinalResultEntry> {
    let mut rows: Vec<FinalResultEntry> = players
        .into_iter()
        .filter_map(|(id, name)| {
            let snap = snapshot(store, id, SnapshotStage::Request)?;
            Some(FinalResultEntry {
                player_id: id,
                name: name.to_string(),
                cash: cents(snap.cash),
                portfolio_value: cents(snap.portfolio_value),
                fixed_income_value: cents(snap.fixed_income_value),
                final_value: cents(snap.total_value),
                rank: 0,
            })
        })
        .collect();

    rows.sort_by(|a, b| b.final_value.cmp(&a.final_value));
    for (i, row) in rows.iter_mut().enumerate() {
        row.rank = i + 1;
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::catalog::default_companies;
    use crate::market::fixed_income::FixedIncomeHolding;

    fn store() -> RoomStore {
        let mut store = RoomStore::new();
        store.open_market(
            &default_companies(),
            [PlayerId(1), PlayerId(2), PlayerId(3)],
            Decimal::from(1_000),
            100,
        );
        store
    }

    #[test]
    fn test_final_values_round_half_up() {
        let mut store = store();
        store.portfolios.get_mut(&PlayerId(1)).unwrap().cash = Decimal::new(1_000_005, 3);

        let results = final_results([(PlayerId(2), "bia"), (PlayerId(1), "ana")], &store);

        assert_eq!(results[0].player_id, PlayerId(1));
        assert_eq!(results[0].cash, Decimal::new(100_001, 2));
        assert_eq!(results[0].final_value, Decimal::new(100_001, 2));
        assert_eq!(results[1].final_value, Decimal::from(1_000));
    }

    #[test]
    fn test_snapshot_uses_live_prices() {
        let mut store = store();
        let id = CompanyId(1);
        store.portfolios.get_mut(&PlayerId(1)).unwrap().holdings.insert(id, 10);
        store.companies.get_mut(&id).unwrap().price = Decimal::from(50);
        store.bonds.insert(
            PlayerId(1),
            vec![FixedIncomeHolding {
                offer_id: "B".into(),
                issuer: "Issuer".into(),
                unit_price: Decimal::from(100),
                interest_rate: Decimal::new(1, 1),
                term_months: 2,
                remaining_months: 2,
                quantity: 3,
            }],
        );

        let snap = snapshot(&store, PlayerId(1), SnapshotStage::Trade).unwrap();

        assert_eq!(snap.holdings.len(), 1);
        assert_eq!(snap.holdings[0].total_value, Decimal::from(500));
        assert_eq!(snap.portfolio_value, Decimal::from(500));
        assert_eq!(snap.fixed_income_value, Decimal::from(300));
        assert_eq!(snap.total_value, Decimal::from(1_800));
    }

    #[test]
    fn test_snapshot_absent_without_portfolio() {
        assert!(snapshot(&store(), PlayerId(9), SnapshotStage::Request).is_none());
        assert!(snapshot(&RoomStore::new(), PlayerId(1), SnapshotStage::Request).is_none());
    }

    #[test]
    fn test_snapshot_wire_shape() {
        let snap = snapshot(&store(), PlayerId(2), SnapshotStage::RoundEnd).unwrap();
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["stage"], "roundEnd");
        assert!(json["fixedIncomeHoldings"].as_array().unwrap().is_empty());
        assert_eq!(json["totalValue"], 1000.0);
    }

    #[test]
    fn test_final_ranking() {
        let mut store = store();
        let cash = [
            (PlayerId(1), Decimal::new(1_375_080, 2)),
            (PlayerId(2), Decimal::new(1_542_050, 2)),
            (PlayerId(3), Decimal::new(1_489_025, 2)),
        ];
        for (id, c) in cash {
            store.portfolios.get_mut(&id).unwrap().cash = c;
        }

        let results = final_results(
            [(PlayerId(1), "ana"), (PlayerId(2), "bia"), (PlayerId(3), "caio")],
            &store,
        );

        let order: Vec<_> = results.iter().map(|r| (r.name.as_str(), r.rank)).collect();
        assert_eq!(order, vec![("bia", 1), ("caio", 2), ("ana", 3)]);
        assert_eq!(results[0].final_value, Decimal::new(1_542_050, 2));
    }

    #[test]
    fn test_ranking_rounds_before_comparing() {
        let mut store = store();
        store.portfolios.get_mut(&PlayerId(1)).unwrap().cash = Decimal::new(1_000_001, 3); // 1000.001
        store.portfolios.get_mut(&PlayerId(2)).unwrap().cash = Decimal::new(1_000_004, 3); // 1000.004

        let results = final_results([(PlayerId(1), "first"), (PlayerId(2), "second")], &store);

        // equal after rounding: stable sort keeps input order
        assert_eq!(results[0].name, "first");
        assert_eq!(results[0].final_value, results[1].final_value);
        assert_eq!(results[1].rank, 2);
    }
}
