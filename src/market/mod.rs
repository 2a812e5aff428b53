//! Market engines - stateless rules over a room's [`RoomStore`]

pub mod catalog;
pub mod fixed_income;
pub mod portfolio;
pub mod price;
pub mod store;
pub mod trade;

pub use fixed_income::{
    BondPurchase, FixedIncomeError, FixedIncomeHolding, FixedIncomeOffer, FixedIncomeTemplate,
    Payout,
};
pub use portfolio::{FinalResultEntry, PortfolioSnapshot, SnapshotStage};
pub use price::{PriceChange, PriceMoves, SpecialEvent};
pub use store::{Portfolio, RoomStore};
pub use trade::{TradeError, TradeOrder, TradeReceipt};
