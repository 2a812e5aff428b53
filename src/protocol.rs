//! Wire protocol - closed sets of inbound actions and outbound events.
//!
//! Inbound frames are JSON objects tagged by `action`:
//! `{"action":"joinRoom","playerName":"ana","roomCode":"ABC123","characterId":2}`.
//! Outbound frames are tagged by `event` with the body under `data`:
//! `{"event":"roundTimer","data":{"seconds":42,"phase":"trading"}}`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::core::{Company, CompanyId, PlayerId, RoomStatus, RoundPhase, SessionToken, Side};
use crate::market::{
    BondPurchase, FinalResultEntry, FixedIncomeError, FixedIncomeOffer, Payout, PortfolioSnapshot,
    PriceChange, SpecialEvent, TradeOrder, TradeReceipt,
};
use crate::room::RoundNews;

/// Seat request shared by `createRoom` and `joinRoom`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    #[serde(default)]
    pub player_name: String,
    #[serde(default)]
    pub room_code: String,
    #[serde(default)]
    pub character_id: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejoinRequest {
    pub session_token: SessionToken,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkTradeRequest {
    #[serde(default)]
    pub actions: Vec<TradeOrder>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    #[serde(default)]
    pub offer_id: Option<String>,
    #[serde(default)]
    pub quantity: Option<Value>,
}

impl PurchaseRequest {
    pub fn quantity(&self) -> Option<f64> {
        self.quantity.as_ref().and_then(Value::as_f64)
    }
}

/// Client → server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum ClientAction {
    CreateRoom(JoinRequest),
    JoinRoom(JoinRequest),
    RejoinRoom(RejoinRequest),
    CheckRoomStatus,
    RequestRoundState,
    GameTransaction(TradeOrder),
    GameBulkTransaction(BulkTradeRequest),
    PurchaseFixedIncome(PurchaseRequest),
}

impl ClientAction {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            ClientAction::CreateRoom(_) => "createRoom",
            ClientAction::JoinRoom(_) => "joinRoom",
            ClientAction::RejoinRoom(_) => "rejoinRoom",
            ClientAction::CheckRoomStatus => "checkRoomStatus",
            ClientAction::RequestRoundState => "requestRoundState",
            ClientAction::GameTransaction(_) => "gameTransaction",
            ClientAction::GameBulkTransaction(_) => "gameBulkTransaction",
            ClientAction::PurchaseFixedIncome(_) => "purchaseFixedIncome",
        }
    }
}

/// Public view of a seat.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    pub id: PlayerId,
    pub name: String,
    pub character_id: u32,
    pub connected: bool,
}

/// Server → client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    RoomCreated {
        room_code: String,
        player: PlayerView,
        players: Vec<PlayerView>,
        session_token: SessionToken,
    },
    RoomError {
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    PlayerJoined {
        room_code: String,
        player: PlayerView,
        players: Vec<PlayerView>,
        /// Only present in the copy sent to the seat owner
        #[serde(skip_serializing_if = "Option::is_none")]
        session_token: Option<SessionToken>,
    },
    PlayersUpdate {
        players: Vec<PlayerView>,
    },
    GameStartCountdown {
        seconds: u32,
    },
    #[serde(rename_all = "camelCase")]
    GameStarted {
        companies: Vec<Company>,
        total_rounds: u8,
    },
    #[serde(rename_all = "camelCase")]
    RoomStatus {
        in_room: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        room_code: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        player_id: Option<PlayerId>,
        status: Option<RoomStatus>,
        players: Vec<PlayerView>,
    },
    #[serde(rename_all = "camelCase")]
    RoundState {
        status: RoomStatus,
        round: u8,
        timer: u32,
        news: Option<RoundNews>,
        phase: Option<RoundPhase>,
        fixed_income_offers: Vec<FixedIncomeOffer>,
    },
    #[serde(rename_all = "camelCase")]
    RoundStarted {
        round: u8,
        news: RoundNews,
        timer: u32,
        phase: RoundPhase,
        fixed_income_offers: Vec<FixedIncomeOffer>,
    },
    RoundTimer {
        seconds: u32,
        phase: RoundPhase,
    },
    #[serde(rename_all = "camelCase")]
    RoundEnded {
        round: u8,
        price_changes: Vec<PriceChange>,
        special_event: Option<SpecialEvent>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    GameFinished {
        results: Vec<FinalResultEntry>,
    },
    PortfolioUpdate(PortfolioSnapshot),
    /// Available pool per company, keyed by id
    StocksUpdate(BTreeMap<CompanyId, u64>),
    #[serde(rename_all = "camelCase")]
    TransactionProcessed {
        success: bool,
        #[serde(rename = "type")]
        side: Option<Side>,
        company_name: Option<String>,
        company_symbol: Option<String>,
        quantity: Option<u64>,
        price_at_moment: Option<Decimal>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    FixedIncomeOffersUpdate {
        offers: Vec<FixedIncomeOffer>,
    },
    #[serde(rename_all = "camelCase")]
    FixedIncomePurchaseResult {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        offer: Option<FixedIncomeOffer>,
        #[serde(skip_serializing_if = "Option::is_none")]
        quantity: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        total_cost: Option<Decimal>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    FixedIncomePayout {
        offer_id: String,
        issuer: String,
        principal: Decimal,
        interest: Decimal,
    },
    #[serde(rename_all = "camelCase")]
    RoomDeleted {
        room_code: String,
    },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::RoomError {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<&TradeReceipt> for ServerEvent {
    fn from(r: &TradeReceipt) -> Self {
        ServerEvent::TransactionProcessed {
            success: r.is_success(),
            side: r.side,
            company_name: r.company_name.clone(),
            company_symbol: r.company_symbol.clone(),
            quantity: r.quantity,
            price_at_moment: r.price_at_moment,
            error: r.error().map(ToString::to_string),
        }
    }
}

impl From<&Result<BondPurchase, FixedIncomeError>> for ServerEvent {
    fn from(result: &Result<BondPurchase, FixedIncomeError>) -> Self {
        match result {
            Ok(p) => ServerEvent::FixedIncomePurchaseResult {
                success: true,
                offer: Some(p.offer.clone()),
                quantity: Some(p.quantity),
                total_cost: Some(p.total_cost),
                error: None,
            },
            Err(e) => ServerEvent::FixedIncomePurchaseResult {
                success: false,
                offer: None,
                quantity: None,
                total_cost: None,
                error: Some(e.to_string()),
            },
        }
    }
}

impl From<&Payout> for ServerEvent {
    fn from(p: &Payout) -> Self {
        ServerEvent::FixedIncomePayout {
            offer_id: p.offer_id.clone(),
            issuer: p.issuer.clone(),
            principal: p.principal,
            interest: p.interest,
        }
    }
}
