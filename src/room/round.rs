//! Round state machine - countdown, rounds, settlement and game end.
//!
//! ```text
//! waiting ─5th seat─▶ ready ─▶ starting (countdown) ─▶ playing
//!                                                       │ round 1..N: news ▶ trading ▶ settle ▶ intermission
//!                                                       ▼
//!                                                   finished ─teardown─▶ deleted
//! ```
//!
//! The room clock advances one second per [`tick`]. The news/trading split is
//! never stored: it is derived from the round timer by [`round_phase`].

use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::Serialize;
use tracing::info;

use super::{Effects, GameRules, Room};
use crate::core::{PlayerId, RoomStatus, RoundPhase};
use crate::market::catalog::{NEGATIVE_NEWS, POSITIVE_NEWS};
use crate::market::fixed_income::{self, issue_offers};
use crate::market::portfolio::{self, SnapshotStage};
use crate::market::price;
use crate::market::{FixedIncomeError, TradeError};
use crate::protocol::ServerEvent;

/// Round length and the point at which trading opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundTiming {
    pub round_length: u32,
    /// Trading is open while at most this many seconds remain
    pub trading_window: u32,
}

impl RoundTiming {
    pub fn new(round_length: u32, trading_window: u32) -> Self {
        Self {
            round_length,
            trading_window: trading_window.min(round_length),
        }
    }

    pub fn phase_at_remaining(&self, remaining: u32) -> RoundPhase {
        round_phase(*self, self.round_length.saturating_sub(remaining))
    }
}

/// Sub-phase `elapsed` seconds into a round.
pub fn round_phase(timing: RoundTiming, elapsed: u32) -> RoundPhase {
    let remaining = timing.round_length.saturating_sub(elapsed);
    if remaining > timing.trading_window {
        RoundPhase::News
    } else {
        RoundPhase::Trading
    }
}

/// What the room's 1 Hz clock is counting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clock {
    Idle,
    StartCountdown { remaining: u32 },
    /// Remaining time lives in `Room::round_timer`
    Round,
    Intermission { remaining: u32 },
    Teardown { remaining: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewsItem {
    pub headline: String,
    pub sentiment: Sentiment,
}

/// Headlines shown during a round's news phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundNews {
    pub positive: NewsItem,
    pub negative: NewsItem,
}

impl RoundNews {
    pub fn draw<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let pos = POSITIVE_NEWS[rng.random_range(0..POSITIVE_NEWS.len())];
        let neg = NEGATIVE_NEWS[rng.random_range(0..NEGATIVE_NEWS.len())];
        Self {
            positive: NewsItem {
                headline: pos.to_string(),
                sentiment: Sentiment::Positive,
            },
            negative: NewsItem {
                headline: neg.to_string(),
                sentiment: Sentiment::Negative,
            },
        }
    }
}

/// Current sub-phase, or `None` outside a running round.
pub fn current_phase(room: &Room, rules: &GameRules) -> Option<RoundPhase> {
    match (room.status, room.clock) {
        (RoomStatus::Playing, Clock::Round) => {
            Some(rules.timing().phase_at_remaining(room.round_timer))
        }
        _ => None,
    }
}

/// Share trades are accepted only in the trading sub-phase.
pub fn trading_gate(room: &Room, rules: &GameRules) -> Result<(), TradeError> {
    match current_phase(room, rules) {
        Some(RoundPhase::Trading) => Ok(()),
        Some(RoundPhase::News) => Err(TradeError::NewsPhase),
        None => Err(TradeError::MarketClosed),
    }
}

/// Bond purchases are accepted anywhere inside a running round.
pub fn purchase_gate(room: &Room, rules: &GameRules) -> Result<(), FixedIncomeError> {
    current_phase(room, rules)
        .map(|_| ())
        .ok_or(FixedIncomeError::MarketClosed)
}

/// `waiting → ready → starting`; the clock task is requested here.
pub fn begin_countdown<R: Rng + ?Sized>(room: &mut Room, rules: &GameRules, rng: &mut R, fx: &mut Effects) {
    room.status = RoomStatus::Ready;
    info!("🟢 Room {} is full ({} players), starting countdown", room.code, room.players.len());

    let seconds = rules.config.start_countdown_secs;
    room.status = RoomStatus::Starting;
    fx.start_clock = true;
    if seconds == 0 {
        start_game(room, rules, rng, fx);
        return;
    }
    room.clock = Clock::StartCountdown { remaining: seconds };
    fx.to_room(ServerEvent::GameStartCountdown { seconds });
}

/// Open the market and run round 1.
pub fn start_game<R: Rng + ?Sized>(room: &mut Room, rules: &GameRules, rng: &mut R, fx: &mut Effects) {
    let cfg = &rules.config;
    let cash = Decimal::from_f64(cfg.initial_cash).unwrap_or_default();
    let ids: Vec<PlayerId> = room.players.iter().map(|p| p.id).collect();
    room.store
        .open_market(&rules.listings, ids.iter().copied(), cash, cfg.shares_per_company);
    room.status = RoomStatus::Playing;
    info!("🎲 Room {} game started with {} players", room.code, ids.len());

    fx.to_room(ServerEvent::GameStarted {
        companies: room.store.companies.values().cloned().collect(),
        total_rounds: cfg.total_rounds,
    });
    push_snapshots(room, SnapshotStage::Opening, fx);
    fx.to_room(ServerEvent::StocksUpdate(room.store.available_shares()));

    room.current_round = 1;
    start_round(room, rules, rng, fx);
}

/// Reset the round timer, refresh offers and news, announce the round.
pub fn start_round<R: Rng + ?Sized>(room: &mut Room, rules: &GameRules, rng: &mut R, fx: &mut Effects) {
    let timing = rules.timing();
    room.round_timer = timing.round_length;
    room.round_started_at = Some(Utc::now());
    room.clock = Clock::Round;

    if room.current_round == fixed_income::ISSUANCE_ROUND {
        room.store.offers = issue_offers(&rules.catalog, rules.config.offer_units);
    } else if !room.store.offers.is_empty() {
        room.store.offers.clear();
        fx.to_room(ServerEvent::FixedIncomeOffersUpdate { offers: Vec::new() });
    }

    let news = RoundNews::draw(rng);
    room.news = Some(news.clone());
    info!("⏱️ Room {} round {} started", room.code, room.current_round);

    fx.to_room(ServerEvent::RoundStarted {
        round: room.current_round,
        news,
        timer: room.round_timer,
        phase: timing.phase_at_remaining(room.round_timer),
        fixed_income_offers: room.store.offers.clone(),
    });
}

/// Settle the round: move prices, mature bonds, revalue everyone.
pub fn end_round<R: Rng + ?Sized>(room: &mut Room, rules: &GameRules, rng: &mut R, fx: &mut Effects) {
    let moves = price::generate_price_changes(&mut room.store.companies, rng);
    if let Some(event) = moves.special_event {
        info!("⚡ Room {} special event: {}", room.code, event);
    }

    let store = &mut room.store;
    let payouts = fixed_income::process_maturity(&mut store.bonds, &mut store.portfolios);
    for payout in &payouts {
        fx.to_player(payout.player, ServerEvent::from(payout));
    }

    push_snapshots(room, SnapshotStage::RoundEnd, fx);
    fx.to_room(ServerEvent::RoundEnded {
        round: room.current_round,
        message: moves.event_message().map(str::to_string),
        special_event: moves.special_event,
        price_changes: moves.changes,
    });
    info!("🔔 Room {} round {} ended", room.code, room.current_round);

    if room.current_round >= rules.config.total_rounds {
        end_game(room, rules, fx);
        return;
    }

    let pause = rules.config.intermission_secs;
    if pause == 0 {
        room.current_round += 1;
        start_round(room, rules, rng, fx);
    } else {
        room.clock = Clock::Intermission { remaining: pause };
    }
}

/// Rank the players and schedule the room's deletion.
pub fn end_game(room: &mut Room, rules: &GameRules, fx: &mut Effects) {
    room.status = RoomStatus::Finished;
    room.store.offers.clear();

    let results = portfolio::final_results(
        room.players.iter().map(|p| (p.id, p.name.as_str())),
        &room.store,
    );
    if let Some(winner) = results.first() {
        info!(
            "🏆 Room {} finished; winner {} with {}",
            room.code, winner.name, winner.final_value
        );
    }
    fx.to_room(ServerEvent::GameFinished { results });

    let linger = rules.config.teardown_secs;
    if linger == 0 {
        room.clock = Clock::Idle;
        fx.delete_room = true;
    } else {
        room.clock = Clock::Teardown { remaining: linger };
    }
}

/// Advance the room clock by one second.
pub fn tick<R: Rng + ?Sized>(room: &mut Room, rules: &GameRules, rng: &mut R) -> Effects {
    let mut fx = Effects::new();
    match room.clock {
        Clock::Idle => {}
        Clock::StartCountdown { remaining } => {
            let remaining = remaining.saturating_sub(1);
            if remaining == 0 {
                start_game(room, rules, rng, &mut fx);
            } else {
                room.clock = Clock::StartCountdown { remaining };
                fx.to_room(ServerEvent::GameStartCountdown { seconds: remaining });
            }
        }
        Clock::Round => {
            room.round_timer = room.round_timer.saturating_sub(1);
            if room.round_timer == 0 {
                end_round(room, rules, rng, &mut fx);
            } else {
                fx.to_room(ServerEvent::RoundTimer {
                    seconds: room.round_timer,
                    phase: rules.timing().phase_at_remaining(room.round_timer),
                });
            }
        }
        Clock::Intermission { remaining } => {
            let remaining = remaining.saturating_sub(1);
            if remaining == 0 {
                room.current_round += 1;
                start_round(room, rules, rng, &mut fx);
            } else {
                room.clock = Clock::Intermission { remaining };
            }
        }
        Clock::Teardown { remaining } => {
            let remaining = remaining.saturating_sub(1);
            if remaining == 0 {
                room.clock = Clock::Idle;
                fx.delete_room = true;
            } else {
                room.clock = Clock::Teardown { remaining };
            }
        }
    }
    fx
}

/// Reply to `requestRoundState`.
pub fn round_state(room: &Room, rules: &GameRules) -> ServerEvent {
    ServerEvent::RoundState {
        status: room.status,
        round: room.current_round,
        timer: match room.clock {
            Clock::Round => room.round_timer,
            _ => 0,
        },
        news: room.news.clone(),
        phase: current_phase(room, rules),
        fixed_income_offers: room.store.offers.clone(),
    }
}

fn push_snapshots(room: &Room, stage: SnapshotStage, fx: &mut Effects) {
    for player in &room.players {
        if let Some(snap) = portfolio::snapshot(&room.store, player.id, stage) {
            fx.to_player(player.id, ServerEvent::PortfolioUpdate(snap));
        }
    }
}
