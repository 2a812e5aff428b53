//! Rooms - seats, per-room market state, and the round clock.
//!
//! Everything here is synchronous and runtime-free: operations mutate a
//! [`Room`] and describe what should be sent in an [`Effects`] value. The
//! server hub resolves recipients to connections and owns the real timers.

pub mod registry;
pub mod round;

use chrono::{DateTime, Utc};

use crate::config::GameConfig;
use crate::core::{CompanyListing, ConnId, PlayerId, RoomStatus, SessionToken};
use crate::journal::TradeRecord;
use crate::market::{FixedIncomeTemplate, RoomStore};
use crate::protocol::{PlayerView, ServerEvent};

pub use registry::{RoomError, RoomRegistry};
pub use round::{Clock, NewsItem, RoundNews, RoundTiming, round_phase};

/// Immutable inputs shared by every room of a server.
#[derive(Debug, Clone)]
pub struct GameRules {
    pub config: GameConfig,
    pub listings: Vec<CompanyListing>,
    pub catalog: Vec<FixedIncomeTemplate>,
}

impl GameRules {
    pub fn new(config: GameConfig, listings: Vec<CompanyListing>) -> Self {
        let catalog = config.fixed_income_catalog();
        Self {
            config,
            listings,
            catalog,
        }
    }

    pub fn timing(&self) -> RoundTiming {
        self.config.timing()
    }
}

/// One seat at the table.
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub character_id: u32,
    /// `None` while the owner is disconnected
    pub conn: Option<ConnId>,
    pub token: SessionToken,
    /// Seconds spent disconnected during a game
    pub away_secs: u64,
}

impl Player {
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    pub fn view(&self) -> PlayerView {
        PlayerView {
            id: self.id,
            name: self.name.clone(),
            character_id: self.character_id,
            connected: self.is_connected(),
        }
    }
}

/// One isolated game session.
#[derive(Debug)]
pub struct Room {
    pub code: String,
    pub status: RoomStatus,
    /// 0 before the game, then 1..=total_rounds
    pub current_round: u8,
    /// Seconds left in the running round
    pub round_timer: u32,
    pub round_started_at: Option<DateTime<Utc>>,
    pub news: Option<RoundNews>,
    pub players: Vec<Player>,
    pub store: RoomStore,
    pub clock: Clock,
    /// Bumped whenever a clock task is (re)started; stale ticks carry an older value
    pub clock_epoch: u64,
    pub clock_handle: Option<tokio::task::AbortHandle>,
    next_player: u32,
}

impl Room {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            status: RoomStatus::Waiting,
            current_round: 0,
            round_timer: 0,
            round_started_at: None,
            news: None,
            players: Vec::new(),
            store: RoomStore::new(),
            clock: Clock::Idle,
            clock_epoch: 0,
            clock_handle: None,
            next_player: 1,
        }
    }

    /// Seat a new player; ids are never reused within a room.
    pub fn add_player(&mut self, name: &str, character_id: u32, conn: ConnId) -> &Player {
        let id = PlayerId(self.next_player);
        self.next_player += 1;
        self.players.push(Player {
            id,
            name: name.to_string(),
            character_id,
            conn: Some(conn),
            token: SessionToken::mint(),
            away_secs: 0,
        });
        &self.players[self.players.len() - 1]
    }

    pub fn remove_player(&mut self, id: PlayerId) -> Option<Player> {
        let idx = self.players.iter().position(|p| p.id == id)?;
        Some(self.players.remove(idx))
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn player_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    pub fn player_by_name(&self, name: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.name == name)
    }

    pub fn character_taken(&self, character_id: u32) -> bool {
        self.players.iter().any(|p| p.character_id == character_id)
    }

    pub fn roster(&self) -> Vec<PlayerView> {
        self.players.iter().map(Player::view).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Connections of every connected seat.
    pub fn connections(&self) -> Vec<ConnId> {
        self.players.iter().filter_map(|p| p.conn).collect()
    }
}

/// Who an outbound event is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    /// Every connected seat of the room
    Room,
    Player(PlayerId),
    /// Every connected seat except this one
    Others(PlayerId),
    Conn(ConnId),
}

/// What an operation wants the transport to do.
#[derive(Debug, Default)]
pub struct Effects {
    pub messages: Vec<(Recipient, ServerEvent)>,
    pub trades: Vec<TradeRecord>,
    /// Spawn the room's clock task (if not already running)
    pub start_clock: bool,
    /// Tear the room down once these messages are delivered
    pub delete_room: bool,
}

impl Effects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_room(&mut self, event: ServerEvent) {
        self.messages.push((Recipient::Room, event));
    }

    pub fn to_player(&mut self, id: PlayerId, event: ServerEvent) {
        self.messages.push((Recipient::Player(id), event));
    }

    pub fn to_others(&mut self, id: PlayerId, event: ServerEvent) {
        self.messages.push((Recipient::Others(id), event));
    }

    pub fn to_conn(&mut self, conn: ConnId, event: ServerEvent) {
        self.messages.push((Recipient::Conn(conn), event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Events addressed to `id`, directly or through a broadcast.
    fn events_for(fx: &Effects, id: PlayerId) -> impl Iterator<Item = &ServerEvent> {
        fx.messages.iter().filter_map(move |(to, ev)| match to {
            Recipient::Room => Some(ev),
            Recipient::Player(p) if *p == id => Some(ev),
            Recipient::Others(p) if *p != id => Some(ev),
            _ => None,
        })
    }

    #[test]
    fn test_player_ids_not_reused() {
        let mut room = Room::new("ABC");
        let a = room.add_player("ana", 1, ConnId::new()).id;
        let b = room.add_player("bia", 2, ConnId::new()).id;
        room.remove_player(a);
        let c = room.add_player("caio", 3, ConnId::new()).id;

        assert_eq!(a, PlayerId(1));
        assert_eq!(b, PlayerId(2));
        assert_eq!(c, PlayerId(3));
        assert_eq!(room.players.len(), 2);
        assert!(room.character_taken(3));
        assert!(!room.character_taken(1));
    }

    #[test]
    fn test_events_for_filters_recipients() {
        let mut fx = Effects::new();
        fx.to_room(ServerEvent::GameStartCountdown { seconds: 3 });
        fx.to_player(PlayerId(1), ServerEvent::error("only one"));
        fx.to_others(PlayerId(1), ServerEvent::error("not one"));

        assert_eq!(events_for(&fx, PlayerId(1)).count(), 2);
        assert_eq!(events_for(&fx, PlayerId(2)).count(), 2);
        assert!(
            events_for(&fx, PlayerId(2))
                .all(|e| *e != ServerEvent::error("only one"))
        );
    }
}
