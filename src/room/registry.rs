//! Room registry - seats, connections and per-room dispatch.
//!
//! Every public operation runs to completion against the registry and
//! returns a [`Dispatch`]: the frames to write, trades to journal, and clock
//! work for the transport. Nothing here awaits.

use std::collections::HashMap;

use rand::Rng;
use thiserror::Error;
use tokio::task::AbortHandle;
use tracing::{debug, info};

use super::round;
use super::{Effects, GameRules, Recipient, Room};
use crate::core::{ConnId, PlayerId, RoomStatus, SessionToken};
use crate::journal::TradeRecord;
use crate::market::fixed_income;
use crate::market::portfolio::{self, SnapshotStage};
use crate::market::trade;
use crate::market::{TradeOrder, TradeReceipt};
use crate::protocol::{JoinRequest, ServerEvent};

/// Registry rejections; `Display` is the `roomError` message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    #[error("Invalid request")]
    InvalidRequest,

    #[error("Room code already in use")]
    CodeTaken,

    #[error("Room not found")]
    NotFound,

    #[error("Room is full")]
    RoomFull,

    #[error("Game already started")]
    AlreadyStarted,

    #[error("Character already taken")]
    CharacterTaken,

    #[error("Player name already taken")]
    NameTaken,

    #[error("Connection is already in a room")]
    AlreadySeated,

    #[error("Session not found")]
    UnknownSession,

    #[error("Not in a room")]
    NotInRoom,
}

/// A player's place in a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seat {
    pub room: String,
    pub player: PlayerId,
}

/// Transport work produced by one registry operation.
#[derive(Debug, Default)]
pub struct Dispatch {
    pub outbound: Vec<(ConnId, ServerEvent)>,
    pub trades: Vec<TradeRecord>,
    /// Room whose clock task must be spawned, with the epoch its ticks carry
    pub start_clock: Option<(String, u64)>,
    /// Clock of a room that no longer exists
    pub stop_clock: Option<AbortHandle>,
}

impl Dispatch {
    pub fn to_conn(conn: ConnId, event: ServerEvent) -> Self {
        Self {
            outbound: vec![(conn, event)],
            ..Self::default()
        }
    }

    pub fn merge(&mut self, other: Dispatch) {
        self.outbound.extend(other.outbound);
        self.trades.extend(other.trades);
        self.start_clock = self.start_clock.take().or(other.start_clock);
        self.stop_clock = self.stop_clock.take().or(other.stop_clock);
    }

    /// Frames addressed to `conn`, in send order.
    pub fn events_to(&self, conn: ConnId) -> impl Iterator<Item = &ServerEvent> {
        self.outbound
            .iter()
            .filter(move |(c, _)| *c == conn)
            .map(|(_, e)| e)
    }
}

/// All live rooms of the process.
#[derive(Debug)]
pub struct RoomRegistry {
    rules: GameRules,
    rooms: HashMap<String, Room>,
    bindings: HashMap<ConnId, Seat>,
    sessions: HashMap<SessionToken, Seat>,
}

impl RoomRegistry {
    pub fn new(rules: GameRules) -> Self {
        Self {
            rules,
            rooms: HashMap::new(),
            bindings: HashMap::new(),
            sessions: HashMap::new(),
        }
    }

    pub fn rules(&self) -> &GameRules {
        &self.rules
    }

    pub fn room(&self, code: &str) -> Option<&Room> {
        self.rooms.get(code)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn seat(&self, conn: ConnId) -> Option<&Seat> {
        self.bindings.get(&conn)
    }

    /// Open a new room and seat its creator as player 1.
    pub fn create_room<R: Rng + ?Sized>(
        &mut self,
        conn: ConnId,
        req: &JoinRequest,
        rng: &mut R,
    ) -> Result<Dispatch, RoomError> {
        let (code, name, character_id) = parse_join(req)?;
        if self.bindings.contains_key(&conn) {
            return Err(RoomError::AlreadySeated);
        }
        if self.rooms.contains_key(&code) {
            return Err(RoomError::CodeTaken);
        }

        let mut room = Room::new(code.clone());
        let player = room.add_player(name, character_id, conn).clone();
        info!("🏠 Room {} created by {} ({})", code, player.name, player.id);

        let mut fx = Effects::new();
        fx.to_conn(
            conn,
            ServerEvent::RoomCreated {
                room_code: code.clone(),
                player: player.view(),
                players: room.roster(),
                session_token: player.token,
            },
        );
        if room.players.len() >= self.rules.config.max_players {
            round::begin_countdown(&mut room, &self.rules, rng, &mut fx);
        }

        self.bind(&code, player.id, conn, player.token);
        self.rooms.insert(code.clone(), room);
        Ok(self.settle(&code, fx))
    }

    /// Take a free seat, or the seat of a dropped player with the same name.
    pub fn join_room<R: Rng + ?Sized>(
        &mut self,
        conn: ConnId,
        req: &JoinRequest,
        rng: &mut R,
    ) -> Result<Dispatch, RoomError> {
        let (code, name, character_id) = parse_join(req)?;
        if self.bindings.contains_key(&conn) {
            return Err(RoomError::AlreadySeated);
        }
        let room = self.rooms.get_mut(&code).ok_or(RoomError::NotFound)?;

        if let Some(existing) = room.player_by_name(name) {
            if self.rules.config.allow_name_rebind && !existing.is_connected() {
                let id = existing.id;
                info!("🔁 {} rebinding to room {} by name", name, code);
                return Ok(self.rebind(&code, id, conn));
            }
        }

        if room.players.len() >= self.rules.config.max_players {
            return Err(RoomError::RoomFull);
        }
        if room.status != RoomStatus::Waiting {
            return Err(RoomError::AlreadyStarted);
        }
        if room.character_taken(character_id) {
            return Err(RoomError::CharacterTaken);
        }
        if room.player_by_name(name).is_some() {
            return Err(RoomError::NameTaken);
        }

        let player = room.add_player(name, character_id, conn).clone();
        info!(
            "👤 {} joined room {} as {} ({}/{})",
            player.name,
            code,
            player.id,
            room.players.len(),
            self.rules.config.max_players
        );

        let mut fx = Effects::new();
        let roster = room.roster();
        fx.to_player(
            player.id,
            ServerEvent::PlayerJoined {
                room_code: code.clone(),
                player: player.view(),
                players: roster.clone(),
                session_token: Some(player.token),
            },
        );
        fx.to_others(
            player.id,
            ServerEvent::PlayerJoined {
                room_code: code.clone(),
                player: player.view(),
                players: roster.clone(),
                session_token: None,
            },
        );
        fx.to_room(ServerEvent::PlayersUpdate { players: roster });

        if room.players.len() >= self.rules.config.max_players {
            round::begin_countdown(room, &self.rules, rng, &mut fx);
        }

        self.bind(&code, player.id, conn, player.token);
        Ok(self.settle(&code, fx))
    }

    /// Rebind the seat that owns `token` to `conn`.
    pub fn rejoin_room(&mut self, conn: ConnId, token: SessionToken) -> Result<Dispatch, RoomError> {
        let seat = self.sessions.get(&token).cloned().ok_or(RoomError::UnknownSession)?;
        match self.bindings.get(&conn) {
            Some(current) if *current == seat => {}
            Some(_) => return Err(RoomError::AlreadySeated),
            None => {}
        }
        let room = self.rooms.get(&seat.room).ok_or(RoomError::UnknownSession)?;
        let previous = room
            .player(seat.player)
            .ok_or(RoomError::UnknownSession)?
            .conn;
        if let Some(old) = previous.filter(|old| *old != conn) {
            debug!("Session {} taken over from connection {}", seat.player, old);
            self.bindings.remove(&old);
        }
        info!("🔁 {} rejoined room {} by session token", seat.player, seat.room);
        Ok(self.rebind(&seat.room, seat.player, conn))
    }

    /// Answer whether `conn` is bound to a room. Never mutates.
    pub fn check_room_status(&self, conn: ConnId) -> Dispatch {
        let event = match self
            .bindings
            .get(&conn)
            .and_then(|seat| Some((seat, self.rooms.get(&seat.room)?)))
        {
            Some((seat, room)) => ServerEvent::RoomStatus {
                in_room: true,
                room_code: Some(room.code.clone()),
                player_id: Some(seat.player),
                status: Some(room.status),
                players: room.roster(),
            },
            None => ServerEvent::RoomStatus {
                in_room: false,
                room_code: None,
                player_id: None,
                status: None,
                players: Vec::new(),
            },
        };
        Dispatch::to_conn(conn, event)
    }

    pub fn round_state(&self, conn: ConnId) -> Result<Dispatch, RoomError> {
        let seat = self.bindings.get(&conn).ok_or(RoomError::NotInRoom)?;
        let room = self.rooms.get(&seat.room).ok_or(RoomError::NotInRoom)?;
        Ok(Dispatch::to_conn(conn, round::round_state(room, &self.rules)))
    }

    /// Connection closed.
    ///
    /// Before the game a seat is released at once. Once the countdown has
    /// begun the seat is only detached, and the clock releases it if nobody
    /// rebinds within the reconnect grace.
    pub fn disconnect(&mut self, conn: ConnId) -> Dispatch {
        let Some(seat) = self.bindings.remove(&conn) else {
            return Dispatch::default();
        };
        let Some(room) = self.rooms.get_mut(&seat.room) else {
            return Dispatch::default();
        };

        let mut fx = Effects::new();
        if room.status == RoomStatus::Waiting {
            if let Some(p) = room.remove_player(seat.player) {
                self.sessions.remove(&p.token);
                info!("👋 {} left room {}", p.name, room.code);
            }
        } else if let Some(p) = room.player_mut(seat.player) {
            p.conn = None;
            p.away_secs = 0;
            info!("📴 {} dropped from room {}, holding seat", p.name, seat.room);
        }

        if room.is_empty() {
            fx.delete_room = true;
        } else {
            fx.to_room(ServerEvent::PlayersUpdate {
                players: room.roster(),
            });
        }
        self.settle(&seat.room, fx)
    }

    /// One clock second for `code`. `None` once the tick is stale or the room is gone.
    pub fn tick<R: Rng + ?Sized>(&mut self, code: &str, epoch: u64, rng: &mut R) -> Option<Dispatch> {
        let room = self.rooms.get_mut(code)?;
        if room.clock_epoch != epoch {
            debug!("Stale clock tick for room {} (epoch {} != {})", code, epoch, room.clock_epoch);
            return None;
        }

        let mut fx = round::tick(room, &self.rules, rng);

        let grace = self.rules.config.reconnect_grace().as_secs();
        let mut released = Vec::new();
        for p in room.players.iter_mut().filter(|p| !p.is_connected()) {
            p.away_secs += 1;
            if p.away_secs >= grace {
                released.push(p.id);
            }
        }
        if !released.is_empty() {
            for id in released {
                if let Some(p) = room.remove_player(id) {
                    self.sessions.remove(&p.token);
                    info!("⌛ {} did not return to room {}, seat released", p.name, code);
                }
            }
            if room.is_empty() {
                fx.delete_room = true;
            } else {
                fx.to_room(ServerEvent::PlayersUpdate {
                    players: room.roster(),
                });
            }
        }

        Some(self.settle(code, fx))
    }

    /// Record the running clock task of `code`.
    pub fn attach_clock(&mut self, code: &str, epoch: u64, handle: AbortHandle) {
        match self.rooms.get_mut(code) {
            Some(room) if room.clock_epoch == epoch => room.clock_handle = Some(handle),
            _ => handle.abort(),
        }
    }

    pub fn trade(&mut self, conn: ConnId, order: &TradeOrder) -> Result<Dispatch, RoomError> {
        self.bulk_trade(conn, std::slice::from_ref(order))
    }

    /// Apply orders in list order; earlier fills stay if a later order fails.
    pub fn bulk_trade(&mut self, conn: ConnId, orders: &[TradeOrder]) -> Result<Dispatch, RoomError> {
        let seat = self.bindings.get(&conn).cloned().ok_or(RoomError::NotInRoom)?;
        let room = self.rooms.get_mut(&seat.room).ok_or(RoomError::NotInRoom)?;
        let player = room.player(seat.player).cloned().ok_or(RoomError::NotInRoom)?;

        let receipts: Vec<TradeReceipt> = match round::trading_gate(room, &self.rules) {
            Ok(()) => trade::apply_bulk(&mut room.store, player.id, orders),
            Err(e) => orders
                .iter()
                .map(|o| TradeReceipt::rejected(&room.store, o, e.clone()))
                .collect(),
        };

        let mut fx = Effects::new();
        let mut filled = false;
        for receipt in &receipts {
            fx.to_player(player.id, ServerEvent::from(receipt));
            match receipt.error() {
                Some(err) => debug!("Trade by {} in room {} rejected: {}", player.name, room.code, err),
                None => {
                    filled = true;
                    fx.trades.extend(TradeRecord::from_receipt(&room.code, &player, receipt));
                }
            }
        }
        if filled {
            if let Some(snap) = portfolio::snapshot(&room.store, player.id, SnapshotStage::Trade) {
                fx.to_player(player.id, ServerEvent::PortfolioUpdate(snap));
            }
            fx.to_room(ServerEvent::StocksUpdate(room.store.available_shares()));
        }
        Ok(self.settle(&seat.room, fx))
    }

    pub fn purchase_fixed_income(
        &mut self,
        conn: ConnId,
        offer_id: Option<&str>,
        quantity: Option<f64>,
    ) -> Result<Dispatch, RoomError> {
        let seat = self.bindings.get(&conn).cloned().ok_or(RoomError::NotInRoom)?;
        let room = self.rooms.get_mut(&seat.room).ok_or(RoomError::NotInRoom)?;

        let result = round::purchase_gate(room, &self.rules).and_then(|()| {
            fixed_income::purchase(&mut room.store, room.current_round, seat.player, offer_id, quantity)
        });

        let mut fx = Effects::new();
        fx.to_player(seat.player, ServerEvent::from(&result));
        match &result {
            Ok(bought) => {
                info!(
                    "🧾 {} bought {} x {} in room {}",
                    seat.player, bought.quantity, bought.offer.id, room.code
                );
                fx.to_room(ServerEvent::FixedIncomeOffersUpdate {
                    offers: room.store.offers.clone(),
                });
                if let Some(snap) = portfolio::snapshot(&room.store, seat.player, SnapshotStage::FixedIncome) {
                    fx.to_player(seat.player, ServerEvent::PortfolioUpdate(snap));
                }
            }
            Err(e) => debug!("Bond purchase by {} in room {} rejected: {}", seat.player, room.code, e),
        }
        Ok(self.settle(&seat.room, fx))
    }

    /// Remove a room with everything bound to it.
    pub fn remove_room(&mut self, code: &str) -> Dispatch {
        let Some(mut room) = self.rooms.remove(code) else {
            return Dispatch::default();
        };
        let mut out = Dispatch::default();
        for p in &room.players {
            if let Some(conn) = p.conn {
                self.bindings.remove(&conn);
                out.outbound.push((
                    conn,
                    ServerEvent::RoomDeleted {
                        room_code: room.code.clone(),
                    },
                ));
            }
            self.sessions.remove(&p.token);
        }
        out.stop_clock = room.clock_handle.take();
        info!("🗑️ Room {} deleted", room.code);
        out
    }

    fn bind(&mut self, code: &str, player: PlayerId, conn: ConnId, token: SessionToken) {
        let seat = Seat {
            room: code.to_string(),
            player,
        };
        self.bindings.insert(conn, seat.clone());
        self.sessions.insert(token, seat);
    }

    /// Attach `conn` to an existing seat and bring it up to date.
    fn rebind(&mut self, code: &str, id: PlayerId, conn: ConnId) -> Dispatch {
        let Some(room) = self.rooms.get_mut(code) else {
            return Dispatch::default();
        };
        let Some(player) = room.player_mut(id) else {
            return Dispatch::default();
        };
        player.conn = Some(conn);
        player.away_secs = 0;
        let player = player.clone();

        let mut fx = Effects::new();
        let roster = room.roster();
        fx.to_conn(
            conn,
            ServerEvent::PlayerJoined {
                room_code: room.code.clone(),
                player: player.view(),
                players: roster.clone(),
                session_token: Some(player.token),
            },
        );
        fx.to_others(id, ServerEvent::PlayersUpdate { players: roster });
        if room.store.is_open() {
            fx.to_conn(conn, round::round_state(room, &self.rules));
            if let Some(snap) = portfolio::snapshot(&room.store, id, SnapshotStage::Request) {
                fx.to_conn(conn, ServerEvent::PortfolioUpdate(snap));
            }
            fx.to_conn(conn, ServerEvent::StocksUpdate(room.store.available_shares()));
        }

        self.bind(code, id, conn, player.token);
        self.settle(code, fx)
    }

    /// Resolve recipients against the room's current roster.
    fn settle(&mut self, code: &str, fx: Effects) -> Dispatch {
        let mut out = Dispatch::default();
        let Some(room) = self.rooms.get_mut(code) else {
            return out;
        };

        for (to, event) in fx.messages {
            match to {
                Recipient::Conn(conn) => out.outbound.push((conn, event)),
                Recipient::Player(id) => {
                    if let Some(conn) = room.player(id).and_then(|p| p.conn) {
                        out.outbound.push((conn, event));
                    }
                }
                Recipient::Room => {
                    for conn in room.connections() {
                        out.outbound.push((conn, event.clone()));
                    }
                }
                Recipient::Others(id) => {
                    for conn in room.players.iter().filter(|p| p.id != id).filter_map(|p| p.conn) {
                        out.outbound.push((conn, event.clone()));
                    }
                }
            }
        }
        out.trades = fx.trades;

        if fx.start_clock && room.clock_handle.is_none() {
            room.clock_epoch += 1;
            out.start_clock = Some((room.code.clone(), room.clock_epoch));
        }
        if fx.delete_room {
            let removed = self.remove_room(code);
            out.merge(removed);
        }
        out
    }
}

/// Normalised (code, name, character) of a seat request.
fn parse_join(req: &JoinRequest) -> Result<(String, &str, u32), RoomError> {
    let code = req.room_code.trim().to_uppercase();
    let name = req.player_name.trim();
    match req.character_id {
        Some(character) if !code.is_empty() && !name.is_empty() => Ok((code, name, character)),
        _ => Err(RoomError::InvalidRequest),
    }
}
