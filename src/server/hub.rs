//! Game hub - the single serialization point for all room state.
//!
//! Inbound frames and clock ticks each take the hub lock once, run the
//! registry operation to completion, and push the resulting frames onto
//! per-connection outboxes. The lock is never held across an `.await`.

use parking_lot::Mutex;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::core::ConnId;
use crate::journal::TradeJournal;
use crate::protocol::{ClientAction, ServerEvent};
use crate::room::registry::Dispatch;
use crate::room::{GameRules, RoomRegistry};

/// Serialized frames waiting to be written to one socket.
pub type Outbox = mpsc::UnboundedSender<String>;

const CLOCK_PERIOD: Duration = Duration::from_secs(1);

struct HubState {
    registry: RoomRegistry,
    outboxes: HashMap<ConnId, Outbox>,
    rng: StdRng,
}

pub struct GameHub {
    state: Mutex<HubState>,
    journal: Arc<dyn TradeJournal>,
}

impl GameHub {
    pub fn new(rules: GameRules, journal: Arc<dyn TradeJournal>) -> Arc<Self> {
        let rng = match rules.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Arc::new(Self {
            state: Mutex::new(HubState {
                registry: RoomRegistry::new(rules),
                outboxes: HashMap::new(),
                rng,
            }),
            journal,
        })
    }

    /// Register a new connection's outbox.
    pub fn connect(&self, outbox: Outbox) -> ConnId {
        let conn = ConnId::new();
        self.state.lock().outboxes.insert(conn, outbox);
        conn
    }

    /// Handle one inbound text frame.
    pub fn handle_frame(self: &Arc<Self>, conn: ConnId, text: &str) {
        match ClientAction::parse(text) {
            Ok(action) => self.handle(conn, action),
            Err(e) => {
                debug!("Unreadable frame from {}: {}", conn, e);
                let mut state = self.state.lock();
                self.execute(&mut state, Dispatch::to_conn(conn, ServerEvent::error("Invalid message")));
            }
        }
    }

    pub fn handle(self: &Arc<Self>, conn: ConnId, action: ClientAction) {
        let name = action.name();
        let mut state = self.state.lock();
        let HubState { registry, rng, .. } = &mut *state;

        let result = match action {
            ClientAction::CreateRoom(req) => registry.create_room(conn, &req, rng),
            ClientAction::JoinRoom(req) => registry.join_room(conn, &req, rng),
            ClientAction::RejoinRoom(req) => registry.rejoin_room(conn, req.session_token),
            ClientAction::CheckRoomStatus => Ok(registry.check_room_status(conn)),
            ClientAction::RequestRoundState => registry.round_state(conn),
            ClientAction::GameTransaction(order) => registry.trade(conn, &order),
            ClientAction::GameBulkTransaction(req) => registry.bulk_trade(conn, &req.actions),
            ClientAction::PurchaseFixedIncome(req) => {
                registry.purchase_fixed_income(conn, req.offer_id.as_deref(), req.quantity())
            }
        };

        let dispatch = result.unwrap_or_else(|e| {
            debug!("{} from {} rejected: {}", name, conn, e);
            Dispatch::to_conn(conn, ServerEvent::error(e.to_string()))
        });
        self.execute(&mut state, dispatch);
    }

    /// Connection closed; its seat is released or held per room status.
    pub fn disconnect(self: &Arc<Self>, conn: ConnId) {
        let mut state = self.state.lock();
        state.outboxes.remove(&conn);
        let dispatch = state.registry.disconnect(conn);
        self.execute(&mut state, dispatch);
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().outboxes.len()
    }

    pub fn room_count(&self) -> usize {
        self.state.lock().registry.room_count()
    }

    /// One clock second for a room; `false` stops the clock task.
    fn tick(self: &Arc<Self>, code: &str, epoch: u64) -> bool {
        let mut state = self.state.lock();
        let HubState { registry, rng, .. } = &mut *state;
        match registry.tick(code, epoch, rng) {
            Some(dispatch) => {
                self.execute(&mut state, dispatch);
                true
            }
            None => false,
        }
    }

    fn execute(self: &Arc<Self>, state: &mut HubState, dispatch: Dispatch) {
        for (conn, event) in dispatch.outbound {
            let Some(outbox) = state.outboxes.get(&conn) else {
                continue;
            };
            match event.to_json() {
                Ok(frame) => {
                    // receiver gone means the socket is closing; disconnect cleans up
                    let _ = outbox.send(frame);
                }
                Err(e) => warn!("Failed to serialize event for {}: {}", conn, e),
            }
        }

        if let Some(handle) = dispatch.stop_clock {
            handle.abort();
        }
        if let Some((code, epoch)) = dispatch.start_clock {
            let handle = self.spawn_clock(code.clone(), epoch);
            state.registry.attach_clock(&code, epoch, handle);
        }

        for record in dispatch.trades {
            let journal = self.journal.clone();
            tokio::spawn(async move {
                if let Err(e) = journal.record(&record).await {
                    warn!("⚠️ {} journal dropped trade in {}: {}", journal.name(), record.room_code, e);
                }
            });
        }
    }

    fn spawn_clock(self: &Arc<Self>, code: String, epoch: u64) -> AbortHandle {
        let hub = Arc::downgrade(self);
        info!("⏰ Clock started for room {}", code);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLOCK_PERIOD);
            // first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(hub) = hub.upgrade() else {
                    break;
                };
                if !hub.tick(&code, epoch) {
                    break;
                }
            }
            debug!("Clock for room {} stopped", code);
        });
        task.abort_handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::journal::LogJournal;
    use crate::market::catalog::default_companies;
    use serde_json::Value;

    fn hub() -> Arc<GameHub> {
        let mut config = GameConfig::default();
        config.seed = Some(7);
        GameHub::new(GameRules::new(config, default_companies()), Arc::new(LogJournal))
    }

    fn frames(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(serde_json::from_str(&frame).unwrap());
        }
        out
    }

    fn join(hub: &Arc<GameHub>, action: &str, name: &str, character: u32) -> (ConnId, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = hub.connect(tx);
        let frame = format!(
            r#"{{"action":"{}","playerName":"{}","roomCode":"hub1","characterId":{}}}"#,
            action, name, character
        );
        hub.handle_frame(conn, &frame);
        (conn, rx)
    }

    #[tokio::test]
    async fn test_create_and_join_frames() {
        let hub = hub();
        let (_, mut rx_a) = join(&hub, "createRoom", "ana", 1);
        let created = frames(&mut rx_a);
        assert_eq!(created[0]["event"], "roomCreated");
        assert_eq!(created[0]["data"]["roomCode"], "HUB1");
        assert!(created[0]["data"]["sessionToken"].is_string());

        let (_, mut rx_b) = join(&hub, "joinRoom", "bia", 2);
        let joined = frames(&mut rx_b);
        assert_eq!(joined[0]["event"], "playerJoined");
        assert!(joined[0]["data"]["sessionToken"].is_string());

        let seen_by_a = frames(&mut rx_a);
        assert_eq!(seen_by_a[0]["event"], "playerJoined");
        assert!(seen_by_a[0]["data"].get("sessionToken").is_none());
        assert_eq!(seen_by_a[1]["event"], "playersUpdate");
        assert_eq!(seen_by_a[1]["data"]["players"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_bad_frames_answer_only_sender() {
        let hub = hub();
        let (_, mut rx_a) = join(&hub, "createRoom", "ana", 1);
        frames(&mut rx_a);

        let (tx, mut rx_b) = mpsc::unbounded_channel();
        let conn = hub.connect(tx);
        hub.handle_frame(conn, "{not json");
        hub.handle_frame(conn, r#"{"action":"joinRoom","playerName":"x","roomCode":"NOPE","characterId":3}"#);

        let replies = frames(&mut rx_b);
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["event"], "roomError");
        assert_eq!(replies[1]["data"]["message"], "Room not found");
        assert!(frames(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn test_full_room_spawns_clock() {
        let hub = hub();
        let _ = join(&hub, "createRoom", "p0", 0);
        let mut last = None;
        for i in 1..5 {
            last = Some(join(&hub, "joinRoom", &format!("p{}", i), i));
        }
        let (_, mut rx) = last.unwrap();
        assert!(
            frames(&mut rx)
                .iter()
                .any(|f| f["event"] == "gameStartCountdown" && f["data"]["seconds"] == 10)
        );

        let state = hub.state.lock();
        let room = state.registry.room("HUB1").unwrap();
        assert!(room.clock_handle.is_some());
        assert_eq!(room.clock_epoch, 1);
    }

    #[tokio::test]
    async fn test_last_disconnect_deletes_room() {
        let hub = hub();
        let (a, _rx_a) = join(&hub, "createRoom", "ana", 1);
        assert_eq!(hub.room_count(), 1);
        assert_eq!(hub.connection_count(), 1);

        hub.disconnect(a);
        assert_eq!(hub.room_count(), 0);
        assert_eq!(hub.connection_count(), 0);
    }
}
