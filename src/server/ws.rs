//! WebSocket transport
//!
//! One reader loop and one writer task per connection. The writer drains the
//! connection's outbox; the reader feeds text frames to the hub.

use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::GameHub;
use crate::core::Result;

/// Accept connections until the listener fails.
pub async fn serve(listener: TcpListener, hub: Arc<GameHub>) -> Result<()> {
    info!("🌐 Listening on ws://{}", listener.local_addr()?);
    loop {
        let (stream, addr) = listener.accept().await?;
        let hub = hub.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_conn(hub, stream, addr).await {
                warn!("Connection {} ended with error: {}", addr, e);
            }
        });
    }
}

async fn handle_conn(hub: Arc<GameHub>, stream: TcpStream, addr: SocketAddr) -> Result<()> {
    let ws = accept_async(stream).await?;
    let (mut sink, mut source) = ws.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let conn = hub.connect(tx);
    info!("🔌 {} connected as {}", addr, conn);

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(msg) = source.next().await {
        match msg {
            Ok(Message::Text(text)) => hub.handle_frame(conn, &text),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Read error on {}: {}", conn, e);
                break;
            }
        }
    }

    // dropping the outbox lets the writer drain and close
    hub.disconnect(conn);
    let _ = writer.await;
    info!("🔌 {} disconnected", conn);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::journal::LogJournal;
    use crate::market::catalog::default_companies;
    use crate::room::GameRules;
    use tokio_tungstenite::connect_async;

    #[tokio::test]
    async fn test_round_trip_over_socket() {
        let hub = GameHub::new(
            GameRules::new(GameConfig::default(), default_companies()),
            Arc::new(LogJournal),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, hub.clone()));

        let (mut client, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        client
            .send(Message::Text(r#"{"action":"checkRoomStatus"}"#.to_string()))
            .await
            .unwrap();

        let reply = loop {
            match client.next().await.unwrap().unwrap() {
                Message::Text(text) => break text,
                _ => continue,
            }
        };
        let json: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(json["event"], "roomStatus");
        assert_eq!(json["data"]["inRoom"], false);

        client.close(None).await.unwrap();
    }
}
