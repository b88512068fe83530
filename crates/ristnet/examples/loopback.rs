//! Receiver and sender wired through the in-memory transport.
//!
//! Run with:
//!   cargo run --example loopback --features peer

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use ristnet::peer::{Connection, Session, SessionConfig, SessionHandler};
use ristnet::transport::{ConnectInfo, Disposition, MemoryTransport, Packet, PeerHandle};
use ristnet::url::Endpoint;

/// Receiver side: count packets per client.
struct Counter;

impl SessionHandler for Counter {
    type Context = AtomicU32;

    fn on_admit(&self, info: &ConnectInfo, peer: PeerHandle) -> Option<AtomicU32> {
        eprintln!("{peer} connecting from {}", info.remote);
        Some(AtomicU32::new(0))
    }

    fn on_data(&self, packet: &Packet, connection: Option<&Arc<Connection<AtomicU32>>>) -> Disposition {
        if let Some(connection) = connection {
            let seen = connection.context().fetch_add(1, Ordering::Relaxed) + 1;
            eprintln!("{}: {} bytes (packet {seen})", packet.peer, packet.payload.len());
        }
        Disposition::Keep
    }

    fn on_disconnect(&self, connection: Arc<Connection<AtomicU32>>) {
        eprintln!(
            "{} gone after {} packets",
            connection.peer(),
            connection.context().load(Ordering::Relaxed)
        );
    }
}

/// Sender side: print OOB replies.
struct Echo;

impl SessionHandler for Echo {
    type Context = ();

    fn on_oob_data(&self, packet: &Packet, _connection: Option<&Arc<Connection<()>>>) {
        eprintln!("oob reply: {}", String::from_utf8_lossy(&packet.payload));
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let transport = MemoryTransport::new();

    let mut receiver = Session::receiver(transport.clone(), Counter);
    receiver.init(
        &[Endpoint::listen("0.0.0.0", "8000")],
        SessionConfig::default(),
    )?;

    let mut sender = Session::sender(transport, Echo);
    sender.init(
        &[Endpoint::connect("127.0.0.1", "8000")],
        SessionConfig::default(),
    )?;

    for n in 0..5u8 {
        sender.send(&[n; 188], None)?;
    }

    receiver.list_active_clients(|connection| {
        if let Err(err) = receiver.send_oob(b"thanks", Some(connection.peer())) {
            eprintln!("oob reply failed: {err}");
        }
    });

    receiver.close_all();
    sender.destroy();
    receiver.destroy();
    Ok(())
}
