use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use ristnet_peer::{Connection, Session, SessionConfig, SessionHandler};
use ristnet_transport::{
    ConnectInfo, Disposition, MemoryTransport, Packet, PeerHandle, Statistics,
};
use ristnet_url::Endpoint;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cmd::DemoArgs;
use crate::exit::{session_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS};
use crate::output::{print_fields, print_json, print_pretty, table, OutputFormat};

const RECEIVER_PORTS: [&str; 2] = ["8000", "9000"];
const SENDER_WEIGHT: u32 = 5;

/// Per-client state attached by the receiver at admission.
struct Camera {
    id: u64,
    remote: SocketAddr,
    packets: AtomicU64,
}

#[derive(Default)]
struct DemoReceiver {
    next_id: AtomicU64,
    intact: AtomicU64,
    corrupt: AtomicU64,
    bytes: AtomicU64,
    stats: Mutex<Option<Statistics>>,
}

impl SessionHandler for DemoReceiver {
    type Context = Camera;

    fn on_admit(&self, info: &ConnectInfo, peer: PeerHandle) -> Option<Camera> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        info!(%peer, remote = %info.remote, id, "client connecting");
        Some(Camera {
            id,
            remote: info.remote,
            packets: AtomicU64::new(0),
        })
    }

    fn on_data(&self, packet: &Packet, connection: Option<&Arc<Connection<Camera>>>) -> Disposition {
        if let Some(connection) = connection {
            connection.context().packets.fetch_add(1, Ordering::Relaxed);
        }
        self.bytes
            .fetch_add(packet.payload.len() as u64, Ordering::Relaxed);
        if is_counting_pattern(&packet.payload) {
            debug!(peer = %packet.peer, len = packet.payload.len(), "expected data received");
            self.intact.fetch_add(1, Ordering::Relaxed);
        } else {
            warn!(peer = %packet.peer, len = packet.payload.len(), "did not receive the expected data");
            self.corrupt.fetch_add(1, Ordering::Relaxed);
        }
        Disposition::Keep
    }

    fn on_disconnect(&self, connection: Arc<Connection<Camera>>) {
        let camera = connection.context();
        info!(
            peer = %connection.peer(),
            id = camera.id,
            remote = %camera.remote,
            packets = camera.packets.load(Ordering::Relaxed),
            "client gone"
        );
    }

    fn on_statistics(&self, stats: &Statistics) {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner) = Some(stats.clone());
    }
}

#[derive(Default)]
struct DemoSender {
    oob_packets: AtomicU64,
    oob_bytes: AtomicU64,
    stats: Mutex<Option<Statistics>>,
}

impl SessionHandler for DemoSender {
    type Context = ();

    fn on_oob_data(&self, packet: &Packet, _connection: Option<&Arc<Connection<()>>>) {
        debug!(len = packet.payload.len(), "oob data from receiver");
        self.oob_packets.fetch_add(1, Ordering::Relaxed);
        self.oob_bytes
            .fetch_add(packet.payload.len() as u64, Ordering::Relaxed);
    }

    fn on_statistics(&self, stats: &Statistics) {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner) = Some(stats.clone());
    }
}

#[derive(Serialize)]
struct ClientRow {
    id: u64,
    peer: PeerHandle,
    remote: String,
    packets: u64,
}

#[derive(Serialize)]
struct DemoSummary {
    receiver_endpoints: Vec<String>,
    sender_peers: Vec<String>,
    packets_sent: usize,
    packets_intact: u64,
    packets_corrupt: u64,
    bytes_received: u64,
    oob_replies: usize,
    oob_received: u64,
    oob_bytes_received: u64,
    clients: Vec<ClientRow>,
    clients_closed: usize,
    receiver_stats: Option<Statistics>,
    sender_stats: Option<Statistics>,
    ok: bool,
}

fn is_counting_pattern(payload: &[u8]) -> bool {
    payload
        .iter()
        .enumerate()
        .all(|(index, byte)| *byte == (index & 0xff) as u8)
}

pub fn run(args: DemoArgs, format: OutputFormat) -> CliResult<i32> {
    let config = match &args.config {
        Some(path) => SessionConfig::from_json_file(path)
            .map_err(|err| session_error(&format!("config {} invalid", path.display()), err))?,
        None => SessionConfig::default(),
    };

    let transport = MemoryTransport::new();
    let mut receiver = Session::receiver(transport.clone(), DemoReceiver::default());
    let listen: Vec<_> = RECEIVER_PORTS
        .iter()
        .map(|port| Endpoint::listen("0.0.0.0", *port))
        .collect();
    receiver
        .init(&listen, config.clone())
        .map_err(|err| session_error("receiver init failed", err))?;

    let mut sender = Session::sender(transport.clone(), DemoSender::default());
    let connect = [Endpoint::connect("127.0.0.1", RECEIVER_PORTS[0]).with_weight(SENDER_WEIGHT)];
    sender
        .init(&connect, config)
        .map_err(|err| session_error("sender init failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let payload: Vec<u8> = (0..args.size).map(|n| (n & 0xff) as u8).collect();
    let mut sent = 0usize;
    while sent < args.packets && running.load(Ordering::SeqCst) {
        if sent > 0 && args.interval_ms > 0 {
            thread::sleep(Duration::from_millis(args.interval_ms));
        }
        sender
            .send(&payload, None)
            .map_err(|err| session_error("send failed", err))?;
        sent += 1;
        debug!(sent, "packet sent");
    }

    let mut oob_replies = 0usize;
    receiver.list_active_clients(|connection| {
        match receiver.send_oob(&payload, Some(connection.peer())) {
            Ok(_) => oob_replies += 1,
            Err(err) => warn!(peer = %connection.peer(), error = %err, "oob reply failed"),
        }
    });

    transport.emit_statistics();

    let mut clients = Vec::new();
    receiver.list_active_clients(|connection| {
        let camera = connection.context();
        clients.push(ClientRow {
            id: camera.id,
            peer: connection.peer(),
            remote: camera.remote.to_string(),
            packets: camera.packets.load(Ordering::Relaxed),
        });
    });
    clients.sort_by_key(|client| client.id);

    let receiver_endpoints = receiver
        .registered_peers()
        .iter()
        .map(|peer| peer.url.clone())
        .collect();
    let sender_peers = sender
        .registered_peers()
        .iter()
        .map(|peer| peer.url.clone())
        .collect();

    let clients_closed = receiver.close_all();
    sender.destroy();
    receiver.destroy();

    let rx = receiver.handler();
    let tx = sender.handler();
    let packets_intact = rx.intact.load(Ordering::Relaxed);
    let packets_corrupt = rx.corrupt.load(Ordering::Relaxed);
    let summary = DemoSummary {
        receiver_endpoints,
        sender_peers,
        packets_sent: sent,
        packets_intact,
        packets_corrupt,
        bytes_received: rx.bytes.load(Ordering::Relaxed),
        oob_replies,
        oob_received: tx.oob_packets.load(Ordering::Relaxed),
        oob_bytes_received: tx.oob_bytes.load(Ordering::Relaxed),
        clients,
        clients_closed,
        receiver_stats: rx
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone(),
        sender_stats: tx
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone(),
        ok: packets_corrupt == 0 && packets_intact == sent as u64,
    };

    print_summary(&summary, format);
    info!(ok = summary.ok, "demo finished");
    Ok(if summary.ok { SUCCESS } else { FAILURE })
}

fn print_summary(summary: &DemoSummary, format: OutputFormat) {
    let fields = [
        ("packets_sent", summary.packets_sent.to_string()),
        ("packets_intact", summary.packets_intact.to_string()),
        ("packets_corrupt", summary.packets_corrupt.to_string()),
        ("bytes_received", summary.bytes_received.to_string()),
        ("oob_replies", summary.oob_replies.to_string()),
        ("oob_received", summary.oob_received.to_string()),
        ("clients_closed", summary.clients_closed.to_string()),
        ("ok", summary.ok.to_string()),
    ];

    match format {
        OutputFormat::Json => print_json(summary),
        OutputFormat::Pretty => print_pretty(&fields),
        OutputFormat::Table => {
            print_fields(&fields);
            let mut clients = table(&["ID", "PEER", "REMOTE", "PACKETS"]);
            for client in &summary.clients {
                clients.add_row(vec![
                    client.id.to_string(),
                    client.peer.to_string(),
                    client.remote.clone(),
                    client.packets.to_string(),
                ]);
            }
            println!("{clients}");
        }
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counting_pattern_wraps_at_256() {
        let payload: Vec<u8> = (0..1000u32).map(|n| (n & 0xff) as u8).collect();
        assert!(is_counting_pattern(&payload));
        let mut broken = payload.clone();
        broken[300] ^= 1;
        assert!(!is_counting_pattern(&broken));
        assert!(is_counting_pattern(&[]));
    }
}
