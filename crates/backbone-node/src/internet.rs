//! Internet transport: TCP/TLS, self-describing framing (C6).
//!
//! Three modes: `mesh` (dial a fixed peer list and accept inbound), `server`
//! (accept only, relay between clients, broadcast NEIGHBOR_LIST), `client`
//! (dial an ordered hub fallback list with capped exponential backoff).
//! Authentication is HELLO-based: the first packet on a new connection in
//! either direction must be a HELLO naming the peer's callsign, answered
//! with the local node's own HELLO, or the connection is dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use crossbeam_channel::Sender;
use rand::Rng;
use rustls_pemfile::{certs, private_key};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{info, warn};

use backbone_common::Callsign;
use backbone_proto::packet::{peek_frame_len, Flags, HEADER_LEN};
use backbone_proto::routing_info::RoutingInfo;
use backbone_proto::{CodecError, Packet, PacketType};

use crate::transport::{canonical_cost, canonical_mtu, SendOptions, Transport, TransportError, TransportEvent, TransportId, TransportKind};

pub const NEIGHBOR_LIST_INTERVAL: Duration = Duration::from_secs(30);

pub const HUB_BACKOFF_CAP: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub enum Mode {
    Mesh { peers: Vec<String> },
    Server,
    Client { hubs: Vec<String> },
}

#[derive(Debug, Clone)]
pub struct TlsMaterial {
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

enum Command {
    Send { destination: Callsign, bytes: Vec<u8> },
    Broadcast { bytes: Vec<u8> },
    Disconnect,
}

pub struct InternetTransport {
    id: TransportId,
    local: Callsign,
    bind_address: String,
    port: u16,
    mode: Mode,
    tls: Option<TlsMaterial>,
    commands: Option<tokio::sync::mpsc::UnboundedSender<Command>>,
    runtime_handle: Option<std::thread::JoinHandle<()>>,
    connected: bool,
}

impl InternetTransport {
    pub fn new(
        id: TransportId,
        local: Callsign,
        bind_address: String,
        port: u16,
        mode: Mode,
        tls: Option<TlsMaterial>,
    ) -> Self {
        InternetTransport {
            id,
            local,
            bind_address,
            port,
            mode,
            tls,
            commands: None,
            runtime_handle: None,
            connected: false,
        }
    }
}

impl Transport for InternetTransport {
    fn id(&self) -> TransportId {
        self.id
    }

    fn connect(&mut self, events: Sender<TransportEvent>) -> Result<(), TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.id;
        let local = self.local.clone();
        let bind_address = self.bind_address.clone();
        let port = self.port;
        let mode = self.mode.clone();
        let tls = self.tls.clone();

        let handle = std::thread::Builder::new()
            .name(format!("internet-transport-{id}"))
            .spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed to build internet transport runtime");
                rt.block_on(run(id, local, bind_address, port, mode, tls, rx, events));
            })
            .map_err(|e| TransportError::Io(e.to_string()))?;

        self.commands = Some(tx);
        self.runtime_handle = Some(handle);
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some(tx) = self.commands.take() {
            let _ = tx.send(Command::Disconnect);
        }
        if let Some(h) = self.runtime_handle.take() {
            let _ = h.join();
        }
        self.connected = false;
        Ok(())
    }

    fn send(&self, destination: &Callsign, bytes: &[u8], _options: SendOptions) -> Result<(), TransportError> {
        let tx = self.commands.as_ref().ok_or(TransportError::Unavailable)?;
        tx.send(Command::Send {
            destination: destination.clone(),
            bytes: bytes.to_vec(),
        })
        .map_err(|_| TransportError::Unavailable)
    }

    fn broadcast(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let tx = self.commands.as_ref().ok_or(TransportError::Unavailable)?;
        tx.send(Command::Broadcast { bytes: bytes.to_vec() })
            .map_err(|_| TransportError::Unavailable)
    }

    fn is_available(&self) -> bool {
        self.connected
    }

    fn cost(&self) -> u32 {
        canonical_cost::INTERNET
    }

    fn mtu(&self) -> usize {
        canonical_mtu::INTERNET
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Internet
    }
}

async fn run(
    id: TransportId,
    local: Callsign,
    bind_address: String,
    port: u16,
    mode: Mode,
    tls: Option<TlsMaterial>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: Sender<TransportEvent>,
) {
    let peers: Arc<tokio::sync::Mutex<HashMap<Callsign, mpsc::UnboundedSender<Vec<u8>>>>> =
        Arc::new(tokio::sync::Mutex::new(HashMap::new()));

    let acceptor = match &tls {
        Some(material) => match build_acceptor(material) {
            Ok(a) => Some(a),
            Err(e) => {
                let _ = events.send(TransportEvent::Error { transport_id: id, message: e });
                None
            }
        },
        None => None,
    };

    let listen_enabled = matches!(mode, Mode::Mesh { .. } | Mode::Server);
    if listen_enabled {
        let addr = format!("{bind_address}:{port}");
        match TcpListener::bind(&addr).await {
            Ok(listener) => {
                info!(%addr, "internet transport listening");
                let peers = peers.clone();
                let events_accept = events.clone();
                let local_accept = local.clone();
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    loop {
                        match listener.accept().await {
                            Ok((stream, peer_addr)) => {
                                let peers = peers.clone();
                                let events = events_accept.clone();
                                let local = local_accept.clone();
                                let acceptor = acceptor.clone();
                                tokio::spawn(async move {
                                    if let Some(acceptor) = acceptor {
                                        match acceptor.accept(stream).await {
                                            Ok(tls_stream) => {
                                                handle_connection(id, local, tls_stream, peers, events).await
                                            }
                                            Err(e) => warn!(%peer_addr, error = %e, "tls accept failed"),
                                        }
                                    } else {
                                        handle_connection(id, local, stream, peers, events).await
                                    }
                                });
                            }
                            Err(e) => {
                                warn!(error = %e, "accept failed");
                            }
                        }
                    }
                });
            }
            Err(e) => {
                let _ = events.send(TransportEvent::Error { transport_id: id, message: e.to_string() });
            }
        }
    }

    if let Mode::Mesh { peers: peer_addrs } = &mode {
        for addr in peer_addrs.clone() {
            spawn_dialer(id, local.clone(), addr, None, peers.clone(), events.clone());
        }
    }
    if let Mode::Client { hubs } = &mode {
        if let Some(first) = hubs.first() {
            spawn_dialer(id, local.clone(), first.clone(), Some(hubs.clone()), peers.clone(), events.clone());
        }
    }

    loop {
        match commands.recv().await {
            Some(Command::Disconnect) | None => break,
            Some(Command::Send { destination, bytes }) => {
                let guard = peers.lock().await;
                if let Some(tx) = guard.get(&destination) {
                    let _ = tx.send(bytes);
                }
            }
            Some(Command::Broadcast { bytes }) => {
                let guard = peers.lock().await;
                for tx in guard.values() {
                    let _ = tx.send(bytes.clone());
                }
            }
        }
    }
}

fn build_acceptor(material: &TlsMaterial) -> Result<TlsAcceptor, String> {
    let cert_chain: Vec<CertificateDer<'static>> = certs(&mut &material.cert_pem[..])
        .collect::<Result<_, _>>()
        .map_err(|e| format!("invalid certificate pem: {e}"))?;
    let key: PrivateKeyDer<'static> = private_key(&mut &material.key_pem[..])
        .map_err(|e| format!("invalid key pem: {e}"))?
        .ok_or_else(|| "no private key found".to_string())?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .map_err(|e| format!("invalid tls server config: {e}"))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn build_connector() -> TlsConnector {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots_stub());
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

/// Amateur-radio backbone links are closed-membership: operators exchange
/// certificates out of band rather than relying on a public CA, so the root
/// store starts empty and is populated by whatever the node's configuration
/// trusts (left to the daemon's startup wiring, not this transport).
fn webpki_roots_stub() -> Vec<CertificateDer<'static>> {
    Vec::new()
}

fn spawn_dialer(
    id: TransportId,
    local: Callsign,
    addr: String,
    hub_fallbacks: Option<Vec<String>>,
    peers: Arc<tokio::sync::Mutex<HashMap<Callsign, mpsc::UnboundedSender<Vec<u8>>>>>,
    events: Sender<TransportEvent>,
) {
    tokio::spawn(async move {
        let mut backoff = Duration::from_secs(1);
        let mut hub_index = 0usize;
        loop {
            let target = match &hub_fallbacks {
                Some(hubs) => hubs[hub_index % hubs.len()].clone(),
                None => addr.clone(),
            };
            match TcpStream::connect(&target).await {
                Ok(stream) => {
                    backoff = Duration::from_secs(1);
                    handle_connection(id, local.clone(), stream, peers.clone(), events.clone()).await;
                }
                Err(e) => {
                    warn!(%target, error = %e, "internet dial failed");
                    if hub_fallbacks.is_some() {
                        hub_index += 1;
                    }
                }
            }
            let jitter_ms: u64 = rand::rng().random_range(0..1000);
            tokio::time::sleep(backoff + Duration::from_millis(jitter_ms)).await;
            backoff = (backoff * 2).min(HUB_BACKOFF_CAP);
        }
    });
}

/// Build this node's HELLO packet, sent as the first frame on every new
/// connection (both the accepting and the dialing side) before anything
/// else crosses the wire.
fn hello_packet(local: &Callsign) -> Packet {
    Packet {
        version: backbone_proto::packet::PROTOCOL_VERSION,
        packet_type: PacketType::Hello,
        flags: Flags::empty(),
        source: local.as_str().to_string(),
        destination: Callsign::broadcast().as_str().to_string(),
        message_id: backbone_common::ids::generate(),
        ttl: 1,
        priority: backbone_proto::Priority::Normal,
        routing_info: RoutingInfo::default(),
        payload: bytes::Bytes::new(),
    }
}

async fn handle_connection<S>(
    id: TransportId,
    local: Callsign,
    mut stream: S,
    peers: Arc<tokio::sync::Mutex<HashMap<Callsign, mpsc::UnboundedSender<Vec<u8>>>>>,
    events: Sender<TransportEvent>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let mut read_buf = BytesMut::with_capacity(8192);

    if write_frame(&mut stream, &hello_packet(&local).encode()).await.is_err() {
        return;
    }

    let peer_callsign = match read_frame(&mut stream, &mut read_buf).await {
        Some(frame) => match Packet::decode(&frame) {
            Ok(packet) if packet.packet_type == PacketType::Hello => match Callsign::parse(&packet.source) {
                Ok(cs) => cs,
                Err(e) => {
                    warn!(error = %e, "HELLO carried an unparsable callsign, closing connection");
                    return;
                }
            },
            Ok(packet) => {
                let violation = backbone_common::BackboneError::ProtocolViolation(format!(
                    "non-HELLO first packet on internet transport: {:?}",
                    packet.packet_type
                ));
                warn!(error = %violation, "closing connection");
                return;
            }
            Err(e) => {
                warn!(error = %e, "failed to decode first frame on internet connection");
                return;
            }
        },
        None => return,
    };

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    peers.lock().await.insert(peer_callsign.clone(), out_tx.clone());
    let _ = events.send(TransportEvent::Connected { transport_id: id, peer: Some(peer_callsign.clone()) });

    loop {
        tokio::select! {
            maybe_frame = read_frame(&mut stream, &mut read_buf) => {
                let Some(frame) = maybe_frame else { break };
                match Packet::decode(&frame) {
                    Ok(packet) => {
                        let _ = events.send(TransportEvent::Packet { transport_id: id, packet: Box::new(packet) });
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to decode internet-framed packet");
                    }
                }
            }
            Some(out) = out_rx.recv() => {
                if write_frame(&mut stream, &out).await.is_err() {
                    break;
                }
            }
        }
    }

    peers.lock().await.remove(&peer_callsign);
    let _ = events.send(TransportEvent::Disconnected { transport_id: id, peer: Some(peer_callsign) });
}

/// Read the next backbone packet frame from `stream`, buffering in `buf`.
///
/// Frames are self-describing: once `buf` holds at least [`HEADER_LEN`]
/// bytes, a decode is attempted. A `Truncated` failure just means more
/// bytes are needed (either the rest of the header or the payload); any
/// other decode failure means the stream has desynchronized, so the
/// cursor advances by one byte and decoding is retried from there.
async fn read_frame<S>(stream: &mut S, buf: &mut BytesMut) -> Option<Vec<u8>>
where
    S: tokio::io::AsyncRead + Unpin,
{
    loop {
        if buf.len() >= HEADER_LEN {
            match Packet::decode(&buf[..]) {
                Ok(_) => {
                    let frame_len = peek_frame_len(&buf[..]).expect("header bytes are present");
                    return Some(buf.split_to(frame_len).to_vec());
                }
                Err(CodecError::Truncated { .. }) => {}
                Err(e) => {
                    warn!(error = %e, "resyncing internet frame stream after decode failure");
                    buf.advance(1);
                    continue;
                }
            }
        }
        let mut chunk = [0u8; 4096];
        match stream.read(&mut chunk).await {
            Ok(0) => return None,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(_) => return None,
        }
    }
}

async fn write_frame<S>(stream: &mut S, packet_bytes: &[u8]) -> std::io::Result<()>
where
    S: tokio::io::AsyncWrite + Unpin,
{
    stream.write_all(packet_bytes).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_packet(source: &str) -> Packet {
        hello_packet(&Callsign::parse(source).unwrap())
    }

    #[tokio::test]
    async fn frame_round_trips_over_an_in_memory_duplex() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let packet = test_packet("W1ABC-1");
        write_frame(&mut a, &packet.encode()).await.unwrap();
        let mut buf = BytesMut::new();
        let got = read_frame(&mut b, &mut buf).await.unwrap();
        assert_eq!(Packet::decode(&got).unwrap(), packet);
    }

    #[tokio::test]
    async fn partial_reads_are_buffered_until_complete() {
        let (mut a, mut b) = tokio::io::duplex(65536);
        let mut packet = test_packet("K2XYZ-5");
        packet.payload = bytes::Bytes::from(vec![7u8; 10_000]);
        let encoded = packet.clone().encode();
        let writer = tokio::spawn(async move {
            write_frame(&mut a, &encoded).await.unwrap();
        });
        let mut buf = BytesMut::new();
        let got = read_frame(&mut b, &mut buf).await.unwrap();
        writer.await.unwrap();
        assert_eq!(Packet::decode(&got).unwrap(), packet);
    }

    #[tokio::test]
    async fn resyncs_past_garbage_bytes_preceding_a_valid_frame() {
        let (mut a, mut b) = tokio::io::duplex(8192);
        let packet = test_packet("N0CALL");
        let writer = tokio::spawn(async move {
            a.write_all(&[0xFFu8; 3]).await.unwrap();
            a.write_all(&packet.encode()).await.unwrap();
            a.flush().await.unwrap();
        });
        let mut buf = BytesMut::new();
        let got = read_frame(&mut b, &mut buf).await.unwrap();
        assert_eq!(Packet::decode(&got).unwrap(), packet);
        writer.await.unwrap();
    }
}
