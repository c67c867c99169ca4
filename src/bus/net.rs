//! OSC-over-TCP transport: an embedded hub that relays frames between
//! processes, and a client that speaks to it.
//!
//! Every bus message is an OSC message at `/typecast/<topic>` whose single
//! string argument is the JSON-encoded [`Message`]. Control traffic uses
//! `/typecast/subscribe` (topic names as string arguments),
//! `/typecast/ping` and `/typecast/pong`. On the stream each OSC packet is
//! preceded by its length as a big-endian `u32`.
//!
//! Each connection has one reader and one writer on either side, so frames
//! from one publisher reach every subscriber in the order they were sent.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rosc::{decoder, encoder, OscMessage, OscPacket, OscType};
use tracing::{debug, info, warn};

use super::{Bus, BusError, Command, LocalBus, Message, Subscription, Topic};

const ADDR_PREFIX: &str = "/typecast/";
const SUBSCRIBE_ADDR: &str = "/typecast/subscribe";
const PING_ADDR: &str = "/typecast/ping";
const PONG_ADDR: &str = "/typecast/pong";

/// Largest OSC packet either side will send or accept.
pub const MAX_FRAME: usize = 1 << 20;
/// Socket read timeout; bounds how long a stop request can go unnoticed.
const READ_TIMEOUT: Duration = Duration::from_millis(50);
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);
const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(250);
/// No pong for this long marks the link down.
const LINK_TIMEOUT: Duration = Duration::from_millis(1000);
const MAX_BACKOFF: Duration = Duration::from_secs(2);
const CONNECT_ATTEMPT: Duration = Duration::from_millis(250);

/// Decoded wire packet.
#[derive(Debug, Clone, PartialEq)]
enum Packet {
    Publish { topic: Topic, json: String },
    Subscribe(Vec<Topic>),
    Ping,
    Pong,
}

fn encode(addr: &str, args: Vec<String>) -> Result<Vec<u8>, BusError> {
    let packet = OscPacket::Message(OscMessage {
        addr: addr.to_string(),
        args: args.into_iter().map(OscType::String).collect(),
    });
    let bytes = encoder::encode(&packet).map_err(|e| BusError::Encode(format!("{e:?}")))?;
    if bytes.len() > MAX_FRAME {
        return Err(BusError::TooLarge {
            size: bytes.len(),
            max: MAX_FRAME,
        });
    }
    Ok(bytes)
}

fn encode_json(topic: Topic, json: String) -> Result<Vec<u8>, BusError> {
    encode(&format!("{ADDR_PREFIX}{}", topic.name()), vec![json])
}

fn encode_publish(topic: Topic, message: &Message) -> Result<Vec<u8>, BusError> {
    encode_json(topic, message.to_json()?)
}

fn encode_subscribe(topics: &[Topic]) -> Result<Vec<u8>, BusError> {
    encode(
        SUBSCRIBE_ADDR,
        topics.iter().map(|t| t.name().to_string()).collect(),
    )
}

fn decode_packets(bytes: &[u8]) -> Vec<Packet> {
    let Ok((_, packet)) = decoder::decode_udp(bytes) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    collect_packets(packet, &mut out);
    out
}

fn collect_packets(packet: OscPacket, out: &mut Vec<Packet>) {
    match packet {
        OscPacket::Message(msg) => out.extend(decode_message(msg)),
        OscPacket::Bundle(bundle) => {
            for content in bundle.content {
                collect_packets(content, out);
            }
        }
    }
}

fn decode_message(msg: OscMessage) -> Option<Packet> {
    let strings = msg.args.into_iter().filter_map(|arg| match arg {
        OscType::String(s) => Some(s),
        _ => None,
    });
    match msg.addr.as_str() {
        PING_ADDR => Some(Packet::Ping),
        PONG_ADDR => Some(Packet::Pong),
        SUBSCRIBE_ADDR => Some(Packet::Subscribe(
            strings.filter_map(|s| Topic::from_name(&s)).collect(),
        )),
        addr => {
            let topic = Topic::from_name(addr.strip_prefix(ADDR_PREFIX)?)?;
            let json = strings.into_iter().next()?;
            Some(Packet::Publish { topic, json })
        }
    }
}

/// Length-prefix one OSC packet.
fn frame(packet: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(4 + packet.len());
    // encode() caps packets at MAX_FRAME, well inside u32.
    framed.extend_from_slice(&(packet.len() as u32).to_be_bytes());
    framed.extend_from_slice(packet);
    framed
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// Outcome of one read from a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fill {
    Data,
    Idle,
    Closed,
}

/// Reassembles length-prefixed frames from partial reads.
#[derive(Debug, Default)]
struct FrameReader {
    buf: Vec<u8>,
}

impl FrameReader {
    fn fill(&mut self, stream: &mut impl Read) -> io::Result<Fill> {
        let mut chunk = [0u8; 16 * 1024];
        match stream.read(&mut chunk) {
            Ok(0) => Ok(Fill::Closed),
            Ok(n) => {
                self.buf.extend_from_slice(&chunk[..n]);
                Ok(Fill::Data)
            }
            Err(ref e) if is_timeout(e) => Ok(Fill::Idle),
            Err(e) => Err(e),
        }
    }

    /// Next complete frame, if one is buffered.
    fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        let Some(prefix) = self.buf.get(..4) else {
            return Ok(None);
        };
        let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        if len > MAX_FRAME {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {len} bytes exceeds {MAX_FRAME}"),
            ));
        }
        if self.buf.len() < 4 + len {
            return Ok(None);
        }
        let frame = self.buf[4..4 + len].to_vec();
        self.buf.drain(..4 + len);
        Ok(Some(frame))
    }
}

/// Resolve `host:port`.
pub fn resolve(addr: &str) -> Result<SocketAddr, BusError> {
    addr.to_socket_addrs()
        .map_err(|_| BusError::Address(addr.to_string()))?
        .next()
        .ok_or_else(|| BusError::Address(addr.to_string()))
}

struct Peer {
    topics: Vec<Topic>,
    /// Framed bytes queued for this peer's writer thread.
    tx: mpsc::Sender<Arc<Vec<u8>>>,
}

type Peers = Arc<Mutex<HashMap<u64, Peer>>>;

/// Embedded broker running on background threads.
pub struct BusHub {
    stop_flag: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    addr: SocketAddr,
}

impl BusHub {
    /// Bind on 127.0.0.1. Port 0 picks the first available port.
    pub fn bind(port: u16) -> Result<Self, BusError> {
        let addr = format!("127.0.0.1:{port}");
        let listener =
            TcpListener::bind(&addr).map_err(|source| BusError::Bind { addr, source })?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let stop_flag = Arc::new(AtomicBool::new(false));
        let stop_clone = stop_flag.clone();
        let thread = thread::spawn(move || accept_loop(listener, stop_clone));

        info!(%addr, "bus hub listening");
        Ok(Self {
            stop_flag,
            thread: Some(thread),
            addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Close every connection and the listener, then wait for the threads.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for BusHub {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(listener: TcpListener, stop: Arc<AtomicBool>) {
    let peers: Peers = Arc::default();
    let mut workers: Vec<JoinHandle<()>> = Vec::new();
    let mut next_id = 0u64;

    while !stop.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, from)) => {
                next_id += 1;
                match spawn_peer(next_id, stream, &peers, &stop) {
                    Ok(threads) => {
                        debug!(%from, peer = next_id, "peer connected");
                        workers.extend(threads);
                    }
                    Err(e) => warn!(%from, error = %e, "failed to set up peer"),
                }
            }
            Err(ref e) if is_timeout(e) => thread::sleep(READ_TIMEOUT),
            Err(e) => {
                warn!(error = %e, "bus hub listener failed");
                stop.store(true, Ordering::Relaxed);
            }
        }
        workers.retain(|worker| !worker.is_finished());
    }

    drop(listener);
    peers.lock().unwrap_or_else(|e| e.into_inner()).clear();
    for worker in workers {
        let _ = worker.join();
    }
}

fn spawn_peer(
    id: u64,
    stream: TcpStream,
    peers: &Peers,
    stop: &Arc<AtomicBool>,
) -> io::Result<[JoinHandle<()>; 2]> {
    // Accepted sockets may inherit the listener's non-blocking mode.
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let out = stream.try_clone()?;

    let (tx, rx) = mpsc::channel();
    peers.lock().unwrap_or_else(|e| e.into_inner()).insert(
        id,
        Peer {
            topics: Vec::new(),
            tx,
        },
    );

    let writer = thread::spawn(move || peer_writer(out, rx));
    let peers = peers.clone();
    let stop = stop.clone();
    let reader = thread::spawn(move || peer_reader(id, stream, peers, stop));
    Ok([reader, writer])
}

/// Runs until the peer is removed from the table (all senders dropped).
fn peer_writer(mut stream: TcpStream, rx: mpsc::Receiver<Arc<Vec<u8>>>) {
    for framed in rx {
        if let Err(e) = stream.write_all(&framed) {
            debug!(error = %e, "peer write failed");
            break;
        }
    }
    let _ = stream.shutdown(Shutdown::Both);
}

fn peer_reader(id: u64, mut stream: TcpStream, peers: Peers, stop: Arc<AtomicBool>) {
    let mut reader = FrameReader::default();

    'conn: while !stop.load(Ordering::Relaxed) {
        match reader.fill(&mut stream) {
            Ok(Fill::Data) => {}
            Ok(Fill::Idle) => continue,
            Ok(Fill::Closed) => break,
            Err(e) => {
                debug!(peer = id, error = %e, "peer read failed");
                break;
            }
        }
        loop {
            match reader.next_frame() {
                Ok(Some(bytes)) => route(id, &bytes, &peers),
                Ok(None) => break,
                Err(e) => {
                    warn!(peer = id, error = %e, "dropping peer");
                    break 'conn;
                }
            }
        }
    }

    peers.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
    let _ = stream.shutdown(Shutdown::Both);
    debug!(peer = id, "peer disconnected");
}

fn route(id: u64, bytes: &[u8], peers: &Peers) {
    let mut peers = peers.lock().unwrap_or_else(|e| e.into_inner());
    for packet in decode_packets(bytes) {
        match packet {
            Packet::Subscribe(topics) => {
                debug!(peer = id, ?topics, "peer subscribed");
                if let Some(peer) = peers.get_mut(&id) {
                    peer.topics = topics;
                }
                reply_pong(id, &peers);
            }
            Packet::Ping => reply_pong(id, &peers),
            Packet::Pong => {}
            Packet::Publish { topic, json } => match encode_json(topic, json) {
                Ok(packet) => {
                    let framed = Arc::new(frame(&packet));
                    for peer in peers.values().filter(|p| p.topics.contains(&topic)) {
                        let _ = peer.tx.send(framed.clone());
                    }
                }
                Err(e) => warn!(peer = id, error = %e, "dropping relayed message"),
            },
        }
    }
}

fn reply_pong(id: u64, peers: &HashMap<u64, Peer>) {
    let Some(peer) = peers.get(&id) else {
        return;
    };
    match encode(PONG_ADDR, Vec::new()) {
        Ok(packet) => {
            let _ = peer.tx.send(Arc::new(frame(&packet)));
        }
        Err(e) => warn!(error = %e, "failed to encode pong"),
    }
}

/// Link health as seen by the client.
struct Link {
    up: bool,
    last_pong: Instant,
    /// Newest command published while the link was down.
    pending_command: Option<(Topic, Message)>,
    /// Newest event published while the link was down.
    pending_event: Option<(Topic, Message)>,
}

impl Link {
    fn hold(&mut self, topic: Topic, message: Message) {
        match message {
            Message::Command(_) => self.pending_command = Some((topic, message)),
            Message::Event(_) => self.pending_event = Some((topic, message)),
        }
    }
}

struct Shared {
    hub: SocketAddr,
    /// Write half of the current connection; `None` while reconnecting.
    writer: Mutex<Option<TcpStream>>,
    local: LocalBus,
    topics: Mutex<Vec<Topic>>,
    link: Mutex<Link>,
    stop: AtomicBool,
}

impl Shared {
    /// Write one packet on the current connection.
    fn write(&self, packet: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        match writer.as_mut() {
            Some(stream) => stream.write_all(&frame(packet)),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "no connection to the bus hub",
            )),
        }
    }

    fn send_control(&self, packet: Result<Vec<u8>, BusError>) {
        let result = match packet {
            Ok(bytes) => self.write(&bytes),
            Err(e) => {
                warn!(error = %e, "failed to encode control packet");
                return;
            }
        };
        if let Err(e) = result {
            self.mark_down(&e.to_string());
        }
    }

    fn send_subscribe(&self) {
        let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner()).clone();
        self.send_control(encode_subscribe(&topics));
    }

    fn send_ping(&self) {
        self.send_control(encode(PING_ADDR, Vec::new()));
    }

    /// Drop the connection and tell local subscribers, once per loss.
    fn mark_down(&self, reason: &str) {
        let was_up = {
            let mut link = self.link.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut link.up, false)
        };
        if let Some(stream) = self.writer.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        if was_up {
            warn!(hub = %self.hub, reason, "bus link lost");
            self.local
                .publish(Topic::Commands, Message::Command(Command::TransportLost));
        }
    }

    fn pong_overdue(&self) -> bool {
        let link = self.link.lock().unwrap_or_else(|e| e.into_inner());
        link.up && link.last_pong.elapsed() >= LINK_TIMEOUT
    }

    fn is_up(&self) -> bool {
        self.link.lock().unwrap_or_else(|e| e.into_inner()).up
    }

    fn on_pong(&self) {
        let mut link = self.link.lock().unwrap_or_else(|e| e.into_inner());
        link.last_pong = Instant::now();
        if link.up {
            return;
        }

        // Flush while holding the link so no newer publish overtakes.
        let held = [link.pending_event.take(), link.pending_command.take()];
        for (topic, message) in held.into_iter().flatten() {
            let sent = encode_publish(topic, &message)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
                .and_then(|packet| self.write(&packet));
            if let Err(e) = sent {
                debug!(error = %e, %topic, "flush after reconnect failed");
                link.hold(topic, message);
                return;
            }
        }
        link.up = true;
        drop(link);

        info!(hub = %self.hub, "bus link restored");
        self.local
            .publish(Topic::Commands, Message::Command(Command::TransportRestored));
    }

    /// Open a fresh connection and re-announce our topics. The link comes
    /// back up on the first pong.
    fn reconnect(&self) -> io::Result<TcpStream> {
        let stream = TcpStream::connect_timeout(&self.hub, CONNECT_ATTEMPT)?;
        configure(&stream)?;
        *self.writer.lock().unwrap_or_else(|e| e.into_inner()) = Some(stream.try_clone()?);
        self.send_subscribe();
        self.send_ping();
        Ok(stream)
    }
}

fn configure(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    stream.set_write_timeout(Some(WRITE_TIMEOUT))
}

/// Client side of the transport.
///
/// Incoming messages are fanned out locally through a [`LocalBus`]. A
/// heartbeat detects a lost hub: subscribers then see a local
/// `TransportLost` command, and `TransportRestored` once pongs return.
/// While the link is down the newest command and the newest event are held
/// and sent first after reconnecting; anything older is dropped.
pub struct NetBus {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl NetBus {
    /// Connect to a hub, failing if it does not answer within `timeout`.
    pub fn connect(hub: SocketAddr, timeout: Duration) -> Result<Self, BusError> {
        let started = Instant::now();
        let unreachable = || BusError::Unreachable {
            addr: hub,
            waited_ms: timeout.as_millis(),
        };

        let mut stream = loop {
            let left = timeout.saturating_sub(started.elapsed());
            if left.is_zero() {
                return Err(unreachable());
            }
            match TcpStream::connect_timeout(&hub, left.min(CONNECT_ATTEMPT)) {
                Ok(stream) => break stream,
                Err(e) => {
                    debug!(%hub, error = %e, "bus hub not reachable yet");
                    thread::sleep(READ_TIMEOUT.min(left));
                }
            }
        };
        configure(&stream)?;

        let mut reader = FrameReader::default();
        handshake(&mut stream, &mut reader, started, timeout)?;

        let shared = Arc::new(Shared {
            hub,
            writer: Mutex::new(Some(stream.try_clone()?)),
            local: LocalBus::new(),
            topics: Mutex::new(Vec::new()),
            link: Mutex::new(Link {
                up: true,
                last_pong: Instant::now(),
                pending_command: None,
                pending_event: None,
            }),
            stop: AtomicBool::new(false),
        });

        let worker = shared.clone();
        let thread = thread::spawn(move || maintain(worker, stream, reader));

        debug!(%hub, "connected to bus hub");
        Ok(Self {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn is_link_up(&self) -> bool {
        self.shared.is_up()
    }

    /// Publish, reporting messages that can never be sent.
    ///
    /// Succeeds when the message was written or held for reconnect.
    pub fn try_publish(&self, topic: Topic, message: Message) -> Result<(), BusError> {
        let packet = encode_publish(topic, &message)?;

        let mut link = self.shared.link.lock().unwrap_or_else(|e| e.into_inner());
        if !link.up {
            debug!(%topic, "bus link down; holding message");
            link.hold(topic, message);
            return Ok(());
        }
        if let Err(e) = self.shared.write(&packet) {
            link.hold(topic, message);
            drop(link);
            self.shared.mark_down(&e.to_string());
        }
        Ok(())
    }

    /// Deliver to subscribers in this process only, whatever the link state.
    pub fn publish_local(&self, topic: Topic, message: Message) {
        self.shared.local.publish(topic, message);
    }
}

fn handshake(
    stream: &mut TcpStream,
    reader: &mut FrameReader,
    started: Instant,
    timeout: Duration,
) -> Result<(), BusError> {
    stream.write_all(&frame(&encode_subscribe(&[])?))?;

    while started.elapsed() < timeout {
        match reader.fill(stream)? {
            Fill::Data => {}
            Fill::Idle => continue,
            Fill::Closed => break,
        }
        while let Some(bytes) = reader.next_frame()? {
            if decode_packets(&bytes).contains(&Packet::Pong) {
                return Ok(());
            }
        }
    }

    Err(BusError::Unreachable {
        addr: stream.peer_addr()?,
        waited_ms: timeout.as_millis(),
    })
}

/// Reader, heartbeat and reconnect loop for one client.
fn maintain(shared: Arc<Shared>, stream: TcpStream, reader: FrameReader) {
    let mut current = Some((stream, reader));
    let mut backoff = HEARTBEAT_INTERVAL;
    let mut next_ping = Instant::now() + HEARTBEAT_INTERVAL;
    let mut connected_at = Instant::now();

    while !shared.stop.load(Ordering::Relaxed) {
        if current.is_none() {
            sleep_unless_stopped(&shared, backoff);
            if shared.stop.load(Ordering::Relaxed) {
                break;
            }
            match shared.reconnect() {
                Ok(stream) => {
                    debug!(hub = %shared.hub, "reconnected; awaiting pong");
                    current = Some((stream, FrameReader::default()));
                    connected_at = Instant::now();
                    next_ping = connected_at + HEARTBEAT_INTERVAL;
                    backoff = HEARTBEAT_INTERVAL;
                }
                Err(e) => {
                    debug!(hub = %shared.hub, error = %e, "reconnect failed");
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
            continue;
        }
        let Some((stream, reader)) = current.as_mut() else {
            continue;
        };

        let broken = match read_frames(&shared, stream, reader) {
            Ok(true) => None,
            Ok(false) => Some("hub closed the connection".to_string()),
            Err(e) => Some(e.to_string()),
        };
        let broken = broken.or_else(|| {
            let stale = if shared.is_up() {
                shared.pong_overdue()
            } else {
                connected_at.elapsed() >= LINK_TIMEOUT
            };
            stale.then(|| "heartbeat timed out".to_string())
        });
        if let Some(reason) = broken {
            shared.mark_down(&reason);
            current = None;
            continue;
        }

        if Instant::now() >= next_ping {
            shared.send_ping();
            next_ping = Instant::now() + HEARTBEAT_INTERVAL;
        }
    }
}

/// Read what is available and dispatch complete frames. `Ok(false)` on EOF.
fn read_frames(
    shared: &Shared,
    stream: &mut TcpStream,
    reader: &mut FrameReader,
) -> io::Result<bool> {
    match reader.fill(stream)? {
        Fill::Closed => return Ok(false),
        Fill::Idle => return Ok(true),
        Fill::Data => {}
    }
    while let Some(bytes) = reader.next_frame()? {
        for packet in decode_packets(&bytes) {
            match packet {
                Packet::Pong => shared.on_pong(),
                Packet::Publish { topic, json } => match Message::from_json(topic, &json) {
                    Ok(message) => shared.local.publish(topic, message),
                    Err(e) => debug!(error = %e, %topic, "ignoring bad payload"),
                },
                Packet::Ping | Packet::Subscribe(_) => {}
            }
        }
    }
    Ok(true)
}

fn sleep_unless_stopped(shared: &Shared, total: Duration) {
    let until = Instant::now() + total;
    while !shared.stop.load(Ordering::Relaxed) && Instant::now() < until {
        thread::sleep(READ_TIMEOUT);
    }
}

impl Bus for NetBus {
    fn publish(&self, topic: Topic, message: Message) {
        if let Err(e) = self.try_publish(topic, message) {
            warn!(error = %e, %topic, "dropping unsendable message");
        }
    }

    fn subscribe(&self, topics: &[Topic]) -> Subscription {
        let subscription = self.shared.local.subscribe(topics);
        {
            let mut all = self.shared.topics.lock().unwrap_or_else(|e| e.into_inner());
            for topic in topics {
                if !all.contains(topic) {
                    all.push(*topic);
                }
            }
        }
        self.shared.send_subscribe();
        subscription
    }
}

impl Drop for NetBus {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        if let Some(stream) = self
            .shared
            .writer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = stream.shutdown(Shutdown::Write);
        }
        let thread = self
            .thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(thread) = thread {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Event, RecvError};

    const WAIT: Duration = Duration::from_secs(2);

    fn wait_for_command(sub: &Subscription, want: &Command) -> bool {
        let deadline = Instant::now() + Duration::from_secs(8);
        while Instant::now() < deadline {
            match sub.recv_timeout(Duration::from_millis(100)) {
                Ok((_, Message::Command(command))) if command == *want => return true,
                Ok(_) | Err(RecvError::Timeout) => {}
                Err(RecvError::Closed) => return false,
            }
        }
        false
    }

    // --- Wire format ---

    #[test]
    fn wire_format_round_trip() {
        let bytes = encode_publish(Topic::Focus, &Command::FocusLost.into()).unwrap();
        assert_eq!(
            decode_packets(&bytes),
            vec![Packet::Publish {
                topic: Topic::Focus,
                json: r#"{"cmd":"focus_lost"}"#.to_string()
            }]
        );
    }

    #[test]
    fn subscribe_packet_lists_topics() {
        let bytes = encode_subscribe(&[Topic::Commands, Topic::Events]).unwrap();
        assert_eq!(
            decode_packets(&bytes),
            vec![Packet::Subscribe(vec![Topic::Commands, Topic::Events])]
        );
    }

    #[test]
    fn unknown_addresses_are_dropped() {
        let bytes = encode("/other/thing", vec!["x".to_string()]).unwrap();
        assert!(decode_packets(&bytes).is_empty());
        assert!(decode_packets(b"garbage").is_empty());
    }

    #[test]
    fn oversized_message_is_rejected() {
        let message = Message::Command(Command::LoadText {
            text: "x".repeat(MAX_FRAME),
        });
        assert!(matches!(
            encode_publish(Topic::Commands, &message),
            Err(BusError::TooLarge { max: MAX_FRAME, .. })
        ));
    }

    #[test]
    fn frames_survive_split_reads() {
        let a = encode(PING_ADDR, Vec::new()).unwrap();
        let b = encode_subscribe(&[Topic::Events]).unwrap();
        let stream = [frame(&a), frame(&b)].concat();

        let mut reader = FrameReader::default();
        let mut frames = Vec::new();
        for piece in stream.chunks(3) {
            let mut piece = piece;
            assert_eq!(reader.fill(&mut piece).unwrap(), Fill::Data);
            while let Some(bytes) = reader.next_frame().unwrap() {
                frames.push(bytes);
            }
        }
        assert_eq!(frames, vec![a, b]);
    }

    #[test]
    fn oversized_length_prefix_is_an_error() {
        let mut reader = FrameReader::default();
        let mut bytes: &[u8] = &u32::MAX.to_be_bytes();
        reader.fill(&mut bytes).unwrap();
        assert!(reader.next_frame().is_err());
    }

    // --- Hub and clients ---

    #[test]
    fn hub_binds_ephemeral_port() {
        let hub = BusHub::bind(0).unwrap();
        assert_ne!(hub.local_addr().port(), 0);
    }

    #[test]
    fn bind_failure_on_used_port() {
        let hub = BusHub::bind(0).unwrap();
        let result = BusHub::bind(hub.local_addr().port());
        assert!(matches!(result, Err(BusError::Bind { .. })));
    }

    #[test]
    fn connect_to_missing_hub_fails() {
        // Reserve a port, then free it so nothing listens there.
        let addr = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let result = NetBus::connect(addr, Duration::from_millis(300));
        assert!(matches!(result, Err(BusError::Unreachable { .. })));
    }

    #[test]
    fn relays_between_clients() {
        let hub = BusHub::bind(0).unwrap();
        let engine = NetBus::connect(hub.local_addr(), WAIT).unwrap();
        let operator = NetBus::connect(hub.local_addr(), WAIT).unwrap();

        let commands = engine.subscribe(&[Topic::Commands]);
        let events = operator.subscribe(&[Topic::Events]);
        // Let the subscriptions reach the hub.
        thread::sleep(Duration::from_millis(100));

        operator.publish(Topic::Commands, Command::Play.into());
        engine.publish(Topic::Events, Event::PlaybackCompleted.into());

        assert_eq!(
            commands.recv_timeout(WAIT),
            Ok((Topic::Commands, Message::Command(Command::Play)))
        );
        assert_eq!(
            events.recv_timeout(WAIT),
            Ok((Topic::Events, Message::Event(Event::PlaybackCompleted)))
        );
        assert_eq!(commands.poll(), None);
    }

    #[test]
    fn try_publish_reports_oversized_message() {
        let hub = BusHub::bind(0).unwrap();
        let client = NetBus::connect(hub.local_addr(), WAIT).unwrap();
        let result = client.try_publish(
            Topic::Commands,
            Command::LoadText {
                text: "x".repeat(MAX_FRAME + 1),
            }
            .into(),
        );
        assert!(matches!(result, Err(BusError::TooLarge { .. })));
    }

    // --- Link loss ---

    #[test]
    fn lost_hub_is_reported_locally() {
        let mut hub = BusHub::bind(0).unwrap();
        let client = NetBus::connect(hub.local_addr(), WAIT).unwrap();
        let commands = client.subscribe(&[Topic::Commands]);
        hub.stop();

        assert!(wait_for_command(&commands, &Command::TransportLost));
        assert!(!client.is_link_up());
    }

    #[test]
    fn local_publish_works_without_a_hub() {
        let mut hub = BusHub::bind(0).unwrap();
        let client = NetBus::connect(hub.local_addr(), WAIT).unwrap();
        let commands = client.subscribe(&[Topic::Commands]);
        hub.stop();
        assert!(wait_for_command(&commands, &Command::TransportLost));

        // Events published while down must not push out a held command.
        client.publish(Topic::Commands, Command::Stop.into());
        client.publish(Topic::Events, Event::PlaybackCompleted.into());
        client.publish_local(Topic::Commands, Command::Shutdown.into());
        assert!(wait_for_command(&commands, &Command::Shutdown));

        let link = client.shared.link.lock().unwrap();
        assert_eq!(
            link.pending_command,
            Some((Topic::Commands, Message::Command(Command::Stop)))
        );
        assert_eq!(
            link.pending_event,
            Some((Topic::Events, Message::Event(Event::PlaybackCompleted)))
        );
    }

    #[test]
    fn newest_held_message_is_flushed_after_restart() {
        let mut hub = BusHub::bind(0).unwrap();
        let port = hub.local_addr().port();
        let client = NetBus::connect(hub.local_addr(), WAIT).unwrap();
        let inbox = client.subscribe(&[Topic::Commands, Topic::Events]);
        thread::sleep(Duration::from_millis(100));

        hub.stop();
        assert!(wait_for_command(&inbox, &Command::TransportLost));
        for text in ["older", "newest"] {
            client.publish(
                Topic::Commands,
                Command::LoadText {
                    text: text.to_string(),
                }
                .into(),
            );
        }
        client.publish(Topic::Events, Event::PlaybackCompleted.into());

        let _hub = BusHub::bind(port).unwrap();
        assert!(wait_for_command(&inbox, &Command::TransportRestored));

        let mut loads = Vec::new();
        let mut completed = 0;
        let deadline = Instant::now() + Duration::from_millis(1000);
        while Instant::now() < deadline {
            match inbox.recv_timeout(Duration::from_millis(50)) {
                Ok((_, Message::Command(Command::LoadText { text }))) => loads.push(text),
                Ok((_, Message::Event(Event::PlaybackCompleted))) => completed += 1,
                Ok(_) | Err(RecvError::Timeout) => {}
                Err(RecvError::Closed) => break,
            }
        }
        assert_eq!(loads, vec!["newest".to_string()]);
        assert_eq!(completed, 1);
    }
}
