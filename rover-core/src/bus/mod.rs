//! Topic-addressed publish/subscribe fabric with two logical channels
//! (`upstream` worker→orchestrator events, `downstream` orchestrator→worker
//! commands). Publishers never block: a subscriber whose inbox is full is
//! skipped and the drop is logged, matching at-most-once delivery. Ordering
//! is per-publisher FIFO only — there is no cross-publisher total order.
//!
//! The fan-out itself (`ChannelHub`) is in-process, but `Bus` puts it behind
//! a real transport: `rover-orchestratord` calls [`Bus::serve`] to host a
//! `ChannelHub` per channel over TCP at `config.ipc.upstream`/`downstream`,
//! and every other binary calls [`Bus::connect`] to reach it. No pub/sub
//! networking crate is part of this workspace's dependency stack (same
//! reasoning as `rover-remoted`'s hand-rolled HTTP listener), so the wire
//! format here is newline-delimited JSON over `std::net`. `Bus::new` stays
//! available for tests and any single-process use that doesn't need the
//! network at all — its `publish`/`subscribe` signatures are identical to
//! the networked form, so call sites never branch on which one they have.

pub mod payload;
pub mod topics;
pub mod wire;

pub use payload::Message;
pub use wire::WireFrame;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;

use crate::config::IpcConfig;
use crate::error::{Result, RoverError};

const SUBSCRIBER_INBOX_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Upstream,
    Downstream,
}

struct TopicSender {
    prefix: String,
    tx: Sender<Message>,
}

#[derive(Default)]
struct ChannelHub {
    senders: Mutex<Vec<TopicSender>>,
}

impl ChannelHub {
    fn publish(&self, msg: &Message) {
        let topic = msg.topic();
        let senders = self.senders.lock();
        for sub in senders.iter() {
            if !topic.starts_with(sub.prefix.as_str()) {
                continue;
            }
            if sub.tx.try_send(msg.clone()).is_err() {
                tracing::warn!(topic, "subscriber inbox full or closed; dropping message");
            }
        }
    }

    fn subscribe(&self, prefix: impl Into<String>) -> Receiver<Message> {
        let (tx, rx) = crossbeam_channel::bounded(SUBSCRIBER_INBOX_CAPACITY);
        self.senders.lock().push(TopicSender {
            prefix: prefix.into(),
            tx,
        });
        rx
    }
}

/// One TCP connection to a remote `ChannelHub`. Publishing writes a
/// `WireFrame::Publish` over a shared, mutex-guarded stream (mirroring the
/// serial-port writer pattern in `rover-motord`). Subscribing opens its own
/// dedicated connection per call — sharing one socket across multiple
/// subscriptions would mean two reader threads racing to read lines off the
/// same stream, splitting frames between them unpredictably.
struct RemoteChannel {
    addr: String,
    writer: Mutex<TcpStream>,
}

impl RemoteChannel {
    fn connect(addr: &str) -> Result<Self> {
        let addr = strip_scheme(addr).to_string();
        let stream = TcpStream::connect(&addr)
            .map_err(|e| RoverError::Bus(format!("connecting to {addr}: {e}")))?;
        Ok(Self { addr, writer: Mutex::new(stream) })
    }

    fn publish(&self, msg: &Message) {
        let frame = WireFrame::Publish { message: msg.clone() };
        let Ok(line) = serde_json::to_string(&frame) else {
            return;
        };
        let mut writer = self.writer.lock();
        if writeln!(writer, "{line}").is_err() {
            tracing::warn!(topic = msg.topic(), "bus publish failed; connection likely dropped");
        }
    }

    fn subscribe(&self, prefix: impl Into<String>) -> Receiver<Message> {
        let prefix = prefix.into();
        let (tx, rx) = crossbeam_channel::bounded(SUBSCRIBER_INBOX_CAPACITY);
        let stream = match TcpStream::connect(&self.addr) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("bus subscribe connect to {}: {e}", self.addr);
                return rx;
            }
        };
        let frame = WireFrame::Subscribe { prefix };
        let mut writer = match stream.try_clone() {
            Ok(w) => w,
            Err(e) => {
                tracing::error!("cloning bus subscribe connection: {e}");
                return rx;
            }
        };
        if let Ok(line) = serde_json::to_string(&frame) {
            let _ = writeln!(writer, "{line}");
        }
        std::thread::spawn(move || {
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Message>(&line) {
                            Ok(msg) => {
                                if tx.try_send(msg).is_err() {
                                    tracing::warn!("local bus inbox full or closed; dropping message");
                                }
                            }
                            Err(e) => tracing::warn!("malformed bus message: {e}"),
                        }
                    }
                }
            }
        });
        rx
    }
}

enum ChannelEndpoint {
    Hub(Arc<ChannelHub>),
    Remote(RemoteChannel),
}

impl ChannelEndpoint {
    fn publish(&self, msg: &Message) {
        match self {
            ChannelEndpoint::Hub(hub) => hub.publish(msg),
            ChannelEndpoint::Remote(remote) => remote.publish(msg),
        }
    }

    fn subscribe(&self, prefix: impl Into<String>) -> Receiver<Message> {
        match self {
            ChannelEndpoint::Hub(hub) => hub.subscribe(prefix),
            ChannelEndpoint::Remote(remote) => remote.subscribe(prefix),
        }
    }
}

/// The bus. Cheaply `Clone`-able via `Arc`; share one instance across every
/// component that runs inside the same process.
pub struct Bus {
    upstream: ChannelEndpoint,
    downstream: ChannelEndpoint,
}

impl Bus {
    /// In-process only, no socket opened — used by unit/integration tests
    /// that exercise the hub's fan-out behavior directly.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            upstream: ChannelEndpoint::Hub(Arc::new(ChannelHub::default())),
            downstream: ChannelEndpoint::Hub(Arc::new(ChannelHub::default())),
        })
    }

    /// Host a `ChannelHub` per channel over TCP at `ipc.upstream`/
    /// `ipc.downstream`, accepting connections from every other process.
    /// `rover-orchestratord` is the one binary that calls this.
    pub fn serve(ipc: &IpcConfig) -> Result<Arc<Self>> {
        let upstream_hub = Arc::new(ChannelHub::default());
        let downstream_hub = Arc::new(ChannelHub::default());
        spawn_listener(strip_scheme(&ipc.upstream), Arc::clone(&upstream_hub))?;
        spawn_listener(strip_scheme(&ipc.downstream), Arc::clone(&downstream_hub))?;
        Ok(Arc::new(Self {
            upstream: ChannelEndpoint::Hub(upstream_hub),
            downstream: ChannelEndpoint::Hub(downstream_hub),
        }))
    }

    /// Connect to a bus hosted elsewhere by [`Bus::serve`]. Every binary
    /// except `rover-orchestratord` calls this.
    pub fn connect(ipc: &IpcConfig) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            upstream: ChannelEndpoint::Remote(RemoteChannel::connect(&ipc.upstream)?),
            downstream: ChannelEndpoint::Remote(RemoteChannel::connect(&ipc.downstream)?),
        }))
    }

    pub fn publish(&self, channel: Channel, msg: Message) {
        match channel {
            Channel::Upstream => self.upstream.publish(&msg),
            Channel::Downstream => self.downstream.publish(&msg),
        }
    }

    /// Subscribe to every topic whose string starts with `prefix` (pass `""`
    /// for everything on that channel) on the given logical channel.
    pub fn subscribe(&self, channel: Channel, prefix: impl Into<String>) -> Receiver<Message> {
        match channel {
            Channel::Upstream => self.upstream.subscribe(prefix),
            Channel::Downstream => self.downstream.subscribe(prefix),
        }
    }
}

fn strip_scheme(addr: &str) -> &str {
    addr.rsplit_once("://").map(|(_, rest)| rest).unwrap_or(addr)
}

fn spawn_listener(addr: &str, hub: Arc<ChannelHub>) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .map_err(|e| RoverError::Bus(format!("binding {addr}: {e}")))?;
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let hub = Arc::clone(&hub);
                    std::thread::spawn(move || handle_peer(stream, hub));
                }
                Err(e) => tracing::warn!("bus accept failed: {e}"),
            }
        }
    });
    Ok(())
}

/// One accepted connection. A publishing peer sends a stream of `Publish`
/// frames; a subscribing peer sends exactly one `Subscribe` frame and then
/// just reads whatever this spawns below. Either shape can arrive on any
/// accepted connection, so both are handled on the same read loop.
fn handle_peer(stream: TcpStream, hub: Arc<ChannelHub>) {
    let mut reader = BufReader::new(match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("cloning accepted bus connection: {e}");
            return;
        }
    });
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<WireFrame>(&line) {
                    Ok(WireFrame::Publish { message }) => hub.publish(&message),
                    Ok(WireFrame::Subscribe { prefix }) => {
                        let rx = hub.subscribe(prefix);
                        match stream.try_clone() {
                            Ok(mut writer) => {
                                std::thread::spawn(move || {
                                    while let Ok(msg) = rx.recv() {
                                        let Ok(line) = serde_json::to_string(&msg) else {
                                            continue;
                                        };
                                        if writeln!(writer, "{line}").is_err() {
                                            break;
                                        }
                                    }
                                });
                            }
                            Err(e) => tracing::warn!("cloning bus connection for forwarding: {e}"),
                        }
                    }
                    Err(e) => tracing::warn!("malformed bus frame: {e}"),
                }
            }
            Err(e) => {
                tracing::debug!("bus peer connection closed: {e}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use payload::{CmdPauseVision, WakeWordDetected};

    #[test]
    fn subscriber_receives_matching_prefix_only() {
        let bus = Bus::new();
        let rx = bus.subscribe(Channel::Upstream, "ww.");
        bus.publish(
            Channel::Upstream,
            Message::WwDetected(WakeWordDetected {
                timestamp: 1,
                keyword: "hey robo".into(),
                variant: "default".into(),
                confidence: 0.9,
                source: "oww".into(),
            }),
        );
        bus.publish(
            Channel::Downstream,
            Message::CmdPauseVision(CmdPauseVision { pause: true }),
        );
        let got = rx.try_recv().expect("expected ww.detected");
        assert_eq!(got.topic(), "ww.detected");
        assert!(rx.try_recv().is_err(), "downstream message must not leak into upstream subscription");
    }

    #[test]
    fn channels_are_isolated() {
        let bus = Bus::new();
        let up = bus.subscribe(Channel::Upstream, "");
        let down = bus.subscribe(Channel::Downstream, "");
        bus.publish(
            Channel::Downstream,
            Message::CmdPauseVision(CmdPauseVision { pause: true }),
        );
        assert!(up.try_recv().is_err());
        assert!(down.try_recv().is_ok());
    }

    #[test]
    fn full_inbox_drops_rather_than_blocks() {
        let bus = Bus::new();
        let rx = bus.subscribe(Channel::Upstream, "");
        for _ in 0..SUBSCRIBER_INBOX_CAPACITY + 10 {
            bus.publish(
                Channel::Upstream,
                Message::CmdPauseVision(CmdPauseVision { pause: true }),
            );
        }
        // Publisher never blocked to get here. Inbox holds at most its capacity.
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        assert!(count <= SUBSCRIBER_INBOX_CAPACITY);
    }

    #[test]
    fn strip_scheme_removes_tcp_prefix() {
        assert_eq!(strip_scheme("tcp://127.0.0.1:6010"), "127.0.0.1:6010");
        assert_eq!(strip_scheme("127.0.0.1:6010"), "127.0.0.1:6010");
    }

    #[test]
    fn serve_and_connect_relay_messages_across_tcp() {
        let ipc = IpcConfig {
            upstream: "tcp://127.0.0.1:16010".into(),
            downstream: "tcp://127.0.0.1:16011".into(),
        };
        let _broker = Bus::serve(&ipc).expect("serve");
        std::thread::sleep(std::time::Duration::from_millis(50));
        let client_a = Bus::connect(&ipc).expect("connect a");
        let client_b = Bus::connect(&ipc).expect("connect b");
        std::thread::sleep(std::time::Duration::from_millis(50));

        let rx = client_b.subscribe(Channel::Upstream, "ww.");
        std::thread::sleep(std::time::Duration::from_millis(50));

        client_a.publish(
            Channel::Upstream,
            Message::WwDetected(WakeWordDetected {
                timestamp: 1,
                keyword: "hey robo".into(),
                variant: "default".into(),
                confidence: 0.9,
                source: "oww".into(),
            }),
        );

        let got = rx
            .recv_timeout(std::time::Duration::from_millis(500))
            .expect("expected message to cross the tcp bus");
        assert_eq!(got.topic(), "ww.detected");
    }
}
