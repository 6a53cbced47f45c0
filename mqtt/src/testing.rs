//! In-process MQTT 3.1.1 broker for tests.
//!
//! [`FakeBroker`] speaks just enough of the protocol to drive a [`Conn`]:
//! it answers CONNECT and PINGREQ, acknowledges SUBSCRIBE with scripted
//! return codes, records client PUBLISHes and pushes PUBLISHes to every
//! connected client on demand. Packets are framed with rumqttc's own codec.
//!
//! Available in this crate's tests and, for other crates, behind the
//! `test-util` feature.
//!
//! [`Conn`]: crate::Conn

use crate::router::Message;
use crate::types::QoS;
use bytes::BytesMut;
use parking_lot::Mutex;
use rumqttc::mqttbytes;
use rumqttc::mqttbytes::v4::{
    ConnAck, ConnectReturnCode, Packet, PubAck, Publish, SubAck, SubscribeReasonCode,
};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

const MAX_PACKET_SIZE: usize = 1024 * 1024;

#[derive(Default)]
struct State {
    connects: AtomicUsize,
    next_pkid: AtomicU16,
    suback_codes: Mutex<VecDeque<SubscribeReasonCode>>,
    subscriptions: Mutex<Vec<(String, QoS)>>,
    received: Mutex<Vec<Message>>,
    clients: Mutex<Vec<mpsc::UnboundedSender<Packet>>>,
}

impl State {
    /// Reply to an incoming packet, and whether the session ends.
    fn reply(&self, packet: Packet) -> (Option<Packet>, bool) {
        match packet {
            Packet::Connect(_) => {
                self.connects.fetch_add(1, Ordering::SeqCst);
                (
                    Some(Packet::ConnAck(ConnAck::new(ConnectReturnCode::Success, false))),
                    false,
                )
            }
            Packet::Subscribe(subscribe) => {
                let mut codes = Vec::with_capacity(subscribe.filters.len());
                for filter in &subscribe.filters {
                    let requested = QoS::from(filter.qos);
                    self.subscriptions
                        .lock()
                        .push((filter.path.clone(), requested));
                    let code = self
                        .suback_codes
                        .lock()
                        .pop_front()
                        .unwrap_or(SubscribeReasonCode::Success(filter.qos));
                    codes.push(code);
                }
                (Some(Packet::SubAck(SubAck::new(subscribe.pkid, codes))), false)
            }
            Packet::Publish(publish) => {
                let ack = (publish.qos != mqttbytes::QoS::AtMostOnce)
                    .then(|| Packet::PubAck(PubAck::new(publish.pkid)));
                self.received.lock().push(Message {
                    topic: publish.topic,
                    payload: publish.payload,
                    qos: publish.qos.into(),
                    retain: publish.retain,
                    packet_id: (publish.pkid != 0).then_some(publish.pkid),
                });
                (ack, false)
            }
            Packet::PingReq => (Some(Packet::PingResp), false),
            Packet::Disconnect => (None, true),
            other => {
                debug!("fake broker ignoring {:?}", other);
                (None, false)
            }
        }
    }
}

/// A scripted MQTT broker listening on a loopback port.
pub struct FakeBroker {
    addr: SocketAddr,
    state: Arc<State>,
    task: JoinHandle<()>,
}

impl FakeBroker {
    /// Listen on an ephemeral loopback port.
    pub async fn start() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(State::default());

        let task = tokio::spawn({
            let state = state.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(serve(stream, state.clone()));
                }
            }
        });

        Ok(Self { addr, state, task })
    }

    /// Listening address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Listening port.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Answer the next SUBSCRIBE by granting `qos`.
    pub fn grant(&self, qos: QoS) {
        self.state
            .suback_codes
            .lock()
            .push_back(SubscribeReasonCode::Success(qos.into()));
    }

    /// Answer the next SUBSCRIBE with the failure return code (0x80).
    pub fn reject_next(&self) {
        self.state
            .suback_codes
            .lock()
            .push_back(SubscribeReasonCode::Failure);
    }

    /// Number of CONNECT packets received.
    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Filters and requested QoS of every SUBSCRIBE, in arrival order.
    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.state.subscriptions.lock().clone()
    }

    /// Messages published by clients.
    pub fn received(&self) -> Vec<Message> {
        self.state.received.lock().clone()
    }

    /// Send a PUBLISH to every connected client.
    pub fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>, qos: QoS) {
        let mut publish = Publish::new(topic, qos.into(), payload);
        if qos != QoS::AtMostOnce {
            publish.pkid = self.state.next_pkid.fetch_add(1, Ordering::SeqCst) + 1;
        }

        self.state
            .clients
            .lock()
            .retain(|tx| tx.send(Packet::Publish(publish.clone())).is_ok());
    }
}

impl Drop for FakeBroker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(stream: TcpStream, state: Arc<State>) {
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    state.clients.lock().push(tx.clone());

    let mut buf = BytesMut::with_capacity(4096);
    loop {
        loop {
            match Packet::read(&mut buf, MAX_PACKET_SIZE) {
                Ok(packet) => {
                    let (reply, close) = state.reply(packet);
                    if close {
                        return;
                    }
                    if let Some(reply) = reply {
                        let _ = tx.send(reply);
                    }
                }
                Err(mqttbytes::Error::InsufficientBytes(_)) => break,
                Err(e) => {
                    debug!("fake broker dropping client: {:?}", e);
                    return;
                }
            }
        }

        tokio::select! {
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            },
            Some(packet) = rx.recv() => {
                let mut out = BytesMut::new();
                if packet.write(&mut out, MAX_PACKET_SIZE).is_err()
                    || writer.write_all(&out).await.is_err()
                {
                    return;
                }
            }
        }
    }
}

/// Poll `condition` every 10 ms until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
