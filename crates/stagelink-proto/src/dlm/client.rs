// DLM transactional client
//
// One UDP socket, bound to a fixed local port so the unit's replies come
// back to us. Each outbound command carries a strictly increasing message
// id; a background task matches inbound acknowledgements and data
// responses against the pending table. UDP carries no connection state,
// so "online" is an inferred liveness flag: any acknowledgement or match
// sets it, an exhausted retry budget clears it.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{Mutex, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::dlm::{commands, frame};
use crate::error::Error;

/// Local port the unit sends replies to.
pub const DEFAULT_LISTEN_PORT: u16 = 6004;

/// Default reply window per transmission attempt.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(250);

/// Default retransmissions after the first attempt.
pub const DEFAULT_RETRIES: u32 = 2;

/// One outstanding request awaiting its reply.
///
/// A non-query is completed by its acknowledgement alone; a query's
/// acknowledgement is consumed without completing it, and only the
/// matching data response resolves the sender.
struct Pending {
    tx: oneshot::Sender<Option<String>>,
    is_query: bool,
}

type PendingMap = Arc<Mutex<HashMap<u32, Pending>>>;

pub struct DlmClient {
    socket: Arc<UdpSocket>,
    target: std::sync::Mutex<SocketAddr>,
    next_msg_id: AtomicU32,
    pending: PendingMap,
    online: Arc<watch::Sender<bool>>,
    cancel: CancellationToken,
}

impl DlmClient {
    /// Bind the local reply socket and start the receive task.
    ///
    /// Pass `listen_port` 0 to let the OS pick (tests); production uses
    /// [`DEFAULT_LISTEN_PORT`] because units reply to a fixed port.
    pub async fn bind(listen_port: u16, target: SocketAddr) -> Result<Self, Error> {
        let socket = Arc::new(UdpSocket::bind((Ipv4Addr::UNSPECIFIED, listen_port)).await?);
        debug!(local = %socket.local_addr()?, %target, "dlm client bound");

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (online_tx, _online_rx) = watch::channel(false);
        let online = Arc::new(online_tx);
        let cancel = CancellationToken::new();

        tokio::spawn(recv_task(
            Arc::clone(&socket),
            Arc::clone(&pending),
            Arc::clone(&online),
            cancel.clone(),
        ));

        Ok(Self {
            socket,
            target: std::sync::Mutex::new(target),
            next_msg_id: AtomicU32::new(1),
            pending,
            online,
            cancel,
        })
    }

    /// Point subsequent sends at a new unit.
    ///
    /// In-flight requests are not cancelled; they keep racing against the
    /// previous target's replies until they time out. Known limitation.
    pub fn set_target(&self, target: SocketAddr) {
        if let Ok(mut guard) = self.target.lock() {
            *guard = target;
        }
    }

    /// Current liveness flag.
    pub fn is_online(&self) -> bool {
        *self.online.borrow()
    }

    /// Observe liveness transitions.
    pub fn online_watch(&self) -> watch::Receiver<bool> {
        self.online.subscribe()
    }

    /// Local address of the reply socket (useful in tests).
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.socket.local_addr()?)
    }

    /// Send a command and await its reply.
    ///
    /// Resolves with the data payload for queries, `None` for commands
    /// satisfied by a plain acknowledgement. On timeout the identical
    /// frame (same message id) is retransmitted up to `retries` times;
    /// each retry resets only the reply window. Exhausting the budget
    /// returns [`Error::Timeout`] and marks the client offline.
    pub async fn send(
        &self,
        command: &str,
        retries: u32,
        timeout: Duration,
    ) -> Result<Option<String>, Error> {
        let msg_id = self.next_msg_id.fetch_add(1, Ordering::Relaxed);
        let datagram = frame::encode_command(command, msg_id);

        let (tx, mut rx) = oneshot::channel();
        self.pending.lock().await.insert(
            msg_id,
            Pending {
                tx,
                is_query: commands::is_query(command),
            },
        );

        // Attempt loop: Sent -> Retrying(n) -> Completed | TimedOut.
        let attempts = retries + 1;
        for attempt in 1..=attempts {
            let target = self.current_target();
            if let Err(e) = self.socket.send_to(&datagram, target).await {
                warn!(error = %e, msg_id, command, "udp send failed");
            }

            match tokio::time::timeout(timeout, &mut rx).await {
                Ok(Ok(payload)) => return Ok(payload),
                // Sender dropped: the client is shutting down.
                Ok(Err(_)) => break,
                Err(_) if attempt < attempts => {
                    debug!(msg_id, command, attempt, "no reply, retransmitting");
                }
                Err(_) => {}
            }
        }

        self.pending.lock().await.remove(&msg_id);
        set_online(&self.online, false);
        Err(Error::Timeout { attempts })
    }

    /// Send with the default retry and timeout budget.
    pub async fn send_default(&self, command: &str) -> Result<Option<String>, Error> {
        self.send(command, DEFAULT_RETRIES, DEFAULT_TIMEOUT).await
    }

    /// Stop the receive task. Pending requests fail on their next timeout.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn current_target(&self) -> SocketAddr {
        self.target
            .lock()
            .map(|guard| *guard)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }
}

impl Drop for DlmClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn set_online(online: &watch::Sender<bool>, value: bool) {
    online.send_if_modified(|current| {
        if *current == value {
            false
        } else {
            *current = value;
            true
        }
    });
}

async fn recv_task(
    socket: Arc<UdpSocket>,
    pending: PendingMap,
    online: Arc<watch::Sender<bool>>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; 2048];
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            recv = socket.recv_from(&mut buf) => {
                match recv {
                    Ok((len, _peer)) => handle_frame(&buf[..len], &pending, &online).await,
                    Err(e) => {
                        warn!(error = %e, "udp recv failed");
                        set_online(&online, false);
                    }
                }
            }
        }
    }
    // Fail everything still outstanding so callers stop waiting.
    pending.lock().await.clear();
}

/// Classify one inbound datagram.
///
/// The protocol has no frame discriminator, so both decoders run against
/// every datagram. Frames that decode as neither are dropped silently:
/// requesters only ever observe a timeout.
async fn handle_frame(datagram: &[u8], pending: &PendingMap, online: &Arc<watch::Sender<bool>>) {
    if let Some(ack) = frame::decode_ack(datagram) {
        // Any acknowledgement proves the unit is alive, solicited or not.
        set_online(online, true);

        let mut map = pending.lock().await;
        let completes = map.get(&ack.msg_id).is_some_and(|entry| !entry.is_query);
        if completes {
            if let Some(entry) = map.remove(&ack.msg_id) {
                let _ = entry.tx.send(None);
            }
        }
        // A query's ack is consumed here; its data response completes it.
        return;
    }

    if let Some(resp) = frame::decode_response(datagram) {
        let mut map = pending.lock().await;
        if let Some(entry) = map.remove(&resp.msg_id) {
            set_online(online, true);
            let _ = entry.tx.send(Some(resp.payload));
        } else {
            debug!(msg_id = resp.msg_id, "unsolicited response ignored");
        }
    }
}
