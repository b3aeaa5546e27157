use crate::dispatch::{self, DaemonCore};
use argus_core::focus::{DaemonConfig, FocusPlan};
use argus_core::protocol::{encode_frame, FrameDecoder, IncomingMessage, OutgoingMessage};
use std::{
    collections::HashMap,
    io,
    path::PathBuf,
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
#[cfg(unix)]
use std::{fs, os::unix::fs::PermissionsExt};
#[cfg(unix)]
use tokio::net::{unix::OwnedWriteHalf, UnixListener, UnixStream};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    sync::{mpsc, watch, Mutex, Notify, RwLock},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

/// Consecutive broadcasts a receiver may leave unread before it is dropped.
pub const MAX_LAG_STRIKES: u32 = 3;
const READ_CHUNK_BYTES: usize = 8 * 1024;

#[derive(Clone, Debug)]
pub struct HubConfig {
    pub socket_path: PathBuf,
    pub write_timeout: Duration,
    pub queue_capacity: usize,
    pub max_frame_bytes: usize,
    pub daemon: DaemonConfig,
}

#[cfg(not(unix))]
pub async fn run(_config: HubConfig, mut shutdown: watch::Receiver<bool>) -> io::Result<()> {
    let _ = shutdown.changed().await;
    Ok(())
}

#[cfg(unix)]
pub async fn run(config: HubConfig, mut shutdown: watch::Receiver<bool>) -> io::Result<()> {
    if let Some(parent) = config.socket_path.parent() {
        fs::create_dir_all(parent)?;
        let _ = fs::set_permissions(parent, fs::Permissions::from_mode(0o700));
    }

    if config.socket_path.exists() {
        let _ = fs::remove_file(&config.socket_path);
    }

    let listener = UnixListener::bind(&config.socket_path)?;
    let _ = fs::set_permissions(&config.socket_path, fs::Permissions::from_mode(0o600));

    let hub = Arc::new(ArgusHub::new(config.clone()));

    info!(
        event = "argus_hub_start",
        socket = %config.socket_path.display(),
        queue_capacity = config.queue_capacity,
        auto_focus = config.daemon.auto_focus_enabled,
        focus_delay_ms = config.daemon.focus_delay_ms
    );

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accept = listener.accept() => {
                match accept {
                    Ok((stream, _addr)) => {
                        let hub = hub.clone();
                        tokio::spawn(async move {
                            hub.handle_connection(stream).await;
                        });
                    }
                    Err(err) => {
                        warn!(event = "argus_accept_error", error = %err);
                    }
                }
            }
        }
    }

    hub.cancel_pending_focus().await;
    let _ = fs::remove_file(&config.socket_path);
    info!(event = "argus_hub_stop", socket = %config.socket_path.display());
    Ok(())
}

#[derive(Clone)]
struct ClientEntry {
    conn_id: String,
    sender: mpsc::Sender<OutgoingMessage>,
    lag_strikes: Arc<AtomicU32>,
    evicted: Arc<Notify>,
}

struct ArgusHub {
    config: HubConfig,
    conn_counter: AtomicU64,
    core: Mutex<DaemonCore>,
    clients: RwLock<HashMap<String, ClientEntry>>,
    receivers: RwLock<HashMap<String, ClientEntry>>,
    pending_focus: Mutex<Option<JoinHandle<()>>>,
}

impl ArgusHub {
    fn new(config: HubConfig) -> Self {
        let core = DaemonCore::new(config.daemon);
        Self {
            config,
            conn_counter: AtomicU64::new(0),
            core: Mutex::new(core),
            clients: RwLock::new(HashMap::new()),
            receivers: RwLock::new(HashMap::new()),
            pending_focus: Mutex::new(None),
        }
    }

    fn next_conn_id(&self) -> String {
        let id = self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("argus-conn-{id}")
    }

    async fn register_client(&self, client: ClientEntry) {
        let conn_id = client.conn_id.clone();
        self.clients.write().await.insert(conn_id.clone(), client);
        info!(event = "argus_client_connected", conn_id = %conn_id);
    }

    /// Adds the connection to the broadcast set and queues it a render of
    /// the current registry. Runs under the core lock so the snapshot is
    /// ordered with every later broadcast.
    async fn promote_receiver(&self, conn_id: &str) {
        let client = self.clients.read().await.get(conn_id).cloned();
        let Some(client) = client else {
            return;
        };
        let core = self.core.lock().await;
        let render = OutgoingMessage::Render {
            agents: core.registry.snapshot(),
        };
        if let Err(err) = client.sender.try_send(render) {
            warn!(event = "argus_initial_render_dropped", conn_id = %conn_id, error = %err);
        }
        self.receivers
            .write()
            .await
            .insert(conn_id.to_string(), client);
        drop(core);
        info!(event = "argus_receiver_registered", conn_id = %conn_id);
    }

    async fn unregister_client(&self, conn_id: &str) {
        let client = self.clients.write().await.remove(conn_id);
        if let Some(client) = client {
            self.receivers.write().await.remove(conn_id);
            client.evicted.notify_one();
            info!(event = "argus_client_disconnected", conn_id = conn_id);
        }
    }

    async fn broadcast(&self, messages: Vec<OutgoingMessage>) {
        if messages.is_empty() {
            return;
        }
        let receivers = self.receivers.read().await.clone();
        let mut evict = Vec::new();

        for (conn_id, client) in receivers {
            let mut lagging = false;
            for message in &messages {
                match client.sender.try_send(message.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        evict.push(conn_id.clone());
                        break;
                    }
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        lagging = true;
                        break;
                    }
                }
            }

            if !lagging {
                client.lag_strikes.store(0, Ordering::SeqCst);
                continue;
            }
            let strikes = client.lag_strikes.fetch_add(1, Ordering::SeqCst) + 1;
            if strikes >= MAX_LAG_STRIKES {
                warn!(event = "argus_client_evicted", conn_id = %conn_id, strikes);
                evict.push(conn_id);
            } else {
                warn!(event = "argus_slow_consumer", conn_id = %conn_id, strikes);
            }
        }

        for conn_id in evict {
            self.unregister_client(&conn_id).await;
        }
    }

    async fn send_to_conn(&self, conn_id: &str, message: OutgoingMessage) -> bool {
        let sender = {
            let clients = self.clients.read().await;
            clients.get(conn_id).map(|client| client.sender.clone())
        };
        let Some(sender) = sender else {
            return false;
        };

        match sender.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.unregister_client(conn_id).await;
                false
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(event = "argus_send_backpressure", conn_id = %conn_id);
                self.unregister_client(conn_id).await;
                false
            }
        }
    }

    async fn cancel_pending_focus(&self) {
        if let Some(task) = self.pending_focus.lock().await.take() {
            task.abort();
        }
    }

    async fn schedule_focus(self: &Arc<Self>, plan: FocusPlan) {
        debug!(
            event = "argus_focus_scheduled",
            session = %plan.session,
            ticket = plan.ticket,
            delay_ms = plan.delay.as_millis() as u64
        );
        let hub = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(plan.delay).await;
            hub.fire_focus(plan.ticket).await;
        });
        if let Some(previous) = self.pending_focus.lock().await.replace(task) {
            previous.abort();
        }
    }

    async fn fire_focus(&self, ticket: u64) {
        let mut core = self.core.lock().await;
        let messages = dispatch::fire_focus(&mut core, ticket);
        if messages.is_empty() {
            debug!(event = "argus_focus_stale", ticket);
            return;
        }
        info!(event = "argus_focus_fired", ticket);
        self.broadcast(messages).await;
    }

    async fn handle_message(
        self: &Arc<Self>,
        conn_id: &str,
        is_receiver: &mut bool,
        message: IncomingMessage,
    ) {
        let kind = message.kind();
        if message.is_ui_command() && !*is_receiver {
            self.promote_receiver(conn_id).await;
            *is_receiver = true;
        }

        // effects are applied under the core lock so broadcasts keep registry order
        let mut core = self.core.lock().await;
        let effects = dispatch::process(&mut core, message);
        if effects.cancel_pending {
            self.cancel_pending_focus().await;
        }
        if let Some(plan) = effects.schedule {
            self.schedule_focus(plan).await;
        }
        self.broadcast(effects.broadcasts).await;
        drop(core);

        for reply in effects.replies {
            self.send_to_conn(conn_id, reply).await;
        }
        debug!(event = "argus_message", conn_id = %conn_id, kind);
    }

    #[cfg(unix)]
    async fn handle_connection(self: Arc<Self>, stream: UnixStream) {
        let conn_id = self.next_conn_id();
        let (mut reader, writer_half) = stream.into_split();

        let (tx, rx) = mpsc::channel::<OutgoingMessage>(self.config.queue_capacity);
        let write_timeout = self.config.write_timeout;
        let max_frame_bytes = self.config.max_frame_bytes;
        let conn_for_writer = conn_id.clone();
        let writer_task = tokio::spawn(async move {
            writer_loop(conn_for_writer, writer_half, rx, write_timeout, max_frame_bytes).await;
        });

        let evicted = Arc::new(Notify::new());
        let client = ClientEntry {
            conn_id: conn_id.clone(),
            sender: tx.clone(),
            lag_strikes: Arc::new(AtomicU32::new(0)),
            evicted: evicted.clone(),
        };
        self.register_client(client).await;

        let config = self.core.lock().await.focus.config();
        let _ = tx.send(dispatch::config_message(config)).await;

        let mut decoder = FrameDecoder::new(self.config.max_frame_bytes);
        let mut chunk = vec![0u8; READ_CHUNK_BYTES];
        let mut is_receiver = false;
        let mut closed_by_peer = false;

        loop {
            let read = tokio::select! {
                _ = evicted.notified() => break,
                read = reader.read(&mut chunk) => read,
            };
            let n = match read {
                Ok(0) => {
                    closed_by_peer = true;
                    break;
                }
                Ok(n) => n,
                Err(err) => {
                    debug!(event = "argus_read_error", conn_id = %conn_id, error = %err);
                    break;
                }
            };

            let report = decoder.push_chunk(&chunk[..n]);
            for err in report.errors {
                warn!(event = "argus_decode_error", conn_id = %conn_id, error = %err);
            }
            for message in report.frames {
                self.handle_message(&conn_id, &mut is_receiver, message).await;
            }
        }

        if closed_by_peer {
            let report = decoder.finish();
            for err in report.errors {
                warn!(event = "argus_decode_error", conn_id = %conn_id, error = %err);
            }
            for message in report.frames {
                self.handle_message(&conn_id, &mut is_receiver, message).await;
            }
        }

        self.unregister_client(&conn_id).await;
        drop(tx);
        let _ = writer_task.await;
    }
}

#[cfg(unix)]
async fn writer_loop(
    conn_id: String,
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<OutgoingMessage>,
    write_timeout: Duration,
    max_frame_bytes: usize,
) {
    while let Some(message) = rx.recv().await {
        let frame = match encode_frame(&message, max_frame_bytes) {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    event = "argus_encode_error",
                    conn_id = %conn_id,
                    kind = message.kind(),
                    error = %err
                );
                continue;
            }
        };
        let send = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        };
        match tokio::time::timeout(write_timeout, send).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                debug!(event = "argus_write_error", conn_id = %conn_id, error = %err);
                break;
            }
            Err(_) => {
                warn!(event = "argus_write_timeout", conn_id = %conn_id);
                break;
            }
        }
    }
}
