//! The polling/command engine and the single actor that owns it (spec
//! §4.G, §5, and the "Service wiring" component the expanded spec adds).
//!
//! Grounded on `housetuya_device_periodic`/`_preamble`/`_send`/`_receive`/
//! `_control` for the sweep and command-send logic, and on the teacher's
//! `device.rs` actor idiom (`DeviceCommand` driven over `mpsc`, replies
//! via `oneshot`) for the task shape — collapsed here to one actor owning
//! the whole device table directly instead of one background task per
//! device (spec §9's redesign note).
//!
//! Per-device TCP work (connect, write the frame, read the reply) runs in
//! its own short-lived `tokio::spawn`ed task that reports back over a
//! channel; only the engine task ever touches `DeviceTable`/
//! `ModelRegistry`, so no lock is needed to satisfy spec §5's "no locks
//! are required" invariant — ownership, not mutual exclusion, is what
//! keeps it single-homed.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use log::{info, trace, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use crate::config::{self, ConfigDocument, ConfigStore};
use crate::control::{self, StatusDocument};
use crate::device::DeviceTable;
use crate::discovery::Beacon;
use crate::error::Result;
use crate::model::ModelRegistry;
use crate::protocol;

const TUYA_PORT: u16 = 6668;
const SENSE_INTERVAL: u64 = 35;
const SWEEP_GATE: u64 = 5;
const SILENCE_THRESHOLD: u64 = 100;
/// The effective deadline for an in-flight command (spec §5).
pub(crate) const COMMAND_DEADLINE: u64 = 10;
const PULSE_RESEND_GRACE: u64 = 5;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const IO_TIMEOUT: Duration = Duration::from_secs(3);
const MAX_REPLY: usize = 1600;

/// Messages the engine actor accepts; the HTTP layer (not implemented
/// here, spec §1) is the intended caller via [`EngineHandle`].
pub enum EngineCommand {
    Status {
        host: String,
        proxy: Option<String>,
        reply: oneshot::Sender<StatusDocument>,
    },
    Set {
        point: String,
        state: bool,
        pulse: Option<u64>,
        reply: oneshot::Sender<Result<StatusDocument>>,
    },
    GetConfig {
        reply: oneshot::Sender<ConfigDocument>,
    },
    SetConfig {
        doc: ConfigDocument,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// A cheaply cloneable handle callers use to talk to a running engine
/// (spec §4.H's transport-agnostic seam).
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
}

impl EngineHandle {
    pub async fn status(&self, host: impl Into<String>, proxy: Option<String>) -> StatusDocument {
        let (tx, rx) = oneshot::channel();
        let _ = self
            .commands
            .send(EngineCommand::Status {
                host: host.into(),
                proxy,
                reply: tx,
            })
            .await;
        rx.await.expect("engine task dropped")
    }

    pub async fn set(
        &self,
        point: impl Into<String>,
        state: bool,
        pulse: Option<u64>,
    ) -> Result<StatusDocument> {
        let (tx, rx) = oneshot::channel();
        let _ = self
            .commands
            .send(EngineCommand::Set {
                point: point.into(),
                state,
                pulse,
                reply: tx,
            })
            .await;
        rx.await.expect("engine task dropped")
    }

    pub async fn get_config(&self) -> ConfigDocument {
        let (tx, rx) = oneshot::channel();
        let _ = self.commands.send(EngineCommand::GetConfig { reply: tx }).await;
        rx.await.expect("engine task dropped")
    }

    pub async fn set_config(&self, doc: ConfigDocument) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let _ = self
            .commands
            .send(EngineCommand::SetConfig { doc, reply: tx })
            .await;
        rx.await.expect("engine task dropped")
    }
}

struct IoEvent {
    device_id: String,
    /// The device's `io_epoch` at send time. A reply whose epoch no longer
    /// matches the device's current epoch belongs to a superseded session
    /// (spec §3 invariant 5: at most one open socket per device) and is
    /// dropped rather than processed.
    epoch: u64,
    /// `None` covers every transient I/O failure (spec §7): connect
    /// refused, write/read error, short read. The sweep's own 10-second
    /// `pending` deadline is what eventually reports this as a timeout.
    reply: Option<Vec<u8>>,
}

async fn run_command(address: Ipv4Addr, frame: Vec<u8>) -> Option<Vec<u8>> {
    let addr = SocketAddr::from((address, TUYA_PORT));
    let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .ok()?
        .ok()?;
    tokio::time::timeout(IO_TIMEOUT, stream.write_all(&frame))
        .await
        .ok()?
        .ok()?;
    let mut buf = vec![0u8; MAX_REPLY];
    let n = tokio::time::timeout(IO_TIMEOUT, stream.read(&mut buf))
        .await
        .ok()?
        .ok()?;
    if n == 0 {
        return None;
    }
    buf.truncate(n);
    Some(buf)
}

fn spawn_command(io_tx: mpsc::Sender<IoEvent>, device_id: String, address: Ipv4Addr, frame: Vec<u8>, epoch: u64) {
    tokio::spawn(async move {
        let reply = run_command(address, frame).await;
        let _ = io_tx.send(IoEvent { device_id, epoch, reply }).await;
    });
}

/// The actor itself: owns the device table, the model registry, and the
/// depot persistence seam. Constructed once and driven by [`Engine::run`].
pub struct Engine {
    devices: DeviceTable,
    models: ModelRegistry,
    store: Option<Box<dyn ConfigStore>>,
    loaded_from_depot: bool,
    last_retry: u64,
    change_token: u64,
}

impl Engine {
    pub fn new(store: Option<Box<dyn ConfigStore>>) -> Self {
        let mut devices = DeviceTable::new();
        let mut models = ModelRegistry::new();
        let mut loaded_from_depot = false;
        if let Some(store) = &store
            && let Ok(Some(doc)) = store.load()
        {
            config::apply(&mut devices, &mut models, doc);
            loaded_from_depot = true;
        }
        Engine {
            devices,
            models,
            store,
            loaded_from_depot,
            last_retry: 0,
            change_token: 0,
        }
    }

    /// Resolve a device's dps, caching the lookup (spec §4.D/§4.G "lazy
    /// lookup into model registry, cached back into the device").
    fn resolve_control_dps(&mut self, device_id: &str) -> Option<u32> {
        let model = self.devices.find_by_id(device_id)?.model.clone();
        let device = self.devices.find_by_id_mut(device_id)?;
        if device.control_dps != 0 {
            return Some(device.control_dps);
        }
        let dps = self.models.lookup_control(&model);
        if dps != 0 {
            device.control_dps = dps;
            Some(dps)
        } else {
            None
        }
    }

    /// Command-send path (spec §4.G "Command-send path",
    /// `housetuya_device_control`). Rejects silently (logs and returns)
    /// when a precondition isn't met — the caller's `pending` deadline is
    /// what eventually surfaces the failure as a timeout.
    fn send_control(&mut self, io_tx: &mpsc::Sender<IoEvent>, device_id: &str) {
        let Some(dps) = self.resolve_control_dps(device_id) else {
            trace!("{device_id}: control dps unresolved, skipping send");
            return;
        };
        let Some(device) = self.devices.find_by_id_mut(device_id) else {
            return;
        };
        let Some(address) = device.address else {
            trace!("{device_id}: no known address, skipping send");
            return;
        };
        if device.encrypted && device.secret.key.is_none() {
            trace!("{device_id}: encrypted device has no key, skipping send");
            return;
        }
        let Some(key) = device.secret.key else {
            trace!("{device_id}: no key, skipping send");
            return;
        };
        let seq = device.next_sequence();
        let frame = protocol::encode_control(
            &key,
            &device.secret.version,
            &device.secret.id,
            seq,
            dps,
            device.commanded,
        );
        let epoch = device.start_io_session();
        spawn_command(io_tx.clone(), device_id.to_string(), address, frame, epoch);
    }

    fn send_query(&mut self, io_tx: &mpsc::Sender<IoEvent>, device_id: &str) {
        let Some(device) = self.devices.find_by_id_mut(device_id) else {
            return;
        };
        let Some(address) = device.address else {
            return;
        };
        let Some(key) = device.secret.key else {
            trace!("{device_id}: no key, skipping sense");
            return;
        };
        let seq = device.next_sequence();
        let frame = protocol::encode_query(&key, &device.secret.id, seq);
        let epoch = device.start_io_session();
        spawn_command(io_tx.clone(), device_id.to_string(), address, frame, epoch);
    }

    /// One tick of the background sweep (spec §4.G). Runs at most once
    /// every [`SWEEP_GATE`] seconds.
    fn sweep(&mut self, io_tx: &mpsc::Sender<IoEvent>, now: u64) {
        if now < self.last_retry + SWEEP_GATE {
            return;
        }
        self.last_retry = now;

        let ids: Vec<String> = self.devices.iter().map(|d| d.secret.id.clone()).collect();
        for id in ids {
            self.sweep_one(io_tx, &id, now);
        }
    }

    fn sweep_one(&mut self, io_tx: &mpsc::Sender<IoEvent>, id: &str, now: u64) {
        // 1. Sense.
        {
            let device = self.devices.find_by_id(id).unwrap();
            let should_sense =
                now >= device.last_sense + SENSE_INTERVAL && device.pending == 0 && device.address.is_some();
            if should_sense {
                self.devices.find_by_id_mut(id).unwrap().last_sense = now;
                self.send_query(io_tx, id);
            }
        }

        // 2. Silence detection.
        {
            let device = self.devices.find_by_id_mut(id).unwrap();
            if device.detected > 0 && device.detected < now.saturating_sub(SILENCE_THRESHOLD) {
                info!("{id}: SILENT");
                device.start_io_session();
                device.status = false;
                device.commanded = false;
                device.pending = 0;
                device.deadline = 0;
                device.detected = 0;
            }
        }

        // 3. Pulse expiry.
        {
            let device = self.devices.find_by_id_mut(id).unwrap();
            if device.deadline > 0 && now >= device.deadline {
                info!("{id}: RESET END OF PULSE");
                device.commanded = false;
                device.deadline = 0;
                device.pending = now + PULSE_RESEND_GRACE;
            }
        }

        // 4. Reconciliation.
        {
            let device = self.devices.find_by_id(id).unwrap();
            if device.status != device.commanded {
                if device.pending > now && device.detected > 0 {
                    info!("{id}: RETRY");
                    self.send_control(io_tx, id);
                } else if device.pending > 0 && device.pending <= now {
                    info!("{id}: TIMEOUT");
                    let device = self.devices.find_by_id_mut(id).unwrap();
                    device.start_io_session();
                    device.commanded = device.status;
                    device.pending = 0;
                }
            }
        }
    }

    /// Readable-callback logic (spec §4.G). `raw` is the bytes read off
    /// the device's TCP socket for one request/response session.
    fn handle_io_event(&mut self, event: IoEvent, now: u64) {
        let IoEvent { device_id, epoch, reply } = event;
        let Some(raw) = reply else {
            return; // transient failure; the sweep's pending deadline covers it
        };
        let Some(device) = self.devices.find_by_id_mut(&device_id) else {
            return;
        };
        if device.io_epoch != epoch {
            trace!("{device_id}: dropping reply from a superseded session");
            return;
        }
        let key = device.secret.key;
        let version = device.secret.version.clone();
        let dps = device.control_dps;

        let Some(frame) = protocol::decode(&raw, key.as_ref(), &version) else {
            warn!("{device_id}: malformed reply, dropping");
            return;
        };
        if frame.code == protocol::CommandType::Control as u32 {
            return; // echo of our own command, ignored (spec §4.G)
        }

        let observed: Option<bool> = serde_json::from_slice::<serde_json::Value>(&frame.payload)
            .ok()
            .and_then(|v| v.get("dps")?.get(dps.to_string())?.as_bool());

        let Some(observed) = observed else {
            warn!("{device_id}: no usable boolean at dps {dps}");
            return;
        };

        self.update_status(&device_id, observed, now);
    }

    fn update_status(&mut self, device_id: &str, observed: bool, now: u64) {
        let Some(device) = self.devices.find_by_id_mut(device_id) else {
            return;
        };
        if device.status == observed {
            device.detected = now;
            return;
        }
        if device.pending != 0 && observed == device.commanded {
            info!("{device_id}: CONFIRMED");
            device.pending = 0;
        } else {
            info!("{device_id}: CHANGED");
            device.commanded = observed;
            device.pending = 0;
        }
        device.status = observed;
        device.detected = now;
    }

    /// Apply a freshly decoded beacon (spec §4.F).
    fn handle_beacon(&mut self, beacon: Beacon, now: u64) {
        let was_known = self.devices.find_by_id(&beacon.gw_id).is_some();
        let device = self.devices.get_or_create_discovered(&beacon.gw_id);

        let mut changed = !was_known;
        if device.model != beacon.product_key {
            device.model = beacon.product_key;
            changed = true;
        }
        if device.secret.version != beacon.version {
            device.secret.version = beacon.version;
            changed = true;
        }
        if device.encrypted != beacon.encrypt {
            device.encrypted = beacon.encrypt;
            changed = true;
        }
        if let Some(ip) = beacon.ip
            && device.address != Some(ip)
        {
            device.address = Some(ip);
            device.host = ip.to_string();
            changed = true;
        }

        let was_silent = device.detected == 0;
        device.detected = now;
        if was_silent {
            info!("{}: DETECTED", device.secret.id);
            device.last_sense = 0; // force an immediate sense next tick
        }

        if changed {
            self.devices.mark_changed();
        }
    }

    async fn persist_if_loaded_from_depot(&mut self) {
        if !self.loaded_from_depot || !self.devices.take_changed() {
            return;
        }
        if let Some(store) = &self.store {
            let doc = config::export(&self.devices, &self.models);
            if let Err(err) = store.save(&doc) {
                warn!("failed to persist configuration: {err}");
            }
        }
    }

    fn handle_command(&mut self, io_tx: &mpsc::Sender<IoEvent>, command: EngineCommand, now: u64) {
        match command {
            EngineCommand::Status { host, proxy, reply } => {
                let doc = control::status(&self.devices, &host, proxy.as_deref(), self.change_token);
                let _ = reply.send(doc);
            }
            EngineCommand::Set {
                point,
                state,
                pulse,
                reply,
            } => {
                let result = control::apply_set(&mut self.devices, &point, state, pulse, now);
                match result {
                    Ok(to_transmit) => {
                        for id in to_transmit {
                            self.send_control(io_tx, &id);
                        }
                        let doc = control::status(&self.devices, "", None, self.change_token);
                        let _ = reply.send(Ok(doc));
                    }
                    Err(err) => {
                        let _ = reply.send(Err(err));
                    }
                }
            }
            EngineCommand::GetConfig { reply } => {
                let doc = config::export(&self.devices, &self.models);
                let _ = reply.send(doc);
            }
            EngineCommand::SetConfig { doc, reply } => {
                config::apply(&mut self.devices, &mut self.models, doc);
                self.change_token += 1;
                self.devices.mark_changed();
                if self.loaded_from_depot
                    && let Some(store) = &self.store
                {
                    let exported = config::export(&self.devices, &self.models);
                    if let Err(err) = store.save(&exported) {
                        let _ = reply.send(Err(err));
                        return;
                    }
                }
                let _ = reply.send(Ok(()));
            }
        }
    }

    /// Drive the actor to completion. Spawns itself and returns a handle;
    /// this is the realization of spec §2's component J and §5's
    /// single-actor concurrency model.
    pub fn spawn(self) -> EngineHandle {
        maximize_fd_limit();

        let (command_tx, command_rx) = mpsc::channel(64);
        let (beacon_tx, beacon_rx) = mpsc::channel(64);

        tokio::spawn(run_discovery(beacon_tx));
        tokio::spawn(self.run(command_rx, beacon_rx));

        EngineHandle { commands: command_tx }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<EngineCommand>, mut beacons: mpsc::Receiver<Beacon>) {
        let (io_tx, mut io_rx) = mpsc::channel::<IoEvent>(256);
        let mut tick = tokio::time::interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                Some(command) = commands.recv() => {
                    let now = crate::now_unix();
                    self.handle_command(&io_tx, command, now);
                }
                Some(beacon) = beacons.recv() => {
                    let now = crate::now_unix();
                    self.handle_beacon(beacon, now);
                }
                Some(event) = io_rx.recv() => {
                    let now = crate::now_unix();
                    self.handle_io_event(event, now);
                }
                _ = tick.tick() => {
                    let now = crate::now_unix();
                    self.sweep(&io_tx, now);
                    self.persist_if_loaded_from_depot().await;
                }
                else => break,
            }
        }
    }
}

async fn run_discovery(tx: mpsc::Sender<Beacon>) {
    if let Err(err) = crate::discovery::run(tx).await {
        warn!("discovery listener stopped: {err}");
    }
}

/// Raise the process's open-file-descriptor limit to its hard maximum so
/// short-lived per-device TCP sessions (§4.G: one socket per command or
/// sense) never starve the two long-lived discovery sockets. Best-effort;
/// a failure here is logged, not fatal (spec §6: "log only").
#[cfg(unix)]
fn maximize_fd_limit() {
    match rlimit::getrlimit(rlimit::Resource::NOFILE) {
        Ok((soft, hard)) if soft < hard => match rlimit::setrlimit(rlimit::Resource::NOFILE, hard, hard) {
            Ok(()) => info!("file descriptor limit increased from {soft} to {hard}"),
            Err(err) => warn!("could not raise file descriptor limit: {err}"),
        },
        Ok(_) => {}
        Err(err) => warn!("could not read file descriptor limit: {err}"),
    }
}

#[cfg(not(unix))]
fn maximize_fd_limit() {}
