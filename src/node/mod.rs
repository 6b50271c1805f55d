//! Nodes: one UDP destination speaking one wire protocol, owning a set of
//! universes and driving the process and refresh tasks that tick fades and
//! transmit frames.
//!
//! Single-threaded cooperative model, deliberately: every handle here is
//! `Rc`-based, not `Arc`, and the background tasks are spawned with
//! [`tokio::task::spawn_local`] onto the caller's [`tokio::task::LocalSet`]
//! rather than across a multi-threaded runtime. There is no internal
//! locking to get wrong.

mod artnet;
mod background;
mod kinet;
mod sacn;

pub use artnet::ArtNetNode;
pub use kinet::KiNetNode;
pub use sacn::SacnNode;

use std::cell::RefCell;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::channel_fade::ChannelBoundFade;
use crate::error::Result;
use crate::output_correction::CorrectionFn;
use crate::sequence::SequenceCounter;
use crate::universe::{Universe, UniverseData};

/// Default frame rate for the process task, matching upstream's
/// `max_fps = 25` default (`base_node.py`: `self._process_every =
/// 1 / max(1, max_fps)`, i.e. 40ms at the default 25fps).
pub const DEFAULT_MAX_FPS: u32 = 25;
/// Default keepalive interval for the refresh task, matching upstream's
/// `refresh_every = 2` (seconds) default.
pub const DEFAULT_REFRESH_EVERY: Duration = Duration::from_secs(2);
/// Floor applied to an explicit `refresh_every`, matching upstream's
/// `max(0.1, refresh_every)`.
const MIN_REFRESH_EVERY: Duration = Duration::from_millis(100);

/// `1 / max(1, max_fps)`, the process task's tick interval.
pub(crate) fn process_every_for_fps(max_fps: u32) -> Duration {
    Duration::from_secs_f64(1.0 / max_fps.max(1) as f64)
}

/// `max(0.1s, refresh_every)`.
pub(crate) fn clamp_refresh_every(refresh_every: Duration) -> Duration {
    refresh_every.max(MIN_REFRESH_EVERY)
}

/// Settling delay before the process task's first tick, so fades scheduled
/// back-to-back (e.g. setting up a cue) start ticking together.
const PROCESS_TASK_STARTUP_DELAY: Duration = Duration::from_millis(10);
/// Consecutive idle ticks (no fade stepped, no universe flushed) before the
/// process task lets itself stop; restarted on the next value/fade change.
const IDLE_TICK_LIMIT: u32 = 10;

pub(crate) enum Protocol {
    ArtNet { sequence: SequenceCounter },
    Sacn { cid: [u8; 16], source_name: String, priority: u8 },
    Kinet,
}

struct NodeInner {
    process_every: Duration,
    refresh_every: Duration,
    protocol: Protocol,
    correction: Option<CorrectionFn>,
    universes: Vec<Rc<RefCell<UniverseData>>>,
    process_jobs: Vec<ChannelBoundFade>,
    process_task: Option<JoinHandle<()>>,
    refresh_task: Option<JoinHandle<()>>,
    node_awaiters: Rc<Notify>,
}

pub(crate) struct NodeShared {
    std_socket: RefCell<Option<std::net::UdpSocket>>,
    tokio_socket: RefCell<Option<Rc<tokio::net::UdpSocket>>>,
    dst: SocketAddr,
    inner: RefCell<NodeInner>,
}

impl NodeShared {
    /// Lazily converts the bound std socket into a runtime-registered tokio
    /// socket. Must run inside a tokio reactor context — true of every
    /// caller (the process/refresh tasks spawned by this module).
    fn socket(&self) -> Result<Rc<tokio::net::UdpSocket>> {
        if let Some(s) = self.tokio_socket.borrow().as_ref() {
            return Ok(Rc::clone(s));
        }
        let std_socket = self
            .std_socket
            .borrow_mut()
            .take()
            .expect("node socket already converted and then lost");
        let tokio_socket = Rc::new(tokio::net::UdpSocket::from_std(std_socket)?);
        *self.tokio_socket.borrow_mut() = Some(Rc::clone(&tokio_socket));
        Ok(tokio_socket)
    }
}

/// A node: one destination address, one wire protocol, any number of
/// universes. Construct through [`ArtNetNode::new`], [`SacnNode::new`], or
/// [`KiNetNode::new`].
///
/// Cheap to clone: an `Rc`-backed handle. The node's background tasks each
/// hold their own clone, so a node with an active fade or a running refresh
/// task stays alive even if the caller drops every handle of their own.
#[derive(Clone)]
pub struct Node(Rc<NodeShared>);

/// Binds a fresh UDP socket. `source` pins the local address/port (and
/// enables address reuse, so a node can be rebound to a well-known source
/// promptly after a restart); `None` lets the OS pick an ephemeral port.
/// `enable_broadcast` is opt-in — only Art-Net nodes that ask for it should
/// pass `true`; sACN and KiNet are always unicast/multicast-destination and
/// never need it.
fn bind_socket(source: Option<SocketAddr>, enable_broadcast: bool) -> io::Result<std::net::UdpSocket> {
    let socket = socket2::Socket::new(socket2::Domain::IPV4, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))?;
    let bind_addr = match source {
        Some(addr) => {
            socket.set_reuse_address(true)?;
            addr
        }
        None => "0.0.0.0:0".parse().unwrap(),
    };
    socket.bind(&bind_addr.into())?;
    if enable_broadcast {
        socket.set_broadcast(true)?;
    }
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

pub(crate) fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("could not resolve {host}:{port}")))
}

/// Resolves an optional `(host, port)` source-address override into a bind
/// address; `port` 0 lets the OS pick an ephemeral port on that interface.
pub(crate) fn resolve_source(source_address: Option<(&str, u16)>) -> io::Result<Option<SocketAddr>> {
    match source_address {
        Some((host, port)) => Ok(Some(resolve(host, port)?)),
        None => Ok(None),
    }
}

impl Node {
    /// `max_fps`/`refresh_every` set the process/refresh task intervals
    /// (spec §6; defaults `25`/`2s` match upstream's `base_node.py`).
    /// `start_refresh_task` mirrors upstream's constructor default of
    /// `True`: when set, the refresh task is started immediately (a no-op
    /// if there is no tokio reactor to spawn it onto yet, e.g. a
    /// synchronous test or benchmark).
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new_internal(
        protocol: Protocol,
        dst: SocketAddr,
        source: Option<SocketAddr>,
        enable_broadcast: bool,
        max_fps: u32,
        refresh_every: Duration,
        start_refresh_task: bool,
    ) -> io::Result<Node> {
        let std_socket = bind_socket(source, enable_broadcast)?;
        let inner = NodeInner {
            process_every: process_every_for_fps(max_fps),
            refresh_every: clamp_refresh_every(refresh_every),
            protocol,
            correction: None,
            universes: Vec::new(),
            process_jobs: Vec::new(),
            process_task: None,
            refresh_task: None,
            node_awaiters: Rc::new(Notify::new()),
        };
        let node = Node(Rc::new(NodeShared {
            std_socket: RefCell::new(Some(std_socket)),
            tokio_socket: RefCell::new(None),
            dst,
            inner: RefCell::new(inner),
        }));
        if start_refresh_task {
            node.start_refresh();
        }
        Ok(node)
    }

    pub(crate) fn from_shared(shared: Rc<NodeShared>) -> Node {
        Node(shared)
    }

    pub(crate) fn weak(&self) -> Weak<NodeShared> {
        Rc::downgrade(&self.0)
    }

    /// How often the process task ticks active fades.
    pub fn process_every(&self) -> Duration {
        self.0.inner.borrow().process_every
    }

    pub(crate) fn process_every_ms(&self) -> u64 {
        self.process_every().as_millis().max(1) as u64
    }

    /// How often the refresh task re-sends every universe's frame.
    pub fn refresh_every(&self) -> Duration {
        self.0.inner.borrow().refresh_every
    }

    /// Override the process/refresh intervals. Takes effect on the next
    /// sleep of whichever task is already running.
    pub fn set_intervals(&self, process_every: Duration, refresh_every: Duration) {
        let mut inner = self.0.inner.borrow_mut();
        inner.process_every = process_every;
        inner.refresh_every = refresh_every;
    }

    pub(crate) fn correction(&self) -> Option<CorrectionFn> {
        self.0.inner.borrow().correction
    }

    /// Set (or clear) the node-level output correction, the last resort
    /// after a channel's or universe's own correction. Recomputes every
    /// channel in every universe immediately.
    pub fn set_output_correction(&self, func: Option<CorrectionFn>) {
        self.0.inner.borrow_mut().correction = func;
        for universe in self.universes() {
            for channel in universe.channels() {
                channel.apply_output_correction();
            }
        }
    }

    /// Inclusive `(min, max)` legal universe id range for this node's protocol.
    fn universe_id_range(&self) -> (u16, u16) {
        match &self.0.inner.borrow().protocol {
            Protocol::ArtNet { .. } => (0, artnet::MAX_UNIVERSE),
            Protocol::Sacn { .. } => (1, sacn::MAX_UNIVERSE),
            Protocol::Kinet => (0, kinet::MAX_UNIVERSE),
        }
    }

    /// Register a new universe. For Art-Net/sACN, `id` is the protocol's
    /// universe number; for KiNet it is a local identifier only — it never
    /// appears on the wire.
    pub fn add_universe(&self, id: u16) -> Result<Universe> {
        let (min, max) = self.universe_id_range();
        if id < min || id > max {
            return Err(crate::error::DmxError::InvalidUniverseAddress(id));
        }
        let mut inner = self.0.inner.borrow_mut();
        if inner.universes.iter().any(|u| u.borrow().id == id) {
            return Err(crate::error::DmxError::DuplicateUniverse(id));
        }
        let data = Universe::construct(id);
        inner.universes.push(Rc::clone(&data));
        inner.universes.sort_by_key(|u| u.borrow().id);
        drop(inner);
        Ok(Universe::from_parts(self.clone(), data))
    }

    /// Look up a previously registered universe.
    pub fn get_universe(&self, id: u16) -> Result<Universe> {
        self.0
            .inner
            .borrow()
            .universes
            .iter()
            .find(|u| u.borrow().id == id)
            .map(|data| Universe::from_parts(self.clone(), Rc::clone(data)))
            .ok_or(crate::error::DmxError::UniverseNotFound(id))
    }

    /// Number of universes registered on this node.
    pub fn len(&self) -> usize {
        self.0.inner.borrow().universes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All registered universes, in registration order.
    pub fn universes(&self) -> Vec<Universe> {
        self.0
            .inner
            .borrow()
            .universes
            .iter()
            .map(|data| Universe::from_parts(self.clone(), Rc::clone(data)))
            .collect()
    }

    pub(crate) fn push_process_job(&self, job: ChannelBoundFade) {
        self.0.inner.borrow_mut().process_jobs.push(job);
    }

    pub(crate) fn remove_process_job(&self, job: &ChannelBoundFade) {
        let mut inner = self.0.inner.borrow_mut();
        inner.process_jobs.retain(|j| !j.same_job(job));
        if inner.process_jobs.is_empty() {
            inner.node_awaiters.notify_waiters();
        }
    }

    /// Start the process task if it isn't already running. The task ticks
    /// every active fade at [`Node::process_every`] and stops itself after
    /// a run of idle ticks — called automatically by
    /// [`crate::channel::Channel::set_fade`] and by a value-changing
    /// [`crate::channel::Channel::set_values`].
    ///
    /// A no-op outside a tokio reactor context (e.g. synchronous tests or
    /// benchmarks that only inspect buffers): there is nothing to spawn
    /// the task onto.
    pub(crate) fn ensure_process_task_running(&self) {
        if tokio::runtime::Handle::try_current().is_err() {
            return;
        }
        let mut inner = self.0.inner.borrow_mut();
        let needs_spawn = inner.process_task.as_ref().map_or(true, JoinHandle::is_finished);
        if needs_spawn {
            let node = self.clone();
            inner.process_task = Some(tokio::task::spawn_local(run_process_task(node)));
        }
    }

    /// Start the refresh task if it isn't already running: sends every
    /// universe's current frame every [`Node::refresh_every`] until
    /// [`Node::stop_refresh`] is called.
    ///
    /// A no-op outside a tokio reactor context (e.g. a synchronous test or
    /// benchmark that constructs a node but never drives it): there is no
    /// `LocalSet` to spawn the task onto yet. Called automatically by every
    /// protocol constructor when `start_refresh_task` is left at its
    /// default of `true`.
    pub fn start_refresh(&self) {
        if tokio::runtime::Handle::try_current().is_err() {
            return;
        }
        let mut inner = self.0.inner.borrow_mut();
        if inner.refresh_task.is_none() {
            let node = self.clone();
            inner.refresh_task = Some(tokio::task::spawn_local(run_refresh_task(node)));
        }
    }

    /// Stop the refresh task, if running.
    pub fn stop_refresh(&self) {
        if let Some(handle) = self.0.inner.borrow_mut().refresh_task.take() {
            handle.abort();
        }
    }

    /// Unconditionally sends every universe's current buffer (the refresh
    /// task's keepalive), recording `last_send` on each.
    async fn send_all_universes(&self, now: Instant) -> Result<()> {
        let socket = self.0.socket()?;
        let dst = self.0.dst;
        for universe in self.universes() {
            let buffer = universe.buffer_snapshot();
            let frame = self.build_frame(&universe, &buffer);
            socket.send_to(&frame, dst).await?;
            universe.mark_sent(now);
            tracing::trace!(universe = universe.id(), len = frame.len(), "sent refresh frame");
        }
        Ok(())
    }

    /// Sends only universes whose buffer changed since the last flush (the
    /// process task's per-tick duty). Returns whether anything was sent.
    async fn flush_dirty_universes(&self) -> bool {
        let socket = match self.0.socket() {
            Ok(socket) => socket,
            Err(err) => {
                tracing::warn!(error = %err, "could not acquire socket to flush dirty universes");
                return false;
            }
        };
        let dst = self.0.dst;
        let mut any = false;
        for universe in self.universes() {
            let Some(buffer) = universe.take_changed_buffer() else {
                continue;
            };
            let frame = self.build_frame(&universe, &buffer);
            match socket.send_to(&frame, dst).await {
                Ok(_) => {
                    universe.mark_sent(Instant::now());
                    any = true;
                    tracing::debug!(universe = universe.id(), len = frame.len(), "sent updated frame");
                }
                Err(err) => {
                    tracing::warn!(error = %err, universe = universe.id(), "failed to send updated frame");
                }
            }
        }
        any
    }

    fn build_frame(&self, universe: &Universe, buffer: &[u8]) -> Vec<u8> {
        let mut inner = self.0.inner.borrow_mut();
        match &mut inner.protocol {
            Protocol::ArtNet { sequence } => artnet::build_frame(universe.id(), sequence.next(), buffer),
            Protocol::Sacn { cid, source_name, priority } => {
                let sequence = universe.next_sacn_sequence();
                sacn::build_frame(&*cid, source_name.as_str(), *priority, universe.id(), sequence, buffer)
            }
            Protocol::Kinet => kinet::build_frame(buffer),
        }
    }

    /// Enables or disables broadcast sends on the node's socket, regardless
    /// of whether it has already been converted to its tokio form.
    pub fn set_broadcast(&self, enabled: bool) -> io::Result<()> {
        if let Some(socket) = self.0.tokio_socket.borrow().as_ref() {
            return socket.set_broadcast(enabled);
        }
        if let Some(socket) = self.0.std_socket.borrow().as_ref() {
            return socket.set_broadcast(enabled);
        }
        Ok(())
    }

    /// Resolves once every pending fade on this node has completed or been
    /// cancelled; resolves immediately if none are pending.
    pub async fn awaited(&self) {
        loop {
            let notify = {
                let inner = self.0.inner.borrow();
                if inner.process_jobs.is_empty() {
                    return;
                }
                Rc::clone(&inner.node_awaiters)
            };
            notify.notified().await;
        }
    }
}

impl std::future::IntoFuture for Node {
    type Output = ();
    type IntoFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ()>>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.awaited().await })
    }
}

/// Steps every active fade, flushes whatever universes came out dirty (from
/// fades or from a bare `set_values`), and keeps ticking at `process_every`
/// as long as something happened. Stops itself after `IDLE_TICK_LIMIT`
/// consecutive quiet ticks; `ensure_process_task_running` respawns it the
/// next time there's work.
async fn run_process_task(node: Node) {
    tokio::time::sleep(PROCESS_TASK_STARTUP_DELAY).await;
    let mut idle_ct: u32 = 0;
    loop {
        let jobs = node.0.inner.borrow().process_jobs.clone();
        let mut stepped = false;
        for job in &jobs {
            stepped = true;
            if job.process() {
                job.fire_complete();
            }
        }
        if stepped {
            let mut inner = node.0.inner.borrow_mut();
            inner.process_jobs.retain(|j| !j.is_done());
            if inner.process_jobs.is_empty() {
                inner.node_awaiters.notify_waiters();
            }
        }

        let flushed = node.flush_dirty_universes().await;

        if stepped || flushed {
            idle_ct = 0;
        } else {
            idle_ct += 1;
        }
        if idle_ct >= IDLE_TICK_LIMIT {
            break;
        }
        tokio::time::sleep(node.process_every()).await;
    }
    node.0.inner.borrow_mut().process_task = None;
}

/// Keepalive loop: resends every universe once its `last_send` falls
/// `refresh_every` behind, without disturbing the process task's dirty
/// flag. Mirrors computing the minimum `last_send` across universes and
/// sleeping the remaining gap rather than polling on a fixed tick.
async fn run_refresh_task(node: Node) {
    let mut backoff = background::BackoffPolicy::default();
    loop {
        let now = Instant::now();
        let refresh_every = node.refresh_every();
        let universes = node.universes();
        let min_elapsed = universes
            .iter()
            .map(|u| u.elapsed_since_last_send(now).unwrap_or(refresh_every))
            .min()
            .unwrap_or(refresh_every);

        if min_elapsed < refresh_every {
            tokio::time::sleep(refresh_every - min_elapsed).await;
            continue;
        }

        match node.send_all_universes(now).await {
            Ok(()) => backoff.reset(),
            Err(err) => {
                let delay = backoff.next_delay();
                tracing::warn!(error = %err, delay_ms = delay.as_millis(), "refresh send failed, backing off");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
