use crate::flow::Flow;
use crate::packet::{Packet, TransportKind};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

// Clock trait for dependency injection
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Direction-independent identity of a conversation.
///
/// Endpoints are ordered by port first and address second, so `A -> B` and
/// `B -> A` produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlowKey {
    transport: TransportKind,
    lower: SocketAddr,
    upper: SocketAddr,
}

impl FlowKey {
    pub fn new(transport: TransportKind, src: SocketAddr, dst: SocketAddr) -> Self {
        let (lower, upper) = if endpoint_order(&dst) < endpoint_order(&src) {
            (dst, src)
        } else {
            (src, dst)
        };
        Self {
            transport,
            lower,
            upper,
        }
    }

    /// The key for a packet, or `None` when it lacks a network or transport layer.
    pub fn for_packet(packet: &Packet) -> Option<Self> {
        let kind = packet.transport.as_ref()?.kind;
        let (src, dst) = packet.endpoints()?;
        Some(Self::new(kind, src, dst))
    }

    pub fn endpoints(&self) -> (SocketAddr, SocketAddr) {
        (self.lower, self.upper)
    }
}

fn endpoint_order(addr: &SocketAddr) -> (u16, std::net::IpAddr) {
    (addr.port(), addr.ip())
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{},{}", self.transport.as_str(), self.lower, self.upper)
    }
}

struct CacheEntry {
    flow: Arc<Flow>,
    last_seen: Instant,
}

struct FlowCache {
    entries: HashMap<FlowKey, CacheEntry>,
    /// `None` keeps entries until flushed.
    expiration: Option<Duration>,
}

impl FlowCache {
    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        self.expiration
            .is_some_and(|ttl| now.duration_since(entry.last_seen) >= ttl)
    }
}

/// Maps packets to the flow they belong to.
///
/// The cache must be created with [`FlowTracker::init_cache`] before packets
/// are resolved and can be torn down and re-created any number of times.
pub struct FlowTracker {
    cache: Mutex<Option<FlowCache>>,
    evicted_count: RwLock<u64>,
    clock: Arc<dyn Clock>,
}

impl Default for FlowTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowTracker {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: Mutex::new(None),
            evicted_count: RwLock::new(0),
            clock,
        }
    }

    /// Creates an empty cache. `None` or a zero duration disables expiry.
    /// An existing cache is replaced.
    pub fn init_cache(&self, expiration: Option<Duration>) {
        let expiration = expiration.filter(|ttl| !ttl.is_zero());
        *self.cache.lock() = Some(FlowCache {
            entries: HashMap::new(),
            expiration,
        });
        debug!(?expiration, "Flow cache initialized");
    }

    pub fn destroy_cache(&self) {
        if self.cache.lock().take().is_some() {
            debug!("Flow cache destroyed");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.cache.lock().is_some()
    }

    /// Forgets every tracked flow. Later packets start new flows.
    pub fn flush(&self) {
        if let Some(cache) = self.cache.lock().as_mut() {
            cache.entries.clear();
        }
    }

    /// Resolves the flow a packet belongs to, appends the packet to it and
    /// reports whether the flow was created by this call.
    ///
    /// Packets without a network and transport layer are never cached: each
    /// one gets its own single-packet flow.
    ///
    /// # Panics
    ///
    /// Panics if a cacheable packet arrives before [`FlowTracker::init_cache`].
    pub fn get_flow_for_packet(&self, packet: impl Into<Arc<Packet>>) -> (Arc<Flow>, bool) {
        let packet = packet.into();
        let Some(key) = FlowKey::for_packet(&packet) else {
            let flow = Flow::new();
            flow.add_packet(packet);
            return (Arc::new(flow), true);
        };

        let now = self.clock.now();
        let (flow, is_new) = {
            let mut guard = self.cache.lock();
            let cache = guard
                .as_mut()
                .expect("flow cache used before FlowTracker::init_cache");

            let expired = cache
                .entries
                .get(&key)
                .is_some_and(|entry| cache.is_expired(entry, now));
            if expired {
                cache.entries.remove(&key);
                *self.evicted_count.write() += 1;
                debug!(flow = %key, "Expired flow replaced");
            }

            match cache.entries.get_mut(&key) {
                Some(entry) => {
                    entry.last_seen = now;
                    (entry.flow.clone(), false)
                }
                None => {
                    let flow = Arc::new(Flow::new());
                    cache.entries.insert(
                        key,
                        CacheEntry {
                            flow: flow.clone(),
                            last_seen: now,
                        },
                    );
                    (flow, true)
                }
            }
        };

        flow.add_packet(packet);
        (flow, is_new)
    }

    /// Drops every entry idle for longer than the expiration and returns how
    /// many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let mut guard = self.cache.lock();
        let Some(cache) = guard.as_mut() else {
            return 0;
        };
        let Some(ttl) = cache.expiration else {
            return 0;
        };

        let before_count = cache.entries.len();
        cache
            .entries
            .retain(|_, entry| now.duration_since(entry.last_seen) < ttl);

        let removed = before_count - cache.entries.len();
        if removed > 0 {
            *self.evicted_count.write() += removed as u64;
            debug!(removed, "Expired flows swept");
        }
        removed
    }

    pub fn tracked_flows(&self) -> usize {
        self.cache.lock().as_ref().map_or(0, |cache| cache.entries.len())
    }

    pub fn total_evicted(&self) -> u64 {
        *self.evicted_count.read()
    }
}
