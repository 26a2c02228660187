/*
 * pool.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of tcphttp, an HTTP/1.1 client over raw TCP and TLS sockets.
 *
 * tcphttp is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * tcphttp is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with tcphttp.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Connection pool: one socket slot per (scheme, host, port).
//!
//! Each slot is a `SocketWrapper`, an async mutex around the transport. Acquirers of a
//! busy slot wait in FIFO order (tokio's mutex is fair), so requests to the same origin
//! are serialized over one physical connection. While a slot is idle its transport is
//! parked in a watcher task that evicts the entry on idle timeout, peer close, socket
//! error, or unsolicited bytes. Reacquiring the slot takes the transport back.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{oneshot, Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use url::Url;

use crate::net::HttpStream;

/// Identifies one reusable connection slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl PoolKey {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            port,
        }
    }

    /// Key for a URL's origin; None when the URL has no host or known port.
    pub fn from_url(url: &Url) -> Option<Self> {
        Some(Self::new(
            url.scheme(),
            url.host_str()?.to_ascii_lowercase(),
            url.port_or_known_default()?,
        ))
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Transport parked while its slot is idle.
struct IdleWatch {
    reclaim: oneshot::Sender<()>,
    task: JoinHandle<Option<HttpStream>>,
}

impl IdleWatch {
    /// Stop watching; returns the transport unless the watcher already evicted it.
    async fn reclaim(self) -> Option<HttpStream> {
        let _ = self.reclaim.send(());
        self.task.await.ok().flatten()
    }
}

#[derive(Default)]
struct Slot {
    idle: Option<IdleWatch>,
}

/// Mutual exclusion around one transport.
pub struct SocketWrapper {
    slot: Arc<AsyncMutex<Slot>>,
    /// Set once the entry has left the pool map; its transport must not be reused.
    retired: AtomicBool,
}

impl SocketWrapper {
    fn new() -> Self {
        Self {
            slot: Arc::new(AsyncMutex::new(Slot::default())),
            retired: AtomicBool::new(false),
        }
    }

    fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }
}

struct PoolInner {
    entries: Mutex<HashMap<PoolKey, Arc<SocketWrapper>>>,
    idle_timeout: Duration,
}

impl PoolInner {
    fn entries(&self) -> MutexGuard<'_, HashMap<PoolKey, Arc<SocketWrapper>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove `key` only if it still maps to `wrapper`.
    fn unlink(&self, key: &PoolKey, wrapper: &Arc<SocketWrapper>) {
        wrapper.retire();
        let mut entries = self.entries();
        if entries.get(key).is_some_and(|w| Arc::ptr_eq(w, wrapper)) {
            entries.remove(key);
        }
    }
}

/// Graceful close: shut down the write side (TLS close_notify, TCP FIN) then drop.
async fn close_stream(mut stream: HttpStream) {
    let _ = stream.shutdown().await;
}

async fn watch_idle(
    pool: Weak<PoolInner>,
    key: PoolKey,
    wrapper: Weak<SocketWrapper>,
    mut stream: HttpStream,
    idle_timeout: Duration,
    mut reclaim: oneshot::Receiver<()>,
) -> Option<HttpStream> {
    let mut byte = [0u8; 1];
    let eviction = tokio::select! {
        biased;
        _ = &mut reclaim => None,
        _ = tokio::time::sleep(idle_timeout) => Some("idle timeout"),
        read = stream.read(&mut byte) => Some(match read {
            Ok(0) => "closed by peer",
            Ok(_) => "unsolicited data",
            Err(_) => "socket error",
        }),
    };
    let Some(reason) = eviction else {
        return Some(stream);
    };
    debug!(key = %key, reason, "evicting idle connection");
    if let (Some(pool), Some(wrapper)) = (pool.upgrade(), wrapper.upgrade()) {
        // The releaser may not have let go of the slot yet. An acquirer that takes the
        // slot first reclaims us instead and reconnects.
        tokio::select! {
            biased;
            _ = &mut reclaim => {}
            mut slot = wrapper.slot.lock() => {
                slot.idle = None;
                pool.unlink(&key, &wrapper);
            }
        }
    }
    close_stream(stream).await;
    None
}

/// Pool of per-origin connection slots. Cloning shares the pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                entries: Mutex::new(HashMap::new()),
                idle_timeout,
            }),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.inner.idle_timeout
    }

    /// Wait for exclusive use of the slot for `key`, creating it on first use. The
    /// returned connection carries the pooled transport if one is still alive.
    pub async fn acquire(&self, key: &PoolKey) -> PooledConnection {
        loop {
            let wrapper = {
                let mut entries = self.inner.entries();
                entries
                    .entry(key.clone())
                    .or_insert_with(|| {
                        debug!(key = %key, "creating pool entry");
                        Arc::new(SocketWrapper::new())
                    })
                    .clone()
            };
            let mut guard = wrapper.slot.clone().lock_owned().await;
            if wrapper.is_retired() {
                // Evicted while we were queued; join the replacement entry.
                continue;
            }
            let stream = match guard.idle.take() {
                Some(watch) => watch.reclaim().await,
                None => None,
            };
            trace!(key = %key, reused = stream.is_some(), "acquired pool slot");
            return PooledConnection {
                key: key.clone(),
                wrapper,
                guard,
                stream,
                pool: Arc::downgrade(&self.inner),
            };
        }
    }

    /// Forcibly close the transport for `key` (if idle) and delete the entry. A busy
    /// entry is retired and its transport is closed when the holder lets go.
    pub async fn remove(&self, key: &PoolKey) {
        let wrapper = self.inner.entries().remove(key);
        if let Some(wrapper) = wrapper {
            debug!(key = %key, "removing pool entry");
            Self::shut(wrapper).await;
        }
    }

    /// Close every transport and clear the pool.
    pub async fn dispose(&self) {
        let drained: Vec<(PoolKey, Arc<SocketWrapper>)> = self.inner.entries().drain().collect();
        debug!(entries = drained.len(), "disposing connection pool");
        for (_, wrapper) in drained {
            Self::shut(wrapper).await;
        }
    }

    async fn shut(wrapper: Arc<SocketWrapper>) {
        wrapper.retire();
        let watch = match wrapper.slot.try_lock() {
            Ok(mut slot) => slot.idle.take(),
            Err(_) => None,
        };
        if let Some(watch) = watch {
            if let Some(stream) = watch.reclaim().await {
                close_stream(stream).await;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &PoolKey) -> bool {
        self.inner.entries().contains_key(key)
    }

    /// True when `key` has a parked transport and nobody holds the slot.
    pub fn is_idle(&self, key: &PoolKey) -> bool {
        let wrapper = self.inner.entries().get(key).cloned();
        wrapper.is_some_and(|w| {
            w.slot
                .try_lock()
                .map(|slot| slot.idle.is_some())
                .unwrap_or(false)
        })
    }
}

/// Exclusive lease on one pool slot. Dropping it without `release` closes any transport
/// it holds and frees the slot for the next waiter.
pub struct PooledConnection {
    key: PoolKey,
    wrapper: Arc<SocketWrapper>,
    guard: OwnedMutexGuard<Slot>,
    stream: Option<HttpStream>,
    pool: Weak<PoolInner>,
}

impl PooledConnection {
    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub fn stream_mut(&mut self) -> Option<&mut HttpStream> {
        self.stream.as_mut()
    }

    /// Attach a freshly established transport.
    pub fn install(&mut self, stream: HttpStream) {
        self.stream = Some(stream);
    }

    /// Hand the slot back. A transport is parked for reuse and watched until the idle
    /// timeout; without one, the slot is simply freed.
    pub fn release(mut self) {
        let Some(stream) = self.stream.take() else {
            trace!(key = %self.key, "released slot without transport");
            return;
        };
        let Some(pool) = self.pool.upgrade() else {
            return;
        };
        if self.wrapper.is_retired() {
            debug!(key = %self.key, "closing transport of retired entry");
            tokio::spawn(close_stream(stream));
            return;
        }
        let (reclaim, rx) = oneshot::channel();
        let task = tokio::spawn(watch_idle(
            Arc::downgrade(&pool),
            self.key.clone(),
            Arc::downgrade(&self.wrapper),
            stream,
            pool.idle_timeout,
            rx,
        ));
        self.guard.idle = Some(IdleWatch { reclaim, task });
        trace!(key = %self.key, "parked transport");
    }

    /// Close the transport and delete the pool entry.
    pub fn remove(mut self) {
        if let Some(stream) = self.stream.take() {
            tokio::spawn(close_stream(stream));
        }
        match self.pool.upgrade() {
            Some(pool) => pool.unlink(&self.key, &self.wrapper),
            None => self.wrapper.retire(),
        }
        debug!(key = %self.key, "removed pool entry");
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("key", &self.key)
            .field("stream", &self.stream)
            .finish()
    }
}
