//! Bounded per-peer connection pool (spec.md §4.2).
//!
//! Grounded in the teacher's channel/eviction pool machinery
//! (`networking/transport/pool.rs`'s `PeerPool`/`ConnectionPool` pair: a
//! `Vec` of connections behind a capacity check, keyed per peer) but
//! simpler still: one `Vec` of idle sockets plus an outstanding-connection
//! counter, guarded by a single `tokio::sync::Mutex` rather than a
//! per-peer `RwLock<HashMap<NodeId, PeerPool>>` plus idle-timeout sweeps,
//! since the spec only asks for bounded capacity and mark-unusable-on-error
//! semantics, not health-check eviction.
//!
//! Generic over the stream type so the same pool machinery backs both
//! plain-TCP and TLS-wrapped cluster connections (see `ClientStream` in
//! `cluster::client`).

use crate::error::{DbError, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;

pub type DialFuture<S> = Pin<Box<dyn Future<Output = Result<S>> + Send>>;
pub type DialFactory<S> = Arc<dyn Fn() -> DialFuture<S> + Send + Sync>;

struct Inner<S> {
    idle: Vec<S>,
    /// Connections either idle in `idle` or currently checked out.
    outstanding: usize,
    max: usize,
    factory: DialFactory<S>,
}

/// A bounded pool of connections to one peer.
pub struct ConnectionPool<S> {
    inner: Mutex<Inner<S>>,
}

/// A checked-out connection. Dropping it without calling [`PooledConn::close`]
/// destroys the underlying socket rather than silently leaking it back —
/// callers that want reuse must call `close` explicitly, matching the
/// explicit `conn.Close()` in the original Go client.
pub struct PooledConn<S> {
    socket: Option<S>,
    pool: Arc<ConnectionPool<S>>,
    unusable: bool,
}

impl<S: Send + 'static> PooledConn<S> {
    pub fn socket_mut(&mut self) -> &mut S {
        self.socket.as_mut().expect("socket taken")
    }

    /// Forces destruction instead of returning the connection to the pool.
    pub fn mark_unusable(&mut self) {
        self.unusable = true;
    }

    /// Returns the connection to the pool if healthy, otherwise drops it and
    /// frees its capacity slot.
    pub async fn close(mut self) {
        let socket = self.socket.take();
        let unusable = self.unusable;
        self.pool.release(socket, unusable).await;
    }
}

impl<S: Send + 'static> Drop for PooledConn<S> {
    fn drop(&mut self) {
        if let Some(socket) = self.socket.take() {
            let pool = self.pool.clone();
            let unusable = self.unusable;
            tokio::spawn(async move {
                pool.release(Some(socket), unusable).await;
            });
        }
    }
}

impl<S: Send + 'static> ConnectionPool<S> {
    /// Dials `initial` connections up front; fails the whole construction if
    /// any dial fails, per spec.md §4.2.
    pub async fn new(initial: usize, max: usize, factory: DialFactory<S>) -> Result<Arc<Self>> {
        let mut idle = Vec::with_capacity(initial);
        for _ in 0..initial {
            idle.push(factory().await?);
        }
        Ok(Arc::new(Self {
            inner: Mutex::new(Inner { idle, outstanding: initial, max, factory }),
        }))
    }

    /// Returns an idle connection, or dials a fresh one if below `max` and
    /// none are idle. Fails if at capacity with nothing idle.
    pub async fn get(self: &Arc<Self>) -> Result<PooledConn<S>> {
        let mut guard = self.inner.lock().await;
        if let Some(socket) = guard.idle.pop() {
            return Ok(PooledConn { socket: Some(socket), pool: self.clone(), unusable: false });
        }
        if guard.outstanding >= guard.max {
            return Err(DbError::PoolExhausted(format!(
                "pool at capacity ({}/{})",
                guard.outstanding, guard.max
            )));
        }
        let factory = guard.factory.clone();
        guard.outstanding += 1;
        drop(guard);
        match factory().await {
            Ok(socket) => Ok(PooledConn { socket: Some(socket), pool: self.clone(), unusable: false }),
            Err(e) => {
                let mut guard = self.inner.lock().await;
                guard.outstanding -= 1;
                Err(e)
            }
        }
    }

    async fn release(&self, socket: Option<S>, unusable: bool) {
        let mut guard = self.inner.lock().await;
        match socket {
            Some(socket) if !unusable => guard.idle.push(socket),
            _ => guard.outstanding -= 1,
        }
    }

    pub async fn idle_count(&self) -> usize {
        self.inner.lock().await.idle.len()
    }

    pub async fn outstanding_count(&self) -> usize {
        self.inner.lock().await.outstanding
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn echo_listener() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                if let Ok((_s, _)) = listener.accept().await {
                    // hold the connection open; tests only check pool bookkeeping
                } else {
                    break;
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn pool_respects_max_capacity() {
        let addr = echo_listener().await;
        let factory: DialFactory<TcpStream> = Arc::new(move || {
            Box::pin(async move { TcpStream::connect(addr).await.map_err(Into::into) })
        });
        let pool = ConnectionPool::new(1, 2, factory).await.unwrap();
        let c1 = pool.get().await.unwrap();
        let c2 = pool.get().await.unwrap();
        assert!(pool.get().await.is_err());
        c1.close().await;
        c2.close().await;
        assert_eq!(pool.idle_count().await, 2);
    }
}
