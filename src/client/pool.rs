use std::{
    cell::RefCell,
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    thread::{self, ThreadId},
};

use log::debug;

use crate::{config::ClientConfig, error::Result};

use super::{Connection, ErrorChannel};

/// A pooled connection. The mutex is only contended during teardown.
pub type SharedConnection = Arc<Mutex<Connection>>;

pub(crate) fn lock(connection: &SharedConnection) -> MutexGuard<'_, Connection> {
    connection.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Who a pooled connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKey {
    /// Disposed of automatically when the thread exits.
    Thread(ThreadId),
    /// Lives until [`ConnectionPool::release`].
    Token(u64),
}

impl PoolKey {
    pub fn current_thread() -> Self {
        PoolKey::Thread(thread::current().id())
    }
}

/// Hands out at most one live [`Connection`] per key, dialing lazily.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    config: ClientConfig,
    errors: Arc<ErrorChannel>,
    connections: Mutex<HashMap<PoolKey, SharedConnection>>,
}

impl PoolInner {
    fn connections(&self) -> MutexGuard<'_, HashMap<PoolKey, SharedConnection>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispose(&self, key: PoolKey) -> bool {
        let removed = self.connections().remove(&key);
        match removed {
            Some(connection) => {
                lock(&connection).close();
                true
            }
            None => false,
        }
    }
}

struct ExitGuard {
    pool: Weak<PoolInner>,
    key: PoolKey,
    thread: ThreadId,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.pool.upgrade() {
            if inner.dispose(self.key) {
                debug!("{:?} exited, connection closed", self.thread);
            }
            inner.errors.forget(self.thread);
        }
    }
}

thread_local! {
    static EXIT_GUARDS: RefCell<Vec<ExitGuard>> = const { RefCell::new(Vec::new()) };
}

impl ConnectionPool {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                errors: Arc::new(ErrorChannel::new()),
                connections: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn errors(&self) -> &Arc<ErrorChannel> {
        &self.inner.errors
    }

    /// The calling thread's connection, dialed and handshaken on first use.
    pub fn get(&self) -> Result<SharedConnection> {
        self.acquire(PoolKey::current_thread())
    }

    /// The live connection for `key`, replacing a dead one. A failed dial or
    /// handshake is also left in the error channel.
    pub fn acquire(&self, key: PoolKey) -> Result<SharedConnection> {
        if let Some(connection) = self.cached(key) {
            return Ok(connection);
        }

        let connection = Connection::connect(&self.inner.config, Arc::clone(&self.inner.errors))?;
        let connection = Arc::new(Mutex::new(connection));
        let previous = self.inner.connections().insert(key, Arc::clone(&connection));

        if let (None, PoolKey::Thread(id)) = (previous, key) {
            self.watch_thread_exit(key, id);
        }
        debug!("new connection for {key:?}");
        Ok(connection)
    }

    /// Closes and forgets the connection for `key`. Returns whether there was one.
    pub fn release(&self, key: PoolKey) -> bool {
        self.inner.dispose(key)
    }

    /// Number of pooled connections, dead or alive.
    pub fn len(&self) -> usize {
        self.inner.connections().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cached(&self, key: PoolKey) -> Option<SharedConnection> {
        let connections = self.inner.connections();
        let connection = connections.get(&key)?;
        lock(connection)
            .is_connected()
            .then(|| Arc::clone(connection))
    }

    fn watch_thread_exit(&self, key: PoolKey, thread: ThreadId) {
        let pool = Arc::downgrade(&self.inner);
        // Registration fails only while this thread is already being torn down.
        let _ = EXIT_GUARDS.try_with(|guards| {
            let mut guards = guards.borrow_mut();
            guards.retain(|guard| guard.pool.strong_count() > 0);
            if guards.iter().any(|guard| guard.key == key && guard.pool.ptr_eq(&pool)) {
                return;
            }
            guards.push(ExitGuard { pool, key, thread });
        });
    }

    /// Exit guards this thread holds for this pool.
    #[cfg(test)]
    fn exit_guard_count(&self) -> usize {
        let pool = Arc::downgrade(&self.inner);
        EXIT_GUARDS.with(|guards| {
            guards
                .borrow()
                .iter()
                .filter(|guard| guard.pool.ptr_eq(&pool))
                .count()
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Barrier, time::Duration};

    use crate::{
        backend::MemoryBackend, config::ServerConfig, error::ErrorCode, protocol::Endpoint,
        server::GraphServer,
    };

    use super::*;

    fn pool() -> ConnectionPool {
        let config = ServerConfig::new(Endpoint::Tcp("127.0.0.1:0".into()));
        let server = GraphServer::bind(config, MemoryBackend::new()).unwrap();
        let endpoint = server.endpoint().clone();
        thread::spawn(move || server.serve());
        ConnectionPool::new(ClientConfig::new(endpoint).with_timeout(Some(Duration::from_secs(5))))
    }

    #[test]
    fn same_thread_gets_same_connection() {
        let pool = pool();
        let a = pool.get().unwrap();
        let b = pool.get().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn distinct_threads_get_distinct_connections() {
        let pool = pool();
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let pool = pool.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let connection = pool.get().unwrap();
                    // Keep both threads alive until each holds its connection.
                    barrier.wait();
                    connection
                })
            })
            .collect();

        let connections: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(!Arc::ptr_eq(&connections[0], &connections[1]));
    }

    #[test]
    fn thread_exit_disposes_its_connection() {
        let pool = pool();
        let worker = pool.clone();
        let connection = thread::spawn(move || worker.get().unwrap()).join().unwrap();

        assert!(!lock(&connection).is_connected());
        assert!(pool.is_empty());
    }

    #[test]
    fn release_then_get_keeps_one_exit_guard() {
        let pool = pool();
        for _ in 0..5 {
            pool.get().unwrap();
            assert!(pool.release(PoolKey::current_thread()));
        }
        pool.get().unwrap();

        assert_eq!(pool.exit_guard_count(), 1);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn dead_connection_is_replaced() {
        let pool = pool();
        let first = pool.get().unwrap();
        lock(&first).close();

        let second = pool.get().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(lock(&second).is_connected());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn tokens_are_released_explicitly() {
        let pool = pool();
        let a = pool.acquire(PoolKey::Token(1)).unwrap();
        let b = pool.acquire(PoolKey::Token(2)).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &pool.acquire(PoolKey::Token(1)).unwrap()));

        assert!(pool.release(PoolKey::Token(1)));
        assert!(!pool.release(PoolKey::Token(1)));
        assert!(!lock(&a).is_connected());
        assert!(lock(&b).is_connected());
    }

    #[test]
    fn failed_dial_leaves_an_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = Endpoint::Tcp(listener.local_addr().unwrap().to_string());
        drop(listener);

        let pool = ConnectionPool::new(ClientConfig::new(endpoint));
        assert!(pool.get().is_err());
        assert_eq!(pool.errors().last_error().code(), ErrorCode::Io);
        assert!(pool.is_empty());
    }
}
