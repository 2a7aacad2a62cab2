//! Client side of the store protocol.
//!
//! [`Client`] is the entry point. It draws connections from a [`ConnectionPool`],
//! one per calling thread, and hands out [`RemoteModel`]s whose operations run over
//! the connection that opened them. Listing operations return [`RemoteIterator`]s
//! that page through a server-side result set.
//!
//! Every operation returns a [`Result`](crate::Result). The outcome is also mirrored
//! in the pool's [`ErrorChannel`], readable through [`Client::last_error`].
mod channel;
mod connection;
mod iterator;
mod model;
mod pool;

pub use channel::ErrorChannel;
pub use connection::Connection;
pub use iterator::{
    BindingRows, BindingSetIterator, NodeIterator, NodeRows, RemoteIterator, RowKind,
    StatementIterator, StatementRows,
};
pub use model::{QueryResult, RemoteModel};
pub use pool::{ConnectionPool, PoolKey, SharedConnection};

use crate::{
    config::ClientConfig,
    error::{Error, Result},
    protocol::BackendFeatures,
};

use pool::lock;

/// Graph store access through a pool of per-thread connections.
#[derive(Debug, Clone)]
pub struct Client {
    pool: ConnectionPool,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            pool: ConnectionPool::new(config),
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Makes sure the calling thread has a live, handshaken connection.
    pub fn connect(&self) -> Result<()> {
        self.pool.get().map(|_| ())
    }

    /// Opens `name`, creating it if the backend does not have it yet.
    pub fn create_model(&self, name: &str) -> Result<RemoteModel> {
        let connection = self.pool.get()?;
        let (id, epoch) = {
            let mut guard = lock(&connection);
            let id = guard.create_model(name)?;
            (id, guard.epoch())
        };
        Ok(RemoteModel::new(connection, id, epoch, name.to_string()))
    }

    pub fn remove_model(&self, name: &str) -> Result<()> {
        let connection = self.pool.get()?;
        lock(&connection).remove_model(name)
    }

    pub fn supported_features(&self) -> Result<BackendFeatures> {
        let connection = self.pool.get()?;
        lock(&connection).supported_features()
    }

    /// The last error seen on the calling thread, or [`Error::none`].
    pub fn last_error(&self) -> Error {
        self.pool.errors().last_error()
    }
}
