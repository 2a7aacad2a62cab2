use std::marker::PhantomData;

use crate::{
    error::{Error, Result},
    graph::{BindingSet, Node, Statement},
    protocol::IteratorId,
};

use super::{Connection, SharedConnection, pool::lock};

/// Owns one server-side cursor and frees it at most once.
#[derive(Debug)]
pub(crate) struct RemoteCursor {
    connection: SharedConnection,
    id: Option<IteratorId>,
    epoch: u64,
}

impl RemoteCursor {
    pub(crate) fn new(connection: SharedConnection, id: IteratorId, epoch: u64) -> Self {
        Self {
            connection,
            id: Some(id),
            epoch,
        }
    }

    /// Runs one command against the cursor, failing fast when the cursor is closed
    /// or its connection has died since it was opened.
    pub(crate) fn with<T>(
        &self,
        command: impl FnOnce(&mut Connection, IteratorId) -> Result<T>,
    ) -> Result<T> {
        let mut connection = lock(&self.connection);
        let Some(id) = self.id else {
            return Err(connection.reject(Error::invalid_argument("iterator is closed")));
        };
        if !connection.is_connected() || connection.epoch() != self.epoch {
            return Err(connection.reject(Error::not_connected()));
        }
        command(&mut *connection, id)
    }

    /// Issues `iterator-close` once; later calls are no-ops. A cursor whose
    /// connection is gone has already been dropped by the server.
    pub(crate) fn close(&mut self) -> Result<()> {
        let Some(id) = self.id.take() else {
            return Ok(());
        };
        let mut connection = lock(&self.connection);
        if !connection.is_connected() || connection.epoch() != self.epoch {
            return Ok(());
        }
        connection.iterator_close(id)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.id.is_none()
    }

    /// Records a misuse of the cursor and returns it as an error.
    fn misuse(&self, message: &str) -> Error {
        lock(&self.connection).reject(Error::invalid_argument(message))
    }
}

impl Drop for RemoteCursor {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// The payload flavour of a [`RemoteIterator`].
pub trait RowKind {
    type Row;

    fn fetch(connection: &mut Connection, id: IteratorId) -> Result<Self::Row>;
}

#[derive(Debug)]
pub struct NodeRows;

#[derive(Debug)]
pub struct StatementRows;

#[derive(Debug)]
pub struct BindingRows;

impl RowKind for NodeRows {
    type Row = Node;

    fn fetch(connection: &mut Connection, id: IteratorId) -> Result<Node> {
        connection.iterator_current_node(id)
    }
}

impl RowKind for StatementRows {
    type Row = Statement;

    fn fetch(connection: &mut Connection, id: IteratorId) -> Result<Statement> {
        connection.iterator_current_statement(id)
    }
}

impl RowKind for BindingRows {
    type Row = BindingSet;

    fn fetch(connection: &mut Connection, id: IteratorId) -> Result<BindingSet> {
        connection.iterator_current_binding_set(id)
    }
}

pub type NodeIterator = RemoteIterator<NodeRows>;
pub type StatementIterator = RemoteIterator<StatementRows>;
pub type BindingSetIterator = RemoteIterator<BindingRows>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Fresh,
    Positioned,
    Exhausted,
    Closed,
}

/// Client-side cursor over a server-side result set, one element per round trip.
///
/// [`advance`](RemoteIterator::advance) moves to the next element and
/// [`current`](RemoteIterator::current) fetches it. Running out of elements does not
/// free the server cursor; [`close`](RemoteIterator::close) does, and so does
/// dropping the iterator. Closing early discards whatever was not fetched.
///
/// The [`Iterator`] impl combines both steps and stops after the first error.
#[derive(Debug)]
pub struct RemoteIterator<K: RowKind> {
    cursor: RemoteCursor,
    state: State,
    kind: PhantomData<K>,
}

impl<K: RowKind> RemoteIterator<K> {
    pub(crate) fn new(cursor: RemoteCursor) -> Self {
        Self {
            cursor,
            state: State::Fresh,
            kind: PhantomData,
        }
    }

    /// Issues `iterator-next`. `Ok(false)` means the result set is exhausted.
    pub fn advance(&mut self) -> Result<bool> {
        match self.state {
            State::Closed => return Err(self.cursor.misuse("iterator is closed")),
            State::Exhausted => return Ok(false),
            State::Fresh | State::Positioned => {}
        }

        let more = self.cursor.with(|connection, id| connection.iterator_next(id))?;
        self.state = if more {
            State::Positioned
        } else {
            State::Exhausted
        };
        Ok(more)
    }

    /// The element the last successful [`advance`](RemoteIterator::advance) moved to.
    pub fn current(&self) -> Result<K::Row> {
        if self.state != State::Positioned {
            let message = match self.state {
                State::Closed => "iterator is closed",
                _ => "iterator is not positioned on an element",
            };
            return Err(self.cursor.misuse(message));
        }
        self.cursor.with(K::fetch)
    }

    /// Frees the server cursor. Closing twice is the same as closing once.
    pub fn close(&mut self) -> Result<()> {
        self.state = State::Closed;
        self.cursor.close()
    }

    pub fn is_closed(&self) -> bool {
        self.cursor.is_closed()
    }
}

impl<K: RowKind> Iterator for RemoteIterator<K> {
    type Item = Result<K::Row>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = match self.advance() {
            Ok(true) => self.current(),
            Ok(false) => return None,
            Err(e) => Err(e),
        };
        if row.is_err() && self.state != State::Closed {
            self.state = State::Exhausted;
        }
        Some(row)
    }
}
