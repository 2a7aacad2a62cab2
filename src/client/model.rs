use crate::{
    error::{Error, Result},
    graph::{Node, Statement},
    protocol::{IteratorId, ModelId, QueryLanguage, QueryResultType},
};

use super::{
    BindingSetIterator, Connection, NodeIterator, SharedConnection, StatementIterator,
    iterator::{RemoteCursor, RemoteIterator, RowKind},
    pool::lock,
};

/// What a query produced.
#[derive(Debug)]
pub enum QueryResult {
    Graph(StatementIterator),
    Bindings(BindingSetIterator),
    Boolean(bool),
}

impl QueryResult {
    pub fn kind(&self) -> QueryResultType {
        match self {
            QueryResult::Graph(_) => QueryResultType::Graph,
            QueryResult::Bindings(_) => QueryResultType::Bindings,
            QueryResult::Boolean(_) => QueryResultType::Bool,
        }
    }
}

/// A model opened on the server, bound to the connection that opened it.
#[derive(Debug)]
pub struct RemoteModel {
    connection: SharedConnection,
    id: ModelId,
    epoch: u64,
    name: String,
}

impl RemoteModel {
    pub(crate) fn new(
        connection: SharedConnection,
        id: ModelId,
        epoch: u64,
        name: String,
    ) -> Self {
        Self {
            connection,
            id,
            epoch,
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> ModelId {
        self.id
    }

    fn with<T>(&self, command: impl FnOnce(&mut Connection, ModelId) -> Result<T>) -> Result<T> {
        let mut connection = lock(&self.connection);
        if !connection.is_connected() || connection.epoch() != self.epoch {
            return Err(connection.reject(Error::not_connected()));
        }
        command(&mut *connection, self.id)
    }

    fn open<K, F>(&self, command: F) -> Result<RemoteIterator<K>>
    where
        K: RowKind,
        F: FnOnce(&mut Connection, ModelId) -> Result<IteratorId>,
    {
        let id = self.with(command)?;
        Ok(RemoteIterator::new(self.cursor(id)))
    }

    fn cursor(&self, id: IteratorId) -> RemoteCursor {
        RemoteCursor::new(self.connection.clone(), id, self.epoch)
    }

    pub fn add_statement(&self, statement: &Statement) -> Result<()> {
        self.with(|c, m| c.add_statement(m, statement))
    }

    /// Adds statements one request at a time, stopping at the first failure.
    pub fn add_statements<'a, I>(&self, statements: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a Statement>,
    {
        self.with(|c, m| {
            statements
                .into_iter()
                .try_for_each(|statement| c.add_statement(m, statement))
        })
    }

    /// Removes exactly `statement`, context included.
    pub fn remove_statement(&self, statement: &Statement) -> Result<()> {
        self.with(|c, m| c.remove_statement(m, statement))
    }

    /// Removes every statement matching `pattern`; empty nodes match anything.
    pub fn remove_all_statements(&self, pattern: &Statement) -> Result<()> {
        self.with(|c, m| c.remove_all_statements(m, pattern))
    }

    pub fn list_statements(&self, pattern: &Statement) -> Result<StatementIterator> {
        self.open(|c, m| c.list_statements(m, pattern))
    }

    pub fn list_contexts(&self) -> Result<NodeIterator> {
        self.open(|c, m| c.list_contexts(m))
    }

    pub fn contains_statement(&self, statement: &Statement) -> Result<bool> {
        self.with(|c, m| c.contains_statement(m, statement))
    }

    pub fn contains_any_statement(&self, pattern: &Statement) -> Result<bool> {
        self.with(|c, m| c.contains_any_statement(m, pattern))
    }

    pub fn statement_count(&self) -> Result<usize> {
        self.with(|c, m| c.statement_count(m))
    }

    pub fn is_empty(&self) -> Result<bool> {
        self.with(|c, m| c.is_empty(m))
    }

    pub fn create_blank_node(&self) -> Result<Node> {
        self.with(|c, m| c.create_blank_node(m))
    }

    /// Runs `query` and asks the server what shape the answer has. Boolean answers
    /// are fetched right away and their cursor closed.
    pub fn query(&self, query: &str, language: &QueryLanguage) -> Result<QueryResult> {
        let (id, kind) = self.with(|c, m| {
            let id = c.query(m, query, language)?;
            match c.iterator_query_type(id) {
                Ok(kind) => Ok((id, kind)),
                Err(e) => {
                    let _ = c.iterator_close(id);
                    Err(c.reject(e))
                }
            }
        })?;

        let mut cursor = self.cursor(id);
        match kind {
            QueryResultType::Graph => Ok(QueryResult::Graph(RemoteIterator::new(cursor))),
            QueryResultType::Bindings => Ok(QueryResult::Bindings(RemoteIterator::new(cursor))),
            QueryResultType::Bool => {
                let value = cursor.with(|c, id| c.iterator_query_bool_value(id));
                cursor.close()?;
                value
                    .map(QueryResult::Boolean)
                    .map_err(|e| lock(&self.connection).reject(e))
            }
        }
    }
}
