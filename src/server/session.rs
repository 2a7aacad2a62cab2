use std::{fmt, sync::Arc};

use bincode::{decode_from_std_read, encode_to_vec};
use log::{debug, trace};

use crate::{
    backend::{Backend, QueryAnswer, StoreModel},
    error::{Error, ErrorCode, Result},
    graph::{BindingSet, Node, Statement},
    protocol::{
        CurrentRow, PROTOCOL_VERSION, QueryResultType, Reply, ReplyFrame, Request, Transport,
        TransportError,
        codec::{bounded_config, wire_config},
    },
};

use super::arena::Arena;

/// A materialized result set.
#[derive(Debug)]
enum Rows {
    Nodes(Vec<Node>),
    Statements(Vec<Statement>),
    Bindings(Vec<BindingSet>),
    Bool(bool),
}

impl Rows {
    fn len(&self) -> usize {
        match self {
            Rows::Nodes(rows) => rows.len(),
            Rows::Statements(rows) => rows.len(),
            Rows::Bindings(rows) => rows.len(),
            Rows::Bool(_) => 0,
        }
    }
}

impl From<QueryAnswer> for Rows {
    fn from(value: QueryAnswer) -> Self {
        match value {
            QueryAnswer::Graph(statements) => Rows::Statements(statements),
            QueryAnswer::Bool(value) => Rows::Bool(value),
            QueryAnswer::Bindings(rows) => Rows::Bindings(rows),
        }
    }
}

#[derive(Debug)]
struct Cursor {
    rows: Rows,
    /// `None` before the first `iterator-next`.
    position: Option<usize>,
    /// Set for cursors opened by `query`.
    kind: Option<QueryResultType>,
}

impl Cursor {
    fn new(rows: Rows, kind: Option<QueryResultType>) -> Self {
        Self {
            rows,
            position: None,
            kind,
        }
    }

    fn advance(&mut self) -> bool {
        let len = self.rows.len();
        let next = self.position.map_or(0, |p| (p + 1).min(len));
        self.position = Some(next);
        next < len
    }

    fn current(&self) -> Result<usize> {
        match self.position {
            Some(p) if p < self.rows.len() => Ok(p),
            _ => Err(Error::invalid_argument("iterator is not positioned on an element")),
        }
    }

    fn current_row(&self, want: RowKind) -> Result<CurrentRow> {
        match (&self.rows, want) {
            (Rows::Nodes(rows), RowKind::Node) => {
                self.current().map(|p| CurrentRow::Node(rows[p].clone()))
            }
            (Rows::Statements(rows), RowKind::Statement) => {
                self.current().map(|p| CurrentRow::Statement(rows[p].clone()))
            }
            (Rows::Bindings(rows), RowKind::Bindings) => {
                self.current().map(|p| CurrentRow::Bindings(rows[p].clone()))
            }
            _ => Err(Error::invalid_argument(format!("iterator does not yield {want}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowKind {
    Node,
    Statement,
    Bindings,
}

impl fmt::Display for RowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKind::Node => write!(f, "nodes"),
            RowKind::Statement => write!(f, "statements"),
            RowKind::Bindings => write!(f, "binding sets"),
        }
    }
}

/// One accepted socket and the handles it has allocated.
///
/// All handles die with the session: when the peer hangs up or sends something
/// undecodable the session ends and its arenas are dropped.
pub(crate) struct Session<B: Backend> {
    backend: Arc<B>,
    transport: Transport,
    models: Arena<Arc<B::Model>>,
    cursors: Arena<Cursor>,
}

fn invalid_model() -> Error {
    Error::invalid_argument("invalid model handle")
}

fn invalid_iterator() -> Error {
    Error::invalid_argument("invalid iterator handle")
}

fn too_many_handles() -> Error {
    Error::new(ErrorCode::Unknown, "too many open handles")
}

/// Payload on success, `fallback` plus the error otherwise.
fn respond<T>(result: Result<T>, fallback: Reply, wrap: impl FnOnce(T) -> Reply) -> ReplyFrame {
    match result {
        Ok(value) => wrap(value).with_error(Error::none()),
        Err(error) => fallback.with_error(error),
    }
}

/// The error code doubles as the payload of status replies.
fn status(result: Result<()>) -> ReplyFrame {
    let error = result.err().unwrap_or_default();
    Reply::Code(error.code().code()).with_error(error)
}

impl<B: Backend> Session<B> {
    pub(crate) fn new(backend: Arc<B>, transport: Transport) -> Self {
        Self {
            backend,
            transport,
            models: Arena::new(),
            cursors: Arena::new(),
        }
    }

    /// Serves requests until the peer hangs up. An undecodable request ends the
    /// session with an error.
    pub(crate) fn run(mut self) -> std::result::Result<(), TransportError> {
        loop {
            match self.transport.wait_for_ready_read(None) {
                Ok(_) => {}
                Err(TransportError::Closed) => {
                    debug!(
                        "session closed ({} models, {} iterators open)",
                        self.models.len(),
                        self.cursors.len()
                    );
                    return Ok(());
                }
                Err(e) => return Err(e),
            }

            let request: Request = decode_from_std_read(&mut self.transport, bounded_config())?;
            trace!("<- {request:?}");
            let frame = self.dispatch(request);
            let bytes = encode_to_vec(frame, wire_config())?;
            self.transport.send(&bytes)?;
        }
    }

    fn model(&self, handle: u32) -> Result<&Arc<B::Model>> {
        self.models.get(handle).ok_or_else(invalid_model)
    }

    fn cursor(&mut self, handle: u32) -> Result<&mut Cursor> {
        self.cursors.get_mut(handle).ok_or_else(invalid_iterator)
    }

    fn open_cursor(&mut self, rows: Result<Rows>, kind: Option<QueryResultType>) -> ReplyFrame {
        let handle = rows.and_then(|rows| {
            self.cursors
                .insert(Cursor::new(rows, kind))
                .map_err(|_| too_many_handles())
        });
        respond(handle, Reply::Handle(0), Reply::Handle)
    }

    fn dispatch(&mut self, request: Request) -> ReplyFrame {
        match request {
            Request::CheckProtocolVersion { version } => {
                debug!("client asks for protocol version {version}");
                Reply::Version(version <= PROTOCOL_VERSION).with_error(Error::none())
            }
            Request::CreateModel { name } => {
                let handle = self.backend.create_model(&name).and_then(|model| {
                    self.models.insert(model).map_err(|_| too_many_handles())
                });
                respond(handle, Reply::Handle(0), Reply::Handle)
            }
            Request::RemoveModel { name } => {
                respond(self.backend.remove_model(&name), Reply::Empty, |()| Reply::Empty)
            }
            Request::SupportedFeatures => {
                let features = self.backend.supported_features().bits();
                Reply::Features(features).with_error(Error::none())
            }
            Request::AddStatement { model, statement } => {
                status(self.model(model).and_then(|m| m.add_statement(&statement)))
            }
            Request::RemoveStatement { model, statement } => {
                status(self.model(model).and_then(|m| m.remove_statement(&statement)))
            }
            Request::RemoveAllStatements { model, pattern } => {
                status(self.model(model).and_then(|m| m.remove_all_statements(&pattern)))
            }
            Request::ListContexts { model } => {
                let rows = self.model(model).and_then(|m| m.list_contexts());
                self.open_cursor(rows.map(Rows::Nodes), None)
            }
            Request::ListStatements { model, pattern } => {
                let rows = self.model(model).and_then(|m| m.list_statements(&pattern));
                self.open_cursor(rows.map(Rows::Statements), None)
            }
            Request::Query {
                model,
                query,
                language,
            } => {
                let answer = self.model(model).and_then(|m| m.query(&query, &language));
                let kind = answer.as_ref().ok().map(|answer| match answer {
                    QueryAnswer::Graph(_) => QueryResultType::Graph,
                    QueryAnswer::Bool(_) => QueryResultType::Bool,
                    QueryAnswer::Bindings(_) => QueryResultType::Bindings,
                });
                self.open_cursor(answer.map(Rows::from), kind)
            }
            Request::StatementCount { model } => {
                let count = self
                    .model(model)
                    .and_then(|m| m.statement_count())
                    .and_then(|n| {
                        i32::try_from(n)
                            .map_err(|_| Error::new(ErrorCode::Unknown, "count overflows"))
                    });
                respond(count, Reply::Count(-1), Reply::Count)
            }
            Request::IsEmpty { model } => {
                let empty = self.model(model).and_then(|m| m.is_empty());
                respond(empty, Reply::Flag(false), Reply::Flag)
            }
            Request::ContainsStatement { model, statement } => {
                let found = self.model(model).and_then(|m| m.contains_statement(&statement));
                respond(found, Reply::Flag(false), Reply::Flag)
            }
            Request::ContainsAnyStatement { model, pattern } => {
                let found = self.model(model).and_then(|m| m.contains_any_statement(&pattern));
                respond(found, Reply::Flag(false), Reply::Flag)
            }
            Request::CreateBlankNode { model } => {
                let node = self.model(model).and_then(|m| m.create_blank_node());
                respond(node, Reply::Node(Node::Empty), Reply::Node)
            }
            Request::IteratorNext { iterator } => {
                let more = self.cursor(iterator).map(Cursor::advance);
                respond(more, Reply::Flag(false), Reply::Flag)
            }
            Request::IteratorCurrentNode { iterator } => self.current(iterator, RowKind::Node),
            Request::IteratorCurrentStatement { iterator } => {
                self.current(iterator, RowKind::Statement)
            }
            Request::IteratorCurrentBindingSet { iterator } => {
                self.current(iterator, RowKind::Bindings)
            }
            Request::IteratorQueryType { iterator } => {
                let kind = self.cursor(iterator).and_then(|c| {
                    c.kind
                        .ok_or_else(|| Error::invalid_argument("iterator is not a query result"))
                });
                respond(kind, Reply::QueryType(QueryResultType::Graph), Reply::QueryType)
            }
            Request::IteratorQueryBoolValue { iterator } => {
                let value = self.cursor(iterator).and_then(|c| match c.rows {
                    Rows::Bool(value) => Ok(value),
                    _ => Err(Error::invalid_argument("iterator is not a boolean result")),
                });
                respond(value, Reply::Flag(false), Reply::Flag)
            }
            Request::IteratorClose { iterator } => {
                let closed = self
                    .cursors
                    .remove(iterator)
                    .map(|_| ())
                    .ok_or_else(invalid_iterator);
                respond(closed, Reply::Empty, |()| Reply::Empty)
            }
        }
    }

    fn current(&mut self, iterator: u32, want: RowKind) -> ReplyFrame {
        let placeholder = CurrentRow::Node(Node::Empty);
        let row = self.cursor(iterator).and_then(|c| c.current_row(want));
        respond(row, Reply::Current(placeholder), Reply::Current)
    }
}
