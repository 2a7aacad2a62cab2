use std::{collections::HashSet, sync::Arc, time::Duration};

use bincode::{Decode, decode_from_std_read, encode_to_vec};
use log::{debug, trace, warn};

use crate::{
    config::ClientConfig,
    error::{Error, ErrorCode, Result},
    graph::{BindingSet, Node, Statement},
    protocol::{
        BackendFeatures, IteratorId, ModelId, PROTOCOL_VERSION, QueryLanguage, QueryResultType,
        Request, Transport, TransportError,
        codec::{bounded_config, wire_config},
    },
};

use super::ErrorChannel;

/// One RPC channel to a store server.
///
/// Every command is a single `&mut self` method that writes the request, waits for
/// the reply, and decodes it completely (payload and trailing error) before it
/// returns, so a second command can never start while a reply is still on the wire.
///
/// Any transport failure (timeout, hang-up, undecodable reply) closes the socket for
/// good: the connection is then `Disconnected` and every further call fails with
/// [`ErrorCode::NotConnected`]. The pool dials a replacement on the next request.
#[derive(Debug)]
pub struct Connection {
    transport: Option<Transport>,
    timeout: Option<Duration>,
    errors: Arc<ErrorChannel>,
    open_iterators: HashSet<IteratorId>,
    epoch: u64,
}

/// Decodes one reply from the wire.
pub(crate) struct ReplyReader<'a> {
    transport: &'a mut Transport,
}

type Decoded<T> = std::result::Result<Result<T>, TransportError>;

impl ReplyReader<'_> {
    fn read<T: Decode<()>>(&mut self) -> std::result::Result<T, TransportError> {
        Ok(decode_from_std_read(&mut *self.transport, bounded_config())?)
    }

    /// Reads the trailing error of a "payload then error" reply.
    fn finish<T>(&mut self, payload: T) -> Decoded<T> {
        let error: Error = self.read()?;
        Ok(error.into_result().map(|()| payload))
    }

    /// Reads a payload and its trailing error, then vets the payload.
    fn payload<T, U>(&mut self, check: impl FnOnce(T) -> Result<U>) -> Decoded<U>
    where
        T: Decode<()>,
    {
        let payload: T = self.read()?;
        Ok(self.finish(payload)?.and_then(check))
    }

    /// Reads an `iterator-current*` reply: the error comes first and the payload is
    /// only present when the error is none.
    fn current<T: Decode<()>>(&mut self) -> Decoded<T> {
        let error: Error = self.read()?;
        if !error.is_none() {
            return Ok(Err(error));
        }
        Ok(Ok(self.read()?))
    }
}

fn handle<H>(what: &str, make: fn(u32) -> Option<H>) -> impl FnOnce(u32) -> Result<H> {
    move |raw| {
        make(raw).ok_or_else(|| {
            Error::new(ErrorCode::Unknown, format!("server returned no {what} handle"))
        })
    }
}

fn status(code: i32) -> Result<()> {
    match ErrorCode::from_code(code) {
        ErrorCode::None => Ok(()),
        code => Err(Error::new(code, "command failed without an error message")),
    }
}

impl Connection {
    /// Opens the socket without the version handshake.
    pub fn dial(config: &ClientConfig, errors: Arc<ErrorChannel>) -> Result<Self> {
        let endpoint = config.endpoint.clone();
        let res = Transport::connect(endpoint, config.timeout, config.auto_reconnect)
            .map_err(Error::from);
        errors.record(&res);

        Ok(Self {
            transport: Some(res?),
            timeout: config.timeout,
            errors,
            open_iterators: HashSet::new(),
            epoch: 0,
        })
    }

    /// Dials and performs the version handshake. A peer that refuses our version is
    /// hung up on.
    pub fn connect(config: &ClientConfig, errors: Arc<ErrorChannel>) -> Result<Self> {
        let mut connection = Self::dial(config, errors)?;
        match connection.check_protocol_version(PROTOCOL_VERSION) {
            Ok(true) => {
                debug!("handshake with {} ok (version {PROTOCOL_VERSION})", config.endpoint);
                Ok(connection)
            }
            Ok(false) => {
                connection.close();
                let error = Error::new(
                    ErrorCode::ProtocolMismatch,
                    format!("server rejected protocol version {PROTOCOL_VERSION}"),
                );
                Err(connection.reject(error))
            }
            Err(error) => {
                connection.close();
                Err(error)
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.transport.as_ref().is_some_and(Transport::is_open)
    }

    /// Changes whenever the socket was silently replaced; handles from an older
    /// epoch no longer name anything.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[cfg(test)]
    pub(crate) fn sever(&self) {
        if let Some(transport) = self.transport.as_ref() {
            transport.sever();
        }
    }

    pub fn errors(&self) -> &Arc<ErrorChannel> {
        &self.errors
    }

    /// Records a locally raised error in the channel and hands it back.
    pub(crate) fn reject(&self, error: Error) -> Error {
        self.errors.set(error.clone());
        error
    }

    fn call<T, F>(&mut self, request: Request, read: F) -> Result<T>
    where
        F: FnOnce(&mut ReplyReader<'_>) -> Decoded<T>,
    {
        let result = self.exchange(request, read);
        self.errors.record(&result);
        result
    }

    fn exchange<T, F>(&mut self, request: Request, read: F) -> Result<T>
    where
        F: FnOnce(&mut ReplyReader<'_>) -> Decoded<T>,
    {
        let command = request.command();
        match self.round_trip(request, read) {
            Ok(result) => result,
            Err(err) => {
                if self.is_connected() {
                    warn!("{command:?} failed, dropping connection: {err}");
                }
                self.abandon();
                Err(err.into())
            }
        }
    }

    fn round_trip<T, F>(&mut self, request: Request, read: F) -> Decoded<T>
    where
        F: FnOnce(&mut ReplyReader<'_>) -> Decoded<T>,
    {
        let transport = self.transport.as_mut().ok_or(TransportError::Closed)?;
        trace!("-> {request:?}");

        let bytes = encode_to_vec(&request, wire_config())?;
        transport.send(&bytes)?;
        let reconnected = transport.epoch() != self.epoch;
        if reconnected {
            self.epoch = transport.epoch();
            self.open_iterators.clear();
        }

        if !transport.wait_for_ready_read(self.timeout)? {
            return Err(TransportError::Timeout);
        }
        let mut reader = ReplyReader { transport };
        let reply = read(&mut reader)?;

        // The retried request reached a fresh session that never allocated its
        // handle; the reply is read only to keep the stream framed.
        if reconnected && request.uses_handle() {
            debug!("{:?} sent a handle from epoch {}", request.command(), self.epoch - 1);
            return Ok(Err(Error::not_connected()));
        }
        Ok(reply)
    }

    fn abandon(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.open_iterators.clear();
    }

    /// Closes every iterator still open on the server, then the socket. Skips the
    /// iterators when the socket is already broken. Does not touch the error
    /// channel.
    pub fn close(&mut self) {
        if !self.is_connected() {
            self.abandon();
            return;
        }

        let iterators: Vec<_> = self.open_iterators.drain().collect();
        for id in iterators {
            if !self.is_connected() {
                break;
            }
            let request = Request::IteratorClose { iterator: id.raw() };
            if let Err(e) = self.exchange(request, |r| r.finish(())) {
                debug!("closing iterator {} failed: {e}", id.raw());
            }
        }

        if let Some(mut transport) = self.transport.take() {
            debug!("closing connection to {}", transport.endpoint());
            transport.close();
        }
    }

    pub fn check_protocol_version(&mut self, version: u32) -> Result<bool> {
        self.call(Request::CheckProtocolVersion { version }, |r| Ok(Ok(r.read()?)))
    }

    pub fn create_model(&mut self, name: &str) -> Result<ModelId> {
        let request = Request::CreateModel { name: name.to_string() };
        self.call(request, |r| r.payload(handle("model", ModelId::from_raw)))
    }

    pub fn remove_model(&mut self, name: &str) -> Result<()> {
        let request = Request::RemoveModel { name: name.to_string() };
        self.call(request, |r| r.finish(()))
    }

    pub fn supported_features(&mut self) -> Result<BackendFeatures> {
        self.call(Request::SupportedFeatures, |r| {
            r.payload(|bits| Ok(BackendFeatures::from_bits(bits)))
        })
    }

    pub fn add_statement(&mut self, model: ModelId, statement: &Statement) -> Result<()> {
        let request = Request::AddStatement {
            model: model.raw(),
            statement: statement.clone(),
        };
        self.call(request, |r| r.payload(status))
    }

    pub fn remove_statement(&mut self, model: ModelId, statement: &Statement) -> Result<()> {
        let request = Request::RemoveStatement {
            model: model.raw(),
            statement: statement.clone(),
        };
        self.call(request, |r| r.payload(status))
    }

    pub fn remove_all_statements(&mut self, model: ModelId, pattern: &Statement) -> Result<()> {
        let request = Request::RemoveAllStatements {
            model: model.raw(),
            pattern: pattern.clone(),
        };
        self.call(request, |r| r.payload(status))
    }

    pub fn list_contexts(&mut self, model: ModelId) -> Result<IteratorId> {
        self.open_iterator(Request::ListContexts { model: model.raw() })
    }

    pub fn list_statements(&mut self, model: ModelId, pattern: &Statement) -> Result<IteratorId> {
        self.open_iterator(Request::ListStatements {
            model: model.raw(),
            pattern: pattern.clone(),
        })
    }

    pub fn query(
        &mut self,
        model: ModelId,
        query: &str,
        language: &QueryLanguage,
    ) -> Result<IteratorId> {
        self.open_iterator(Request::Query {
            model: model.raw(),
            query: query.to_string(),
            language: language.clone(),
        })
    }

    fn open_iterator(&mut self, request: Request) -> Result<IteratorId> {
        let id = self.call(request, |r| r.payload(handle("iterator", IteratorId::from_raw)))?;
        self.open_iterators.insert(id);
        Ok(id)
    }

    pub fn statement_count(&mut self, model: ModelId) -> Result<usize> {
        self.call(Request::StatementCount { model: model.raw() }, |r| {
            r.payload(|count: i32| {
                usize::try_from(count).map_err(|_| {
                    Error::new(ErrorCode::Unknown, format!("server returned count {count}"))
                })
            })
        })
    }

    pub fn is_empty(&mut self, model: ModelId) -> Result<bool> {
        self.call(Request::IsEmpty { model: model.raw() }, |r| r.payload(Ok))
    }

    pub fn contains_statement(&mut self, model: ModelId, statement: &Statement) -> Result<bool> {
        let request = Request::ContainsStatement {
            model: model.raw(),
            statement: statement.clone(),
        };
        self.call(request, |r| r.payload(Ok))
    }

    pub fn contains_any_statement(&mut self, model: ModelId, pattern: &Statement) -> Result<bool> {
        let request = Request::ContainsAnyStatement {
            model: model.raw(),
            pattern: pattern.clone(),
        };
        self.call(request, |r| r.payload(Ok))
    }

    pub fn create_blank_node(&mut self, model: ModelId) -> Result<Node> {
        self.call(Request::CreateBlankNode { model: model.raw() }, |r| r.payload(Ok))
    }

    pub fn iterator_next(&mut self, iterator: IteratorId) -> Result<bool> {
        let request = Request::IteratorNext { iterator: iterator.raw() };
        self.call(request, |r| r.payload(Ok))
    }

    pub fn iterator_current_node(&mut self, iterator: IteratorId) -> Result<Node> {
        let request = Request::IteratorCurrentNode { iterator: iterator.raw() };
        self.call(request, |r| r.current())
    }

    pub fn iterator_current_statement(&mut self, iterator: IteratorId) -> Result<Statement> {
        let request = Request::IteratorCurrentStatement { iterator: iterator.raw() };
        self.call(request, |r| r.current())
    }

    pub fn iterator_current_binding_set(&mut self, iterator: IteratorId) -> Result<BindingSet> {
        let request = Request::IteratorCurrentBindingSet { iterator: iterator.raw() };
        self.call(request, |r| r.current())
    }

    pub fn iterator_query_type(&mut self, iterator: IteratorId) -> Result<QueryResultType> {
        let request = Request::IteratorQueryType { iterator: iterator.raw() };
        self.call(request, |r| r.payload(Ok))
    }

    pub fn iterator_query_bool_value(&mut self, iterator: IteratorId) -> Result<bool> {
        let request = Request::IteratorQueryBoolValue { iterator: iterator.raw() };
        self.call(request, |r| r.payload(Ok))
    }

    /// Frees the server-side cursor. The handle is forgotten locally whatever the
    /// outcome.
    pub fn iterator_close(&mut self, iterator: IteratorId) -> Result<()> {
        self.open_iterators.remove(&iterator);
        let request = Request::IteratorClose { iterator: iterator.raw() };
        self.call(request, |r| r.finish(()))
    }

    #[cfg(test)]
    pub(crate) fn open_iterator_count(&self) -> usize {
        self.open_iterators.len()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read, Write},
        net::TcpListener,
        thread,
        time::Instant,
    };

    use crate::{
        backend::MemoryBackend,
        config::ServerConfig,
        protocol::Endpoint,
        server::GraphServer,
    };

    use super::*;

    fn serve_memory() -> ClientConfig {
        let config = ServerConfig::new(Endpoint::Tcp("127.0.0.1:0".into()));
        let server = GraphServer::bind(config, MemoryBackend::new()).unwrap();
        let endpoint = server.endpoint().clone();
        thread::spawn(move || server.serve());
        ClientConfig::new(endpoint).with_timeout(Some(Duration::from_secs(5)))
    }

    fn statement(o: &str) -> Statement {
        Statement::new(
            Node::resource("http://example.org/s"),
            Node::resource("http://example.org/p"),
            Node::literal(o),
        )
    }

    /// A peer that answers the first request with `reply` and then reads forever.
    fn scripted_peer(reply: Vec<u8>) -> ClientConfig {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = Endpoint::Tcp(listener.local_addr().unwrap().to_string());
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = [0_u8; 6];
            stream.read_exact(&mut request).unwrap();
            stream.write_all(&reply).unwrap();
            let mut sink = Vec::new();
            let _ = stream.read_to_end(&mut sink);
        });
        ClientConfig::new(endpoint).with_timeout(Some(Duration::from_secs(5)))
    }

    #[test]
    fn add_and_list_one_statement() {
        let config = serve_memory();
        let mut conn = Connection::connect(&config, Arc::default()).unwrap();

        let model = conn.create_model("m").unwrap();
        conn.add_statement(model, &statement("o")).unwrap();
        assert_eq!(conn.statement_count(model).unwrap(), 1);

        let it = conn.list_statements(model, &Statement::any()).unwrap();
        assert!(conn.iterator_next(it).unwrap());
        assert_eq!(conn.iterator_current_statement(it).unwrap(), statement("o"));
        assert!(!conn.iterator_next(it).unwrap());
        conn.iterator_close(it).unwrap();
        assert_eq!(conn.open_iterator_count(), 0);
    }

    #[test]
    fn debug_shows_the_transport() {
        let config = serve_memory();
        let mut conn = Connection::connect(&config, Arc::default()).unwrap();

        let shown = format!("{conn:?}");
        assert!(shown.starts_with("Connection {"));
        assert!(shown.contains("transport: Some(Transport {"));

        conn.close();
        assert!(format!("{conn:?}").contains("transport: None"));
    }

    #[test]
    fn error_replies_keep_the_stream_in_sync() {
        let config = serve_memory();
        let errors = Arc::new(ErrorChannel::new());
        let mut conn = Connection::connect(&config, Arc::clone(&errors)).unwrap();
        let model = conn.create_model("m").unwrap();

        let invalid = Statement::new(Node::Empty, Node::resource("p"), Node::literal("o"));
        let err = conn.add_statement(model, &invalid).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert_eq!(errors.last_error(), err);

        let bogus = IteratorId::from_raw(0xdead).unwrap();
        let err = conn.iterator_current_node(bogus).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);

        assert!(conn.is_empty(model).unwrap());
        assert!(errors.last_error().is_none());
        assert!(conn.is_connected());
    }

    #[test]
    fn close_releases_tracked_iterators() {
        let config = serve_memory();
        let mut conn = Connection::connect(&config, Arc::default()).unwrap();
        let model = conn.create_model("m").unwrap();
        conn.list_statements(model, &Statement::any()).unwrap();
        conn.list_contexts(model).unwrap();
        assert_eq!(conn.open_iterator_count(), 2);

        conn.close();
        assert!(!conn.is_connected());
        assert_eq!(conn.open_iterator_count(), 0);

        let err = conn.statement_count(model).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotConnected);
    }

    #[test]
    fn refused_version_is_a_protocol_mismatch() {
        let config = scripted_peer(vec![0]);
        let errors = Arc::new(ErrorChannel::new());

        let err = Connection::connect(&config, Arc::clone(&errors)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProtocolMismatch);
        assert_eq!(errors.last_error().code(), ErrorCode::ProtocolMismatch);
    }

    #[test]
    fn silent_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = Endpoint::Tcp(listener.local_addr().unwrap().to_string());
        let config = ClientConfig::new(endpoint).with_timeout(Some(Duration::from_millis(200)));

        let mut conn = Connection::dial(&config, Arc::default()).unwrap();
        let (_peer, _) = listener.accept().unwrap();

        let start = Instant::now();
        let model = ModelId::from_raw(1).unwrap();
        let err = conn.statement_count(model).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Timeout);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!conn.is_connected());

        let err = conn.statement_count(model).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotConnected);
    }

    #[test]
    fn silent_peer_fails_the_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = Endpoint::Tcp(listener.local_addr().unwrap().to_string());
        let config = ClientConfig::new(endpoint).with_timeout(Some(Duration::from_millis(200)));

        let err = Connection::connect(&config, Arc::default()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Timeout);
        drop(listener);
    }

    #[test]
    fn zero_handle_without_error_is_unknown() {
        let mut reply = vec![0, 0, 0, 0];
        reply.extend_from_slice(&[0; 9]);
        let config = scripted_peer(reply);

        let mut conn = Connection::dial(&config, Arc::default()).unwrap();
        let err = conn.create_model("m").unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unknown);
        assert!(conn.is_connected());
    }

    #[test]
    fn dial_failure_is_recorded() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = Endpoint::Tcp(listener.local_addr().unwrap().to_string());
        drop(listener);

        let errors = Arc::new(ErrorChannel::new());
        let config = ClientConfig::new(endpoint).with_timeout(Some(Duration::from_secs(1)));
        let err = Connection::dial(&config, Arc::clone(&errors)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Io);
        assert_eq!(errors.last_error(), err);
    }
}
