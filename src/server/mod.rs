//! Reference store server.
//!
//! [`GraphServer`] accepts connections on a TCP or Unix-domain endpoint and serves
//! each one on its own thread, so a client keeps its session for as long as it
//! stays connected. A session executes the command catalogue against a
//! [`Backend`], keeping the models and result cursors it opened in per-session
//! arenas that are dropped when the socket closes.
mod arena;
mod session;

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

use log::{debug, info, warn};

use crate::{
    backend::Backend,
    config::ServerConfig,
    protocol::{Endpoint, Listener, Stream, Transport, TransportError},
};

use session::Session;

pub struct GraphServer<B: Backend> {
    listener: Listener,
    endpoint: Endpoint,
    backend: Arc<B>,
    max_sessions: usize,
    live: Arc<AtomicUsize>,
}

/// Counts a session as live until its thread finishes.
struct SessionSlot(Arc<AtomicUsize>);

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<B: Backend> GraphServer<B> {
    /// Binds the configured endpoint. Port 0 picks a free port; see
    /// [`GraphServer::endpoint`].
    pub fn bind(config: ServerConfig, backend: B) -> Result<Self, TransportError> {
        let listener = config.endpoint.bind()?;
        let endpoint = listener.local_endpoint()?;
        Ok(Self {
            listener,
            endpoint,
            backend: Arc::new(backend),
            max_sessions: config.max_sessions.max(1),
            live: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// The endpoint clients should dial.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Number of sessions currently being served.
    pub fn sessions(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Accepts connections until the process exits.
    pub fn serve(self) -> Result<(), TransportError> {
        info!(
            "listening at {} (at most {} sessions)",
            self.endpoint, self.max_sessions
        );

        let mut accepted: u64 = 0;
        loop {
            match self.listener.accept() {
                Ok(stream) => {
                    accepted += 1;
                    self.spawn_session(accepted, stream);
                }
                Err(e) => warn!("broken connection: {e}"),
            }
        }
    }

    fn spawn_session(&self, n: u64, stream: Stream) {
        if self.live.fetch_add(1, Ordering::SeqCst) >= self.max_sessions {
            self.live.fetch_sub(1, Ordering::SeqCst);
            warn!("refusing session {n}: {} sessions open", self.max_sessions);
            let _ = stream.shutdown();
            return;
        }

        let slot = SessionSlot(Arc::clone(&self.live));
        let backend = Arc::clone(&self.backend);
        let transport = Transport::accepted(stream, self.endpoint.clone());
        let spawned = thread::Builder::new()
            .name(format!("session-{n}"))
            .spawn(move || {
                let _slot = slot;
                debug!("session {n} started");
                if let Err(e) = Session::new(backend, transport).run() {
                    warn!("session {n} dropped: {e}");
                }
            });
        if let Err(e) = spawned {
            warn!("could not start session {n}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read, Write},
        net::TcpStream,
        thread,
        time::{Duration, Instant},
    };

    use bincode::{decode_from_slice, encode_to_vec};

    use crate::{
        backend::MemoryBackend,
        error::{Error, ErrorCode},
        graph::Statement,
        protocol::{Request, codec::wire_config},
    };

    use super::*;

    fn spawn_server(config: ServerConfig) -> String {
        let server = GraphServer::bind(config, MemoryBackend::new()).unwrap();
        let Endpoint::Tcp(address) = server.endpoint().clone() else {
            unreachable!()
        };
        thread::spawn(move || server.serve());
        address
    }

    fn serve() -> TcpStream {
        let address = spawn_server(ServerConfig::new(Endpoint::Tcp("127.0.0.1:0".into())));
        dial(&address)
    }

    fn dial(address: &str) -> TcpStream {
        let stream = TcpStream::connect(address).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        stream
    }

    /// Whether the server answered a handshake on `stream`.
    fn handshake(stream: &mut TcpStream) -> bool {
        let request = encode_to_vec(Request::CheckProtocolVersion { version: 1 }, wire_config());
        let mut reply = [0_u8; 1];
        stream.write_all(&request.unwrap()).is_ok()
            && stream.read_exact(&mut reply).is_ok()
            && reply == [1]
    }

    fn send(stream: &mut TcpStream, request: Request) {
        stream.write_all(&encode_to_vec(request, wire_config()).unwrap()).unwrap();
    }

    fn read_n(stream: &mut TcpStream, n: usize) -> Vec<u8> {
        let mut buf = vec![0_u8; n];
        stream.read_exact(&mut buf).unwrap();
        buf
    }

    #[test]
    fn bind_resolves_ephemeral_port() {
        let config = ServerConfig::new(Endpoint::Tcp("127.0.0.1:0".into()));
        let server = GraphServer::bind(config, MemoryBackend::new()).unwrap();
        assert!(!server.endpoint().to_string().ends_with(":0"));
    }

    #[test]
    fn serves_every_connected_client_at_once() {
        let address = spawn_server(ServerConfig::new(Endpoint::Tcp("127.0.0.1:0".into())));

        // Every client keeps its session open while the next one connects.
        let mut clients: Vec<TcpStream> = (0..24).map(|_| dial(&address)).collect();
        for client in clients.iter_mut() {
            assert!(handshake(client));
        }
        for client in clients.iter_mut().rev() {
            assert!(handshake(client));
        }
    }

    #[test]
    fn refuses_clients_over_the_session_limit() {
        let config =
            ServerConfig::new(Endpoint::Tcp("127.0.0.1:0".into())).with_max_sessions(1);
        let address = spawn_server(config);

        let mut first = dial(&address);
        assert!(handshake(&mut first));

        let started = Instant::now();
        let mut second = dial(&address);
        let mut buf = [0_u8; 1];
        assert_eq!(second.read(&mut buf).unwrap(), 0);
        assert!(started.elapsed() < Duration::from_secs(5));

        // The slot frees once the first session notices its socket closed.
        drop(first);
        let served = (0..100).any(|_| {
            let mut next = dial(&address);
            handshake(&mut next) || {
                thread::sleep(Duration::from_millis(20));
                false
            }
        });
        assert!(served);
    }

    #[test]
    fn handshake_replies_with_a_bare_bool() {
        let mut stream = serve();
        send(&mut stream, Request::CheckProtocolVersion { version: 1 });
        assert_eq!(read_n(&mut stream, 1), vec![1]);

        send(&mut stream, Request::CheckProtocolVersion { version: 99 });
        assert_eq!(read_n(&mut stream, 1), vec![0]);
    }

    #[test]
    fn unknown_model_handle_is_invalid_argument() {
        let mut stream = serve();
        send(&mut stream, Request::StatementCount { model: 42 });

        let bytes = read_n(&mut stream, 4 + 1 + 4 + 4 + "invalid model handle".len());
        assert_eq!(&bytes[..4], &(-1_i32).to_be_bytes());
        let (error, _): (Error, usize) = decode_from_slice(&bytes[4..], wire_config()).unwrap();
        assert_eq!(error.code(), ErrorCode::InvalidArgument);
        assert_eq!(error.message(), "invalid model handle");
    }

    #[test]
    fn current_on_unknown_iterator_writes_only_the_error() {
        let mut stream = serve();
        send(&mut stream, Request::IteratorCurrentStatement { iterator: 5 });
        let bytes = read_n(&mut stream, 1 + 4 + 4 + "invalid iterator handle".len());
        let (error, read): (Error, usize) = decode_from_slice(&bytes, wire_config()).unwrap();
        assert_eq!(read, bytes.len());
        assert_eq!(error.message(), "invalid iterator handle");

        // Nothing else follows: the next reply starts right after.
        send(&mut stream, Request::CheckProtocolVersion { version: 1 });
        assert_eq!(read_n(&mut stream, 1), vec![1]);
    }

    #[test]
    fn unknown_command_closes_the_socket() {
        let mut stream = serve();
        stream.write_all(&[0x7f, 0x7f]).unwrap();

        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());
    }

    #[test]
    fn query_type_of_a_listing_is_invalid() {
        let mut stream = serve();
        send(&mut stream, Request::CreateModel { name: "m".into() });
        let model = u32::from_be_bytes(read_n(&mut stream, 4 + 9)[..4].try_into().unwrap());

        send(&mut stream, Request::ListStatements { model, pattern: Statement::any() });
        let iterator = u32::from_be_bytes(read_n(&mut stream, 4 + 9)[..4].try_into().unwrap());
        assert_ne!(iterator, 0);

        send(&mut stream, Request::IteratorQueryType { iterator });
        let bytes = read_n(&mut stream, 1 + 1 + 4 + 4 + "iterator is not a query result".len());
        let (error, _): (Error, usize) = decode_from_slice(&bytes[1..], wire_config()).unwrap();
        assert_eq!(error.code(), ErrorCode::InvalidArgument);
    }
}
