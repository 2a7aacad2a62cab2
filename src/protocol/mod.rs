//! Client-server communication protocol.
//!
//! This module defines the private binary protocol spoken between a graphlink client
//! and a store server: the command catalogue, the encoding of graph values, the reply
//! framing, and the socket transport underneath.
//!
//! # Overview
//!
//! The protocol is strictly request-then-reply over one stream socket. A request is a
//! `u16` command tag followed by the command's arguments in a fixed order. The reply
//! is the command's payload followed by an [`Error`](crate::Error) value, which is
//! read even when the payload alone looks successful. Nothing is pipelined: a second
//! request may only be written once the previous reply has been fully consumed.
//!
//! # Binary Format
//!
//! - All integers are fixed width and big-endian.
//! - Strings are a `u32` byte length followed by UTF-8 bytes.
//! - See [`codec`] for the layout of nodes, statements, binding sets and errors.
//!
//! # Quirks
//!
//! The three `iterator-current*` commands answer with the error *before* the payload
//! and omit the payload when the error is set. The handshake
//! ([`Command::CheckProtocolVersion`]) answers with a bare boolean so a foreign peer is
//! detected before any typed decoding is trusted. Both rules are kept inside
//! [`ReplyFrame`] and the client's reply reader.
//!
//! # Key Components
//!
//! - [`Request`]: a command and its arguments.
//! - [`Reply`]: the payload written back by the server.
//! - [`Transport`]: blocking, partial-I/O-safe socket wrapper.
pub mod codec;
mod request;
mod response;
mod transport;

use bincode::{
    Decode, Encode,
    de::Decoder,
    enc::Encoder,
    error::{DecodeError, EncodeError},
};

pub use request::Request;
pub use response::{CurrentRow, Reply, ReplyFrame};
pub use transport::{Endpoint, Listener, ShortRead, Stream, Transport, TransportError};

use codec::{decode_string, encode_str, unknown_tag};

/// Version announced in the handshake; a server accepts any version up to its own.
pub const PROTOCOL_VERSION: u32 = 1;

/// The fixed command catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Command {
    CreateModel = 0x01,
    RemoveModel = 0x02,
    SupportedFeatures = 0x03,
    AddStatement = 0x04,
    ListContexts = 0x05,
    Query = 0x06,
    ListStatements = 0x07,
    RemoveStatement = 0x08,
    RemoveAllStatements = 0x09,
    StatementCount = 0x0a,
    IsEmpty = 0x0b,
    ContainsStatement = 0x0c,
    ContainsAnyStatement = 0x0d,
    CreateBlankNode = 0x0e,
    IteratorNext = 0x10,
    IteratorCurrentNode = 0x11,
    IteratorCurrentStatement = 0x12,
    IteratorCurrentBindingSet = 0x13,
    IteratorQueryType = 0x14,
    IteratorQueryBoolValue = 0x15,
    IteratorClose = 0x16,
    CheckProtocolVersion = 0x17,
}

impl From<Command> for u16 {
    fn from(value: Command) -> Self {
        value as u16
    }
}

impl TryFrom<u16> for Command {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        let command = match value {
            0x01 => Command::CreateModel,
            0x02 => Command::RemoveModel,
            0x03 => Command::SupportedFeatures,
            0x04 => Command::AddStatement,
            0x05 => Command::ListContexts,
            0x06 => Command::Query,
            0x07 => Command::ListStatements,
            0x08 => Command::RemoveStatement,
            0x09 => Command::RemoveAllStatements,
            0x0a => Command::StatementCount,
            0x0b => Command::IsEmpty,
            0x0c => Command::ContainsStatement,
            0x0d => Command::ContainsAnyStatement,
            0x0e => Command::CreateBlankNode,
            0x10 => Command::IteratorNext,
            0x11 => Command::IteratorCurrentNode,
            0x12 => Command::IteratorCurrentStatement,
            0x13 => Command::IteratorCurrentBindingSet,
            0x14 => Command::IteratorQueryType,
            0x15 => Command::IteratorQueryBoolValue,
            0x16 => Command::IteratorClose,
            0x17 => Command::CheckProtocolVersion,
            other => return Err(other),
        };
        Ok(command)
    }
}

/// Handle of a model opened on the server. Only meaningful on the connection that
/// created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelId(u32);

/// Handle of a result cursor living on the server. Only meaningful on the
/// connection that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IteratorId(u32);

macro_rules! handle {
    ($name:ident) => {
        impl $name {
            /// Wraps a peer-allocated value; `0` never names anything.
            pub fn from_raw(raw: u32) -> Option<Self> {
                (raw != 0).then_some(Self(raw))
            }

            pub fn raw(self) -> u32 {
                self.0
            }
        }
    };
}

handle!(ModelId);
handle!(IteratorId);

/// Shape of a query result, as reported by `iterator-query-type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryResultType {
    Graph,
    Bool,
    Bindings,
}

impl From<QueryResultType> for u8 {
    fn from(value: QueryResultType) -> Self {
        match value {
            QueryResultType::Graph => 1,
            QueryResultType::Bool => 2,
            QueryResultType::Bindings => 3,
        }
    }
}

impl TryFrom<u8> for QueryResultType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(QueryResultType::Graph),
            2 => Ok(QueryResultType::Bool),
            3 => Ok(QueryResultType::Bindings),
            other => Err(other),
        }
    }
}

impl<Context> Decode<Context> for QueryResultType {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        let tag = u8::decode(decoder)?;
        QueryResultType::try_from(tag).map_err(|tag| unknown_tag("query result", tag))
    }
}

/// Language a query string is written in. Query text is passed through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum QueryLanguage {
    #[default]
    None,
    Sparql,
    Rql,
    Serql,
    /// A language known to the backend by name only.
    User(String),
}

const LANGUAGE_USER: u16 = 0xffff;

impl Encode for QueryLanguage {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        let (tag, name) = match self {
            QueryLanguage::None => (0_u16, ""),
            QueryLanguage::Sparql => (1, ""),
            QueryLanguage::Rql => (2, ""),
            QueryLanguage::Serql => (3, ""),
            QueryLanguage::User(name) => (LANGUAGE_USER, name.as_str()),
        };
        tag.encode(encoder)?;
        encode_str(name, encoder)
    }
}

impl<Context> Decode<Context> for QueryLanguage {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        let tag = u16::decode(decoder)?;
        let name = decode_string(decoder)?;
        match tag {
            0 => Ok(QueryLanguage::None),
            1 => Ok(QueryLanguage::Sparql),
            2 => Ok(QueryLanguage::Rql),
            3 => Ok(QueryLanguage::Serql),
            LANGUAGE_USER => Ok(QueryLanguage::User(name)),
            other => Err(unknown_tag("query language", other)),
        }
    }
}

/// Bitmask of capabilities advertised by the storage backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BackendFeatures(u32);

impl BackendFeatures {
    pub const NONE: Self = Self(0x0);
    pub const ADD_STATEMENT: Self = Self(0x1);
    pub const REMOVE_STATEMENTS: Self = Self(0x2);
    pub const LIST_STATEMENTS: Self = Self(0x4);
    pub const QUERY: Self = Self(0x8);
    pub const INFERENCE: Self = Self(0x10);
    pub const INFERENCE_OPTIONAL: Self = Self(0x20);
    pub const CONTEXT: Self = Self(0x40);
    pub const STORAGE_MEMORY: Self = Self(0x80);
    pub const USER: Self = Self(0x100);

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for BackendFeatures {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}
