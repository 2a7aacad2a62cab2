use bincode::{Encode, enc::Encoder, error::EncodeError};

use crate::{
    error::Error,
    graph::{BindingSet, Node, Statement},
};

use super::QueryResultType;

/// Payload of a server reply.
///
/// Replies are encoded together with their trailing [`Error`] through
/// [`Reply::with_error`], which is where the ordering rules live:
///
/// - every reply writes its payload followed by the error;
/// - the three `iterator-current*` replies ([`Reply::Current`]) write the error
///   first and skip the payload entirely when the error is set;
/// - the protocol handshake ([`Reply::Version`]) writes a bare boolean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Handle(u32),
    Features(u32),
    Code(i32),
    Count(i32),
    Flag(bool),
    Node(Node),
    QueryType(QueryResultType),
    Empty,
    Current(CurrentRow),
    Version(bool),
}

/// The element an iterator is positioned on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CurrentRow {
    Node(Node),
    Statement(Statement),
    Bindings(BindingSet),
}

impl Reply {
    pub fn with_error(self, error: Error) -> ReplyFrame {
        ReplyFrame { reply: self, error }
    }
}

/// A reply and its trailing error, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyFrame {
    pub reply: Reply,
    pub error: Error,
}

impl Encode for ReplyFrame {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        match &self.reply {
            Reply::Version(accepted) => return accepted.encode(encoder),
            Reply::Current(row) => {
                self.error.encode(encoder)?;
                if !self.error.is_none() {
                    return Ok(());
                }
                return match row {
                    CurrentRow::Node(node) => node.encode(encoder),
                    CurrentRow::Statement(statement) => statement.encode(encoder),
                    CurrentRow::Bindings(set) => set.encode(encoder),
                };
            }
            Reply::Handle(handle) => handle.encode(encoder)?,
            Reply::Features(features) => features.encode(encoder)?,
            Reply::Code(code) | Reply::Count(code) => code.encode(encoder)?,
            Reply::Flag(flag) => flag.encode(encoder)?,
            Reply::Node(node) => node.encode(encoder)?,
            Reply::QueryType(kind) => u8::from(*kind).encode(encoder)?,
            Reply::Empty => {}
        }
        self.error.encode(encoder)
    }
}
