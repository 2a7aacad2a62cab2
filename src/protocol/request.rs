use bincode::{
    Decode, Encode,
    de::Decoder,
    enc::Encoder,
    error::{DecodeError, EncodeError},
};

use crate::graph::Statement;

use super::{
    Command, QueryLanguage,
    codec::{decode_string, encode_str, unknown_tag},
};

/// A command together with its arguments, in wire order.
///
/// Model and iterator handles travel as raw `u32`s; the server decides whether they
/// still name something.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    CreateModel { name: String },
    RemoveModel { name: String },
    SupportedFeatures,
    AddStatement { model: u32, statement: Statement },
    ListContexts { model: u32 },
    Query {
        model: u32,
        query: String,
        language: QueryLanguage,
    },
    ListStatements { model: u32, pattern: Statement },
    RemoveStatement { model: u32, statement: Statement },
    RemoveAllStatements { model: u32, pattern: Statement },
    StatementCount { model: u32 },
    IsEmpty { model: u32 },
    ContainsStatement { model: u32, statement: Statement },
    ContainsAnyStatement { model: u32, pattern: Statement },
    CreateBlankNode { model: u32 },
    IteratorNext { iterator: u32 },
    IteratorCurrentNode { iterator: u32 },
    IteratorCurrentStatement { iterator: u32 },
    IteratorCurrentBindingSet { iterator: u32 },
    IteratorQueryType { iterator: u32 },
    IteratorQueryBoolValue { iterator: u32 },
    IteratorClose { iterator: u32 },
    CheckProtocolVersion { version: u32 },
}

impl Request {
    pub fn command(&self) -> Command {
        match self {
            Request::CreateModel { .. } => Command::CreateModel,
            Request::RemoveModel { .. } => Command::RemoveModel,
            Request::SupportedFeatures => Command::SupportedFeatures,
            Request::AddStatement { .. } => Command::AddStatement,
            Request::ListContexts { .. } => Command::ListContexts,
            Request::Query { .. } => Command::Query,
            Request::ListStatements { .. } => Command::ListStatements,
            Request::RemoveStatement { .. } => Command::RemoveStatement,
            Request::RemoveAllStatements { .. } => Command::RemoveAllStatements,
            Request::StatementCount { .. } => Command::StatementCount,
            Request::IsEmpty { .. } => Command::IsEmpty,
            Request::ContainsStatement { .. } => Command::ContainsStatement,
            Request::ContainsAnyStatement { .. } => Command::ContainsAnyStatement,
            Request::CreateBlankNode { .. } => Command::CreateBlankNode,
            Request::IteratorNext { .. } => Command::IteratorNext,
            Request::IteratorCurrentNode { .. } => Command::IteratorCurrentNode,
            Request::IteratorCurrentStatement { .. } => Command::IteratorCurrentStatement,
            Request::IteratorCurrentBindingSet { .. } => Command::IteratorCurrentBindingSet,
            Request::IteratorQueryType { .. } => Command::IteratorQueryType,
            Request::IteratorQueryBoolValue { .. } => Command::IteratorQueryBoolValue,
            Request::IteratorClose { .. } => Command::IteratorClose,
            Request::CheckProtocolVersion { .. } => Command::CheckProtocolVersion,
        }
    }

    /// `true` when the request names a model or iterator handle, which only means
    /// something to the session that allocated it.
    pub fn uses_handle(&self) -> bool {
        !matches!(
            self,
            Request::CreateModel { .. }
                | Request::RemoveModel { .. }
                | Request::SupportedFeatures
                | Request::CheckProtocolVersion { .. }
        )
    }
}

impl Encode for Request {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        u16::from(self.command()).encode(encoder)?;

        match self {
            Request::CreateModel { name } | Request::RemoveModel { name } => {
                encode_str(name, encoder)
            }
            Request::SupportedFeatures => Ok(()),
            Request::AddStatement { model, statement }
            | Request::RemoveStatement { model, statement }
            | Request::ContainsStatement { model, statement } => {
                model.encode(encoder)?;
                statement.encode(encoder)
            }
            Request::ListStatements { model, pattern }
            | Request::RemoveAllStatements { model, pattern }
            | Request::ContainsAnyStatement { model, pattern } => {
                model.encode(encoder)?;
                pattern.encode(encoder)
            }
            Request::Query {
                model,
                query,
                language,
            } => {
                model.encode(encoder)?;
                encode_str(query, encoder)?;
                language.encode(encoder)
            }
            Request::ListContexts { model }
            | Request::StatementCount { model }
            | Request::IsEmpty { model }
            | Request::CreateBlankNode { model } => model.encode(encoder),
            Request::IteratorNext { iterator }
            | Request::IteratorCurrentNode { iterator }
            | Request::IteratorCurrentStatement { iterator }
            | Request::IteratorCurrentBindingSet { iterator }
            | Request::IteratorQueryType { iterator }
            | Request::IteratorQueryBoolValue { iterator }
            | Request::IteratorClose { iterator } => iterator.encode(encoder),
            Request::CheckProtocolVersion { version } => version.encode(encoder),
        }
    }
}

impl<Context> Decode<Context> for Request {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        let tag = u16::decode(decoder)?;
        let command = Command::try_from(tag).map_err(|_| unknown_tag("command", tag))?;

        let request = match command {
            Command::CreateModel => Request::CreateModel {
                name: decode_string(decoder)?,
            },
            Command::RemoveModel => Request::RemoveModel {
                name: decode_string(decoder)?,
            },
            Command::SupportedFeatures => Request::SupportedFeatures,
            Command::AddStatement => Request::AddStatement {
                model: u32::decode(decoder)?,
                statement: Statement::decode(decoder)?,
            },
            Command::ListContexts => Request::ListContexts {
                model: u32::decode(decoder)?,
            },
            Command::Query => Request::Query {
                model: u32::decode(decoder)?,
                query: decode_string(decoder)?,
                language: QueryLanguage::decode(decoder)?,
            },
            Command::ListStatements => Request::ListStatements {
                model: u32::decode(decoder)?,
                pattern: Statement::decode(decoder)?,
            },
            Command::RemoveStatement => Request::RemoveStatement {
                model: u32::decode(decoder)?,
                statement: Statement::decode(decoder)?,
            },
            Command::RemoveAllStatements => Request::RemoveAllStatements {
                model: u32::decode(decoder)?,
                pattern: Statement::decode(decoder)?,
            },
            Command::StatementCount => Request::StatementCount {
                model: u32::decode(decoder)?,
            },
            Command::IsEmpty => Request::IsEmpty {
                model: u32::decode(decoder)?,
            },
            Command::ContainsStatement => Request::ContainsStatement {
                model: u32::decode(decoder)?,
                statement: Statement::decode(decoder)?,
            },
            Command::ContainsAnyStatement => Request::ContainsAnyStatement {
                model: u32::decode(decoder)?,
                pattern: Statement::decode(decoder)?,
            },
            Command::CreateBlankNode => Request::CreateBlankNode {
                model: u32::decode(decoder)?,
            },
            Command::IteratorNext => Request::IteratorNext {
                iterator: u32::decode(decoder)?,
            },
            Command::IteratorCurrentNode => Request::IteratorCurrentNode {
                iterator: u32::decode(decoder)?,
            },
            Command::IteratorCurrentStatement => Request::IteratorCurrentStatement {
                iterator: u32::decode(decoder)?,
            },
            Command::IteratorCurrentBindingSet => Request::IteratorCurrentBindingSet {
                iterator: u32::decode(decoder)?,
            },
            Command::IteratorQueryType => Request::IteratorQueryType {
                iterator: u32::decode(decoder)?,
            },
            Command::IteratorQueryBoolValue => Request::IteratorQueryBoolValue {
                iterator: u32::decode(decoder)?,
            },
            Command::IteratorClose => Request::IteratorClose {
                iterator: u32::decode(decoder)?,
            },
            Command::CheckProtocolVersion => Request::CheckProtocolVersion {
                version: u32::decode(decoder)?,
            },
        };

        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use bincode::{decode_from_slice, encode_to_vec};

    use crate::{graph::Node, protocol::codec::wire_config};

    use super::*;

    #[test]
    fn request_starts_with_command_tag() {
        let bytes = encode_to_vec(Request::StatementCount { model: 7 }, wire_config()).unwrap();
        assert_eq!(bytes, vec![0x00, 0x0a, 0, 0, 0, 7]);
    }

    #[test]
    fn handshake_layout() {
        let bytes = encode_to_vec(
            Request::CheckProtocolVersion { version: 1 },
            wire_config(),
        )
        .unwrap();
        assert_eq!(bytes, vec![0x00, 0x17, 0, 0, 0, 1]);
    }

    #[test]
    fn request_round_trip() {
        let requests = vec![
            Request::CreateModel { name: "m".into() },
            Request::SupportedFeatures,
            Request::AddStatement {
                model: 3,
                statement: Statement::new(
                    Node::resource("http://example.org/s"),
                    Node::resource("http://example.org/p"),
                    Node::literal("o"),
                ),
            },
            Request::Query {
                model: 3,
                query: "select * where { ?s ?p ?o }".into(),
                language: QueryLanguage::User("sparql-ext".into()),
            },
            Request::IteratorClose { iterator: 9 },
        ];

        for request in requests {
            let bytes = encode_to_vec(&request, wire_config()).unwrap();
            let (decoded, _): (Request, usize) = decode_from_slice(&bytes, wire_config()).unwrap();
            assert_eq!(decoded, request);
        }
    }

    #[test]
    fn session_free_requests_carry_no_handle() {
        assert!(!Request::CreateModel { name: "m".into() }.uses_handle());
        assert!(!Request::CheckProtocolVersion { version: 1 }.uses_handle());
        assert!(Request::StatementCount { model: 1 }.uses_handle());
        assert!(Request::IteratorNext { iterator: 1 }.uses_handle());
    }

    #[test]
    #[should_panic(expected = "unknown command tag")]
    fn unknown_command_tag() {
        let _: (Request, usize) = decode_from_slice(&[0xff, 0xfe], wire_config()).unwrap();
    }
}
