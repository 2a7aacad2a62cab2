//! Wire encoding of primitives and graph values.
//!
//! All values are written with bincode using a big-endian, fixed-width integer
//! configuration. Graph values implement [`Encode`]/[`Decode`] by hand so that the
//! layout stays independent of Rust type layout:
//!
//! - strings: `u32` byte length followed by UTF-8 bytes
//! - booleans: one byte
//! - [`Node`]: `u8` tag (empty 0, resource 1, literal 2, blank 3) and payload
//! - [`LiteralValue`]: `u8` tag (plain 0, typed 1), language or datatype, value
//! - [`Statement`]: subject, predicate, object, context
//! - [`BindingSet`]: `u32` count, then `count` pairs of name and node
//! - [`Error`]: `bool` has-locator, `i32` code, message, optional [`Locator`]
use bincode::{
    Decode, Encode,
    config::{BigEndian, Configuration, Fixint, Limit},
    de::{Decoder, read::Reader},
    enc::{Encoder, write::Writer},
    error::{DecodeError, EncodeError},
};

use crate::{
    error::{Error, Locator},
    graph::{BindingSet, LiteralValue, Node, Statement},
};

pub type WireConfig = Configuration<BigEndian, Fixint>;

/// Upper bound on the variable-length bytes (strings) one decoded value may claim.
pub const MAX_DECODE_BYTES: usize = 16 * 1024 * 1024;

/// [`WireConfig`] with a decode limit; used for everything read off a socket.
pub type BoundedConfig = Configuration<BigEndian, Fixint, Limit<MAX_DECODE_BYTES>>;

pub fn wire_config() -> WireConfig {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}

pub fn bounded_config() -> BoundedConfig {
    wire_config().with_limit::<MAX_DECODE_BYTES>()
}

const NODE_EMPTY: u8 = 0;
const NODE_RESOURCE: u8 = 1;
const NODE_LITERAL: u8 = 2;
const NODE_BLANK: u8 = 3;

const LITERAL_PLAIN: u8 = 0;
const LITERAL_TYPED: u8 = 1;

pub(crate) fn encode_str<E: Encoder>(value: &str, encoder: &mut E) -> Result<(), EncodeError> {
    let len = u32::try_from(value.len())
        .map_err(|_| EncodeError::Other("string longer than u32::MAX bytes"))?;
    len.encode(encoder)?;
    encoder.writer().write(value.as_bytes())
}

pub(crate) fn decode_string<D: Decoder>(decoder: &mut D) -> Result<String, DecodeError> {
    let len = u32::decode(decoder)? as usize;
    decoder.claim_bytes_read(len)?;

    let mut bytes = vec![0_u8; len];
    decoder.reader().read(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| DecodeError::Utf8 {
        inner: e.utf8_error(),
    })
}

pub(crate) fn unknown_tag(what: &str, tag: impl std::fmt::LowerHex) -> DecodeError {
    DecodeError::OtherString(format!("unknown {what} tag {tag:#x}"))
}

impl Encode for Locator {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        self.line.encode(encoder)?;
        self.column.encode(encoder)?;
        self.byte.encode(encoder)?;
        encode_str(&self.filename, encoder)
    }
}

impl<Context> Decode<Context> for Locator {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        Ok(Locator {
            line: i32::decode(decoder)?,
            column: i32::decode(decoder)?,
            byte: i32::decode(decoder)?,
            filename: decode_string(decoder)?,
        })
    }
}

impl Encode for Error {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        self.locator().is_some().encode(encoder)?;
        self.code().code().encode(encoder)?;
        encode_str(self.message(), encoder)?;
        match self.locator() {
            Some(locator) => locator.encode(encoder),
            None => Ok(()),
        }
    }
}

impl<Context> Decode<Context> for Error {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        let has_locator = bool::decode(decoder)?;
        let code = i32::decode(decoder)?;
        let message = decode_string(decoder)?;
        let locator = if has_locator {
            Some(Locator::decode(decoder)?)
        } else {
            None
        };
        Ok(Error::from_parts(code, message, locator))
    }
}

impl Encode for LiteralValue {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        match self {
            LiteralValue::Plain { value, language } => {
                LITERAL_PLAIN.encode(encoder)?;
                encode_str(language.as_deref().unwrap_or_default(), encoder)?;
                encode_str(value, encoder)
            }
            LiteralValue::Typed { value, datatype } => {
                LITERAL_TYPED.encode(encoder)?;
                encode_str(datatype, encoder)?;
                encode_str(value, encoder)
            }
        }
    }
}

impl<Context> Decode<Context> for LiteralValue {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        match u8::decode(decoder)? {
            LITERAL_PLAIN => {
                let language = decode_string(decoder)?;
                let value = decode_string(decoder)?;
                Ok(LiteralValue::with_language(value, language))
            }
            LITERAL_TYPED => {
                let datatype = decode_string(decoder)?;
                let value = decode_string(decoder)?;
                Ok(LiteralValue::typed(value, datatype))
            }
            tag => Err(unknown_tag("literal", tag)),
        }
    }
}

impl Encode for Node {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        match self {
            Node::Empty => NODE_EMPTY.encode(encoder),
            Node::Resource(uri) => {
                NODE_RESOURCE.encode(encoder)?;
                encode_str(uri, encoder)
            }
            Node::Literal(literal) => {
                NODE_LITERAL.encode(encoder)?;
                literal.encode(encoder)
            }
            Node::Blank(id) => {
                NODE_BLANK.encode(encoder)?;
                encode_str(id, encoder)
            }
        }
    }
}

impl<Context> Decode<Context> for Node {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        match u8::decode(decoder)? {
            NODE_EMPTY => Ok(Node::Empty),
            NODE_RESOURCE => Ok(Node::Resource(decode_string(decoder)?)),
            NODE_LITERAL => Ok(Node::Literal(LiteralValue::decode(decoder)?)),
            NODE_BLANK => Ok(Node::Blank(decode_string(decoder)?)),
            tag => Err(unknown_tag("node", tag)),
        }
    }
}

impl Encode for Statement {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        self.subject.encode(encoder)?;
        self.predicate.encode(encoder)?;
        self.object.encode(encoder)?;
        self.context.encode(encoder)
    }
}

impl<Context> Decode<Context> for Statement {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        Ok(Statement {
            subject: Node::decode(decoder)?,
            predicate: Node::decode(decoder)?,
            object: Node::decode(decoder)?,
            context: Node::decode(decoder)?,
        })
    }
}

impl Encode for BindingSet {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        let count = u32::try_from(self.len())
            .map_err(|_| EncodeError::Other("binding set larger than u32::MAX"))?;
        count.encode(encoder)?;
        for (name, node) in self.iter() {
            encode_str(name, encoder)?;
            node.encode(encoder)?;
        }
        Ok(())
    }
}

impl<Context> Decode<Context> for BindingSet {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        let count = u32::decode(decoder)?;
        let mut set = BindingSet::new();
        for _ in 0..count {
            let name = decode_string(decoder)?;
            let node = Node::decode(decoder)?;
            set.insert(name, node);
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use std::fmt::Debug;

    use bincode::{decode_from_slice, encode_to_vec};

    use super::*;

    fn round_trip<T>(value: T) -> T
    where
        T: Encode + Decode<()> + PartialEq + Debug,
    {
        let bytes = encode_to_vec(&value, wire_config()).unwrap();
        let (decoded, read): (T, usize) = decode_from_slice(&bytes, wire_config()).unwrap();
        assert_eq!(read, bytes.len());
        decoded
    }

    #[test]
    fn strings_are_u32_length_prefixed() {
        let bytes = encode_to_vec(Node::blank("ab"), wire_config()).unwrap();
        assert_eq!(bytes, vec![NODE_BLANK, 0, 0, 0, 2, b'a', b'b']);
    }

    #[test]
    fn integers_are_big_endian() {
        let bytes = encode_to_vec(0x0102_u16, wire_config()).unwrap();
        assert_eq!(bytes, vec![0x01, 0x02]);
        let bytes = encode_to_vec(true, wire_config()).unwrap();
        assert_eq!(bytes, vec![1]);
    }

    #[test]
    fn node_round_trip() {
        let nodes = vec![
            Node::Empty,
            Node::resource("http://example.org/s"),
            Node::blank("b12"),
            Node::literal("plain"),
            LiteralValue::with_language("chat", "fr").into(),
            LiteralValue::typed("42", "http://www.w3.org/2001/XMLSchema#int").into(),
            Node::literal(""),
        ];

        for node in nodes {
            assert_eq!(round_trip(node.clone()), node);
        }
    }

    #[test]
    fn statement_with_empty_context_round_trip() {
        let statement = Statement::new(
            Node::resource("http://example.org/s"),
            Node::resource("http://example.org/p"),
            Node::literal("o"),
        );
        let decoded = round_trip(statement.clone());
        assert_eq!(decoded, statement);
        assert!(decoded.context.is_empty());
    }

    #[test]
    fn binding_set_round_trip() {
        assert_eq!(round_trip(BindingSet::new()), BindingSet::new());

        let set: BindingSet = [
            ("s", Node::resource("http://example.org/s")),
            ("label", LiteralValue::with_language("hello", "en").into()),
            ("unbound", Node::Empty),
        ]
        .into_iter()
        .collect();
        let decoded = round_trip(set.clone());
        assert_eq!(decoded, set);
        assert_eq!(decoded.names().collect::<Vec<_>>(), vec!["s", "label", "unbound"]);
    }

    #[test]
    fn error_round_trip() {
        assert_eq!(round_trip(Error::none()), Error::none());

        let plain = Error::invalid_argument("Invalid model id");
        assert_eq!(round_trip(plain.clone()), plain);

        let located = Error::parsing("unexpected '}'", Locator::new(2, 14, 31, "query.rq"));
        let decoded = round_trip(located.clone());
        assert_eq!(decoded, located);
        assert_eq!(decoded.locator().map(|l| l.filename.as_str()), Some("query.rq"));
    }

    #[test]
    fn unknown_node_tag_is_rejected() {
        let res: Result<(Node, usize), _> = decode_from_slice(&[9_u8], wire_config());
        assert!(res.is_err());
    }

    #[test]
    fn oversized_length_prefix_is_refused_before_allocating() {
        let bytes = [NODE_RESOURCE, 0xff, 0xff, 0xff, 0xff];
        let res: Result<(Node, usize), _> = decode_from_slice(&bytes, bounded_config());
        assert!(matches!(res, Err(DecodeError::LimitExceeded)));

        let bytes = encode_to_vec(Node::resource("http://example.org/s"), wire_config()).unwrap();
        let (node, _): (Node, usize) = decode_from_slice(&bytes, bounded_config()).unwrap();
        assert_eq!(node, Node::resource("http://example.org/s"));
    }

    #[test]
    fn truncated_input_is_rejected() {
        let bytes = encode_to_vec(Node::resource("http://example.org/s"), wire_config()).unwrap();
        let res: Result<(Node, usize), _> =
            decode_from_slice(&bytes[..bytes.len() - 1], wire_config());
        assert!(res.is_err());
    }
}
