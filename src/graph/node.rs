use std::{fmt, str::FromStr};

use thiserror::Error;

/// Value carried by a literal node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LiteralValue {
    /// Plain literal with an optional language tag.
    Plain {
        value: String,
        language: Option<String>,
    },
    /// Literal annotated with a datatype URI.
    Typed { value: String, datatype: String },
}

impl LiteralValue {
    pub fn plain(value: impl Into<String>) -> Self {
        LiteralValue::Plain {
            value: value.into(),
            language: None,
        }
    }

    /// Plain literal with a language tag. An empty tag is the same as no tag.
    pub fn with_language(value: impl Into<String>, language: impl Into<String>) -> Self {
        let language: String = language.into();
        LiteralValue::Plain {
            value: value.into(),
            language: (!language.is_empty()).then_some(language),
        }
    }

    pub fn typed(value: impl Into<String>, datatype: impl Into<String>) -> Self {
        LiteralValue::Typed {
            value: value.into(),
            datatype: datatype.into(),
        }
    }

    pub fn value(&self) -> &str {
        match self {
            LiteralValue::Plain { value, .. } | LiteralValue::Typed { value, .. } => value,
        }
    }

    pub fn language(&self) -> Option<&str> {
        match self {
            LiteralValue::Plain { language, .. } => language.as_deref(),
            LiteralValue::Typed { .. } => None,
        }
    }

    pub fn datatype(&self) -> Option<&str> {
        match self {
            LiteralValue::Typed { datatype, .. } => Some(datatype),
            LiteralValue::Plain { .. } => None,
        }
    }
}

/// A typed graph value. `Empty` doubles as the wildcard in statement patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Node {
    #[default]
    Empty,
    Resource(String),
    Blank(String),
    Literal(LiteralValue),
}

impl Node {
    pub fn resource(uri: impl Into<String>) -> Self {
        Node::Resource(uri.into())
    }

    pub fn blank(id: impl Into<String>) -> Self {
        Node::Blank(id.into())
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Node::Literal(LiteralValue::plain(value))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Node::Empty)
    }

    /// `true` when this node, used as a pattern position, accepts `other`.
    pub fn matches(&self, other: &Node) -> bool {
        self.is_empty() || self == other
    }
}

impl From<LiteralValue> for Node {
    fn from(value: LiteralValue) -> Self {
        Node::Literal(value)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Empty => write!(f, "*"),
            Node::Resource(uri) => write!(f, "<{uri}>"),
            Node::Blank(id) => write!(f, "_:{id}"),
            Node::Literal(literal) => {
                write!(f, "\"{}\"", escape(literal.value()))?;
                match literal {
                    LiteralValue::Plain {
                        language: Some(language),
                        ..
                    } => write!(f, "@{language}"),
                    LiteralValue::Typed { datatype, .. } => write!(f, "^^<{datatype}>"),
                    LiteralValue::Plain { language: None, .. } => Ok(()),
                }
            }
        }
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeParseError {
    #[error("empty node term")]
    Empty,

    #[error("unterminated {0}")]
    Unterminated(&'static str),

    #[error("unexpected trailing input '{0}'")]
    Trailing(String),

    #[error("unrecognized node term '{0}'")]
    Unrecognized(String),
}

impl FromStr for Node {
    type Err = NodeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "" => Err(NodeParseError::Empty),
            "*" | "?" => Ok(Node::Empty),
            s if s.starts_with('<') => {
                let uri = s
                    .strip_prefix('<')
                    .and_then(|rest| rest.strip_suffix('>'))
                    .ok_or(NodeParseError::Unterminated("resource"))?;
                Ok(Node::resource(uri))
            }
            s if s.starts_with("_:") => Ok(Node::blank(&s[2..])),
            s if s.starts_with('"') => parse_literal(&s[1..]),
            s => Err(NodeParseError::Unrecognized(s.to_string())),
        }
    }
}

fn parse_literal(body: &str) -> Result<Node, NodeParseError> {
    let mut value = String::new();
    let mut chars = body.char_indices();
    let mut end = None;

    while let Some((i, ch)) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some((_, escaped)) => value.push(escaped),
                None => break,
            },
            '"' => {
                end = Some(i + 1);
                break;
            }
            ch => value.push(ch),
        }
    }

    let rest = &body[end.ok_or(NodeParseError::Unterminated("literal"))?..];
    if rest.is_empty() {
        Ok(LiteralValue::plain(value).into())
    } else if let Some(language) = rest.strip_prefix('@') {
        Ok(LiteralValue::with_language(value, language).into())
    } else if let Some(datatype) = rest.strip_prefix("^^") {
        match datatype.parse::<Node>()? {
            Node::Resource(datatype) => Ok(LiteralValue::typed(value, datatype).into()),
            _ => Err(NodeParseError::Trailing(rest.to_string())),
        }
    } else {
        Err(NodeParseError::Trailing(rest.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_language_is_no_language() {
        let literal = LiteralValue::with_language("chat", "");
        assert_eq!(literal, LiteralValue::plain("chat"));
        assert_eq!(literal.language(), None);
    }

    #[test]
    fn empty_node_is_a_wildcard() {
        let node = Node::resource("http://example.org/s");
        assert!(Node::Empty.matches(&node));
        assert!(node.matches(&node));
        assert!(!node.matches(&Node::resource("http://example.org/o")));
    }

    #[test]
    fn parse_node_terms() {
        let inputs = vec![
            ("*", Node::Empty),
            ("<http://example.org/s>", Node::resource("http://example.org/s")),
            ("_:b0", Node::blank("b0")),
            ("\"o\"", Node::literal("o")),
            ("\"chat\"@fr", LiteralValue::with_language("chat", "fr").into()),
            (
                "\"42\"^^<http://www.w3.org/2001/XMLSchema#int>",
                LiteralValue::typed("42", "http://www.w3.org/2001/XMLSchema#int").into(),
            ),
            ("\"say \\\"hi\\\"\"", Node::literal("say \"hi\"")),
        ];

        for (term, expected) in inputs {
            let node: Node = term.parse().unwrap();
            assert_eq!(node, expected);
            assert_eq!(node.to_string().parse::<Node>().unwrap(), expected);
        }
    }

    #[test]
    #[should_panic(expected = "Unterminated")]
    fn parse_unterminated_literal() {
        "\"open".parse::<Node>().unwrap();
    }

    #[test]
    #[should_panic(expected = "Unrecognized")]
    fn parse_bare_word() {
        "subject".parse::<Node>().unwrap();
    }
}
