use std::fmt;

use super::Node;

/// An RDF triple plus an optional named-graph context.
///
/// A statement with `Empty` nodes is also used as a pattern, where each `Empty`
/// position matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Statement {
    pub subject: Node,
    pub predicate: Node,
    pub object: Node,
    pub context: Node,
}

impl Statement {
    pub fn new(subject: Node, predicate: Node, object: Node) -> Self {
        Self {
            subject,
            predicate,
            object,
            context: Node::Empty,
        }
    }

    pub fn with_context(mut self, context: Node) -> Self {
        self.context = context;
        self
    }

    /// The pattern matching every statement.
    pub fn any() -> Self {
        Self::default()
    }

    /// Subject, predicate and object are all set. The context may be empty.
    pub fn is_valid(&self) -> bool {
        !self.subject.is_empty() && !self.predicate.is_empty() && !self.object.is_empty()
    }

    /// `true` when `self`, used as a pattern, accepts `statement`.
    pub fn matches(&self, statement: &Statement) -> bool {
        self.subject.matches(&statement.subject)
            && self.predicate.matches(&statement.predicate)
            && self.object.matches(&statement.object)
            && self.context.matches(&statement.context)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.subject, self.predicate, self.object)?;
        if !self.context.is_empty() {
            write!(f, " {}", self.context)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statement() -> Statement {
        Statement::new(
            Node::resource("http://example.org/s"),
            Node::resource("http://example.org/p"),
            Node::literal("o"),
        )
    }

    #[test]
    fn context_is_optional_for_validity() {
        assert!(statement().is_valid());
        assert!(statement().with_context(Node::resource("http://example.org/g")).is_valid());
        assert!(!Statement::any().is_valid());

        let mut partial = statement();
        partial.predicate = Node::Empty;
        assert!(!partial.is_valid());
    }

    #[test]
    fn pattern_matching() {
        let stored = statement().with_context(Node::resource("http://example.org/g"));

        assert!(Statement::any().matches(&stored));
        assert!(statement().matches(&stored));

        let other_graph = statement().with_context(Node::resource("http://example.org/h"));
        assert!(!other_graph.matches(&stored));
    }

    #[test]
    fn display_omits_empty_context() {
        assert_eq!(
            statement().to_string(),
            "<http://example.org/s> <http://example.org/p> \"o\""
        );
    }
}
