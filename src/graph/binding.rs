use std::ops::Index;

use super::Node;

/// One row of a tuple query result.
///
/// Bindings keep the column order declared by the server and can be looked up by
/// variable name or by position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingSet {
    bindings: Vec<(String, Node)>,
}

impl BindingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name`, replacing an earlier binding of the same name in place.
    pub fn insert(&mut self, name: impl Into<String>, node: Node) {
        let name = name.into();
        match self.bindings.iter_mut().find(|(n, _)| *n == name) {
            Some((_, value)) => *value = node,
            None => self.bindings.push((name, node)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        self.bindings.iter().find(|(n, _)| n == name).map(|(_, node)| node)
    }

    pub fn get_index(&self, index: usize) -> Option<&Node> {
        self.bindings.get(index).map(|(_, node)| node)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.bindings.iter().map(|(name, node)| (name.as_str(), node))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl Index<usize> for BindingSet {
    type Output = Node;

    fn index(&self, index: usize) -> &Self::Output {
        &self.bindings[index].1
    }
}

impl<S: Into<String>> FromIterator<(S, Node)> for BindingSet {
    fn from_iter<T: IntoIterator<Item = (S, Node)>>(iter: T) -> Self {
        let mut set = BindingSet::new();
        for (name, node) in iter {
            set.insert(name, node);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name_and_index() {
        let set: BindingSet = [
            ("s", Node::resource("http://example.org/s")),
            ("o", Node::literal("o")),
        ]
        .into_iter()
        .collect();

        assert_eq!(set.len(), 2);
        assert_eq!(set.get("o"), Some(&Node::literal("o")));
        assert_eq!(set.get_index(0), Some(&Node::resource("http://example.org/s")));
        assert_eq!(set[1], Node::literal("o"));
        assert_eq!(set.get("missing"), None);
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["s", "o"]);
    }

    #[test]
    fn rebinding_keeps_column_order() {
        let mut set = BindingSet::new();
        set.insert("a", Node::literal("1"));
        set.insert("b", Node::literal("2"));
        set.insert("a", Node::literal("3"));

        assert_eq!(set.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(set[0], Node::literal("3"));
    }
}
