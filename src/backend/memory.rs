use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use log::debug;

use crate::{
    error::{Error, Result},
    graph::{Node, Statement},
    protocol::{BackendFeatures, QueryLanguage},
};

use super::{Backend, QueryAnswer, StoreModel};

/// Answers queries for a [`MemoryModel`]. Query parsing is left to the embedder.
pub type QueryHandler =
    Arc<dyn Fn(&MemoryModel, &str, &QueryLanguage) -> Result<QueryAnswer> + Send + Sync>;

/// Models kept in process memory, gone when the server exits.
#[derive(Default)]
pub struct MemoryBackend {
    models: Mutex<HashMap<String, Arc<MemoryModel>>>,
    queries: Option<QueryHandler>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers queries on every model with `handler`.
    pub fn with_query_handler(mut self, handler: QueryHandler) -> Self {
        self.queries = Some(handler);
        self
    }

    fn models(&self) -> MutexGuard<'_, HashMap<String, Arc<MemoryModel>>> {
        self.models.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("models", &self.models().len())
            .field("queries", &self.queries.is_some())
            .finish()
    }
}

impl Backend for MemoryBackend {
    type Model = MemoryModel;

    fn supported_features(&self) -> BackendFeatures {
        let features = BackendFeatures::ADD_STATEMENT
            | BackendFeatures::REMOVE_STATEMENTS
            | BackendFeatures::LIST_STATEMENTS
            | BackendFeatures::CONTEXT
            | BackendFeatures::STORAGE_MEMORY;
        match self.queries {
            Some(_) => features | BackendFeatures::QUERY,
            None => features,
        }
    }

    fn create_model(&self, name: &str) -> Result<Arc<MemoryModel>> {
        if name.is_empty() {
            return Err(Error::invalid_argument("model name must not be empty"));
        }
        let mut models = self.models();
        let model = models.entry(name.to_string()).or_insert_with(|| {
            debug!("creating model '{name}'");
            Arc::new(MemoryModel::new(self.queries.clone()))
        });
        Ok(Arc::clone(model))
    }

    fn remove_model(&self, name: &str) -> Result<()> {
        match self.models().remove(name) {
            Some(_) => Ok(()),
            None => Err(Error::invalid_argument(format!("no model named '{name}'"))),
        }
    }
}

/// Statements in insertion order, without duplicates.
pub struct MemoryModel {
    statements: Mutex<Vec<Statement>>,
    blanks: AtomicU64,
    queries: Option<QueryHandler>,
}

impl MemoryModel {
    fn new(queries: Option<QueryHandler>) -> Self {
        Self {
            statements: Mutex::new(Vec::new()),
            blanks: AtomicU64::new(0),
            queries,
        }
    }

    fn statements(&self) -> MutexGuard<'_, Vec<Statement>> {
        self.statements.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for MemoryModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryModel")
            .field("statements", &self.statements().len())
            .finish_non_exhaustive()
    }
}

fn require_valid(statement: &Statement) -> Result<()> {
    if statement.is_valid() {
        Ok(())
    } else {
        Err(Error::invalid_argument(format!(
            "statement {statement} needs a subject, predicate and object"
        )))
    }
}

impl StoreModel for MemoryModel {
    fn add_statement(&self, statement: &Statement) -> Result<()> {
        require_valid(statement)?;
        let mut statements = self.statements();
        if !statements.contains(statement) {
            statements.push(statement.clone());
        }
        Ok(())
    }

    fn remove_statement(&self, statement: &Statement) -> Result<()> {
        require_valid(statement)?;
        self.statements().retain(|s| s != statement);
        Ok(())
    }

    fn remove_all_statements(&self, pattern: &Statement) -> Result<()> {
        self.statements().retain(|s| !pattern.matches(s));
        Ok(())
    }

    fn list_statements(&self, pattern: &Statement) -> Result<Vec<Statement>> {
        Ok(self
            .statements()
            .iter()
            .filter(|s| pattern.matches(s))
            .cloned()
            .collect())
    }

    fn list_contexts(&self) -> Result<Vec<Node>> {
        let mut contexts: Vec<Node> = Vec::new();
        for statement in self.statements().iter() {
            if !statement.context.is_empty() && !contexts.contains(&statement.context) {
                contexts.push(statement.context.clone());
            }
        }
        Ok(contexts)
    }

    fn contains_statement(&self, statement: &Statement) -> Result<bool> {
        require_valid(statement)?;
        Ok(self.statements().iter().any(|s| statement.matches(s)))
    }

    fn contains_any_statement(&self, pattern: &Statement) -> Result<bool> {
        Ok(self.statements().iter().any(|s| pattern.matches(s)))
    }

    fn statement_count(&self) -> Result<usize> {
        Ok(self.statements().len())
    }

    fn create_blank_node(&self) -> Result<Node> {
        let n = self.blanks.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Node::blank(format!("b{n}")))
    }

    fn query(&self, query: &str, language: &QueryLanguage) -> Result<QueryAnswer> {
        match &self.queries {
            Some(handler) => handler(self, query, language),
            None => Err(Error::not_supported("queries are not supported by this backend")),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorCode;

    use super::*;

    fn spo(s: &str, o: &str) -> Statement {
        Statement::new(
            Node::resource(s),
            Node::resource("http://example.org/p"),
            Node::literal(o),
        )
    }

    #[test]
    fn create_model_is_get_or_create() {
        let backend = MemoryBackend::new();
        let a = backend.create_model("m").unwrap();
        let b = backend.create_model("m").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        backend.remove_model("m").unwrap();
        let c = backend.create_model("m").unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(
            backend.create_model("").unwrap_err().code(),
            ErrorCode::InvalidArgument
        );
    }

    #[test]
    fn duplicates_are_ignored() {
        let model = MemoryBackend::new().create_model("m").unwrap();
        model.add_statement(&spo("s", "o")).unwrap();
        model.add_statement(&spo("s", "o")).unwrap();
        assert_eq!(model.statement_count().unwrap(), 1);
    }

    #[test]
    fn invalid_statements_are_rejected() {
        let model = MemoryBackend::new().create_model("m").unwrap();
        let err = model.add_statement(&Statement::any()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert!(model.is_empty().unwrap());
    }

    #[test]
    fn remove_statement_is_exact() {
        let model = MemoryBackend::new().create_model("m").unwrap();
        let graph = Node::resource("g");
        model.add_statement(&spo("s", "o").with_context(graph.clone())).unwrap();

        model.remove_statement(&spo("s", "o")).unwrap();
        assert_eq!(model.statement_count().unwrap(), 1);
        assert!(model.contains_statement(&spo("s", "o")).unwrap());

        model.remove_statement(&spo("s", "o").with_context(graph)).unwrap();
        assert!(model.is_empty().unwrap());
    }

    #[test]
    fn patterns_use_empty_as_wildcard() {
        let model = MemoryBackend::new().create_model("m").unwrap();
        for (s, o) in [("a", "1"), ("a", "2"), ("b", "1")] {
            model.add_statement(&spo(s, o)).unwrap();
        }

        let by_subject = Statement::new(Node::resource("a"), Node::Empty, Node::Empty);
        assert_eq!(model.list_statements(&by_subject).unwrap().len(), 2);

        let by_object = Statement::new(Node::Empty, Node::Empty, Node::literal("1"));
        model.remove_all_statements(&by_object).unwrap();
        assert_eq!(model.list_statements(&Statement::any()).unwrap(), vec![spo("a", "2")]);
        assert!(!model.contains_any_statement(&by_object).unwrap());
    }

    #[test]
    fn contexts_in_first_seen_order() {
        let model = MemoryBackend::new().create_model("m").unwrap();
        model.add_statement(&spo("a", "1").with_context(Node::resource("g2"))).unwrap();
        model.add_statement(&spo("b", "1")).unwrap();
        model.add_statement(&spo("c", "1").with_context(Node::resource("g1"))).unwrap();
        model.add_statement(&spo("d", "1").with_context(Node::resource("g2"))).unwrap();

        assert_eq!(
            model.list_contexts().unwrap(),
            vec![Node::resource("g2"), Node::resource("g1")]
        );
    }

    #[test]
    fn blank_nodes_count_up() {
        let model = MemoryBackend::new().create_model("m").unwrap();
        assert_eq!(model.create_blank_node().unwrap(), Node::blank("b1"));
        assert_eq!(model.create_blank_node().unwrap(), Node::blank("b2"));
    }

    #[test]
    fn query_needs_a_handler() {
        let plain = MemoryBackend::new();
        let model = plain.create_model("m").unwrap();
        let err = model.query("ASK {}", &QueryLanguage::Sparql).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotSupported);
        assert!(!plain.supported_features().contains(BackendFeatures::QUERY));

        let handler = |_: &MemoryModel, _: &str, _: &QueryLanguage| -> Result<QueryAnswer> {
            Ok(QueryAnswer::Bool(false))
        };
        let answering = MemoryBackend::new().with_query_handler(Arc::new(handler));
        let model = answering.create_model("m").unwrap();
        assert_eq!(
            model.query("ASK {}", &QueryLanguage::Sparql).unwrap(),
            QueryAnswer::Bool(false)
        );
        assert!(answering.supported_features().contains(BackendFeatures::QUERY));
    }
}
