//! Storage seen from the server.
//!
//! A [`Backend`] owns named models; a [`StoreModel`] executes the statement-level
//! commands against one of them. The reference server only talks to these traits,
//! so any store that can answer them can be put behind the socket.
mod memory;

use std::sync::Arc;

pub use memory::{MemoryBackend, MemoryModel, QueryHandler};

use crate::{
    error::{Error, Result},
    graph::{BindingSet, Node, Statement},
    protocol::{BackendFeatures, QueryLanguage},
};

/// The materialized answer to a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryAnswer {
    Graph(Vec<Statement>),
    Bool(bool),
    Bindings(Vec<BindingSet>),
}

pub trait Backend: Send + Sync + 'static {
    type Model: StoreModel;

    fn supported_features(&self) -> BackendFeatures;

    /// Opens `name`, creating it when missing.
    fn create_model(&self, name: &str) -> Result<Arc<Self::Model>>;

    /// Drops `name`. Sessions that still hold the model keep their handle.
    fn remove_model(&self, name: &str) -> Result<()>;
}

/// One graph. Empty nodes in a pattern match anything.
pub trait StoreModel: Send + Sync + 'static {
    fn add_statement(&self, statement: &Statement) -> Result<()>;

    fn remove_statement(&self, statement: &Statement) -> Result<()>;

    fn remove_all_statements(&self, pattern: &Statement) -> Result<()>;

    fn list_statements(&self, pattern: &Statement) -> Result<Vec<Statement>>;

    fn list_contexts(&self) -> Result<Vec<Node>>;

    fn contains_statement(&self, statement: &Statement) -> Result<bool>;

    fn contains_any_statement(&self, pattern: &Statement) -> Result<bool>;

    fn statement_count(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.statement_count()? == 0)
    }

    fn create_blank_node(&self) -> Result<Node>;

    fn query(&self, query: &str, language: &QueryLanguage) -> Result<QueryAnswer> {
        let _ = (query, language);
        Err(Error::not_supported("queries are not supported by this backend"))
    }
}
