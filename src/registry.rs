//! Named schemas, shared by everything declared in the same namespace.

use crate::schema::Schema;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Definitions gathered for one resolved schema, keyed by name.
pub type Definitions = BTreeMap<String, Arc<Schema>>;

/// A namespace of named schemas.
///
/// This plays the part of a module: fields declared in it may refer to
/// schemas by name before those schemas are defined. Cloning a `Namespace`
/// yields another handle to the same table.
#[derive(Clone)]
pub struct Namespace {
    name: Arc<str>,
    schemas: Arc<RwLock<HashMap<String, Arc<Schema>>>>,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            schemas: Arc::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Define (or redefine) a named schema.
    pub fn define(&self, name: impl Into<String>, schema: Schema) {
        let name = name.into();
        tracing::debug!(namespace = %self.name, schema = %name, "defining schema");
        self.schemas.write().insert(name, Arc::new(schema));
    }

    pub fn get(&self, name: &str) -> Option<Arc<Schema>> {
        self.schemas.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.read().contains_key(name)
    }

    /// All defined names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.schemas.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Do both handles point at the same table?
    pub fn ptr_eq(&self, other: &Namespace) -> bool {
        Arc::ptr_eq(&self.schemas, &other.schemas)
    }

    /// Collect every definition reachable from `root`.
    ///
    /// On failure, returns the first name that is not defined.
    pub fn collect(&self, root: &Schema) -> Result<Definitions, String> {
        let schemas = self.schemas.read();
        let mut definitions = Definitions::new();
        let mut pending: Vec<String> = root.refs().into_iter().map(str::to_owned).collect();

        while let Some(name) = pending.pop() {
            if definitions.contains_key(&name) {
                continue;
            }
            let schema = match schemas.get(&name) {
                Some(schema) => Arc::clone(schema),
                None => return Err(name),
            };
            pending.extend(
                schema
                    .refs()
                    .into_iter()
                    .filter(|next| !definitions.contains_key(*next))
                    .map(str::to_owned),
            );
            definitions.insert(name, schema);
        }

        Ok(definitions)
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new("")
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("name", &self.name)
            .field("schemas", &self.names())
            .finish()
    }
}
