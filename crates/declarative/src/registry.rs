//! Resource kind registry
//!
//! Maps a kind tag (`file.content`, `param`, ...) to the function that
//! decodes a block into a [`Preparer`]. The binary installs one registry for
//! the whole process at startup; tests build their own and pass it to the
//! pipeline directly.

use crate::ast::Block;
use crate::builtin;
use crate::resource::{FromBlock, Preparer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

type Factory = Box<dyn Fn(&Block) -> anyhow::Result<Arc<dyn Preparer>> + Send + Sync>;

/// Kind tag to preparer factory
#[derive(Default)]
pub struct Registry {
    factories: BTreeMap<String, Factory>,
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

impl Registry {
    /// An empty registry, without even the structural kinds
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the structural kinds every configuration needs
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register(&mut registry);
        registry
    }

    /// Register `P` under `kind`, replacing any previous registration
    pub fn register<P>(&mut self, kind: impl Into<String>) -> &mut Self
    where
        P: Preparer + FromBlock + 'static,
    {
        self.factories.insert(
            kind.into(),
            Box::new(|block| Ok(Arc::new(P::from_block(block)?) as Arc<dyn Preparer>)),
        );
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Decode a block into the preparer for its kind
    ///
    /// Returns `None` when the kind is not registered.
    pub fn prepare(&self, block: &Block) -> Option<anyhow::Result<Arc<dyn Preparer>>> {
        self.factories.get(&block.kind).map(|factory| factory(block))
    }

    /// Make this the process-wide registry
    ///
    /// Only the first call takes effect; later calls hand the registry back.
    pub fn install(self) -> Result<(), Self> {
        GLOBAL.set(self)
    }

    /// The process-wide registry, or the builtins when none was installed
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(Self::with_builtins)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}
