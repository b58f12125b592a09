//! The full run, from a location to a planned or applied graph

use crate::ast::Document;
use crate::context::{NoNotify, Notifier};
use crate::error::Result;
use crate::executor;
use crate::load::{self, Params};
use crate::planner::{self, Execution};
use crate::registry::Registry;
use crate::render;
use crate::transform;
use crate::value::Graph;
use dag::Context;
use url::Url;

/// Settings shared by every stage of a run
///
/// ```ignore
/// let execution = Pipeline::new()
///     .params(params)
///     .plan(&Context::new(), "main.toml")?;
/// println!("{}", execution.summary());
/// ```
#[derive(Clone, Copy)]
pub struct Pipeline<'a> {
    registry: &'a Registry,
    params: &'a Params,
    notifier: &'a dyn Notifier,
}

static NO_PARAMS: std::sync::LazyLock<Params> = std::sync::LazyLock::new(Params::new);

impl Pipeline<'static> {
    /// A pipeline using the process-wide registry, no parameters and no
    /// notifications
    pub fn new() -> Self {
        Self {
            registry: Registry::global(),
            params: &NO_PARAMS,
            notifier: &NoNotify,
        }
    }
}

impl Default for Pipeline<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Pipeline<'a> {
    pub fn registry(mut self, registry: &'a Registry) -> Self {
        self.registry = registry;
        self
    }

    /// Values for the root's parameters
    pub fn params(mut self, params: &'a Params) -> Self {
        self.params = params;
        self
    }

    pub fn notifier(mut self, notifier: &'a dyn Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Load `location` and run every transform, up to but not including
    /// rendering
    pub fn prepare(&self, ctx: &Context, location: &str) -> Result<Graph> {
        let loaded = load::load(ctx, location, self.params)?;
        self.transform(ctx, &loaded)
    }

    /// Same as [`prepare`](Self::prepare) for a document already in memory
    pub fn prepare_document(&self, ctx: &Context, url: &Url, document: &Document) -> Result<Graph> {
        let loaded = load::load_document(ctx, url, document, self.params)?;
        self.transform(ctx, &loaded)
    }

    /// Every transform between loading and rendering
    pub fn transform(&self, ctx: &Context, loaded: &Graph) -> Result<Graph> {
        let graph = transform::resolve_dependencies(ctx, loaded)?;
        let graph = transform::resolve_conditionals(ctx, &graph)?;
        let graph = transform::merge_duplicates(ctx, &graph)?;
        let graph = transform::set_resources(ctx, &graph, self.registry)?;
        transform::serialize_groups(ctx, &graph)
    }

    pub fn render(&self, ctx: &Context, location: &str) -> Result<Graph> {
        render::render(ctx, &self.prepare(ctx, location)?)
    }

    /// Check every resource without changing anything
    pub fn plan(&self, ctx: &Context, location: &str) -> Result<Execution> {
        let rendered = self.render(ctx, location)?;
        planner::plan(ctx, &rendered, self.notifier)
    }

    /// Converge every resource
    pub fn apply(&self, ctx: &Context, location: &str) -> Result<Execution> {
        let rendered = self.render(ctx, location)?;
        executor::apply(ctx, &rendered, self.notifier)
    }

    /// A plan whose result is read as health; see [`health_checks`]
    ///
    /// [`health_checks`]: crate::health_checks
    pub fn healthcheck(&self, ctx: &Context, location: &str) -> Result<Execution> {
        self.plan(ctx, location)
    }
}
