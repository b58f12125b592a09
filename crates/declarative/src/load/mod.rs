//! Turning documents into a graph of blocks
//!
//! The root document becomes `root`; every block below it becomes a node
//! `<parent>/<kind>.<name>` holding the block itself. Modules are fetched
//! relative to the document that declares them and nested in place.

pub mod fetch;
mod locks;

pub use fetch::{fetch, resolve};
pub use locks::inject_locks;

use crate::ast::{AstNode, Block, Document};
use crate::builtin::{CASE, DEFAULT, MODULE, ROOT, SWITCH};
use crate::error::{Error, Result};
use crate::metadata;
use crate::value::{Graph, Node, NodeValue};
use dag::{Context, NodeId};
use log::{debug, info};
use serde_json::json;
use url::Url;

/// Parameter values supplied to the root by the caller
pub type Params = serde_json::Map<String, serde_json::Value>;

/// Fetch and load the document at `location`
pub fn load(ctx: &Context, location: &str, params: &Params) -> Result<Graph> {
    let url = resolve(location, None)?;
    let text = fetch(ctx, &url)?;
    let document = Document::parse(&text, url.as_str())?;
    load_document(ctx, &url, &document, params)
}

/// Load an already parsed root document; modules resolve against `url`
pub fn load_document(ctx: &Context, url: &Url, document: &Document, params: &Params) -> Result<Graph> {
    info!("loading {url}");
    let graph = Graph::new();
    let root = NodeId::root();

    let block = Block::new(ROOT, ROOT).with_blocks(document.blocks.clone());
    let mut node = Node::new(root.clone(), NodeValue::Ast(block));
    node.add_metadata(metadata::KIND, json!(ROOT))?;
    node.add_metadata(metadata::NAME, json!(ROOT))?;
    node.add_metadata(metadata::PARAMS, serde_json::Value::Object(params.clone()))?;
    node.add_metadata(metadata::SOURCE, json!(url.as_str()))?;
    graph.add(node);

    let mut loader = Loader {
        ctx,
        graph: &graph,
        stack: vec![url.clone()],
    };
    loader.add_blocks(&root, ROOT, url, &document.blocks)?;

    inject_locks(&graph)?;
    graph.validate()?;
    info!("loaded {} nodes", graph.len());
    Ok(graph)
}

struct Loader<'a> {
    ctx: &'a Context,
    graph: &'a Graph,
    /// Modules being loaded, outermost first
    stack: Vec<Url>,
}

impl Loader<'_> {
    fn add_blocks(&mut self, parent: &NodeId, parent_kind: &str, base: &Url, blocks: &[Block]) -> Result<()> {
        for (order, block) in blocks.iter().enumerate() {
            self.ctx.check()?;
            let block = desugar(parent, parent_kind, block)?;
            let id = parent.child(&block.segment());
            if self.graph.contains(&id) {
                return Err(Error::Duplicate(id));
            }

            let mut node = Node::new(id.clone(), NodeValue::Ast(block.clone()));
            node.add_metadata(metadata::KIND, json!(block.kind))?;
            node.add_metadata(metadata::NAME, json!(block.name))?;
            node.add_metadata(metadata::ORDER, json!(order))?;

            if block.is_module() {
                self.add_module(&id, node, &block, base)?;
            } else {
                debug!("{id}");
                self.graph.add_child(parent, node);
                self.add_blocks(&id, &block.kind, base, &block.blocks)?;
            }
        }
        Ok(())
    }

    fn add_module(&mut self, id: &NodeId, mut node: Node, block: &Block, base: &Url) -> Result<()> {
        let source = block.source()?.ok_or_else(|| Error::Attribute {
            id: id.to_string(),
            key: metadata::SOURCE.to_string(),
            expected: "set on a module",
        })?;
        if !block.blocks.is_empty() {
            return Err(Error::invalid(id, "a module takes its blocks from its source"));
        }

        let url = resolve(source, Some(base))?;
        if self.stack.contains(&url) {
            return Err(Error::ModuleCycle(url.to_string()));
        }
        let params = match block.object_item().get(metadata::PARAMS) {
            None => serde_json::Value::Object(Params::new()),
            Some(toml::Value::Table(table)) => serde_json::to_value(table).map_err(|e| Error::Decode {
                id: id.clone(),
                error: e.into(),
            })?,
            Some(_) => {
                return Err(Error::Attribute {
                    id: id.to_string(),
                    key: metadata::PARAMS.to_string(),
                    expected: "a table",
                });
            }
        };

        debug!("{id}: loading module {url}");
        let text = fetch(self.ctx, &url)?;
        let document = Document::parse(&text, url.as_str())?;

        node.add_metadata(metadata::PARAMS, params)?;
        node.add_metadata(metadata::SOURCE, json!(url.as_str()))?;
        let node = node.with_value(NodeValue::Ast(
            block.clone().with_blocks(document.blocks.clone()),
        ));
        let parent = id.parent().unwrap_or_else(NodeId::root);
        self.graph.add_child(&parent, node);

        self.stack.push(url.clone());
        let result = self.add_blocks(id, MODULE, &url, &document.blocks);
        self.stack.pop();
        result
    }
}

/// `default` inside a switch is a case that always matches
fn desugar(parent: &NodeId, parent_kind: &str, block: &Block) -> Result<Block> {
    if block.kind != DEFAULT {
        return Ok(block.clone());
    }
    if parent_kind != SWITCH {
        return Err(Error::invalid(parent, "a default case must be inside a switch"));
    }
    let mut case = Block::new(CASE, DEFAULT).with_blocks(block.blocks.clone());
    case.attrs = block.attrs.clone();
    case.attrs
        .insert(metadata::PREDICATE.to_string(), toml::Value::String("true".into()));
    Ok(case)
}
