//! Dependency edges between resources
//!
//! Explicit edges come from a block's `depends` list, which names siblings
//! by their `<kind>.<name>` segment. Implicit edges come from the templates
//! themselves: a node that calls `param` or `lookup` depends on whatever the
//! call resolves to.

use crate::ast::AstNode;
use crate::builtin::{CASE, MODULE};
use crate::error::{Error, Result};
use crate::metadata;
use crate::render::template::{self, Reference};
use crate::render::{find_lookup, find_param};
use crate::value::{Graph, NodeValue};
use dag::{Context, EdgeKind, NodeId};
use log::{debug, info};

/// Attribute listing sibling dependencies
pub const DEPENDS: &str = "depends";

pub fn resolve_dependencies(ctx: &Context, graph: &Graph) -> Result<Graph> {
    info!("resolving dependencies");
    let out = graph.copy();

    for node in out.nodes() {
        ctx.check()?;
        let id = node.id();
        let NodeValue::Ast(block) = node.value() else {
            continue;
        };

        if let Some(depends) = block.get_string_slice(DEPENDS)? {
            for dep in depends {
                let target = id.sibling(dep);
                if &target == id {
                    return Err(Error::invalid(id, "a resource cannot depend on itself"));
                }
                debug!("{id} depends on {target}");
                out.connect(id, &target, EdgeKind::Dependency);
            }
        }

        for (scope, text) in templated_strings(&out, id, block) {
            for (target, looked_up) in resolve(&out, &scope, &text) {
                if looked_up {
                    mark_referenced(&out, &target)?;
                }
                if &target == id || target.is_ancestor_of(id) {
                    continue;
                }
                debug!("{id} implicitly depends on {target}");
                out.connect(id, &target, EdgeKind::Dependency);
            }
        }
    }

    out.validate()?;
    Ok(out)
}

/// Lookups are resolved again by name when rendering, so the target and the
/// path leading to it must survive duplicate merging
fn mark_referenced(graph: &Graph, target: &NodeId) -> Result<()> {
    let path = std::iter::once(target.clone()).chain(target.ancestors());
    for id in path.filter(|id| !id.is_root()) {
        graph.add_metadata(&id, metadata::REFERENCED, serde_json::Value::Bool(true))?;
    }
    Ok(())
}

/// Every template string that affects `id`, with the scope it renders in
fn templated_strings(
    graph: &Graph,
    id: &NodeId,
    block: &crate::ast::Block,
) -> Vec<(NodeId, String)> {
    let mut found = Vec::new();
    let mut own = Vec::new();
    for value in block.attrs.values() {
        collect_strings(value, &mut own);
    }
    found.extend(own.into_iter().map(|text| (id.clone(), text)));

    // a parameter renders the value its module supplies, in the module scope
    if let Some(name) = id.base().strip_prefix("param.")
        && let Some(scope) = id.parent()
        && let Some(module) = graph.get(&scope)
        && module.metadata_str(metadata::KIND) == Some(MODULE)
        && let NodeValue::Ast(module_block) = module.value()
        && let Some(supplied) = module_block
            .attrs
            .get(metadata::PARAMS)
            .and_then(|params| params.get(name))
    {
        let mut strings = Vec::new();
        collect_strings(supplied, &mut strings);
        found.extend(strings.into_iter().map(|text| (scope.clone(), text)));
    }

    // resources under a case are gated by every enclosing predicate
    for ancestor in id.ancestors() {
        let Some(node) = graph.get(&ancestor) else {
            continue;
        };
        if node.metadata_str(metadata::KIND) != Some(CASE) {
            continue;
        }
        if let NodeValue::Ast(case) = node.value()
            && let Some(toml::Value::String(predicate)) = case.attrs.get(metadata::PREDICATE)
        {
            found.push((ancestor.clone(), predicate.clone()));
        }
    }

    found.retain(|(_, text)| text.contains("{{"));
    found
}

fn collect_strings(value: &toml::Value, out: &mut Vec<String>) {
    match value {
        toml::Value::String(s) => out.push(s.clone()),
        toml::Value::Array(items) => items.iter().for_each(|item| collect_strings(item, out)),
        toml::Value::Table(table) => table.values().for_each(|item| collect_strings(item, out)),
        _ => {}
    }
}

/// Targets of the `param` and `lookup` calls in `text`, rendered from `scope`,
/// each flagged when it was reached through `lookup`
///
/// Broken templates are reported when the node renders, not here.
fn resolve(graph: &Graph, scope: &NodeId, text: &str) -> Vec<(NodeId, bool)> {
    let Ok(parsed) = template::parse(text) else {
        return Vec::new();
    };
    parsed
        .references()
        .into_iter()
        .filter_map(|reference| match reference {
            Reference::Param(name) => find_param(graph, scope, &name).map(|target| (target, false)),
            Reference::Lookup(path) => find_lookup(graph, scope, &path)
                .ok()
                .flatten()
                .map(|(target, _)| (target, true)),
        })
        .collect()
}
