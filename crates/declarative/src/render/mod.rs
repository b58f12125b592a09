//! Template rendering
//!
//! Every preparer renders its fields through a [`Renderer`] bound to one
//! node of the graph being transformed. References to nodes that are not
//! ready yet fail with [`RenderError::Unresolvable`]; the render stage
//! turns those nodes into thunks that the plan stage forces again once
//! their dependencies have run.

pub mod platform;
pub mod template;

use crate::metadata;
use crate::resource::Fields;
use crate::value::{Graph, NodeValue, PrepareThunk, TaskNode};
use dag::{Context, NodeId};
use log::{debug, info};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use template::{Functions, print};
use thiserror::Error;

/// Errors raised while rendering a field
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// The referenced node has not produced its value yet
    #[error("unresolvable reference {reference:?}")]
    Unresolvable { reference: String },

    /// The template is malformed or calls something wrongly
    #[error("{field}: {message}")]
    BadTemplate { field: String, message: String },
}

impl RenderError {
    fn bad(field: &str, message: impl Into<String>) -> Self {
        Self::BadTemplate {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Whether an error (or anything it wraps) is an unresolvable reference
pub fn is_unresolvable(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<RenderError>(),
        Some(RenderError::Unresolvable { .. })
    )
}

/// Template evaluator bound to one node
pub struct Renderer<'g> {
    graph: &'g Graph,
    id: NodeId,
}

impl<'g> Renderer<'g> {
    pub fn new(graph: &'g Graph, id: NodeId) -> Self {
        Self { graph, id }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    /// Render one field
    pub fn render(&self, field: &str, text: &str) -> Result<String, RenderError> {
        if !text.contains("{{") {
            return Ok(text.to_string());
        }
        let parsed = template::parse(text).map_err(|e| RenderError::bad(field, e.to_string()))?;
        parsed.execute(field, &Env {
            renderer: self,
            field,
        })
    }

    pub fn render_list(&self, field: &str, items: &[String]) -> Result<Vec<String>, RenderError> {
        items.iter().map(|item| self.render(field, item)).collect()
    }

    pub fn render_map(
        &self,
        field: &str,
        map: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, RenderError> {
        map.iter()
            .map(|(key, value)| Ok((key.clone(), self.render(&format!("{field}.{key}"), value)?)))
            .collect()
    }

    /// The value supplied for this parameter node, if any
    ///
    /// Values come from the `params` table of the enclosing module (or the
    /// caller's table at the root). Module-supplied strings are rendered in
    /// the module's own scope.
    pub fn value(&self) -> Result<Option<Value>, RenderError> {
        let Some(name) = self.id.base().strip_prefix("param.") else {
            return Ok(None);
        };
        let Some(scope) = self.id.parent() else {
            return Ok(None);
        };
        let Some(value) = self
            .graph
            .get(&scope)
            .and_then(|node| node.get_metadata(metadata::PARAMS)?.get(name).cloned())
        else {
            return Ok(None);
        };
        if scope.is_root() {
            return Ok(Some(value));
        }
        Renderer::new(self.graph, scope)
            .render_value(&format!("params.{name}"), value)
            .map(Some)
    }

    /// Render every string inside a JSON value
    pub fn render_value(&self, field: &str, value: Value) -> Result<Value, RenderError> {
        Ok(match value {
            Value::String(s) => Value::String(self.render(field, &s)?),
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| self.render_value(field, item))
                    .collect::<Result<Vec<_>, RenderError>>()?,
            ),
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| Ok((k, self.render_value(field, v)?)))
                    .collect::<Result<_, RenderError>>()?,
            ),
            other => other,
        })
    }

    /// Value of the nearest parameter called `name`
    pub fn param(&self, field: &str, name: &str) -> Result<Value, RenderError> {
        let target = find_param(self.graph, &self.id, name)
            .ok_or_else(|| RenderError::bad(field, format!("unknown parameter {name:?}")))?;
        let node = self
            .graph
            .get(&target)
            .ok_or_else(|| RenderError::bad(field, format!("{target} vanished")))?;
        match node.value() {
            NodeValue::Task(task) => task
                .task
                .exported_fields()
                .remove("value")
                .ok_or_else(|| RenderError::bad(field, format!("{target} has no value"))),
            NodeValue::Tombstone(_) => Err(RenderError::bad(field, format!("{target} failed"))),
            _ => Err(RenderError::Unresolvable {
                reference: format!("param.{name}"),
            }),
        }
    }

    /// Exported fields of another node, indexed by the rest of `path`
    pub fn lookup(&self, field: &str, path: &str) -> Result<Value, RenderError> {
        let (target, suffix) = find_lookup(self.graph, &self.id, path)
            .map_err(|message| RenderError::bad(field, message))?
            .ok_or_else(|| RenderError::bad(field, format!("lookup {path:?}: no such node")))?;
        let node = self
            .graph
            .get(&target)
            .ok_or_else(|| RenderError::bad(field, format!("{target} vanished")))?;
        let fields = match node.value() {
            NodeValue::Task(task) if task.status.is_some() => task.task.exported_fields(),
            NodeValue::Tombstone(_) => {
                return Err(RenderError::bad(field, format!("{target} failed")));
            }
            _ => {
                return Err(RenderError::Unresolvable {
                    reference: path.to_string(),
                });
            }
        };
        index_fields(fields, &suffix)
            .ok_or_else(|| RenderError::bad(field, format!("{target} has no field {:?}", suffix.join("."))))
    }
}

/// Template functions bound to a renderer and field
struct Env<'r, 'g> {
    renderer: &'r Renderer<'g>,
    field: &'r str,
}

impl Env<'_, '_> {
    fn arity(&self, name: &str, args: &[Value], expected: usize) -> Result<(), RenderError> {
        if args.len() == expected {
            Ok(())
        } else {
            Err(RenderError::bad(
                self.field,
                format!(
                    "wrong number of args for {name}: want {expected} got {}",
                    args.len()
                ),
            ))
        }
    }

    fn string<'v>(&self, name: &str, value: &'v Value) -> Result<&'v str, RenderError> {
        value.as_str().ok_or_else(|| {
            RenderError::bad(self.field, format!("{name}: expected a string, got {value}"))
        })
    }
}

impl Functions for Env<'_, '_> {
    fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, RenderError> {
        let field = self.field;
        match name {
            "env" => {
                self.arity(name, &args, 1)?;
                let key = self.string(name, &args[0])?;
                Ok(Value::String(std::env::var(key).unwrap_or_default()))
            }
            "split" => {
                self.arity(name, &args, 2)?;
                let sep = self.string(name, &args[0])?;
                let text = self.string(name, &args[1])?;
                Ok(Value::Array(
                    text.split(sep).map(|s| Value::String(s.to_string())).collect(),
                ))
            }
            "join" => {
                self.arity(name, &args, 2)?;
                let sep = self.string(name, &args[0])?;
                let Value::Array(items) = &args[1] else {
                    return Err(RenderError::bad(field, "join: expected a list"));
                };
                let items: Vec<String> = items.iter().map(print).collect();
                Ok(Value::String(items.join(sep)))
            }
            "jsonify" => {
                self.arity(name, &args, 1)?;
                serde_json::to_string(&args[0])
                    .map(Value::String)
                    .map_err(|e| RenderError::bad(field, format!("jsonify: {e}")))
            }
            "platform" => {
                self.arity(name, &args, 0)?;
                serde_json::to_value(platform::current())
                    .map_err(|e| RenderError::bad(field, format!("platform: {e}")))
            }
            "param" => {
                self.arity(name, &args, 1)?;
                let value = self.renderer.param(field, self.string(name, &args[0])?)?;
                Ok(match value {
                    Value::String(s) => Value::String(s),
                    other => Value::String(print(&other)),
                })
            }
            "paramList" => {
                self.arity(name, &args, 1)?;
                let param = self.string(name, &args[0])?;
                match self.renderer.param(field, param)? {
                    Value::Array(items) => Ok(Value::Array(
                        items.iter().map(|v| Value::String(print(v))).collect(),
                    )),
                    _ => Err(RenderError::bad(field, format!("param {param:?} is not a list"))),
                }
            }
            "paramMap" => {
                self.arity(name, &args, 1)?;
                let param = self.string(name, &args[0])?;
                match self.renderer.param(field, param)? {
                    Value::Object(map) => Ok(Value::Object(
                        map.into_iter()
                            .map(|(k, v)| (k, Value::String(print(&v))))
                            .collect(),
                    )),
                    _ => Err(RenderError::bad(field, format!("param {param:?} is not a map"))),
                }
            }
            "lookup" => {
                self.arity(name, &args, 1)?;
                self.renderer.lookup(field, self.string(name, &args[0])?)
            }
            other => Err(RenderError::bad(field, format!("function {other:?} not defined"))),
        }
    }
}

/// Modules and the root end parameter scopes
pub(crate) fn is_boundary<V>(graph: &dag::Graph<V>, id: &NodeId) -> bool {
    id.is_root()
        || graph
            .get(id)
            .is_some_and(|node| node.metadata_str(metadata::KIND) == Some("module"))
}

/// The parameter node `name` resolves to from `from`
pub(crate) fn find_param<V>(graph: &dag::Graph<V>, from: &NodeId, name: &str) -> Option<NodeId> {
    let segment = format!("param.{name}");
    for ancestor in from.ancestors() {
        let candidate = ancestor.child(&segment);
        if &candidate != from && graph.contains(&candidate) {
            return Some(candidate);
        }
        if is_boundary(graph, &ancestor) {
            break;
        }
    }
    None
}

/// The node a lookup path resolves to, and the field path left over
///
/// Dotted paths are matched against the children of each ancestor, nearest
/// first, trying the shortest prefix first. Paths with a `/` name a node
/// directly (absolute from `root`, otherwise relative to the parent of
/// `from`) and may not reach into a sibling's children.
pub(crate) fn find_lookup<V>(
    graph: &dag::Graph<V>,
    from: &NodeId,
    path: &str,
) -> Result<Option<(NodeId, Vec<String>)>, String> {
    if let Some((dir, last)) = path.rsplit_once(dag::SEPARATOR) {
        let base = if dir == dag::ROOT || dir.starts_with("root/") {
            NodeId::new(dir)
        } else {
            from.parent().unwrap_or_else(NodeId::root).child(dir)
        };
        let Some((target, suffix)) = match_prefix(graph, &base, last) else {
            return Ok(None);
        };
        let reachable = target.is_ancestor_of(from)
            || target
                .parent()
                .is_some_and(|p| &p == from || p.is_ancestor_of(from));
        if !reachable {
            return Err(format!(
                "lookup {path:?}: {target} is inside a sibling of {from}"
            ));
        }
        return Ok(Some((target, suffix)));
    }

    for scope in from.ancestors() {
        if let Some((target, suffix)) = match_prefix(graph, &scope, path)
            && &target != from
        {
            return Ok(Some((target, suffix)));
        }
    }
    Ok(None)
}

fn match_prefix<V>(graph: &dag::Graph<V>, scope: &NodeId, path: &str) -> Option<(NodeId, Vec<String>)> {
    let parts: Vec<&str> = path.split('.').collect();
    (1..=parts.len()).find_map(|n| {
        let candidate = scope.child(&parts[..n].join("."));
        graph.contains(&candidate).then(|| {
            (
                candidate,
                parts[n..].iter().map(ToString::to_string).collect(),
            )
        })
    })
}

fn index_fields(fields: Fields, suffix: &[String]) -> Option<Value> {
    if suffix.is_empty() {
        return Some(Value::Object(fields.into_iter().collect()));
    }
    let joined = suffix.join(".");
    if let Some(value) = fields.get(&joined) {
        return Some(value.clone());
    }
    let mut value = fields.get(&suffix[0])?.clone();
    for key in &suffix[1..] {
        value = match value {
            Value::Object(mut map) => map.remove(key)?,
            Value::Array(mut items) => {
                let index: usize = key.parse().ok()?;
                if index >= items.len() {
                    return None;
                }
                items.swap_remove(index)
            }
            _ => return None,
        };
    }
    Some(value)
}

/// Turn every preparer into a task, or a thunk when it cannot render yet
pub fn render(ctx: &Context, graph: &Graph) -> crate::Result<Graph> {
    info!("rendering {} nodes", graph.len());
    let rendered = graph.transform(ctx, |g, id, node| {
        let next = match node.value() {
            NodeValue::Preparer(p) => {
                let renderer = Renderer::new(g, id.clone());
                match p.preparer.prepare(ctx, &renderer) {
                    Ok(task) => NodeValue::Task(TaskNode::new(&p.kind, Arc::from(task))),
                    Err(err) if is_unresolvable(&err) => {
                        debug!("{id}: deferred, {err:#}");
                        NodeValue::Thunk(Arc::new(PrepareThunk::new(
                            &p.kind,
                            Arc::clone(&p.preparer),
                        )))
                    }
                    Err(err) => return Err(err),
                }
            }
            NodeValue::Ast(block) => anyhow::bail!("no resource set for kind {:?}", block.kind),
            _ => return Ok(()),
        };
        g.add(node.with_value(next));
        Ok(())
    })?;
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dag::{EdgeKind, Node};
    use serde_json::json;

    /// root/{param.a, task.query.q, module.m/{param.a, task.x}, switch.s/case.c/task.y}
    fn tree() -> dag::Graph<()> {
        let g = dag::Graph::new();
        g.add(Node::new(NodeId::root(), ()));
        let add = |id: &str, kind: &str| {
            let id = NodeId::from(id);
            let mut node = Node::new(id.clone(), ());
            node.add_metadata(metadata::KIND, json!(kind)).unwrap();
            g.add(node);
            let parent = id.parent().unwrap();
            g.connect(&parent, &id, EdgeKind::Parent);
        };
        add("root/param.a", "param");
        add("root/task.query.q", "task.query");
        add("root/module.m", "module");
        add("root/module.m/param.a", "param");
        add("root/module.m/task.x", "task");
        add("root/switch.s", "switch");
        add("root/switch.s/case.c", "case");
        add("root/switch.s/case.c/task.y", "task");
        g
    }

    #[test]
    fn test_param_prefers_nearest_scope() {
        let g = tree();
        assert_eq!(
            find_param(&g, &"root/module.m/task.x".into(), "a"),
            Some(NodeId::from("root/module.m/param.a"))
        );
        assert_eq!(
            find_param(&g, &"root/switch.s/case.c/task.y".into(), "a"),
            Some(NodeId::from("root/param.a"))
        );
    }

    #[test]
    fn test_param_stops_at_module_boundary() {
        let g = tree();
        g.remove(&"root/module.m/param.a".into());
        assert_eq!(find_param(&g, &"root/module.m/task.x".into(), "a"), None);
    }

    #[test]
    fn test_param_default_does_not_find_itself() {
        let g = tree();
        assert_eq!(find_param(&g, &"root/module.m/param.a".into(), "a"), None);
    }

    #[test]
    fn test_dotted_lookup_walks_ancestors() {
        let g = tree();
        let (target, suffix) = find_lookup(&g, &"root/switch.s/case.c/task.y".into(), "task.query.q.stdout")
            .unwrap()
            .unwrap();
        assert_eq!(target, NodeId::from("root/task.query.q"));
        assert_eq!(suffix, vec!["stdout".to_string()]);
    }

    #[test]
    fn test_slash_lookup_rejects_niblings() {
        let g = tree();
        let err = find_lookup(&g, &"root/task.query.q".into(), "module.m/task.x").unwrap_err();
        assert!(err.contains("inside a sibling"));
        let ok = find_lookup(&g, &"root/module.m/task.x".into(), "root/task.query.q.stdout")
            .unwrap()
            .unwrap();
        assert_eq!(ok.0, NodeId::from("root/task.query.q"));
    }

    #[test]
    fn test_unknown_lookup_is_none() {
        let g = tree();
        assert_eq!(find_lookup(&g, &"root/task.query.q".into(), "nothing.here").unwrap(), None);
    }

    #[test]
    fn test_index_fields() {
        let mut fields = Fields::new();
        fields.insert("stdout".into(), json!("hello"));
        fields.insert("nested".into(), json!({"list": ["a", "b"]}));
        assert_eq!(index_fields(fields.clone(), &["stdout".into()]), Some(json!("hello")));
        assert_eq!(
            index_fields(fields.clone(), &["nested".into(), "list".into(), "1".into()]),
            Some(json!("b"))
        );
        assert_eq!(index_fields(fields, &["missing".into()]), None);
    }

    #[test]
    fn test_unresolvable_survives_context() {
        let err = anyhow::Error::new(RenderError::Unresolvable {
            reference: "x".into(),
        })
        .context("while preparing");
        assert!(is_unresolvable(&err));
        assert!(!is_unresolvable(&anyhow::anyhow!("other")));
    }
}
