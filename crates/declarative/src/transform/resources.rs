//! Registry lookup: every block becomes the preparer for its kind

use super::conditional::ConditionalPreparer;
use crate::error::{Error, Result};
use crate::metadata;
use crate::registry::Registry;
use crate::value::{Graph, NodeValue, PreparerNode};
use dag::{Context, NodeId};
use log::{debug, info};
use std::sync::Arc;

pub fn set_resources(ctx: &Context, graph: &Graph, registry: &Registry) -> Result<Graph> {
    info!("setting resources for {} nodes", graph.len());
    let out = graph.copy();

    for node in out.nodes() {
        ctx.check()?;
        let id = node.id();
        let NodeValue::Ast(block) = node.value() else {
            continue;
        };

        let preparer = match registry.prepare(block) {
            None => {
                return Err(Error::UnknownKind {
                    id: id.clone(),
                    kind: block.kind.clone(),
                });
            }
            Some(Err(error)) => {
                return Err(Error::Decode {
                    id: id.clone(),
                    error,
                });
            }
            Some(Ok(preparer)) => preparer,
        };

        let preparer = match node.metadata_str(metadata::CONDITIONAL_CASE) {
            Some(case) => Arc::new(ConditionalPreparer {
                case: NodeId::from(case),
                inner: preparer,
            }),
            None => preparer,
        };

        let group = preparer.group();
        if let Some(group) = &group {
            debug!("{id} is in group {group:?}");
        }
        let next = node
            .with_value(NodeValue::Preparer(PreparerNode {
                kind: block.kind.clone(),
                preparer,
            }))
            .with_group(group);
        out.add(next);
    }

    out.validate()?;
    Ok(out)
}
