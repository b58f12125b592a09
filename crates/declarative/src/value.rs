//! Node values through the pipeline stages
//!
//! A node starts as a parsed [`Block`], becomes a [`Preparer`] once its kind
//! is looked up, and a [`Task`] once rendered. Nodes whose templates cannot
//! be resolved yet sit as a [`PrepareThunk`] until a later stage forces
//! them. A thunk that fails for good is replaced by a tombstone carrying the
//! failure.

use crate::ast::Block;
use crate::render::{Renderer, is_unresolvable};
use crate::resource::{Preparer, Task};
use crate::status::Status;
use dag::{ContentHash, Context};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// The value held by every graph node
#[derive(Debug, Clone)]
pub enum NodeValue {
    Ast(Block),
    Preparer(PreparerNode),
    Task(TaskNode),
    Thunk(Arc<PrepareThunk>),
    Tombstone(Status),
}

/// A node graph as produced by every stage
pub type Graph = dag::Graph<NodeValue>;

/// A graph node
pub type Node = dag::Node<NodeValue>;

#[derive(Debug, Clone)]
pub struct PreparerNode {
    pub kind: String,
    pub preparer: Arc<dyn Preparer>,
}

#[derive(Debug, Clone)]
pub struct TaskNode {
    pub kind: String,
    pub task: Arc<dyn Task>,
    /// Latest check or apply result
    pub status: Option<Status>,
    /// Check result taken before apply
    pub plan: Option<Status>,
}

impl TaskNode {
    pub fn new(kind: impl Into<String>, task: Arc<dyn Task>) -> Self {
        Self {
            kind: kind.into(),
            task,
            status: None,
            plan: None,
        }
    }

    pub fn with_status(&self, status: Status) -> Self {
        Self {
            status: Some(status),
            ..self.clone()
        }
    }
}

impl NodeValue {
    /// The resource kind, when known
    pub fn kind(&self) -> Option<&str> {
        match self {
            Self::Ast(block) => Some(&block.kind),
            Self::Preparer(p) => Some(&p.kind),
            Self::Task(t) => Some(&t.kind),
            Self::Thunk(t) => Some(t.kind()),
            Self::Tombstone(_) => None,
        }
    }

    pub fn as_task(&self) -> Option<&TaskNode> {
        match self {
            Self::Task(task) => Some(task),
            _ => None,
        }
    }

    /// The latest status, tombstones included
    pub fn status(&self) -> Option<&Status> {
        match self {
            Self::Task(task) => task.status.as_ref(),
            Self::Tombstone(status) => Some(status),
            _ => None,
        }
    }

    pub fn is_thunk(&self) -> bool {
        matches!(self, Self::Thunk(_))
    }

    /// Short stage name, for logs and errors
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Ast(_) => "ast",
            Self::Preparer(_) => "preparer",
            Self::Task(_) => "task",
            Self::Thunk(_) => "thunk",
            Self::Tombstone(_) => "tombstone",
        }
    }
}

impl ContentHash for NodeValue {
    /// Only literal blocks are merged: a templated block renders differently
    /// depending on where it sits.
    fn content_hash(&self) -> Option<String> {
        match self {
            Self::Ast(block) if !block.is_templated() => block.content_hash(),
            _ => None,
        }
    }
}

enum ThunkState {
    NotEvaluated,
    InProgress,
    Value(Arc<dyn Task>),
    Failed(String),
}

/// A deferred call to [`Preparer::prepare`]
///
/// Forcing caches success and hard failure. An unresolvable result leaves
/// the thunk unevaluated so a later stage can retry it.
pub struct PrepareThunk {
    kind: String,
    preparer: Arc<dyn Preparer>,
    state: Mutex<ThunkState>,
}

impl PrepareThunk {
    pub fn new(kind: impl Into<String>, preparer: Arc<dyn Preparer>) -> Self {
        Self {
            kind: kind.into(),
            preparer,
            state: Mutex::new(ThunkState::NotEvaluated),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn preparer(&self) -> &Arc<dyn Preparer> {
        &self.preparer
    }

    pub fn is_evaluated(&self) -> bool {
        matches!(
            *self.state.lock().unwrap_or_else(PoisonError::into_inner),
            ThunkState::Value(_) | ThunkState::Failed(_)
        )
    }

    /// Evaluate the preparer, or return the cached outcome
    pub fn force(&self, ctx: &Context, render: &Renderer<'_>) -> anyhow::Result<Arc<dyn Task>> {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match &*state {
                ThunkState::Value(task) => return Ok(Arc::clone(task)),
                ThunkState::Failed(message) => anyhow::bail!("{message}"),
                ThunkState::InProgress => anyhow::bail!("{} is already being prepared", self.kind),
                ThunkState::NotEvaluated => *state = ThunkState::InProgress,
            }
        }

        let result = self.preparer.prepare(ctx, render);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match result {
            Ok(task) => {
                let task: Arc<dyn Task> = Arc::from(task);
                *state = ThunkState::Value(Arc::clone(&task));
                Ok(task)
            }
            Err(err) if is_unresolvable(&err) => {
                *state = ThunkState::NotEvaluated;
                Err(err)
            }
            Err(err) => {
                *state = ThunkState::Failed(format!("{err:#}"));
                Err(err)
            }
        }
    }
}

impl fmt::Debug for PrepareThunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrepareThunk")
            .field("kind", &self.kind)
            .field("evaluated", &self.is_evaluated())
            .finish_non_exhaustive()
    }
}
