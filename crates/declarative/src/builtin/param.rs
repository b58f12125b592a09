use crate::ast::Block;
use crate::render::Renderer;
use crate::resource::{Fields, FromBlock, Preparer, Task};
use crate::status::Status;
use anyhow::{Context as _, bail};
use dag::Context;
use serde::Deserialize;
use serde_json::Value;

/// Expected shape of a parameter value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Bool,
    List,
    Map,
}

impl ParamType {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::List => value.is_array(),
            Self::Map => value.is_object(),
        }
    }
}

/// A named input of a module
///
/// The value supplied by the enclosing module (or the caller, at the root)
/// wins over the default.
#[derive(Debug, Deserialize)]
pub struct ParamPreparer {
    #[serde(default)]
    pub default: Option<toml::Value>,
    #[serde(default, rename = "type")]
    pub kind: Option<ParamType>,
}

impl FromBlock for ParamPreparer {
    fn from_block(block: &Block) -> anyhow::Result<Self> {
        block.decode()
    }
}

impl Preparer for ParamPreparer {
    fn prepare(&self, _ctx: &Context, render: &Renderer<'_>) -> anyhow::Result<Box<dyn Task>> {
        let id = render.id();
        let name = id.base().strip_prefix("param.").unwrap_or(id.base());

        let value = match render.value()? {
            Some(value) => value,
            None => match &self.default {
                Some(default) => {
                    let default = serde_json::to_value(default)
                        .with_context(|| format!("`{name}` param has an unusable default"))?;
                    render.render_value("default", default)?
                }
                None => bail!("`{name}` param is required"),
            },
        };

        if let Some(kind) = self.kind
            && !kind.accepts(&value)
        {
            bail!("`{name}` param must be a {kind:?}, got {value}");
        }

        Ok(Box::new(ParamTask {
            name: name.to_string(),
            value,
        }))
    }
}

/// A resolved parameter; exports its value as `value`
#[derive(Debug, Clone)]
pub struct ParamTask {
    pub name: String,
    pub value: Value,
}

impl Task for ParamTask {
    fn check(&self, _ctx: &Context, _render: &Renderer<'_>) -> anyhow::Result<Status> {
        Ok(Status::no_change())
    }

    fn apply(&self, _ctx: &Context) -> anyhow::Result<Status> {
        Ok(Status::no_change())
    }

    fn exported_fields(&self) -> Fields {
        Fields::from([("value".to_string(), self.value.clone())])
    }
}
