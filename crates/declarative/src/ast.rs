//! Configuration documents
//!
//! A document is a TOML file made of nested `[[block]]` tables. Every block
//! has a `kind`, a `name`, free-form attributes and optional child blocks:
//!
//! ```toml
//! [[block]]
//! kind = "file.content"
//! name = "motd"
//! destination = "/etc/motd"
//! content = "hello"
//! ```
//!
//! The engine only talks to blocks through [`AstNode`], so another surface
//! language only has to provide that interface.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Key holding child blocks
pub const BLOCK_KEY: &str = "block";

/// A parsed block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub kind: String,
    pub name: String,
    pub attrs: toml::Table,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<Block>,
}

/// Read access to a configuration node
pub trait AstNode {
    fn kind(&self) -> &str;

    fn name(&self) -> &str;

    /// Attribute keys, sorted
    fn keys(&self) -> Vec<&str>;

    /// A string attribute; `Ok(None)` when absent
    fn get_string(&self, key: &str) -> Result<Option<&str>>;

    /// A list-of-strings attribute; `Ok(None)` when absent
    fn get_string_slice(&self, key: &str) -> Result<Option<Vec<&str>>>;

    fn is_module(&self) -> bool {
        self.kind() == "module"
    }

    /// Where a module is loaded from
    fn source(&self) -> Result<Option<&str>> {
        self.get_string("source")
    }

    /// The raw attribute table, for plug-in decoders
    fn object_item(&self) -> &toml::Table;
}

impl Block {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            attrs: toml::Table::new(),
            blocks: Vec::new(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn with_blocks(mut self, blocks: Vec<Block>) -> Self {
        self.blocks = blocks;
        self
    }

    /// The ID segment of this block: `<kind>.<name>`
    pub fn segment(&self) -> String {
        format!("{}.{}", self.kind, self.name)
    }

    /// BLAKE3 of the canonical JSON form, children included
    ///
    /// `None` when the block cannot be serialized.
    pub fn content_hash(&self) -> Option<String> {
        match serde_json::to_vec(self) {
            Ok(json) => Some(blake3::hash(&json).to_hex().to_string()),
            Err(err) => {
                log::debug!("not hashing {}: {err}", self.segment());
                None
            }
        }
    }

    /// Whether any attribute, here or below, holds a template action
    pub fn is_templated(&self) -> bool {
        self.attrs.values().any(value_is_templated) || self.blocks.iter().any(Self::is_templated)
    }

    /// Decode the attribute table into a plug-in's field struct
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> anyhow::Result<T> {
        let value = toml::Value::Table(self.attrs.clone());
        Ok(value.try_into()?)
    }

    fn attribute_error(&self, key: &str, expected: &'static str) -> Error {
        Error::Attribute {
            id: self.segment(),
            key: key.to_string(),
            expected,
        }
    }

    fn from_table(mut table: toml::Table, location: &str) -> Result<Self> {
        let parse_error = |message: String| Error::Parse {
            location: location.to_string(),
            message,
        };

        let kind = match table.remove("kind") {
            Some(toml::Value::String(kind)) if !kind.is_empty() => kind,
            Some(_) => return Err(parse_error("block kind must be a non-empty string".into())),
            None => return Err(parse_error("block without a kind".into())),
        };
        let name = match table.remove("name") {
            Some(toml::Value::String(name)) if !name.is_empty() => name,
            Some(_) => {
                return Err(parse_error(format!(
                    "{kind}: block name must be a non-empty string"
                )));
            }
            None if kind == "default" => "default".to_string(),
            None => return Err(parse_error(format!("{kind}: block without a name"))),
        };
        if name.contains(dag::SEPARATOR) {
            return Err(parse_error(format!(
                "{kind}.{name}: names cannot contain {:?}",
                dag::SEPARATOR
            )));
        }

        let blocks = match table.remove(BLOCK_KEY) {
            Some(value) => blocks_from_value(value, location)?,
            None => Vec::new(),
        };

        Ok(Self {
            kind,
            name,
            attrs: table,
            blocks,
        })
    }

    fn to_table(&self) -> toml::Table {
        let mut table = toml::Table::new();
        table.insert("kind".into(), self.kind.clone().into());
        table.insert("name".into(), self.name.clone().into());
        for (key, value) in &self.attrs {
            table.insert(key.clone(), value.clone());
        }
        if !self.blocks.is_empty() {
            let children = self
                .blocks
                .iter()
                .map(|b| toml::Value::Table(b.to_table()))
                .collect();
            table.insert(BLOCK_KEY.into(), toml::Value::Array(children));
        }
        table
    }
}

impl AstNode for Block {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn keys(&self) -> Vec<&str> {
        self.attrs.keys().map(String::as_str).collect()
    }

    fn get_string(&self, key: &str) -> Result<Option<&str>> {
        match self.attrs.get(key) {
            None => Ok(None),
            Some(toml::Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(self.attribute_error(key, "a string")),
        }
    }

    fn get_string_slice(&self, key: &str) -> Result<Option<Vec<&str>>> {
        match self.attrs.get(key) {
            None => Ok(None),
            Some(toml::Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .ok_or_else(|| self.attribute_error(key, "a list of strings"))
                })
                .collect::<Result<Vec<_>>>()
                .map(Some),
            Some(_) => Err(self.attribute_error(key, "a list of strings")),
        }
    }

    fn object_item(&self) -> &toml::Table {
        &self.attrs
    }
}

fn blocks_from_value(value: toml::Value, location: &str) -> Result<Vec<Block>> {
    match value {
        toml::Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                toml::Value::Table(table) => Block::from_table(table, location),
                _ => Err(Error::Parse {
                    location: location.to_string(),
                    message: "blocks must be tables".into(),
                }),
            })
            .collect(),
        _ => Err(Error::Parse {
            location: location.to_string(),
            message: format!("{BLOCK_KEY:?} must be an array of tables"),
        }),
    }
}

fn value_is_templated(value: &toml::Value) -> bool {
    match value {
        toml::Value::String(s) => s.contains("{{"),
        toml::Value::Array(items) => items.iter().any(value_is_templated),
        toml::Value::Table(table) => table.values().any(value_is_templated),
        _ => false,
    }
}

/// A parsed configuration document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub blocks: Vec<Block>,
}

impl Document {
    /// Parse document text; `location` is only used in error messages
    pub fn parse(text: &str, location: &str) -> Result<Self> {
        let mut table: toml::Table = toml::from_str(text).map_err(|e| Error::Parse {
            location: location.to_string(),
            message: e.message().to_string(),
        })?;

        let blocks = match table.remove(BLOCK_KEY) {
            Some(value) => blocks_from_value(value, location)?,
            None => Vec::new(),
        };
        if let Some(key) = table.keys().next() {
            return Err(Error::Parse {
                location: location.to_string(),
                message: format!("unexpected top-level key {key:?}"),
            });
        }
        Ok(Self { blocks })
    }

    /// The canonical text form
    pub fn to_canonical(&self) -> String {
        if self.blocks.is_empty() {
            return String::new();
        }
        let mut table = toml::Table::new();
        let blocks = self
            .blocks
            .iter()
            .map(|b| toml::Value::Table(b.to_table()))
            .collect();
        table.insert(BLOCK_KEY.into(), toml::Value::Array(blocks));
        toml::to_string(&table).unwrap_or_default()
    }
}
