//! File resources

use anyhow::{Context as _, Result, bail};
use declarative::{Block, Context, Diff, Fields, FromBlock, Level, Preparer, Renderer, Status, Task};
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

// ============================================================================
// file.content
// ============================================================================

/// A file with fixed content
#[derive(Debug, Deserialize)]
pub struct FileContent {
    destination: String,
    content: String,
    /// Octal permission bits, e.g. `"0644"`
    #[serde(default)]
    mode: Option<String>,
}

impl FromBlock for FileContent {
    fn from_block(block: &Block) -> Result<Self> {
        block.decode()
    }
}

impl Preparer for FileContent {
    fn prepare(&self, _ctx: &Context, render: &Renderer<'_>) -> Result<Box<dyn Task>> {
        let destination = super::expand(&render.render("destination", &self.destination)?);
        if !destination.is_absolute() {
            bail!("destination must be absolute, got {}", destination.display());
        }
        let mode = match &self.mode {
            Some(mode) => Some(parse_mode(&render.render("mode", mode)?)?),
            None => None,
        };
        Ok(Box::new(FileContentTask {
            destination,
            content: render.render("content", &self.content)?,
            mode,
        }))
    }
}

#[derive(Debug)]
pub struct FileContentTask {
    destination: PathBuf,
    content: String,
    mode: Option<u32>,
}

impl Task for FileContentTask {
    fn check(&self, _ctx: &Context, _render: &Renderer<'_>) -> Result<Status> {
        let mut status = Status::no_change();
        let current = match fs::read_to_string(&self.destination) {
            Ok(current) => Some(current),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to read {}", self.destination.display()));
            }
        };

        match current {
            Some(current) => status.add_difference("content", Diff::new(current, self.content.clone())),
            None => status.add_difference(
                "content",
                Diff::new("", self.content.clone()).with_reason("file does not exist"),
            ),
        }
        if let Some(mode) = self.mode {
            let current = current_mode(&self.destination)?;
            status.add_difference(
                "mode",
                Diff::new(current.map(format_mode).unwrap_or_default(), format_mode(mode)),
            );
        }
        // an empty file still has to be created
        if !self.destination.exists() {
            status.raise(Level::WillChange);
        }
        Ok(status)
    }

    fn apply(&self, _ctx: &Context) -> Result<Status> {
        if let Some(parent) = self.destination.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create parent directory: {}", parent.display()))?;
        }
        fs::write(&self.destination, &self.content)
            .with_context(|| format!("Failed to write {}", self.destination.display()))?;
        if let Some(mode) = self.mode {
            set_mode(&self.destination, mode)?;
        }
        Ok(Status::no_change().with_message(format!("wrote {}", self.destination.display())))
    }

    fn exported_fields(&self) -> Fields {
        Fields::from([
            ("destination".to_string(), self.destination.display().to_string().into()),
            ("content".to_string(), self.content.clone().into()),
        ])
    }
}

fn parse_mode(mode: &str) -> Result<u32> {
    let digits = mode.trim().trim_start_matches("0o");
    match u32::from_str_radix(digits, 8) {
        Ok(bits) if bits <= 0o7777 => Ok(bits),
        _ => bail!("invalid file mode {mode:?}, expected octal like \"0644\""),
    }
}

fn format_mode(mode: u32) -> String {
    format!("{mode:04o}")
}

#[cfg(unix)]
fn current_mode(path: &Path) -> Result<Option<u32>> {
    use std::os::unix::fs::PermissionsExt;
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(meta.permissions().mode() & 0o7777)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("Failed to stat {}", path.display())),
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("Failed to set mode of {}", path.display()))
}

#[cfg(not(unix))]
fn current_mode(_path: &Path) -> Result<Option<u32>> {
    bail!("file modes are only supported on unix")
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    bail!("file modes are only supported on unix")
}

// ============================================================================
// file.directory
// ============================================================================

/// A directory that must exist
#[derive(Debug, Deserialize)]
pub struct FileDirectory {
    destination: String,
    /// Create missing parents too
    #[serde(default)]
    create_all: bool,
}

impl FromBlock for FileDirectory {
    fn from_block(block: &Block) -> Result<Self> {
        block.decode()
    }
}

impl Preparer for FileDirectory {
    fn prepare(&self, _ctx: &Context, render: &Renderer<'_>) -> Result<Box<dyn Task>> {
        let destination = super::expand(&render.render("destination", &self.destination)?);
        if !destination.is_absolute() {
            bail!("destination must be absolute, got {}", destination.display());
        }
        Ok(Box::new(FileDirectoryTask {
            destination,
            create_all: self.create_all,
        }))
    }
}

#[derive(Debug)]
pub struct FileDirectoryTask {
    destination: PathBuf,
    create_all: bool,
}

impl Task for FileDirectoryTask {
    fn check(&self, _ctx: &Context, _render: &Renderer<'_>) -> Result<Status> {
        if self.destination.is_dir() {
            return Ok(Status::no_change());
        }
        if self.destination.exists() {
            return Ok(Status::new(Level::CantChange)
                .with_message(format!("{} exists and is not a directory", self.destination.display())));
        }
        let mut status = Status::no_change();
        status.add_difference("state", Diff::new("absent", "directory"));
        Ok(status)
    }

    fn apply(&self, _ctx: &Context) -> Result<Status> {
        let created = if self.create_all {
            fs::create_dir_all(&self.destination)
        } else {
            fs::create_dir(&self.destination)
        };
        created.with_context(|| format!("Failed to create {}", self.destination.display()))?;
        Ok(Status::no_change().with_message(format!("created {}", self.destination.display())))
    }

    fn exported_fields(&self) -> Fields {
        Fields::from([(
            "destination".to_string(),
            self.destination.display().to_string().into(),
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{Graph, Node, NodeId, NodeValue};
    use tempfile::TempDir;

    fn graph() -> Graph {
        let graph = Graph::new();
        graph.add(Node::new(
            NodeId::root(),
            NodeValue::Tombstone(Status::no_change()),
        ));
        graph
    }

    fn block(kind: &str, attrs: &[(&str, &str)]) -> Block {
        attrs
            .iter()
            .fold(Block::new(kind, "x"), |block, (key, value)| block.with_attr(*key, *value))
    }

    fn prepare<P: Preparer + FromBlock>(graph: &Graph, block: &Block) -> Result<Box<dyn Task>> {
        let preparer = P::from_block(block)?;
        preparer.prepare(&Context::new(), &Renderer::new(graph, NodeId::root()))
    }

    #[test]
    fn test_content_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub/motd");
        let graph = graph();
        let task = prepare::<FileContent>(
            &graph,
            &block("file.content", &[("destination", path.to_str().unwrap()), ("content", "hi\n")]),
        )
        .unwrap();

        let status = task.check(&Context::new(), &Renderer::new(&graph, NodeId::root())).unwrap();
        assert!(status.has_changes());
        assert_eq!(status.differences["content"].reason.as_deref(), Some("file does not exist"));

        task.apply(&Context::new()).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hi\n");
        let status = task.check(&Context::new(), &Renderer::new(&graph, NodeId::root())).unwrap();
        assert!(!status.has_changes());
    }

    #[test]
    fn test_content_empty_file_is_created() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty");
        let graph = graph();
        let task = prepare::<FileContent>(
            &graph,
            &block("file.content", &[("destination", path.to_str().unwrap()), ("content", "")]),
        )
        .unwrap();

        let status = task.check(&Context::new(), &Renderer::new(&graph, NodeId::root())).unwrap();
        assert_eq!(status.level, Level::WillChange);
        task.apply(&Context::new()).unwrap();
        assert!(path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_content_mode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("script");
        fs::write(&path, "echo").unwrap();
        let graph = graph();
        let task = prepare::<FileContent>(
            &graph,
            &block(
                "file.content",
                &[("destination", path.to_str().unwrap()), ("content", "echo"), ("mode", "0755")],
            ),
        )
        .unwrap();

        set_mode(&path, 0o644).unwrap();
        let status = task.check(&Context::new(), &Renderer::new(&graph, NodeId::root())).unwrap();
        assert!(!status.differences["content"].changes());
        assert_eq!(status.differences["mode"], Diff::new("0644", "0755"));

        task.apply(&Context::new()).unwrap();
        assert_eq!(current_mode(&path).unwrap(), Some(0o755));
    }

    #[test]
    fn test_bad_mode_and_relative_destination() {
        let graph = graph();
        let err = prepare::<FileContent>(
            &graph,
            &block("file.content", &[("destination", "/tmp/x"), ("content", ""), ("mode", "999")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid file mode"));

        let err = prepare::<FileContent>(
            &graph,
            &block("file.content", &[("destination", "relative/x"), ("content", "")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("must be absolute"));
    }

    #[test]
    fn test_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b");
        let graph = graph();
        let render = Renderer::new(&graph, NodeId::root());

        let plain = prepare::<FileDirectory>(
            &graph,
            &block("file.directory", &[("destination", path.to_str().unwrap())]),
        )
        .unwrap();
        assert!(plain.check(&Context::new(), &render).unwrap().has_changes());
        assert!(plain.apply(&Context::new()).is_err());

        let all = FileDirectory {
            destination: path.display().to_string(),
            create_all: true,
        }
        .prepare(&Context::new(), &render)
        .unwrap();
        all.apply(&Context::new()).unwrap();
        assert!(path.is_dir());
        assert!(!plain.check(&Context::new(), &render).unwrap().has_changes());
    }

    #[test]
    fn test_directory_blocked_by_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file");
        fs::write(&path, "").unwrap();
        let graph = graph();
        let render = Renderer::new(&graph, NodeId::root());
        let task = prepare::<FileDirectory>(
            &graph,
            &block("file.directory", &[("destination", path.to_str().unwrap())]),
        )
        .unwrap();
        assert_eq!(task.check(&Context::new(), &render).unwrap().level, Level::CantChange);
    }
}
