//! Commands that only read configuration: `check`, `validate`, `fmt`

use super::RunFailed;
use crate::Context;
use crate::cli::SourceArgs;
use crate::ui;
use anyhow::{Context as _, Result};
use declarative::{Document, Pipeline};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Parse every file, reporting syntax errors
pub fn check(ctx: &Context, files: &[PathBuf]) -> Result<()> {
    let mut failed = 0;
    for file in files {
        match parse(file) {
            Ok(_) => {
                if !ctx.quiet {
                    ui::success(&file.display().to_string());
                }
            }
            Err(err) => {
                failed += 1;
                ui::error(&format!("{err:#}"));
            }
        }
    }
    if failed > 0 {
        return Err(RunFailed(format!("{failed} invalid file(s)")).into());
    }
    Ok(())
}

fn parse(path: &Path) -> Result<(String, Document)> {
    let text = fs::read_to_string(path).with_context(|| format!("Could not read {}", path.display()))?;
    let document = Document::parse(&text, &path.display().to_string())?;
    Ok((text, document))
}

/// Load, transform and validate the graph without rendering anything
pub fn validate(ctx: &Context, args: &SourceArgs) -> Result<()> {
    let params = super::params(ctx, &args.params)?;
    let graph = Pipeline::new()
        .params(&params)
        .prepare(&ctx.cancel, &args.location)?;
    if !ctx.quiet {
        ui::success(&format!(
            "{}: {} nodes, {} edges",
            args.location,
            graph.len(),
            graph.edges().len()
        ));
    }
    Ok(())
}

/// What `fmt` found in one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Formatted {
    Unchanged,
    /// Differs from the canonical form (rewritten unless checking)
    Changed,
}

/// Rewrite files in canonical form, or only report them with `check`
pub fn fmt(ctx: &Context, check: bool, paths: &[PathBuf]) -> Result<()> {
    let mut changed = Vec::new();
    let mut failed = 0;

    for (file, explicit) in collect(paths) {
        match format_file(&file, check) {
            Ok(Formatted::Unchanged) => {}
            Ok(Formatted::Changed) => {
                if check {
                    println!("{}", file.display());
                } else if !ctx.quiet {
                    ui::success(&format!("formatted {}", file.display()));
                }
                changed.push(file);
            }
            // walked files that are not configuration documents are skipped
            Err(err) if !explicit => log::debug!("skipping {}: {err:#}", file.display()),
            Err(err) => {
                failed += 1;
                ui::error(&format!("{err:#}"));
            }
        }
    }

    if failed > 0 {
        return Err(RunFailed(format!("{failed} file(s) could not be formatted")).into());
    }
    if check && !changed.is_empty() {
        return Err(RunFailed(format!("{} file(s) need formatting", changed.len())).into());
    }
    Ok(())
}

pub fn format_file(path: &Path, check: bool) -> Result<Formatted> {
    let (text, document) = parse(path)?;
    let canonical = document.to_canonical();
    if canonical == text {
        return Ok(Formatted::Unchanged);
    }
    if !check {
        fs::write(path, canonical).with_context(|| format!("Could not write {}", path.display()))?;
    }
    Ok(Formatted::Changed)
}

/// Files named directly, plus every `.toml` file below named directories
fn collect(paths: &[PathBuf]) -> Vec<(PathBuf, bool)> {
    let mut files = Vec::new();
    for path in paths {
        if !path.is_dir() {
            files.push((path.clone(), true));
            continue;
        }
        let walker = WalkDir::new(path)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));
        for entry in walker.filter_map(Result::ok) {
            if entry.file_type().is_file()
                && entry.path().extension().is_some_and(|ext| ext == "toml")
            {
                files.push((entry.into_path(), false));
            }
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MESSY: &str = "[[block]]\nname = \"x\"\nkind = \"task.query\"\nquery = 'echo hi'\n";

    #[test]
    fn test_format_is_stable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("main.toml");
        fs::write(&path, MESSY).unwrap();

        assert_eq!(format_file(&path, true).unwrap(), Formatted::Changed);
        assert_eq!(fs::read_to_string(&path).unwrap(), MESSY);

        assert_eq!(format_file(&path, false).unwrap(), Formatted::Changed);
        let formatted = fs::read_to_string(&path).unwrap();
        assert_eq!(format_file(&path, true).unwrap(), Formatted::Unchanged);

        let before = Document::parse(MESSY, "messy").unwrap();
        let after = Document::parse(&formatted, "formatted").unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_collect_walks_directories() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("mods")).unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join("main.toml"), "").unwrap();
        fs::write(dir.path().join("mods/web.toml"), "").unwrap();
        fs::write(dir.path().join("notes.md"), "").unwrap();
        fs::write(dir.path().join(".git/config.toml"), "").unwrap();

        let files = collect(&[dir.path().to_path_buf(), PathBuf::from("/explicit.toml")]);
        let names: Vec<(String, bool)> = files
            .iter()
            .map(|(p, explicit)| {
                let shown = p.strip_prefix(dir.path()).unwrap_or(p);
                (shown.display().to_string(), *explicit)
            })
            .collect();
        assert_eq!(
            names,
            [
                ("main.toml".to_string(), false),
                ("mods/web.toml".to_string(), false),
                ("/explicit.toml".to_string(), true),
            ]
        );
    }

    #[test]
    fn test_parse_reports_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[[block]]\nname = \"x\"\n").unwrap();
        let err = parse(&path).unwrap_err();
        assert!(format!("{err:#}").contains("bad.toml"));
    }
}
