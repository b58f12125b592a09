use colored::{ColoredString, Colorize};
use declarative::{Diff, Health, Level, Stage, Status, Summary};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    eprintln!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Run output
// ============================================================================

/// Header for a run of `stage` over `location`
pub fn run_header(stage: Stage, location: &str) {
    let title = match stage {
        Stage::Plan => format!("Plan: {location}"),
        Stage::Apply => format!("Apply: {location}"),
    };
    header(&title);
}

pub fn level_symbol(level: Level) -> ColoredString {
    match level {
        Level::Healthy | Level::NoChange => "✓".green(),
        Level::WillChange => "~".yellow(),
        Level::CantChange => "!".magenta(),
        Level::Fatal => "✗".red(),
    }
}

pub fn level_label(level: Level) -> ColoredString {
    let text = level.to_string();
    match level {
        Level::Healthy | Level::NoChange => text.dimmed(),
        Level::WillChange => text.yellow(),
        Level::CantChange => text.magenta(),
        Level::Fatal => text.red().bold(),
    }
}

/// One line for a node that just finished
pub fn node_finished(id: &str, status: &Status) {
    println!("  {} {}  {}", level_symbol(status.level), id, level_label(status.level));
}

/// Differences, messages and errors of one node
pub fn node_details(id: &str, status: &Status, verbose: bool) {
    let interesting = status.has_changes()
        || status.error.is_some()
        || status.warning.is_some()
        || (verbose && !(status.messages.is_empty() && status.output.is_empty()));
    if !interesting {
        return;
    }

    println!();
    println!("{} {}", level_symbol(status.level), id.bold());
    for (field, diff) in &status.differences {
        if !diff.changes() {
            continue;
        }
        for line in diff_lines(field, diff) {
            print_diff_line(&line);
        }
    }
    for message in &status.messages {
        println!("    {message}");
    }
    if verbose {
        for line in &status.output {
            println!("    {}", line.dimmed());
        }
    }
    if let Some(warning) = &status.warning {
        println!("    {} {}", "warning:".yellow(), warning);
    }
    if let Some(error) = &status.error {
        println!("    {} {}", "error:".red(), error);
    }
}

/// Text lines describing one changed field
///
/// Single-line values print as `field: before → after`; anything spanning
/// lines becomes a unified diff.
pub fn diff_lines(field: &str, diff: &Diff) -> Vec<String> {
    let reason = diff
        .reason
        .as_deref()
        .map(|r| format!(" ({r})"))
        .unwrap_or_default();

    if !diff.before.contains('\n') && !diff.after.contains('\n') {
        return vec![format!("    {field}: {:?} → {:?}{reason}", diff.before, diff.after)];
    }

    let mut lines = vec![format!("    {field}:{reason}")];
    let text = similar::TextDiff::from_lines(&diff.before, &diff.after);
    let unified = text
        .unified_diff()
        .context_radius(3)
        .header("before", "after")
        .to_string();
    lines.extend(unified.lines().map(|line| format!("      {line}")));
    lines
}

fn print_diff_line(line: &str) {
    let body = line.trim_start();
    if body.starts_with("+++") || body.starts_with("---") {
        println!("{}", line.bold());
    } else if body.starts_with('+') {
        println!("{}", line.green());
    } else if body.starts_with('-') {
        println!("{}", line.red());
    } else if body.starts_with("@@") {
        println!("{}", line.cyan());
    } else {
        println!("{line}");
    }
}

/// The closing `N errors, M changes` line and every error by node
pub fn summary(summary: &Summary) {
    println!();
    if !summary.errors.is_empty() {
        for (id, error) in &summary.errors {
            error_line(id.as_str(), error);
        }
        println!();
    }
    for id in &summary.unresolved {
        warn(&format!("{id}: references never resolved"));
    }
    for id in &summary.skipped {
        warn(&format!("{id}: skipped, a dependency failed"));
    }
    if summary.is_success() {
        success(&summary.to_string());
    } else {
        self::error(&summary.to_string());
    }
}

fn error_line(id: &str, error: &str) {
    eprintln!("  {} {}: {}", "✗".red(), id.bold(), error);
}

/// One line of a health check
pub fn health(id: &str, health: Health, status: &Status) {
    let symbol = match health {
        Health::Healthy => "✓".green(),
        Health::Warning => "~".yellow(),
        Health::Error => "✗".red(),
    };
    let detail = status
        .error
        .as_deref()
        .or(status.warning.as_deref())
        .map(|d| format!("  {}", d.dimmed()))
        .unwrap_or_default();
    println!("  {symbol} {id}  {health}{detail}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line_diff() {
        let lines = diff_lines("mode", &Diff::new("0644", "0755"));
        assert_eq!(lines, [r#"    mode: "0644" → "0755""#]);
    }

    #[test]
    fn test_single_line_diff_with_reason() {
        let lines = diff_lines("content", &Diff::new("", "hi").with_reason("file does not exist"));
        assert_eq!(lines, [r#"    content: "" → "hi" (file does not exist)"#]);
    }

    #[test]
    fn test_multi_line_diff_is_unified() {
        let lines = diff_lines("content", &Diff::new("a\nb\nc\n", "a\nB\nc\n"));
        assert_eq!(lines[0], "    content:");
        let body: Vec<&str> = lines[1..].iter().map(|l| l.trim()).collect();
        assert!(body.contains(&"--- before"));
        assert!(body.contains(&"+++ after"));
        assert!(body.contains(&"-b"));
        assert!(body.contains(&"+B"));
    }
}
