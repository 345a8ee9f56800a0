use colored::Colorize;
use optrace::{Event, OpState, Operation, OpsView};
use serde_json::Value;

/// Print a success message
pub fn success(msg: &str) {
    eprintln!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    eprintln!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
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
// Operation labels
// ============================================================================

fn marker(state: OpState) -> String {
    match state {
        OpState::Init | OpState::InProgress => "▸".cyan().to_string(),
        OpState::Succeeded => "✓".green().to_string(),
        OpState::Failed => "✗".red().to_string(),
        OpState::Stopped => "■".yellow().to_string(),
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(text).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or_default()
}

/// Short human label for an operation, from its kind and data.
pub fn label(op: &Operation) -> String {
    let field = |key: &str| op.data.get(key).map(text);
    let detail = match op.kind.as_str() {
        "build/dep" => field("actual_target")
            .or_else(|| field("target_fqn"))
            .or_else(|| field("target_name")),
        "build/specs" => field("specs"),
        "use/dep" => field("spec"),
        "use/conf" => field("configs"),
        "use/dirs" => field("dirs"),
        "render/str" => field("template").map(|t| first_line(&t).to_string()),
        "render/file" => field("dst"),
        "run/sh" | "run/sudo" => field("cmd").map(|c| first_line(&c).to_string()),
        _ => field("status"),
    };

    let kind = op.kind.dimmed();
    match detail {
        Some(detail) if !detail.is_empty() => format!("{kind} {detail}"),
        _ => kind.to_string(),
    }
}

fn elapsed(op: &Operation) -> String {
    op.elapsed().map_or_else(String::new, |d| {
        format!(" ({:.1}s)", d.num_milliseconds() as f64 / 1000.0)
            .dimmed()
            .to_string()
    })
}

// ============================================================================
// Live tree
// ============================================================================

/// Whether an operation gets its own line or lends its depth to its children.
fn is_transparent(op: &Operation) -> bool {
    op.kind == "build/specs" || (op.kind == "build/dep" && op.flag("hidden"))
}

fn is_target(op: &Operation) -> bool {
    op.kind == "build/dep" || op.kind == "build/specs"
}

/// Lines of the operation tree as it currently stands.
///
/// Hidden build operations are drawn through: their children appear at
/// their depth. Finished operations other than target builds collapse to a
/// single line. Running operations show their last `max_log_lines` lines.
pub fn render_tree(view: &OpsView, max_log_lines: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for root in view.roots() {
        render_op(view, root, 0, max_log_lines, &mut lines);
    }
    lines
}

fn render_op(
    view: &OpsView,
    op: &Operation,
    depth: usize,
    max_log_lines: usize,
    lines: &mut Vec<String>,
) {
    let indent = "  ".repeat(depth);

    if is_transparent(op) {
        for child in view.children(op) {
            render_op(view, child, depth, max_log_lines, lines);
        }
        if op.children.is_empty()
            && let Some(err) = &op.error
        {
            lines.push(format!("{indent}{} {}", "✗".red(), err.red()));
        }
        return;
    }

    lines.push(format!(
        "{indent}{} {}{}",
        marker(op.state),
        label(op),
        elapsed(op)
    ));

    match op.state {
        OpState::Failed => {
            if let Some(err) = &op.error {
                lines.push(format!("{indent}  {}", err.red()));
            }
        }
        OpState::Stopped => {
            if let Some(reason) = &op.stop_reason {
                lines.push(format!("{indent}  {}", reason.yellow()));
            }
        }
        _ => {}
    }

    let collapsed = op.is_finished() && !is_target(op);
    if collapsed {
        return;
    }

    for child in view.children(op) {
        render_op(view, child, depth + 1, max_log_lines, lines);
    }

    if !op.is_finished() {
        let skip = op.logs.len().saturating_sub(max_log_lines);
        for line in &op.logs[skip..] {
            lines.push(format!("{indent}  {} {}", "│".dimmed(), line.dimmed()));
        }
    }
}

// ============================================================================
// Plain output
// ============================================================================

/// One line for `event`, which must already be applied to `view`.
pub fn plain_line(view: &OpsView, event: &Event) -> Option<String> {
    let path = event.path()?;
    let op = view.get(path)?;
    let indent = "  ".repeat(path.len().saturating_sub(1));

    let line = match event {
        Event::Start { .. } => format!("{indent}{} {}", marker(OpState::InProgress), label(op)),
        Event::Log { line, .. } => format!("{indent}  {} {}", "│".dimmed(), line),
        Event::Error { error, .. } => format!("{indent}{} {}: {}", "✗".red(), label(op), error),
        Event::Stop { reason, .. } => {
            format!("{indent}{} {}: {}", "■".yellow(), label(op), reason)
        }
        Event::Finish { .. } if op.state == OpState::Succeeded => {
            format!("{indent}{} {}{}", marker(op.state), label(op), elapsed(op))
        }
        _ => return None,
    };
    Some(line)
}

// ============================================================================
// Tests
// ============================================================================
