use std::fmt;

use colored::Colorize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct ErrorDetails {
    pub field: String,
    pub message: String,
    pub line_number: usize,
    pub severity: Severity,
}

impl fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.severity {
            Severity::Warn => "warning".yellow().bold(),
            Severity::Error => "error".red().bold(),
        };
        write!(f, "{}: {} -> {}", label, self.field.bold(), self.message)
    }
}

/// Render the offending line with three lines of context on either side.
///
/// Line numbers are 1-based; 0 means the diagnostic is not tied to a line.
pub fn highlight_error_line(yaml_str: &str, line_number: usize, is_fatal: bool) -> Vec<String> {
    if line_number == 0 {
        return Vec::new();
    }

    let context_range = 3;
    let total = yaml_str.lines().count();
    let start_line = line_number.saturating_sub(context_range + 1);
    let end_line = (line_number + context_range).min(total);

    let mut rendered: Vec<String> = yaml_str
        .lines()
        .enumerate()
        .skip(start_line)
        .take(end_line.saturating_sub(start_line))
        .map(|(index, line)| {
            let current_line_number = index + 1;
            if current_line_number == line_number {
                let msg = format!("--> {}: {}", current_line_number, line);
                if is_fatal {
                    msg.red().bold().to_string()
                } else {
                    msg.yellow().bold().to_string()
                }
            } else {
                format!("    {}: {}", current_line_number, line)
            }
        })
        .collect();
    rendered.push(String::new());
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_highlight_context_window() {
        colored::control::set_override(false);
        let yaml = (1..=10).map(|n| format!("line{}", n)).collect::<Vec<_>>().join("\n");
        let lines = highlight_error_line(&yaml, 5, true);
        assert_eq!(lines.first().unwrap(), "    2: line2");
        assert!(lines.contains(&"--> 5: line5".to_string()));
        assert_eq!(lines[lines.len() - 2], "    8: line8");
    }

    #[test]
    fn test_highlight_clamps_at_edges() {
        colored::control::set_override(false);
        let lines = highlight_error_line("a: 1\nb: 2", 1, false);
        assert_eq!(lines, vec!["--> 1: a: 1", "    2: b: 2", ""]);
        assert!(highlight_error_line("a: 1", 0, true).is_empty());
    }
}
