use colored::Colorize;
use std::sync::atomic::{AtomicBool, Ordering};

static QUIET: AtomicBool = AtomicBool::new(false);

/// Silence informational output (`--quiet`). Errors and answers still print.
pub fn set_quiet(quiet: bool) {
    QUIET.store(quiet, Ordering::Relaxed);
}

fn quiet() -> bool {
    QUIET.load(Ordering::Relaxed)
}

/// Print an info message
pub fn info(msg: &str) {
    if !quiet() {
        println!("{} {}", "ℹ".blue(), msg);
    }
}

/// Print a success message
pub fn success(msg: &str) {
    if !quiet() {
        println!("{} {}", "✓".green(), msg);
    }
}

/// Print a warning message
pub fn warn(msg: &str) {
    if !quiet() {
        println!("{} {}", "⚠".yellow(), msg);
    }
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    if !quiet() {
        println!("  {}", msg.dimmed());
    }
}

/// Print a header/title
pub fn header(title: &str) {
    if !quiet() {
        println!();
        println!("{}", title.bold());
        println!("{}", "─".repeat(title.chars().count()).dimmed());
    }
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    if !quiet() {
        println!("  {}: {}", key.dimmed(), value);
    }
}

/// Print a step indicator
pub fn step(num: usize, total: usize, msg: &str) {
    if !quiet() {
        println!("{} {}", format!("[{}/{}]", num, total).blue().bold(), msg);
    }
}

/// Echo one line of a child process's output
pub fn stream_line(line: &str) {
    if !quiet() {
        println!("\t| {}", line);
    }
}

/// Print the answer of an introspection command; never silenced
pub fn answer(value: &str) {
    println!("{}", value);
}

/// Print a table of plain-text columns
pub fn table(headers: &[&str], rows: &[Vec<String>]) {
    if !quiet() {
        print!("{}", format_table(headers, rows));
    }
}

/// Lay out rows under headers, each column padded to its widest cell.
pub fn format_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }

    let render = |cells: Vec<&str>| -> String {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, &w)| format!("{cell:<w$}"))
            .collect();
        format!("{}\n", padded.join("   ").trim_end())
    };

    let mut out = render(headers.to_vec());
    out.push_str(&render(widths.iter().map(|_| "----------").collect()));
    for row in rows {
        out.push_str(&render(row.iter().map(String::as_str).collect()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_table_pads_columns() {
        let rows = vec![
            vec!["checkout-1.0-master-abc".to_string(), "4".to_string()],
            vec!["checkout-0.9-master-def".to_string(), "0".to_string()],
        ];
        let out = format_table(&["Deployment", "Replicas"], &rows);
        let lines: Vec<&str> = out.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Deployment"));
        assert_eq!(lines[2], "checkout-1.0-master-abc   4");
        assert_eq!(
            lines[0].find("Replicas"),
            lines[2].find('4'),
            "second column is aligned"
        );
    }

    #[test]
    fn test_format_table_empty_rows() {
        let out = format_table(&["Tags", "Date"], &[]);
        assert_eq!(out.lines().count(), 2);
    }
}
