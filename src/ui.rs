//! Terminal UI utilities.
//!
//! ## Components
//!
//! - `Reporter` - Thread-safe status lines for concurrent builds
//! - `Table` - Auto-sizing table with headers and rows
//!
//! ## Example
//!
//! ```rust
//! use boardsweep::ui::Table;
//!
//! let mut table = Table::new(&["Board", "Result"]);
//! table.add_row(vec!["uno".to_string(), "ok".to_string()]);
//! table.print();
//! ```

use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::cmp;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
enum Sink {
    Bar(ProgressBar),
    Plain,
    Quiet,
    Capture(Arc<Mutex<Vec<String>>>),
}

/// Where build status lines go. Cheap to clone and safe to share across workers;
/// every line is written whole, so output from different boards never interleaves
/// mid-line.
#[derive(Clone)]
pub struct Reporter {
    sink: Sink,
}

impl Reporter {
    /// Progress bar on a terminal, plain lines otherwise (CI logs).
    pub fn auto(total: u64) -> Self {
        if console::Term::stdout().is_term() {
            let pb = ProgressBar::new(total);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            Self {
                sink: Sink::Bar(pb),
            }
        } else {
            Self::plain()
        }
    }

    pub fn plain() -> Self {
        Self { sink: Sink::Plain }
    }

    pub fn quiet() -> Self {
        Self { sink: Sink::Quiet }
    }

    /// Collect lines in memory instead of printing them.
    pub fn capture() -> Self {
        Self {
            sink: Sink::Capture(Arc::new(Mutex::new(Vec::new()))),
        }
    }

    pub fn captured(&self) -> Vec<String> {
        match &self.sink {
            Sink::Capture(lines) => lines.lock().map(|l| l.clone()).unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    pub fn line(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        match &self.sink {
            Sink::Bar(pb) => pb.println(msg),
            Sink::Plain => println!("{msg}"),
            Sink::Quiet => {}
            Sink::Capture(lines) => {
                if let Ok(mut lines) = lines.lock() {
                    lines.push(msg.to_string());
                }
            }
        }
    }

    pub fn success(&self, msg: impl AsRef<str>) {
        self.line(format!("{} {}", "✓".green(), msg.as_ref()));
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        self.line(format!("{} {}", "!".yellow(), msg.as_ref()));
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        self.line(format!("{} {}", "x".red(), msg.as_ref()));
    }

    pub fn step(&self, msg: impl AsRef<str>) {
        self.line(format!("{} {}", "→".blue(), msg.as_ref()));
    }

    pub fn set_message(&self, msg: impl Into<String>) {
        if let Sink::Bar(pb) = &self.sink {
            pb.set_message(msg.into());
        }
    }

    pub fn inc(&self) {
        if let Sink::Bar(pb) = &self.sink {
            pb.inc(1);
        }
    }

    pub fn finish(&self, msg: impl Into<String>) {
        if let Sink::Bar(pb) = &self.sink {
            pb.finish_with_message(msg.into());
        }
    }
}

pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|s| s.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn add_row(&mut self, row: Vec<String>) {
        if row.len() == self.headers.len() {
            self.rows.push(row);
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn print(&self) {
        for line in self.render() {
            println!("{line}");
        }
    }

    /// Box-drawn lines fitted to the terminal width.
    pub fn render(&self) -> Vec<String> {
        if self.headers.is_empty() {
            return Vec::new();
        }

        let (_rows, term_width) = console::Term::stdout().size();
        let col_widths = self.column_widths(term_width as usize);

        let make_sep = |left: &str, mid: &str, right: &str| -> String {
            let inner: Vec<String> = col_widths.iter().map(|w| "─".repeat(w + 2)).collect();
            format!("  {left}{}{right}", inner.join(mid))
        };

        let mut out = Vec::with_capacity(self.rows.len() + 4);
        out.push(make_sep("┌", "┬", "┐"));

        let mut header = String::from("  │");
        for (i, h) in self.headers.iter().enumerate() {
            let cell = truncate(h, col_widths[i]);
            let pad = col_widths[i].saturating_sub(cell.chars().count());
            header.push_str(&format!(" {} {}│", cell.bold(), " ".repeat(pad)));
        }
        out.push(header);
        out.push(make_sep("├", "┼", "┤"));

        for row in &self.rows {
            let mut line = String::from("  │");
            for (i, cell) in row.iter().enumerate() {
                let clean = sanitize_content(cell);
                let cell = console::truncate_str(&clean, col_widths[i], "...").to_string();
                let visible = console::measure_text_width(&cell);
                let pad = col_widths[i].saturating_sub(visible);
                line.push_str(&format!(" {} {}│", cell, " ".repeat(pad)));
            }
            out.push(line);
        }

        out.push(make_sep("└", "┴", "┘"));
        out
    }

    fn column_widths(&self, max_width: usize) -> Vec<usize> {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                let len = console::measure_text_width(&sanitize_content(cell));
                widths[i] = cmp::max(widths[i], len);
            }
        }

        // Shrink the widest column until the table fits, never below 8.
        let overhead = 3 + 3 * self.headers.len();
        let available = max_width.saturating_sub(overhead);
        let mut total: usize = widths.iter().sum();
        while total > available {
            let Some((idx, &w)) = widths.iter().enumerate().max_by_key(|(_, w)| **w) else {
                break;
            };
            if w <= 8 {
                break;
            }
            widths[idx] -= 1;
            total -= 1;
        }
        widths
    }
}

fn truncate(s: &str, max_width: usize) -> String {
    if s.chars().count() > max_width {
        let mut result: String = s.chars().take(max_width.saturating_sub(3)).collect();
        result.push_str("...");
        result
    } else {
        s.to_string()
    }
}

fn sanitize_content(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\n' | '\r' | '\t' => ' ',
            _ => c,
        })
        .collect()
}

/// `90.5` → `"1m 30.50s"`, `4.2` → `"4.20s"`.
pub fn format_duration(secs: f64) -> String {
    if secs >= 60.0 {
        let minutes = (secs / 60.0).floor();
        format!("{}m {:.2}s", minutes as u64, secs - minutes * 60.0)
    } else {
        format!("{secs:.2}s")
    }
}
