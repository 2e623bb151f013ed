use owo_colors::OwoColorize;

/// Terminal output for user-facing messages. Records go to stdout; status
/// lines go to stderr so piped output stays clean.
#[derive(Debug, Clone, Copy, Default)]
pub struct Output;

impl Output {
    pub fn new() -> Self {
        Self
    }

    pub fn success(&self, message: &str) {
        eprintln!("{} {}", "✓".green().bold(), message);
    }

    pub fn status(&self, message: &str) {
        eprintln!("{}", message.bold());
    }

    pub fn info(&self, label: &str, value: &str) {
        eprintln!("  {} {}", label.dimmed(), value);
    }

    pub fn warning(&self, message: &str) {
        eprintln!("{} {}", "!".yellow().bold(), message.yellow());
    }

    pub fn list_item(&self, item: &str) {
        eprintln!("  • {item}");
    }
}
