//! Shared styling utilities for terminal output.

use console::Style;

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create a warning-styled string (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

/// Create a header-styled string (bold, white).
pub fn header(msg: &str) -> String {
    let style = Style::new().bold();
    style.apply_to(msg).to_string()
}

/// Create a dim-styled string.
pub fn dim(msg: &str) -> String {
    let style = Style::new().dim();
    style.apply_to(msg).to_string()
}

/// Lock owner, highlighted when it is the acting user.
pub fn owner(user: &str, me: &str) -> String {
    if user == me {
        Style::new().green().bold().apply_to(user).to_string()
    } else {
        Style::new().red().apply_to(user).to_string()
    }
}
