//! Colors.
//!
//! This module contains the colors of the console output together with helpers to apply them.

use nu_ansi_term::{AnsiString, Color};
use std::path::Path;

/// Color of failures and of anything else that must not be overlooked.
pub(crate) const ATTENTION_COLOR: Color = Color::Red;

/// Color of versions and other resolved values.
pub(crate) const INFO_COLOR: Color = Color::Cyan;

/// Color of paths.
pub(crate) const PATH_COLOR: Color = Color::LightBlue;

/// Color of a command that finished successfully.
pub(crate) const SUCCESS_COLOR: Color = Color::Green;

/// Paints the given path in [PATH_COLOR].
pub(crate) fn paint_path(path: &Path) -> AnsiString<'_> {
    PATH_COLOR.paint(path.to_string_lossy())
}

#[cfg(test)]
mod tests {

    use super::*;
    use test_log::test;

    #[test]
    fn painted_path_keeps_path() {
        let painted = paint_path(Path::new("/opt/java-17")).to_string();
        assert!(painted.contains("/opt/java-17"));
        assert_ne!(painted, "/opt/java-17");
    }
}
