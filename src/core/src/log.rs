//! User-facing progress logging.
//!
//! This is separate from `tracing`: it carries the progress lines a user
//! watches during a run (manifest fetches, per-tag push progress), always on
//! stderr so stdout stays reserved for the output reference.

use std::io::{self, IsTerminal, Write};

/// Progress logger handed through the pipeline.
///
/// `re_print` rewrites the current line in place when stderr is a terminal,
/// which is how push progress renders as a single updating line. Callers can
/// check `is_nop` to skip assembling progress strings entirely.
#[derive(Debug, Clone)]
pub struct Logger {
    kind: Kind,
}

#[derive(Debug, Clone)]
enum Kind {
    Stderr { is_terminal: bool },
    Nop,
}

impl Logger {
    /// A logger writing to stderr, with terminal detection for in-place
    /// line rewrites.
    pub fn stderr() -> Self {
        Logger {
            kind: Kind::Stderr {
                is_terminal: io::stderr().is_terminal(),
            },
        }
    }

    /// A logger that discards everything.
    pub fn nop() -> Self {
        Logger { kind: Kind::Nop }
    }

    pub fn is_nop(&self) -> bool {
        matches!(self.kind, Kind::Nop)
    }

    /// Write a line to stderr.
    pub fn println(&self, line: &str) {
        if let Kind::Stderr { .. } = self.kind {
            let _ = writeln!(io::stderr(), "{line}");
        }
    }

    /// Rewrite the current stderr line. On a terminal the line is cleared
    /// and redrawn without a trailing newline; otherwise the text is
    /// emitted as a regular line.
    pub fn re_print(&self, line: &str) {
        match self.kind {
            Kind::Stderr { is_terminal: true } => {
                let mut err = io::stderr();
                let _ = write!(err, "\x1b[2K\r{line}");
                let _ = err.flush();
            }
            Kind::Stderr { is_terminal: false } => self.println(line),
            Kind::Nop => {}
        }
    }
}

impl Default for Logger {
    fn default() -> Self {
        Logger::stderr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nop_logger() {
        let logger = Logger::nop();
        assert!(logger.is_nop());
        // No output expected; just exercise the paths.
        logger.println("hidden");
        logger.re_print("hidden");
    }

    #[test]
    fn test_stderr_logger_is_not_nop() {
        assert!(!Logger::stderr().is_nop());
        assert!(!Logger::default().is_nop());
    }
}
