//! Host capabilities injected into the core
//!
//! The core never prints directly. A host (the CLI here) hands it a log sink
//! for child output, a progress reporter for long setup steps, and a notifier
//! for the final user-visible message.

use crate::supervisor::Outcome;
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Append-only destination for child output.
///
/// Chunks from one stream arrive in the order the child produced them;
/// chunks from different streams may interleave arbitrarily.
pub trait LogSink: Send + Sync {
    fn append(&self, stream: OutputStream, text: &str);

    /// Called exactly once per run, after the last `append`.
    fn finished(&self, _outcome: &Outcome) {}
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, message: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Non-blocking user notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, severity: Severity, message: &str);
}

/// Passes child output through to the terminal unchanged.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn append(&self, stream: OutputStream, text: &str) {
        // Broken pipes on our own stdout are not worth failing the run over.
        let _ = match stream {
            OutputStream::Stdout => {
                let mut out = std::io::stdout().lock();
                out.write_all(text.as_bytes()).and_then(|_| out.flush())
            }
            OutputStream::Stderr => {
                let mut err = std::io::stderr().lock();
                err.write_all(text.as_bytes()).and_then(|_| err.flush())
            }
        };
    }
}

#[derive(Debug, Default)]
pub struct ConsoleProgress;

impl ProgressReporter for ConsoleProgress {
    fn report(&self, message: &str) {
        eprintln!("  … {}", message);
    }
}

#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => eprintln!("  + {}", message),
            Severity::Warning => eprintln!("  Warning: {}", message),
            Severity::Error => eprintln!("  Error: {}", message),
        }
    }
}
