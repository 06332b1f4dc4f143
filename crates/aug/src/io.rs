//! Output plumbing for the `print` extension and the CLI driver.

use std::io::{self, Write as _};

/// Trait for handling textual output produced by scripts.
///
/// Implement this to capture or redirect output from embedded code. The
/// default implementation [`StdPrint`] writes to stdout.
pub trait PrintWriter {
    /// Writes one formatted fragment, without separators or a newline.
    fn write(&mut self, output: &str);

    /// Writes a single terminator character (space between arguments,
    /// newline at the end of a `print` call).
    fn push(&mut self, end: char);
}

/// Default `PrintWriter` that writes straight to stdout.
#[derive(Debug, Default)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn write(&mut self, output: &str) {
        let mut stdout = io::stdout();
        let _ = stdout.write_all(output.as_bytes());
        let _ = stdout.flush();
    }

    fn push(&mut self, end: char) {
        let mut buf = [0u8; 4];
        let s = end.encode_utf8(&mut buf);
        let mut stdout = io::stdout();
        let _ = stdout.write_all(s.as_bytes());
        let _ = stdout.flush();
    }
}

/// A `PrintWriter` that collects all output into a string.
///
/// Useful for testing or capturing print output programmatically.
#[derive(Debug, Default)]
pub struct CollectStringPrint(String);

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self(String::new())
    }

    /// Returns the collected output as a string slice.
    #[must_use]
    pub fn output(&self) -> &str {
        self.0.as_str()
    }

    /// Consumes the writer and returns the collected output.
    #[must_use]
    pub fn into_output(self) -> String {
        self.0
    }
}

impl PrintWriter for CollectStringPrint {
    fn write(&mut self, output: &str) {
        self.0.push_str(output);
    }

    fn push(&mut self, end: char) {
        self.0.push(end);
    }
}

/// `PrintWriter` that ignores all output.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn write(&mut self, _output: &str) {}

    fn push(&mut self, _end: char) {}
}
