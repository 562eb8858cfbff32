use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;

/// Pluggable output for kept transcriptions.
/// Pairs with AudioSource for input - this handles the dictated text.
pub trait TextSink: Send + 'static {
    /// Handle one transcribed recording.
    fn handle(&mut self, text: &str) -> crate::error::Result<()>;

    /// Called on shutdown. Return accumulated text if applicable.
    fn finish(&mut self) -> Option<String> {
        None
    }

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "sink"
    }
}

/// Collects text in memory. Clones share the collected text.
#[derive(Debug, Clone, Default)]
pub struct CollectorSink {
    collected: Arc<Mutex<Vec<String>>>,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything handled so far, in order.
    pub fn texts(&self) -> Vec<String> {
        self.collected.lock().clone()
    }
}

impl TextSink for CollectorSink {
    fn handle(&mut self, text: &str) -> crate::error::Result<()> {
        self.collected.lock().push(text.to_string());
        Ok(())
    }

    fn finish(&mut self) -> Option<String> {
        let collected = self.collected.lock();
        if collected.is_empty() {
            None
        } else {
            Some(collected.join(" "))
        }
    }

    fn name(&self) -> &'static str {
        "collector"
    }
}

/// Writes each transcription as one line on stdout.
///
/// Logs go to stderr, so stdout can be piped straight into another program.
pub struct StdoutSink;

impl TextSink for StdoutSink {
    fn handle(&mut self, text: &str) -> crate::error::Result<()> {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", text)?;
        stdout.flush()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "stdout"
    }
}
