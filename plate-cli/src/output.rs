use std::io::{self, Write};

use plate_event::{DetectionEvent, timestamp};

use crate::error::Result;
use crate::session::EventHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Pretty,
    /// One compact JSON object per line.
    Json,
}

/// Prints received events to a writer.
pub struct OutputManager<W: Write> {
    format: OutputFormat,
    writer: W,
    received: u64,
}

impl OutputManager<io::Stdout> {
    pub fn stdout(format: OutputFormat) -> Self {
        Self::new(format, io::stdout())
    }
}

impl<W: Write> OutputManager<W> {
    pub fn new(format: OutputFormat, writer: W) -> Self {
        Self {
            format,
            writer,
            received: 0,
        }
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn format_event(&self, event: &DetectionEvent) -> Result<String> {
        match self.format {
            OutputFormat::Pretty => Ok(self.format_pretty(event)),
            OutputFormat::Json => Ok(format!("{}\n", event.to_json()?)),
        }
    }

    fn format_pretty(&self, event: &DetectionEvent) -> String {
        let mut output = String::new();
        output.push_str("=== Plate detected ===\n");
        output.push_str(&format!("  Plate:      {}\n", event.label()));
        output.push_str(&format!("  Camera:     {}\n", event.source_id()));
        output.push_str(&format!("  Confidence: {:.2}\n", event.confidence()));
        output.push_str(&format!(
            "  Timestamp:  {}\n",
            timestamp::format(&event.timestamp())
        ));
        output.push_str("======================\n");
        output
    }
}

impl<W: Write> EventHandler for OutputManager<W> {
    fn on_event(&mut self, event: &DetectionEvent) -> Result<()> {
        let rendered = self.format_event(event)?;
        self.writer.write_all(rendered.as_bytes())?;
        self.writer.flush()?;
        self.received += 1;
        Ok(())
    }
}
