//! Standard output sink, for local development and debugging
//!
//! Ported from `StdoutEventSink`/`StdoutSink` in the teacher's event sink
//! module.

use std::io::{self, Write};

use async_trait::async_trait;
use tracing::debug;

use crate::core::errors::CdcResult;

use super::Sink;
use crate::dispatch::DispatchItem;

/// Writes every dispatched item to stdout as a debug-formatted line.
pub struct StdoutSink {
    enabled: bool,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self { enabled: true }
    }

    pub fn new_disabled() -> Self {
        Self { enabled: false }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sink for StdoutSink {
    async fn dispatch(&self, item: DispatchItem) -> CdcResult<()> {
        if !self.enabled {
            return Ok(());
        }

        debug!(?item, "dispatching item to stdout");

        let mut stdout = io::stdout();
        writeln!(stdout, "{item:#?}")?;
        stdout.flush()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_sink_emits_nothing() {
        let sink = StdoutSink::new_disabled();
        let item = DispatchItem::Rows {
            table: "orders".to_string(),
            items: vec![],
        };
        assert!(sink.dispatch(item).await.is_ok());
    }
}
