//! Newline-delimited JSON event intake.
//!
//! Reads one event per line from any async reader (stdin for the binary) and
//! hands decoded events to the controller through an ordered channel. Bad
//! lines are logged and skipped; the stream keeps going.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

use crate::events::ProxyEvent;

/// Reader side of the event channel.
pub struct EventIntake<R> {
    reader: R,
    event_tx: mpsc::UnboundedSender<ProxyEvent>,
}

impl<R> EventIntake<R>
where
    R: AsyncBufRead + Unpin,
{
    /// Create a new intake. Returns it with the receiver for decoded events.
    pub fn new(reader: R) -> (Self, mpsc::UnboundedReceiver<ProxyEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (Self { reader, event_tx }, event_rx)
    }

    /// Read until EOF or until the receiver is dropped. Returns the number of
    /// events delivered.
    pub async fn run(self) -> std::io::Result<usize> {
        let mut lines = self.reader.lines();
        let mut delivered = 0;

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<ProxyEvent>(line) {
                Ok(event) => {
                    tracing::debug!(
                        worker = %event.worker_name(),
                        event = event.kind(),
                        "Event received"
                    );
                    if self.event_tx.send(event).is_err() {
                        break;
                    }
                    delivered += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring malformed event line");
                }
            }
        }

        tracing::info!(delivered, "Event intake finished");
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_reads_events_in_order_and_skips_garbage() {
        let input = concat!(
            r#"{"type":"configUpdate","config":{"name":"a"}}"#, "\n",
            "not json\n",
            "\n",
            r#"{"type":"reloadStart","config":{"name":"a"},"bundle":{"id":1}}"#, "\n",
        );
        let (intake, mut rx) = EventIntake::new(BufReader::new(input.as_bytes()));
        assert_eq!(intake.run().await.unwrap(), 2);

        assert_eq!(rx.recv().await.unwrap().kind(), "configUpdate");
        assert_eq!(rx.recv().await.unwrap().kind(), "reloadStart");
        assert!(rx.recv().await.is_none());
    }
}
