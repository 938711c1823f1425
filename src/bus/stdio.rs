//! JSON-lines bus over byte streams (stdin/stdout by default)

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{BusError, Publisher};
use crate::messages::{Envelope, OutboundMessage};

/// Writes one JSON document per line
pub struct StdioPublisher<W> {
    writer: Mutex<W>,
}

impl StdioPublisher<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W: AsyncWrite + Unpin + Send> StdioPublisher<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Publisher for StdioPublisher<W> {
    async fn publish(&self, message: OutboundMessage) -> Result<(), BusError> {
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// One line read from the inbound stream
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Envelope(Envelope),
    /// Unparseable line; routing fields are recovered when present
    Malformed {
        reply_to: Option<String>,
        correlation_id: Option<String>,
        error: String,
    },
}

pub struct EnvelopeReader<R> {
    reader: R,
    buffer: Vec<u8>,
}

impl EnvelopeReader<BufReader<tokio::io::Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R: AsyncBufRead + Unpin> EnvelopeReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::new(),
        }
    }

    /// Next non-blank line, or `None` at end of stream. Lines that are not
    /// valid UTF-8 come back as [`Inbound::Malformed`].
    pub async fn next(&mut self) -> Result<Option<Inbound>, BusError> {
        loop {
            self.buffer.clear();
            if self.reader.read_until(b'\n', &mut self.buffer).await? == 0 {
                debug!("Inbound stream closed");
                return Ok(None);
            }
            let line = match std::str::from_utf8(&self.buffer) {
                Ok(line) => line.trim(),
                Err(e) => {
                    let lossy = String::from_utf8_lossy(&self.buffer);
                    warn!(line = %lossy.trim(), "Inbound line is not valid UTF-8");
                    return Ok(Some(Inbound::Malformed {
                        reply_to: None,
                        correlation_id: None,
                        error: format!("line is not valid UTF-8: {}", e),
                    }));
                }
            };
            if line.is_empty() {
                continue;
            }
            return Ok(Some(parse_line(line)));
        }
    }
}

fn parse_line(line: &str) -> Inbound {
    match serde_json::from_str::<Envelope>(line) {
        Ok(envelope) => Inbound::Envelope(envelope),
        Err(e) => {
            let routing = serde_json::from_str::<Value>(line).ok();
            let field = |name: &str| {
                routing
                    .as_ref()
                    .and_then(|v| v.get(name))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            };
            let correlation_id = field("correlationId");
            warn!(correlation_id = ?correlation_id, "Malformed inbound message: {}", e);
            Inbound::Malformed {
                reply_to: field("replyTo"),
                correlation_id,
                error: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ArtifactContent, BuildRequest, Notification};

    #[tokio::test]
    async fn test_reader_yields_envelopes_and_malformed_lines() {
        let input = concat!(
            "{\"correlationId\":\"c-1\",\"request\":{\"type\":\"PayloadBuild\",\"payloadId\":3}}\n",
            "\n",
            "{\"correlationId\":\"c-2\",\"replyTo\":\"q\",\"request\":{\"type\":\"Nope\"}}\n",
            "not json\n",
        );
        let mut reader = EnvelopeReader::new(input.as_bytes());

        match reader.next().await.unwrap().unwrap() {
            Inbound::Envelope(envelope) => {
                assert_eq!(envelope.correlation_id, "c-1");
                assert!(matches!(envelope.request, BuildRequest::PayloadBuild(_)));
            }
            other => panic!("expected envelope, got {:?}", other),
        }
        match reader.next().await.unwrap().unwrap() {
            Inbound::Malformed {
                reply_to,
                correlation_id,
                ..
            } => {
                assert_eq!(correlation_id.as_deref(), Some("c-2"));
                assert_eq!(reply_to.as_deref(), Some("q"));
            }
            other => panic!("expected malformed, got {:?}", other),
        }
        assert!(matches!(
            reader.next().await.unwrap().unwrap(),
            Inbound::Malformed {
                correlation_id: None,
                ..
            }
        ));
        assert!(reader.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reader_survives_invalid_utf8() {
        let mut input = b"\xff\xfe garbage\n".to_vec();
        input.extend_from_slice(
            b"{\"correlationId\":\"c-3\",\"request\":{\"type\":\"PayloadBuild\",\"payloadId\":1}}",
        );
        let mut reader = EnvelopeReader::new(input.as_slice());

        match reader.next().await.unwrap().unwrap() {
            Inbound::Malformed {
                correlation_id,
                error,
                ..
            } => {
                assert!(correlation_id.is_none());
                assert!(error.contains("UTF-8"));
            }
            other => panic!("expected malformed, got {:?}", other),
        }
        assert!(matches!(
            reader.next().await.unwrap().unwrap(),
            Inbound::Envelope(envelope) if envelope.correlation_id == "c-3"
        ));
        assert!(reader.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_publisher_writes_json_lines() {
        let publisher = StdioPublisher::new(Vec::new());
        let message = OutboundMessage {
            reply_to: None,
            correlation_id: "c-1".to_string(),
            notification: Notification::ArtifactReady {
                success: true,
                catalog_name: "recon".to_string(),
                content: ArtifactContent::Base64 {
                    data: "AA==".to_string(),
                },
            },
        };

        publisher.publish(message.clone()).await.unwrap();
        publisher.publish(message.clone()).await.unwrap();

        let written = String::from_utf8(publisher.into_inner()).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: OutboundMessage = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed, message);
    }
}
