use crate::error::{ClientError, Result};
use futures::{Stream, StreamExt};
use reqwest::Response;
use std::fmt::Display;
use tracing::{debug, warn};

/// Marker that identifies a data record. Following the event-stream
/// convention, one space after the colon belongs to the marker.
pub const DATA_PREFIX: &str = "data:";

/// Receives the decoded events of one streaming exchange. Exactly one of
/// `on_complete` / `on_error` is called, and nothing after it.
pub trait StreamObserver {
    fn on_fragment(&mut self, fragment: &str);
    fn on_complete(&mut self, full_text: &str);
    fn on_error(&mut self, error: &ClientError);
}

/// Buffers only a multi-byte character cut by a read boundary and a record
/// whose newline has not arrived yet.
#[derive(Debug, Default)]
pub struct FragmentDecoder {
    undecoded: Vec<u8>,
    partial_line: String,
}

impl FragmentDecoder {
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.undecoded.extend_from_slice(bytes);
        self.decode_available();
        self.drain_lines()
    }

    pub fn finish(&mut self) -> Vec<String> {
        if !self.undecoded.is_empty() {
            let tail = String::from_utf8_lossy(&self.undecoded).into_owned();
            self.partial_line.push_str(&tail);
            self.undecoded.clear();
        }
        let mut fragments = self.drain_lines();
        let last = std::mem::take(&mut self.partial_line);
        if let Some(fragment) = parse_record(&last) {
            fragments.push(fragment);
        }
        fragments
    }

    fn decode_available(&mut self) {
        loop {
            match std::str::from_utf8(&self.undecoded) {
                Ok(text) => {
                    self.partial_line.push_str(text);
                    self.undecoded.clear();
                    return;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    self.partial_line
                        .push_str(&String::from_utf8_lossy(&self.undecoded[..valid]));
                    match err.error_len() {
                        // Incomplete sequence at the end: wait for the next read.
                        None => {
                            self.undecoded.drain(..valid);
                            return;
                        }
                        Some(invalid) => {
                            self.partial_line.push(char::REPLACEMENT_CHARACTER);
                            self.undecoded.drain(..valid + invalid);
                        }
                    }
                }
            }
        }
    }

    fn drain_lines(&mut self) -> Vec<String> {
        let mut fragments = Vec::new();
        while let Some(newline) = self.partial_line.find('\n') {
            let line: String = self.partial_line.drain(..=newline).collect();
            if let Some(fragment) = parse_record(&line) {
                fragments.push(fragment);
            }
        }
        fragments
    }
}

fn parse_record(line: &str) -> Option<String> {
    let line = line.trim_end_matches('\n').trim_end_matches('\r');
    let payload = line.strip_prefix(DATA_PREFIX)?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);
    Some(payload.to_string())
}

/// Consumes a streaming response body. A non-success status is reported as a
/// stream failure without reading the body.
pub async fn consume<O: StreamObserver>(response: Response, observer: &mut O) -> Result<String> {
    let status = response.status();
    if !status.is_success() {
        warn!(status = status.as_u16(), "stream rejected before first byte");
        let error = ClientError::stream_failed();
        observer.on_error(&error);
        return Err(error);
    }
    consume_stream(response.bytes_stream(), observer).await
}

/// Failures are sanitized; the cause is only logged.
pub async fn consume_stream<S, B, E, O>(stream: S, observer: &mut O) -> Result<String>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
    O: StreamObserver,
{
    futures::pin_mut!(stream);
    let mut decoder = FragmentDecoder::default();
    let mut full_text = String::new();
    let mut fragments_seen = 0usize;

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                for fragment in decoder.feed(bytes.as_ref()) {
                    full_text.push_str(&fragment);
                    fragments_seen += 1;
                    observer.on_fragment(&fragment);
                }
            }
            Err(err) => {
                warn!(%err, fragments_seen, "stream interrupted");
                let error = ClientError::stream_failed();
                observer.on_error(&error);
                return Err(error);
            }
        }
    }

    for fragment in decoder.finish() {
        full_text.push_str(&fragment);
        fragments_seen += 1;
        observer.on_fragment(&fragment);
    }
    debug!(fragments_seen, chars = full_text.chars().count(), "stream complete");
    observer.on_complete(&full_text);
    Ok(full_text)
}
