//! Line-delimited fragment decoder for streamed chat responses.
//!
//! The backend streams lines of the form `<index>:<json>`. Text fragments
//! use the `0:` prefix followed by a JSON-encoded string; every other line
//! (tool calls, metadata, finish markers) is skipped, as are lines that fail
//! to parse.

use std::collections::VecDeque;
use std::fmt::Display;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tracing::trace;

use super::FragmentStream;
use crate::core::realtime::base::BridgeError;

/// Prefix marking a text fragment line.
pub const TEXT_FRAGMENT_PREFIX: &str = "0:";

/// Incremental decoder, robust to lines and UTF-8 sequences split across
/// network chunks.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    pending: Vec<u8>,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk and return the fragments it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut fragments = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(fragment) = decode_line(&line[..line.len() - 1]) {
                fragments.push(fragment);
            }
        }
        fragments
    }

    /// Decode a trailing line that arrived without a newline.
    pub fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.pending);
        decode_line(&line)
    }
}

fn decode_line(raw: &[u8]) -> Option<String> {
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line.trim_end_matches('\r'),
        Err(e) => {
            trace!("Skipping non UTF-8 stream line: {}", e);
            return None;
        }
    };

    let payload = line.strip_prefix(TEXT_FRAGMENT_PREFIX)?;
    match serde_json::from_str::<String>(payload) {
        Ok(fragment) => Some(fragment),
        Err(e) => {
            trace!(line = %line, "Skipping unparsable fragment: {}", e);
            None
        }
    }
}

struct DecodeState<S> {
    body: S,
    decoder: StreamDecoder,
    ready: VecDeque<String>,
    finished: bool,
}

/// Adapt a raw byte stream into a stream of text fragments.
///
/// A transport error on the body ends the stream with a
/// `BridgeError::Backend` item.
pub fn decode_fragments<S, E>(body: S) -> FragmentStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = DecodeState {
        body: Box::pin(body),
        decoder: StreamDecoder::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(fragment) = state.ready.pop_front() {
                return Some((Ok(fragment), state));
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let fragments = state.decoder.push(&chunk);
                    state.ready.extend(fragments);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((
                        Err(BridgeError::Backend(format!("response stream failed: {e}"))),
                        state,
                    ));
                }
                None => {
                    state.finished = true;
                    if let Some(fragment) = state.decoder.finish() {
                        state.ready.push_back(fragment);
                    }
                }
            }
        }
    })
    .boxed()
}
