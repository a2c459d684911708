/*!
 * Delimiter framing for stream transports.
 *
 * TCP connections and serial lines deliver a byte stream; telegrams are
 * separated by a single configurable delimiter byte. Datagram transports do
 * not use this module, one datagram is one telegram.
 */
use bytes::{Bytes, BytesMut};
use tracing::warn;

use telegate_core::config::Settings;

/// Framing parameters shared by stream channels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameConfig {
    /// Byte terminating every telegram
    pub delimiter: u8,
    /// Largest accepted telegram, delimiter excluded
    pub max_length: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            delimiter: b'\n',
            max_length: 64 * 1024,
        }
    }
}

impl FrameConfig {
    /// Read `net.frame.delimiter` and `net.frame.max.length`
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            delimiter: settings.frame_delimiter(),
            max_length: settings.frame_max_length(),
        }
    }

    /// Append the delimiter unless the telegram already ends with it
    pub fn encode(&self, telegram: &[u8]) -> Bytes {
        if telegram.last() == Some(&self.delimiter) {
            return Bytes::copy_from_slice(telegram);
        }
        let mut out = BytesMut::with_capacity(telegram.len() + 1);
        out.extend_from_slice(telegram);
        out.extend_from_slice(&[self.delimiter]);
        out.freeze()
    }
}

/// Incremental splitter turning stream chunks into telegrams
#[derive(Debug)]
pub struct DelimiterFramer {
    config: FrameConfig,
    buffer: BytesMut,
    discarding: bool,
}

impl DelimiterFramer {
    /// Create a framer
    pub fn new(config: FrameConfig) -> Self {
        Self {
            config,
            buffer: BytesMut::new(),
            discarding: false,
        }
    }

    /// Feed a chunk and collect every telegram it completes.
    ///
    /// Empty telegrams are dropped. A telegram longer than the configured
    /// maximum is discarded up to and including its delimiter.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == self.config.delimiter) {
            let mut frame = self.buffer.split_to(pos + 1);
            frame.truncate(pos);

            if self.discarding {
                self.discarding = false;
                continue;
            }

            if self.config.delimiter == b'\n' && frame.last() == Some(&b'\r') {
                frame.truncate(frame.len() - 1);
            }

            if frame.len() > self.config.max_length {
                warn!(
                    "Dropping telegram of {} bytes, limit is {}",
                    frame.len(),
                    self.config.max_length
                );
                continue;
            }

            if !frame.is_empty() {
                frames.push(frame.freeze());
            }
        }

        if self.buffer.len() > self.config.max_length {
            warn!(
                "No delimiter within {} bytes, discarding until the next one",
                self.config.max_length
            );
            self.buffer.clear();
            self.discarding = true;
        }

        frames
    }

    /// Bytes buffered while waiting for a delimiter
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framer(max_length: usize) -> DelimiterFramer {
        DelimiterFramer::new(FrameConfig {
            delimiter: b'\n',
            max_length,
        })
    }

    #[test]
    fn test_split_across_chunks() {
        let mut framer = framer(1024);

        assert!(framer.push(b"{\"deviceId\":").is_empty());
        let frames = framer.push(b"\"A001\"}\r\n{\"x\":1}\n{\"y\"");

        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..], b"{\"deviceId\":\"A001\"}");
        assert_eq!(&frames[1][..], b"{\"x\":1}");
        assert_eq!(framer.pending(), 4);
    }

    #[test]
    fn test_empty_frames_are_dropped() {
        let mut framer = framer(1024);
        let frames = framer.push(b"\n\n\nabc\n\n");
        assert_eq!(frames, vec![Bytes::from_static(b"abc")]);
    }

    #[test]
    fn test_overlong_frame_is_discarded() {
        let mut framer = framer(4);

        assert!(framer.push(b"0123456789").is_empty());
        let frames = framer.push(b"tail\nok\n");
        assert_eq!(frames, vec![Bytes::from_static(b"ok")]);

        let frames = framer.push(b"toolong\nfine\n");
        assert_eq!(frames, vec![Bytes::from_static(b"fine")]);
    }

    #[test]
    fn test_encode_appends_delimiter_once() {
        let config = FrameConfig {
            delimiter: b'#',
            max_length: 16,
        };
        assert_eq!(&config.encode(b"abc")[..], b"abc#");
        assert_eq!(&config.encode(b"abc#")[..], b"abc#");
    }
}
