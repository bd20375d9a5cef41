//! Byte-stream framing for uploaded CSV data.
//!
//! [`CsvFrameDecoder`] turns an arbitrarily chunked byte stream into logical
//! records, honoring RFC 4180 quoting: a line feed inside a quoted field is
//! data, not a record terminator, and a doubled quote inside a quoted field
//! is an escaped literal quote. All state survives chunk boundaries,
//! including the one-byte lookahead needed to distinguish a closing quote
//! from the first half of an escape.

use bytes::{Buf, Bytes, BytesMut};
use memchr::memchr;
use snafu::Snafu;
use tokio_util::codec::Decoder;
use tracing::warn;

/// Longest logical line accepted, terminator excluded.
pub const MAX_LINE: usize = 4096;

/// Framing failures. `LineTooLong` is recoverable: the decoder discards
/// input until the next unquoted line feed and then resumes, losing at most
/// one row.
#[derive(Debug, Snafu)]
pub enum FrameError {
    #[snafu(display("line exceeds the maximum line length"))]
    LineTooLong,
    #[snafu(display("framing i/o error: {source}"))]
    Io { source: std::io::Error },
}

impl From<std::io::Error> for FrameError {
    fn from(source: std::io::Error) -> Self {
        FrameError::Io { source }
    }
}

/// A decoder for newline-terminated records with RFC 4180 quoted fields.
///
/// Frames are the bytes of one logical line, with the terminating line feed
/// (and a preceding carriage return) stripped. Quoting state is tracked
/// byte-wise so that record boundaries are found correctly no matter where
/// the input is split into chunks.
#[derive(Debug)]
pub struct CsvFrameDecoder {
    max_length: usize,
    /// Bytes of the buffer already examined by the scanner.
    scanned: usize,
    /// Whether the scanner currently sits inside a quoted field.
    in_quotes: bool,
    /// Whether the next byte starts a field (line start or right after an
    /// unquoted comma). Only a quote in this position opens a quoted field.
    field_start: bool,
    /// Set after an overlong line: drop input until the next line feed.
    discarding: bool,
}

impl CsvFrameDecoder {
    pub const fn new() -> Self {
        Self::new_with_max_length(MAX_LINE)
    }

    /// Any frame longer than `max_length` bytes is discarded entirely.
    pub const fn new_with_max_length(max_length: usize) -> Self {
        CsvFrameDecoder {
            max_length,
            scanned: 0,
            in_quotes: false,
            field_start: true,
            discarding: false,
        }
    }

    fn reset_line_state(&mut self) {
        self.scanned = 0;
        self.in_quotes = false;
        self.field_start = true;
    }

    /// Drops the buffered line and switches to resync mode.
    fn start_discarding(&mut self, buf: &mut BytesMut) -> FrameError {
        warn!(
            buffered = buf.len(),
            max_length = self.max_length,
            "Discarding line longer than the configured maximum.",
        );
        buf.clear();
        self.reset_line_state();
        self.discarding = true;
        FrameError::LineTooLong
    }

    fn split_frame(&mut self, buf: &mut BytesMut, terminator: usize) -> Result<Bytes, FrameError> {
        let mut frame = buf.split_to(terminator);
        buf.advance(1); // the line feed
        self.reset_line_state();
        if frame.last() == Some(&b'\r') {
            frame.truncate(frame.len() - 1);
        }
        if frame.len() > self.max_length {
            warn!(
                frame_length = frame.len(),
                max_length = self.max_length,
                "Discarding line longer than the configured maximum.",
            );
            return Err(FrameError::LineTooLong);
        }
        Ok(frame.freeze())
    }
}

impl Default for CsvFrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for CsvFrameDecoder {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, Self::Error> {
        if self.discarding {
            match memchr(b'\n', buf) {
                Some(idx) => {
                    buf.advance(idx + 1);
                    self.discarding = false;
                }
                None => {
                    buf.clear();
                    return Ok(None);
                }
            }
        }

        while self.scanned < buf.len() {
            let byte = buf[self.scanned];

            if self.in_quotes {
                if byte == b'"' {
                    match buf.get(self.scanned + 1) {
                        // The escape/closing decision needs the next byte;
                        // it has not arrived yet. Resume here on the next
                        // chunk (or at end of stream).
                        None => {
                            if buf.len() > self.max_length {
                                return Err(self.start_discarding(buf));
                            }
                            return Ok(None);
                        }
                        Some(b'"') => self.scanned += 2, // escaped literal quote
                        Some(_) => {
                            self.in_quotes = false;
                            self.scanned += 1;
                        }
                    }
                } else {
                    // Line feeds in here are field data.
                    self.scanned += 1;
                }
                continue;
            }

            match byte {
                b'\n' => {
                    let terminator = self.scanned;
                    return match self.split_frame(buf, terminator) {
                        Ok(frame) => Ok(Some(frame)),
                        Err(error) => Err(error),
                    };
                }
                b'"' if self.field_start => {
                    self.in_quotes = true;
                    self.field_start = false;
                    self.scanned += 1;
                }
                b',' => {
                    self.field_start = true;
                    self.scanned += 1;
                }
                _ => {
                    // Whitespace before an opening quote does not end the
                    // field-start position; a stray quote mid-field stays in
                    // the data and the record parser reports it.
                    if !byte.is_ascii_whitespace() {
                        self.field_start = false;
                    }
                    self.scanned += 1;
                }
            }
        }

        if buf.len() > self.max_length {
            return Err(self.start_discarding(buf));
        }
        Ok(None)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Bytes>, Self::Error> {
        if self.discarding {
            // The stream ended before the resync point; the tail is part of
            // the discarded line.
            buf.clear();
            self.discarding = false;
            return Ok(None);
        }

        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        if buf.is_empty() {
            return Ok(None);
        }

        // A quote deferred for lookahead is a closing quote at end of input.
        if self.in_quotes && self.scanned < buf.len() && buf[self.scanned] == b'"' {
            self.in_quotes = false;
            self.scanned += 1;
            if let Some(frame) = self.decode(buf)? {
                return Ok(Some(frame));
            }
            if buf.is_empty() {
                return Ok(None);
            }
        }

        // Remaining bytes without a terminator form the final record, unless
        // they are nothing but whitespace.
        if buf.iter().all(|byte| byte.is_ascii_whitespace()) {
            buf.clear();
            self.reset_line_state();
            return Ok(None);
        }

        let mut frame = buf.split_to(buf.len());
        self.reset_line_state();
        if frame.last() == Some(&b'\r') {
            frame.truncate(frame.len() - 1);
        }
        if frame.len() > self.max_length {
            return Err(FrameError::LineTooLong);
        }
        Ok(Some(frame.freeze()))
    }
}
