//! Streaming export of a batch's records.
//!
//! [`ExportReader`] walks an open cursor sorted by `row_number` and fills
//! caller-supplied buffers of arbitrary size with either one JSON array or
//! LF-terminated CSV rows. A record rendering that does not fit the current
//! buffer is carried over in an overflow buffer, so the concatenation of
//! all reads equals the canonical rendering no matter how the reads are
//! sized.

use bytes::Bytes;
use csv_core::WriteResult;
use futures::{Stream, StreamExt};
use mongodb::bson::{Bson, Document};
use std::sync::Arc;

use crate::decoding::COLUMNS;
use crate::store::{batch_filter, DocumentStream, FindOpts, Store, StoreError, SHIPMENTS};

/// Buffer size used when adapting the reader into an HTTP body stream.
const EXPORT_CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    /// `csv` selects CSV; anything else falls back to JSON.
    pub fn from_param(param: Option<&str>) -> Self {
        match param {
            Some("csv") => ExportFormat::Csv,
            _ => ExportFormat::Json,
        }
    }

    pub const fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Json => "application/json",
            ExportFormat::Csv => "text/csv",
        }
    }

    pub const fn content_disposition(self) -> &'static str {
        match self {
            ExportFormat::Json => "attachment; filename=\"export.json\"",
            ExportFormat::Csv => "attachment; filename=\"export.csv\"",
        }
    }
}

pub struct ExportReader {
    cursor: DocumentStream,
    format: ExportFormat,
    /// Whether the JSON opening bracket has been emitted.
    started: bool,
    first_record: bool,
    footer_written: bool,
    finished: bool,
    overflow: Vec<u8>,
    overflow_pos: usize,
}

impl ExportReader {
    /// Opens a cursor over the batch's records, sorted by row number. The
    /// cursor (and its pooled connection) lives until the reader is
    /// dropped.
    pub async fn open(
        store: &Arc<dyn Store>,
        batch_id: &str,
        format: ExportFormat,
    ) -> Result<Self, StoreError> {
        let cursor = store
            .find(
                SHIPMENTS,
                batch_filter(batch_id),
                FindOpts::sorted_by("row_number", 1),
            )
            .await?;
        Ok(ExportReader {
            cursor,
            format,
            started: false,
            first_record: true,
            footer_written: false,
            finished: false,
            overflow: Vec::new(),
            overflow_pos: 0,
        })
    }

    /// Fills `buf` with the next bytes of the export. Returns the number of
    /// bytes written; `Ok(0)` with a non-empty `buf` signals end of stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, StoreError> {
        let mut written = 0;

        // Drain carried-over bytes before touching the cursor again.
        if self.overflow_pos < self.overflow.len() {
            let pending = &self.overflow[self.overflow_pos..];
            let n = pending.len().min(buf.len());
            buf[..n].copy_from_slice(&pending[..n]);
            written += n;
            self.overflow_pos += n;
            if self.overflow_pos < self.overflow.len() {
                return Ok(written);
            }
            self.overflow.clear();
            self.overflow_pos = 0;
        }

        if self.finished || written == buf.len() {
            return Ok(written);
        }

        if self.format == ExportFormat::Json && !self.started {
            self.started = true;
            buf[written] = b'[';
            written += 1;
        }

        while written < buf.len() {
            match self.cursor.next().await {
                Some(Ok(doc)) => {
                    let chunk = self.render_record(&doc);
                    self.first_record = false;

                    let space = buf.len() - written;
                    if chunk.len() <= space {
                        buf[written..written + chunk.len()].copy_from_slice(&chunk);
                        written += chunk.len();
                    } else {
                        buf[written..].copy_from_slice(&chunk[..space]);
                        self.overflow = chunk;
                        self.overflow_pos = space;
                        return Ok(buf.len());
                    }
                }
                Some(Err(error)) => return Err(error),
                None => {
                    if self.format == ExportFormat::Json && !self.footer_written {
                        self.footer_written = true;
                        if written < buf.len() {
                            buf[written] = b']';
                            written += 1;
                        } else {
                            self.overflow = vec![b']'];
                            self.overflow_pos = 0;
                        }
                    }
                    self.finished = true;
                    break;
                }
            }
        }

        Ok(written)
    }

    /// Adapts the reader into a stream of byte chunks for the HTTP body.
    /// Dropping the stream closes the cursor.
    pub fn into_byte_stream(self) -> impl Stream<Item = Result<Bytes, StoreError>> + Send {
        futures::stream::try_unfold(self, |mut reader| async move {
            let mut chunk = vec![0u8; EXPORT_CHUNK_SIZE];
            let n = reader.read(&mut chunk).await?;
            if n == 0 {
                Ok(None)
            } else {
                chunk.truncate(n);
                Ok(Some((Bytes::from(chunk), reader)))
            }
        })
    }

    fn render_record(&self, doc: &Document) -> Vec<u8> {
        match self.format {
            ExportFormat::Json => {
                let mut out = Vec::new();
                if !self.first_record {
                    out.push(b',');
                }
                let value = Bson::Document(doc.clone()).into_relaxed_extjson();
                out.extend_from_slice(value.to_string().as_bytes());
                out
            }
            ExportFormat::Csv => render_csv_row(doc),
        }
    }
}

/// One LF-terminated CSV row in the fixed column order, quoting only where
/// necessary.
fn render_csv_row(doc: &Document) -> Vec<u8> {
    let mut writer = csv_core::Writer::new();
    let mut out = Vec::new();
    let mut scratch = [0u8; 1024];

    for (position, column) in COLUMNS.iter().enumerate() {
        if position > 0 {
            loop {
                let (result, wrote) = writer.delimiter(&mut scratch);
                out.extend_from_slice(&scratch[..wrote]);
                match result {
                    WriteResult::InputEmpty => break,
                    WriteResult::OutputFull => continue,
                }
            }
        }

        let text = field_text(doc.get(column));
        let mut rest = text.as_bytes();
        loop {
            let (result, read, wrote) = writer.field(rest, &mut scratch);
            rest = &rest[read..];
            out.extend_from_slice(&scratch[..wrote]);
            match result {
                WriteResult::InputEmpty => break,
                WriteResult::OutputFull => continue,
            }
        }
    }

    loop {
        let (result, wrote) = writer.finish(&mut scratch);
        out.extend_from_slice(&scratch[..wrote]);
        match result {
            WriteResult::InputEmpty => break,
            WriteResult::OutputFull => continue,
        }
    }

    out.push(b'\n');
    out
}

fn field_text(value: Option<&Bson>) -> String {
    match value {
        Some(Bson::String(s)) => s.clone(),
        Some(Bson::Double(n)) => n.to_string(),
        Some(Bson::Int32(n)) => n.to_string(),
        Some(Bson::Int64(n)) => n.to_string(),
        _ => String::new(),
    }
}
