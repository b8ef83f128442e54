//! Binary changeset and patchset encoding.
//!
//! The format is self-describing: a decoder can frame every record without
//! access to the schema the changes were captured from.
//!
//! ```text
//! buffer     := block*
//! block      := header op*
//! header     := marker version varint(len) name varint(ncol) pk_bitmap
//! op         := op_tag record{1,2}
//! record     := value{ncol}
//! value      := 0x00                          -- undefined
//!             | 0x01 i64_be                   -- INTEGER
//!             | 0x02 f64_bits_be              -- REAL
//!             | 0x03 varint(len) utf8         -- TEXT
//!             | 0x04 varint(len) bytes        -- BLOB
//!             | 0x05                          -- NULL
//! ```
//!
//! `marker` is `'T'` for a changeset and `'P'` for a patchset. Every block
//! in one buffer uses the same marker.
//!
//! Only UPDATE records leave columns undefined in a changeset: the old
//! record carries the key and the changed columns, the new record only the
//! changed columns. A patchset also drops the old values of changed columns
//! and every non-key column of a DELETE. A header is written whenever the
//! table changes from one entry to the next, so capture order survives
//! even when tables interleave.
//!
//! Encoding is deterministic: the same entries always produce the same
//! bytes.

use std::sync::Arc;

use bytes::Bytes;

use crate::change::{ChangeLogEntry, OpKind, RowChange};
use crate::error::{CodecError, CodecResult};
use crate::table::TableHeader;
use crate::value::{Row, Value};

/// Current wire format version.
pub const FORMAT_VERSION: u8 = 1;

/// Block marker for changesets.
pub const CHANGESET_MARKER: u8 = b'T';

/// Block marker for condensed patchsets.
pub const PATCHSET_MARKER: u8 = b'P';

/// Value type tags.
mod tags {
    pub const UNDEFINED: u8 = 0;
    pub const INTEGER: u8 = 1;
    pub const REAL: u8 = 2;
    pub const TEXT: u8 = 3;
    pub const BLOB: u8 = 4;
    pub const NULL: u8 = 5;
}

/// Which of the two encodings to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncodeMode {
    /// Changeset: before-images for conflict detection.
    Full,
    /// Patchset: key columns and changed values only.
    Condensed,
}

impl EncodeMode {
    /// Block marker for this mode.
    pub const fn marker(self) -> u8 {
        match self {
            EncodeMode::Full => CHANGESET_MARKER,
            EncodeMode::Condensed => PATCHSET_MARKER,
        }
    }

    fn from_marker(marker: u8) -> Option<Self> {
        match marker {
            CHANGESET_MARKER => Some(EncodeMode::Full),
            PATCHSET_MARKER => Some(EncodeMode::Condensed),
            _ => None,
        }
    }
}

/// A decoded record. `None` marks a column the encoder left out.
pub type Image = Vec<Option<Value>>;

// ─────────────────────────────────────────────────────────────────────────────
// Encoding
// ─────────────────────────────────────────────────────────────────────────────

/// Encode entries in capture order.
///
/// An empty slice encodes to an empty buffer.
pub fn encode(entries: &[ChangeLogEntry], mode: EncodeMode) -> Bytes {
    let mut buf = Vec::new();
    let mut current: Option<&TableHeader> = None;

    for entry in entries {
        let header = entry.table.as_ref();
        if current != Some(header) {
            encode_header(&mut buf, header, mode);
            current = Some(header);
        }
        encode_entry(&mut buf, entry, mode);
    }

    Bytes::from(buf)
}

/// Encode a changeset (with before-images).
pub fn encode_changeset(entries: &[ChangeLogEntry]) -> Bytes {
    encode(entries, EncodeMode::Full)
}

/// Encode a patchset (condensed images).
pub fn encode_patchset(entries: &[ChangeLogEntry]) -> Bytes {
    encode(entries, EncodeMode::Condensed)
}

fn encode_header(buf: &mut Vec<u8>, header: &TableHeader, mode: EncodeMode) {
    buf.push(mode.marker());
    buf.push(FORMAT_VERSION);
    encode_varint(buf, header.name().len() as u64);
    buf.extend_from_slice(header.name().as_bytes());
    encode_varint(buf, header.column_count() as u64);
    buf.extend_from_slice(&header.key_bitmap());
}

fn encode_entry(buf: &mut Vec<u8>, entry: &ChangeLogEntry, mode: EncodeMode) {
    buf.push(entry.kind().tag());
    let header = entry.table.as_ref();

    match (&entry.change, mode) {
        (RowChange::Insert { new }, _) => encode_row(buf, new),
        (RowChange::Delete { old }, EncodeMode::Full) => encode_row(buf, old),
        (RowChange::Delete { old }, EncodeMode::Condensed) => {
            encode_masked(buf, old, |i| header.is_key_column(i));
        }
        (RowChange::Update { old, new }, _) => {
            encode_masked(buf, old, |i| keeps_old(header, old, new, mode, i));
            encode_masked(buf, new, |i| changed(old, new, i));
        }
    }
}

/// Whether an UPDATE's old record carries column `i`.
fn keeps_old(header: &TableHeader, old: &Row, new: &Row, mode: EncodeMode, i: usize) -> bool {
    header.is_key_column(i) || (mode == EncodeMode::Full && changed(old, new, i))
}

fn changed(old: &Row, new: &Row, i: usize) -> bool {
    old.get(i) != new.get(i)
}

fn encode_row(buf: &mut Vec<u8>, row: &Row) {
    for value in row {
        encode_value(buf, value);
    }
}

/// Write `row`, replacing columns not selected by `keep` with undefined.
fn encode_masked(buf: &mut Vec<u8>, row: &Row, keep: impl Fn(usize) -> bool) {
    for (i, value) in row.iter().enumerate() {
        if keep(i) {
            encode_value(buf, value);
        } else {
            buf.push(tags::UNDEFINED);
        }
    }
}

fn encode_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => buf.push(tags::NULL),
        Value::Integer(i) => {
            buf.push(tags::INTEGER);
            buf.extend_from_slice(&i.to_be_bytes());
        }
        Value::Real(r) => {
            buf.push(tags::REAL);
            buf.extend_from_slice(&r.to_bits().to_be_bytes());
        }
        Value::Text(s) => {
            buf.push(tags::TEXT);
            encode_varint(buf, s.len() as u64);
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Blob(b) => {
            buf.push(tags::BLOB);
            encode_varint(buf, b.len() as u64);
            buf.extend_from_slice(b);
        }
    }
}

/// Unsigned LEB128.
fn encode_varint(buf: &mut Vec<u8>, mut n: u64) {
    loop {
        let byte = (n & 0x7f) as u8;
        n >>= 7;
        if n == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Decoding
// ─────────────────────────────────────────────────────────────────────────────

/// One operation read back from a buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedOperation {
    pub table: Arc<TableHeader>,
    pub kind: OpKind,
    pub mode: EncodeMode,
    /// Before-image (UPDATE, DELETE).
    pub old: Option<Image>,
    /// After-image (INSERT, UPDATE).
    pub new: Option<Image>,
}

impl DecodedOperation {
    /// The operation a decoder yields for `entry` encoded in `mode`.
    pub fn from_entry(entry: &ChangeLogEntry, mode: EncodeMode) -> Self {
        let header = entry.table.as_ref();
        let (old, new) = match (&entry.change, mode) {
            (RowChange::Insert { new }, _) => (None, Some(masked(new, |_| true))),
            (RowChange::Delete { old }, EncodeMode::Full) => (Some(masked(old, |_| true)), None),
            (RowChange::Delete { old }, EncodeMode::Condensed) => {
                (Some(masked(old, |i| header.is_key_column(i))), None)
            }
            (RowChange::Update { old, new }, _) => (
                Some(masked(old, |i| keeps_old(header, old, new, mode, i))),
                Some(masked(new, |i| changed(old, new, i))),
            ),
        };
        Self {
            table: Arc::clone(&entry.table),
            kind: entry.kind(),
            mode,
            old,
            new,
        }
    }

    /// Name of the table the operation targets.
    pub fn table_name(&self) -> &str {
        self.table.name()
    }

    /// Primary-key values that locate the target row.
    pub fn primary_key(&self) -> Vec<Value> {
        let image = match self.kind {
            OpKind::Insert => self.new.as_ref(),
            OpKind::Update | OpKind::Delete => self.old.as_ref(),
        };
        let Some(image) = image else {
            return Vec::new();
        };
        self.table
            .key_columns()
            .filter_map(|i| image.get(i).cloned().flatten())
            .collect()
    }

    /// Convert back to a log entry when every image is fully defined.
    ///
    /// Always succeeds for a changeset INSERT or DELETE. An UPDATE converts
    /// only when it changed every column.
    pub fn into_entry(self) -> Option<ChangeLogEntry> {
        let change = match self.kind {
            OpKind::Insert => RowChange::Insert {
                new: full_row(self.new?)?,
            },
            OpKind::Update => RowChange::Update {
                old: full_row(self.old?)?,
                new: full_row(self.new?)?,
            },
            OpKind::Delete => RowChange::Delete {
                old: full_row(self.old?)?,
            },
        };
        Some(ChangeLogEntry::new(self.table, change))
    }
}

fn masked(row: &Row, keep: impl Fn(usize) -> bool) -> Image {
    row.iter()
        .enumerate()
        .map(|(i, v)| keep(i).then(|| v.clone()))
        .collect()
}

fn full_row(image: Image) -> Option<Row> {
    image.into_iter().collect()
}

/// Decode a whole buffer.
///
/// Fails on the first structural problem; nothing is returned for a
/// malformed buffer.
pub fn decode(bytes: &[u8]) -> CodecResult<Vec<DecodedOperation>> {
    ChangesetReader::new(bytes).collect()
}

/// The encoding of a buffer, judged by its first block marker.
///
/// Returns `None` for an empty buffer or an unrecognized marker.
pub fn detect_mode(bytes: &[u8]) -> Option<EncodeMode> {
    bytes.first().copied().and_then(EncodeMode::from_marker)
}

/// Whether a buffer holds a patchset.
pub fn is_patchset(bytes: &[u8]) -> bool {
    detect_mode(bytes) == Some(EncodeMode::Condensed)
}

/// Streaming decoder over a changeset or patchset.
///
/// Yields operations in encoded order. After the first error the reader
/// is exhausted.
pub struct ChangesetReader<'a> {
    data: &'a [u8],
    pos: usize,
    mode: Option<EncodeMode>,
    table: Option<Arc<TableHeader>>,
    failed: bool,
}

impl<'a> ChangesetReader<'a> {
    /// Create a reader over `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            mode: None,
            table: None,
            failed: false,
        }
    }

    /// Mode of the blocks read so far.
    pub fn mode(&self) -> Option<EncodeMode> {
        self.mode
    }

    fn next_operation(&mut self) -> CodecResult<Option<DecodedOperation>> {
        loop {
            let Some(&byte) = self.data.get(self.pos) else {
                return Ok(None);
            };

            if let Some(mode) = EncodeMode::from_marker(byte) {
                self.read_header(mode)?;
                continue;
            }

            let Some(table) = self.table.clone() else {
                return Err(CodecError::UnknownTableMarker {
                    marker: byte,
                    offset: self.pos,
                });
            };
            return self.read_operation(table).map(Some);
        }
    }

    fn read_header(&mut self, mode: EncodeMode) -> CodecResult<()> {
        self.pos += 1;
        match self.mode {
            Some(existing) if existing != mode => return Err(CodecError::MixedFormats),
            _ => self.mode = Some(mode),
        }

        let version = self.read_byte()?;
        if version != FORMAT_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }

        let name_len = self.read_len()?;
        let name = std::str::from_utf8(self.read_bytes(name_len)?)
            .map_err(|_| CodecError::InvalidUtf8 { what: "table name" })?
            .to_string();

        let column_count = self.read_len()?;
        if column_count == 0 {
            return Err(CodecError::EmptyTable);
        }
        let bitmap = self.read_bytes(column_count.div_ceil(8))?;
        let flags = TableHeader::key_flags_from_bitmap(bitmap, column_count);

        self.table = Some(Arc::new(TableHeader::new(name, flags)));
        Ok(())
    }

    fn read_operation(&mut self, table: Arc<TableHeader>) -> CodecResult<DecodedOperation> {
        let offset = self.pos;
        let tag = self.read_byte()?;
        let kind = OpKind::from_tag(tag).ok_or(CodecError::UnknownOperation { tag, offset })?;
        let mode = self.mode.unwrap_or(EncodeMode::Full);
        let n = table.column_count();

        let (old, new) = match kind {
            OpKind::Insert => (None, Some(self.read_record(n)?)),
            OpKind::Delete => (Some(self.read_record(n)?), None),
            OpKind::Update => {
                let old = self.read_record(n)?;
                let new = self.read_record(n)?;
                (Some(old), Some(new))
            }
        };

        let op = DecodedOperation {
            table,
            kind,
            mode,
            old,
            new,
        };
        validate_operation(&op)?;
        Ok(op)
    }

    fn read_record(&mut self, n: usize) -> CodecResult<Image> {
        (0..n).map(|_| self.read_value()).collect()
    }

    fn read_value(&mut self) -> CodecResult<Option<Value>> {
        let offset = self.pos;
        let tag = self.read_byte()?;
        let value = match tag {
            tags::UNDEFINED => return Ok(None),
            tags::NULL => Value::Null,
            tags::INTEGER => Value::Integer(i64::from_be_bytes(self.read_array()?)),
            tags::REAL => Value::Real(f64::from_bits(u64::from_be_bytes(self.read_array()?))),
            tags::TEXT => {
                let len = self.read_len()?;
                let text = std::str::from_utf8(self.read_bytes(len)?)
                    .map_err(|_| CodecError::InvalidUtf8 { what: "TEXT value" })?;
                Value::Text(text.to_string())
            }
            tags::BLOB => {
                let len = self.read_len()?;
                Value::Blob(self.read_bytes(len)?.to_vec())
            }
            _ => return Err(CodecError::UnknownValueTag { tag, offset }),
        };
        Ok(Some(value))
    }

    #[inline]
    fn read_byte(&mut self) -> CodecResult<u8> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or(CodecError::Truncated { offset: self.pos })?;
        self.pos += 1;
        Ok(byte)
    }

    #[inline]
    fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(CodecError::Truncated {
                offset: self.data.len(),
            })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_array(&mut self) -> CodecResult<[u8; 8]> {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(self.read_bytes(8)?);
        Ok(arr)
    }

    fn read_varint(&mut self) -> CodecResult<u64> {
        let start = self.pos;
        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_byte()?;
            if shift == 63 && byte > 1 {
                return Err(CodecError::VarintOverflow { offset: start });
            }
            result |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
            if shift > 63 {
                return Err(CodecError::VarintOverflow { offset: start });
            }
        }
    }

    /// A varint length that must fit in the remaining input.
    fn read_len(&mut self) -> CodecResult<usize> {
        let len = self.read_varint()?;
        usize::try_from(len).map_err(|_| CodecError::Truncated {
            offset: self.data.len(),
        })
    }
}

impl Iterator for ChangesetReader<'_> {
    type Item = CodecResult<DecodedOperation>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_operation() {
            Ok(op) => op.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Check which columns an operation must carry for its mode.
fn validate_operation(op: &DecodedOperation) -> CodecResult<()> {
    let all_defined = |image: &Option<Image>| {
        image
            .as_ref()
            .is_some_and(|img| img.iter().all(Option::is_some))
    };
    let keys_defined = |image: &Option<Image>| {
        image
            .as_ref()
            .is_some_and(|img| op.table.key_columns().all(|i| img[i].is_some()))
    };

    // A changeset UPDATE carries the old value of every column it sets.
    let new_within_old = || match (&op.old, &op.new) {
        (Some(old), Some(new)) => new
            .iter()
            .zip(old)
            .all(|(n, o)| n.is_none() || o.is_some()),
        _ => false,
    };

    let ok = match (op.kind, op.mode) {
        (OpKind::Insert, _) => all_defined(&op.new),
        (OpKind::Delete, EncodeMode::Full) => all_defined(&op.old),
        (OpKind::Update, EncodeMode::Full) => keys_defined(&op.old) && new_within_old(),
        (OpKind::Delete, EncodeMode::Condensed) | (OpKind::Update, EncodeMode::Condensed) => {
            keys_defined(&op.old)
        }
    };

    if ok {
        Ok(())
    } else {
        Err(CodecError::MalformedRecord(format!(
            "{} on {} is missing required columns",
            op.kind,
            op.table.name()
        )))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inspection
// ─────────────────────────────────────────────────────────────────────────────

/// Operation counts for one table in a buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSummary {
    pub table: String,
    pub inserts: usize,
    pub updates: usize,
    pub deletes: usize,
}

impl TableSummary {
    /// Total operations on this table.
    pub fn total(&self) -> usize {
        self.inserts + self.updates + self.deletes
    }
}

/// Count operations per table, in order of first appearance.
pub fn summarize(bytes: &[u8]) -> CodecResult<Vec<TableSummary>> {
    let mut summaries: Vec<TableSummary> = Vec::new();
    for op in ChangesetReader::new(bytes) {
        let op = op?;
        let idx = match summaries
            .iter()
            .position(|s| s.table.eq_ignore_ascii_case(op.table_name()))
        {
            Some(idx) => idx,
            None => {
                summaries.push(TableSummary {
                    table: op.table_name().to_string(),
                    ..Default::default()
                });
                summaries.len() - 1
            }
        };
        let summary = &mut summaries[idx];
        match op.kind {
            OpKind::Insert => summary.inserts += 1,
            OpKind::Update => summary.updates += 1,
            OpKind::Delete => summary.deletes += 1,
        }
    }
    Ok(summaries)
}
