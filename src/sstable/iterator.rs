//! Sequential SSTable iteration for compaction merges.

use tracing::warn;

use crate::record::Record;

use super::SsTable;

/// Streams every record of one table in key order, decoding straight
/// from the memory map.
///
/// A record whose CRC fails is logged and skipped — its length fields
/// still advance the cursor, so one bad value does not end the scan. A
/// structurally malformed record does end it: lengths can no longer be
/// trusted.
pub struct TableIter<'a> {
    table: &'a SsTable,
    cursor: usize,
    end: usize,
}

impl<'a> TableIter<'a> {
    pub(crate) fn new(table: &'a SsTable, start: usize, end: usize) -> Self {
        Self {
            table,
            cursor: start,
            end,
        }
    }
}

impl Iterator for TableIter<'_> {
    type Item = Record;

    fn next(&mut self) -> Option<Self::Item> {
        let bytes = self.table.mmap_bytes();

        while self.cursor < self.end {
            match Record::decode(&bytes[self.cursor..self.end]) {
                Ok(decoded) => {
                    self.cursor += decoded.consumed;
                    if decoded.checksum_ok {
                        return Some(decoded.record);
                    }
                    warn!(
                        table = self.table.id,
                        offset = self.cursor,
                        "skipping record with checksum mismatch during scan"
                    );
                }
                Err(e) => {
                    warn!(
                        table = self.table.id,
                        offset = self.cursor,
                        error = %e,
                        "malformed record ends table scan"
                    );
                    self.cursor = self.end;
                }
            }
        }

        None
    }
}
