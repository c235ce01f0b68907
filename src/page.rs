use tracing::trace;

use crate::error::{DbError, Result};

// Compile-time fixed block size, selected via Cargo features.
// Exactly one of `page-4k` or `page-8k` should be enabled.
#[cfg(feature = "page-4k")]
pub const BLOCK_SZ: usize = 4096;
#[cfg(all(feature = "page-8k", not(feature = "page-4k")))]
pub const BLOCK_SZ: usize = 8192;

#[cfg(not(any(feature = "page-4k", feature = "page-8k")))]
compile_error!("One of `page-4k` or `page-8k` features must be enabled to select a block size.");

pub type BlockId = u32;
pub type RecordId = u16;

/// Bytes used by one slot directory entry: `(size, location)` as two u16s.
const SLOT_BYTES: usize = 4;

/// A block laid out as a slotted page.
///
/// Layout:
/// - slot 0 at bytes `0..4` is the block header `(num_records, end_free)`
/// - slot `i` at bytes `4*i..4*i+4` is `(size, location)` for record `i`
/// - payloads are packed against the end of the block, growing towards the directory
///
/// `end_free` is the offset of the highest free byte, so the next record of `n` bytes
/// lands at `end_free + 1 - n`. A slot with `size == 0 && location == 0` is a
/// tombstone; live records always have a non-zero location.
#[derive(Debug, Clone)]
pub struct SlottedPage {
    block_id: BlockId,
    data: Vec<u8>,
    num_records: u16,
    end_free: u16,
}

impl SlottedPage {
    /// A freshly allocated, empty block
    pub fn new(block_id: BlockId) -> Self {
        let mut page = Self {
            block_id,
            data: vec![0; BLOCK_SZ],
            num_records: 0,
            end_free: (BLOCK_SZ - 1) as u16,
        };
        page.put_block_header();
        page
    }

    /// Rehydrate a block from its stored bytes. The header is parsed, not reinitialized.
    pub fn from_bytes(block_id: BlockId, data: Vec<u8>) -> Result<Self> {
        if data.len() != BLOCK_SZ {
            return Err(DbError::Corrupted(format!(
                "block {block_id} is {} bytes, expected {BLOCK_SZ}",
                data.len()
            )));
        }
        let mut page = Self {
            block_id,
            data,
            num_records: 0,
            end_free: 0,
        };
        let (num_records, end_free) = page.get_header(0);
        if (num_records as usize + 1) * SLOT_BYTES > end_free as usize + 1 {
            return Err(DbError::Corrupted(format!(
                "block {block_id} header ({num_records}, {end_free}) overlaps its payload"
            )));
        }
        page.num_records = num_records;
        page.end_free = end_free;
        for id in 1..=num_records {
            let (size, loc) = page.get_header(id);
            let in_payload = loc as usize > end_free as usize
                && loc as usize + size as usize <= BLOCK_SZ;
            if loc != 0 && !in_payload {
                return Err(DbError::Corrupted(format!(
                    "block {block_id} record {id} at ({size}, {loc}) lies outside its payload"
                )));
            }
        }
        Ok(page)
    }

    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn num_records(&self) -> u16 {
        self.num_records
    }

    /// Free bytes between the slot directory and the payload region
    pub fn available(&self) -> usize {
        (self.end_free as usize).saturating_sub((self.num_records as usize + 1) * SLOT_BYTES)
    }

    /// The largest payload `add` accepts on an empty block
    pub fn max_payload() -> usize {
        BLOCK_SZ - 1 - 2 * SLOT_BYTES
    }

    /// Add a new record, returning its id
    pub fn add(&mut self, payload: &[u8]) -> Result<RecordId> {
        if !self.has_room(payload.len() + SLOT_BYTES) {
            return Err(self.no_room(payload.len() + SLOT_BYTES));
        }
        let size = payload.len() as u16;
        self.num_records += 1;
        let id = self.num_records;
        self.end_free -= size;
        let loc = self.end_free + 1;
        self.put_block_header();
        self.put_header(id, size, loc);
        self.data[loc as usize..loc as usize + payload.len()].copy_from_slice(payload);
        Ok(id)
    }

    /// An owned copy of the record's bytes, or `None` if it was deleted or never allocated
    pub fn get(&self, id: RecordId) -> Option<Vec<u8>> {
        let (size, loc) = self.live_header(id)?;
        Some(self.data[loc as usize..loc as usize + size as usize].to_vec())
    }

    /// Replace a record's bytes, growing or shrinking it in place
    pub fn put(&mut self, id: RecordId, payload: &[u8]) -> Result<()> {
        let (size, loc) = self
            .live_header(id)
            .ok_or_else(|| self.no_such_record(id))?;
        let new_size = payload.len();
        if new_size > size as usize {
            let extra = new_size - size as usize;
            if !self.has_room(extra) {
                return Err(self.no_room(extra));
            }
            let extra = extra as u16;
            // open `extra` bytes directly in front of the record
            self.slide(loc, loc - extra);
            let start = (loc - extra) as usize;
            self.data[start..start + new_size].copy_from_slice(payload);
            self.put_header(id, new_size as u16, loc - extra);
        } else {
            let shrink = size - new_size as u16;
            self.data[loc as usize..loc as usize + new_size].copy_from_slice(payload);
            self.slide(loc + new_size as u16, loc + size);
            self.put_header(id, new_size as u16, loc + shrink);
        }
        Ok(())
    }

    /// Delete a record. Its id is never handed out again.
    pub fn del(&mut self, id: RecordId) -> Result<()> {
        let (size, loc) = self
            .live_header(id)
            .ok_or_else(|| self.no_such_record(id))?;
        self.put_header(id, 0, 0);
        self.slide(loc, loc + size);
        Ok(())
    }

    /// Ids of every live record, ascending
    pub fn ids(&self) -> Vec<RecordId> {
        (1..=self.num_records)
            .filter(|&id| self.live_header(id).is_some())
            .collect()
    }

    fn has_room(&self, size: usize) -> bool {
        size <= self.available()
    }

    fn no_room(&self, needed: usize) -> DbError {
        DbError::NoRoom {
            block_id: self.block_id,
            needed,
        }
    }

    fn no_such_record(&self, record_id: RecordId) -> DbError {
        DbError::NoSuchRecord {
            block_id: self.block_id,
            record_id,
        }
    }

    /// Close (`end > start`) or open (`end < start`) the gap `[start, end)` by moving the
    /// payload bytes below it. Every live record lying wholly below `start` moves by
    /// `end - start`; the rest are untouched, so a caller resizing a record must fix
    /// up that record's own location.
    fn slide(&mut self, start: u16, end: u16) {
        let shift = end as i32 - start as i32;
        if shift == 0 {
            return;
        }
        let top = self.end_free as usize + 1;
        let dest = (top as i32 + shift) as usize;
        self.data.copy_within(top..start as usize, dest);

        for id in self.ids() {
            let (size, loc) = self.get_header(id);
            if loc as usize + size as usize <= start as usize {
                self.put_header(id, size, (loc as i32 + shift) as u16);
            }
        }
        self.end_free = (self.end_free as i32 + shift) as u16;
        self.put_block_header();
        trace!(
            block_id = self.block_id,
            start,
            end,
            end_free = self.end_free,
            "compacted block"
        );
    }

    fn live_header(&self, id: RecordId) -> Option<(u16, u16)> {
        if id == 0 || id > self.num_records {
            return None;
        }
        let (size, loc) = self.get_header(id);
        if loc == 0 {
            return None;
        }
        Some((size, loc))
    }

    fn get_header(&self, id: RecordId) -> (u16, u16) {
        let offset = SLOT_BYTES * id as usize;
        (self.get_n(offset), self.get_n(offset + 2))
    }

    fn put_header(&mut self, id: RecordId, size: u16, loc: u16) {
        let offset = SLOT_BYTES * id as usize;
        self.put_n(offset, size);
        self.put_n(offset + 2, loc);
    }

    fn put_block_header(&mut self) {
        self.put_header(0, self.num_records, self.end_free);
    }

    fn get_n(&self, offset: usize) -> u16 {
        u16::from_be_bytes([self.data[offset], self.data[offset + 1]])
    }

    fn put_n(&mut self, offset: usize, n: u16) {
        self.data[offset..offset + 2].copy_from_slice(&n.to_be_bytes());
    }
}
