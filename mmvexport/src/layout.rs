//! File layout planning.
//!
//! A [`FileLayout`] is computed once, at `start()`, before any byte of the
//! file is written. Planning is two passes: first every slot's width and
//! alignment are collected, then offsets are assigned cumulatively in
//! registration order. The result is deterministic for a given metric list.
//!
//! Alignment rule: 8-byte-wide values sit on 8-byte boundaries, everything
//! else on 4-byte boundaries.

use serde::Serialize;

use crate::error::{MappingError, Result};

/// Alignment for 8-byte-wide values.
pub const WIDE_ALIGN: usize = 8;

/// Alignment for every other slot.
pub const NARROW_ALIGN: usize = 4;

/// Returns the alignment required by a slot of `width` bytes.
pub fn alignment_for(width: usize) -> usize {
    if width == 8 { WIDE_ALIGN } else { NARROW_ALIGN }
}

/// Rounds `offset` up to the next multiple of `align` (a power of two).
pub fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

/// Where one metric lives in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricOffsets {
    /// Offset of the metric's descriptor record, if the format has one.
    pub descriptor: Option<u32>,
    /// Offset of the metric's value record, if the format has one.
    pub data_block: Option<u32>,
    /// Offset of the encoded value bytes.
    pub value: u32,
}

/// Kinds of block a layout is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// Metric descriptor records.
    Metrics,
    /// Value records or raw value slots.
    Values,
    /// Out-of-line string slots.
    Strings,
}

impl BlockKind {
    /// MMV table-of-contents type tag.
    pub fn code(self) -> u32 {
        match self {
            Self::Metrics => 2,
            Self::Values => 3,
            Self::Strings => 4,
        }
    }
}

/// A contiguous array of fixed-size entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LayoutBlock {
    /// What the entries are.
    pub kind: BlockKind,
    /// Offset of the first entry.
    pub offset: usize,
    /// Number of entries.
    pub count: usize,
}

/// Total file length plus per-metric offsets, in registration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileLayout {
    length: usize,
    offsets: Vec<MetricOffsets>,
    blocks: Vec<LayoutBlock>,
}

impl FileLayout {
    /// Assembles a layout, checking that every offset fits the format's
    /// 32-bit fields.
    ///
    /// # Errors
    ///
    /// Returns [`MappingError::TooLarge`] if `length` exceeds `u32::MAX`.
    pub fn new(length: usize, offsets: Vec<MetricOffsets>, blocks: Vec<LayoutBlock>) -> Result<Self> {
        if u32::try_from(length).is_err() {
            return Err(MappingError::TooLarge {
                length,
                limit: u32::MAX as usize,
            }
            .into());
        }
        Ok(Self {
            length,
            offsets,
            blocks,
        })
    }

    /// Total file length in bytes.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Offsets of every metric, in registration order.
    pub fn offsets(&self) -> &[MetricOffsets] {
        &self.offsets
    }

    /// Offsets of the metric at `index` in registration order.
    pub fn offset(&self, index: usize) -> Option<&MetricOffsets> {
        self.offsets.get(index)
    }

    /// The blocks making up the file after its header.
    pub fn blocks(&self) -> &[LayoutBlock] {
        &self.blocks
    }

    /// Looks up a block by kind.
    pub fn block(&self, kind: BlockKind) -> Option<&LayoutBlock> {
        self.blocks.iter().find(|b| b.kind == kind)
    }
}

/// Two-pass slot packing.
///
/// Pass one records each slot's width and alignment; pass two walks them in
/// order assigning aligned offsets from `start`. Returns the offsets and the
/// first byte past the last slot.
pub(crate) fn pack_slots(start: usize, widths: impl IntoIterator<Item = (usize, usize)>) -> (Vec<usize>, usize) {
    let slots: Vec<(usize, usize)> = widths.into_iter().collect();

    let mut offsets = Vec::with_capacity(slots.len());
    let mut cursor = start;
    for (width, align) in slots {
        cursor = align_up(cursor, align);
        offsets.push(cursor);
        cursor += width;
    }
    (offsets, cursor)
}

/// Narrows an offset already bounded by a validated layout length.
pub(crate) fn to_u32(offset: usize) -> u32 {
    u32::try_from(offset).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_rule() {
        assert_eq!(alignment_for(8), 8);
        assert_eq!(alignment_for(4), 4);
        assert_eq!(alignment_for(256), 4);
        assert_eq!(alignment_for(1), 4);
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(9, 4), 12);
        assert_eq!(align_up(9, 8), 16);
        assert_eq!(align_up(16, 8), 16);
    }

    #[test]
    fn test_pack_slots_in_order() {
        // i32, i64, f64, i32 after a 9-byte header
        let (offsets, end) = pack_slots(9, [(4, 4), (8, 8), (8, 8), (4, 4)]);
        assert_eq!(offsets, vec![12, 16, 24, 32]);
        assert_eq!(end, 36);
    }

    #[test]
    fn test_layout_length_limit() {
        let too_big = u32::MAX as usize + 1;
        assert!(FileLayout::new(too_big, Vec::new(), Vec::new()).is_err());
        assert!(FileLayout::new(64, Vec::new(), Vec::new()).is_ok());
    }
}
