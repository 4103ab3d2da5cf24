//! Self-describing MMV format.
//!
//! ```text
//! [0..32)                 header
//!   [0..4)    magic "MMV\0"
//!   [4..8)    format version
//!   [8..16)   generation A (written first)
//!   [16..24)  generation B (written last)
//!   [24..28)  TOC entry count
//!   [28..32)  flags, reserved (0)
//! [32..32+16*T)           TOC entries
//!   [0..4)    block type (2 metrics, 3 values, 4 strings)
//!   [4..8)    entry count
//!   [8..12)   offset of first entry
//!   [12..16)  reserved (0)
//! metrics block           76-byte descriptors
//!   [0..64)   name, NUL terminated
//!   [64..68)  type id
//!   [68..72)  instance domain (-1, none)
//!   [72..76)  dimension word
//! values block (8-aligned) 24-byte value records
//!   [0..4)    descriptor offset
//!   [4..8)    instance offset (0, none)
//!   [8..24)   inline value, or u64 offset of a string slot
//! strings block           string slots, one per large metric (only if needed)
//! ```
//!
//! The strings TOC entry is present only when some metric requires large
//! storage, so a file of plain numeric metrics has exactly two TOC entries.
//! Each string slot is sized by its metric's handler (256 bytes for the
//! built-in string handler) and starts on an 8-byte boundary.

use super::{FileFormat, FormatVariant, put_i32, put_u32, put_u64, write_initial_values};
use crate::error::{ConfigurationError, Result};
use crate::layout::{
    BlockKind, FileLayout, LayoutBlock, MetricOffsets, NARROW_ALIGN, WIDE_ALIGN, align_up,
    pack_slots, to_u32,
};
use crate::metric::Metric;

/// File magic.
pub const MMV_MAGIC: [u8; 4] = *b"MMV\0";

/// Format version written into the header.
pub const MMV_VERSION: u32 = 1;

/// Size of the header in bytes.
pub const MMV_HEADER_SIZE: usize = 32;

/// Size of one table-of-contents entry.
pub const TOC_ENTRY_SIZE: usize = 16;

/// Size of one metric descriptor.
pub const METRIC_DESCRIPTOR_SIZE: usize = 76;

/// Size of one value record.
pub const VALUE_RECORD_SIZE: usize = 24;

/// Size of the inline payload of a value record.
pub const INLINE_VALUE_SIZE: usize = 16;

/// Longest metric name; the 64-byte field keeps one byte for the NUL.
pub const MMV_NAME_LIMIT: usize = NAME_FIELD_SIZE - 1;

/// Instance domain id meaning "single instance".
pub const NO_INDOM: i32 = -1;

const NAME_FIELD_SIZE: usize = 64;

const MAGIC_OFFSET: usize = 0;
const VERSION_OFFSET: usize = 4;
const GENERATION_A_OFFSET: usize = 8;
const GENERATION_B_OFFSET: usize = 16;
const TOC_COUNT_OFFSET: usize = 24;
const FLAGS_OFFSET: usize = 28;

const DESC_TYPE_OFFSET: usize = 64;
const DESC_INDOM_OFFSET: usize = 68;
const DESC_DIMENSION_OFFSET: usize = 72;

const RECORD_DESCRIPTOR_OFFSET: usize = 0;
const RECORD_INSTANCE_OFFSET: usize = 4;
const RECORD_PAYLOAD_OFFSET: usize = 8;

/// The MMV format.
#[derive(Debug, Clone, Copy, Default)]
pub struct MmvFormat;

impl FileFormat for MmvFormat {
    fn variant(&self) -> FormatVariant {
        FormatVariant::Mmv
    }

    fn name_limit(&self) -> usize {
        MMV_NAME_LIMIT
    }

    fn plan(&self, metrics: &[Metric]) -> Result<FileLayout> {
        if let Some(handler) = metrics
            .iter()
            .map(Metric::handler)
            .find(|h| !h.requires_large_storage() && h.data_length() > INLINE_VALUE_SIZE)
        {
            return Err(ConfigurationError::SlotSize {
                expected: INLINE_VALUE_SIZE,
                actual: handler.data_length(),
            }
            .into());
        }

        let large = metrics
            .iter()
            .filter(|m| m.handler().requires_large_storage())
            .count();

        let toc_count = if large > 0 { 3 } else { 2 };

        // Pass one is the slot sizes; pass two is the cumulative offsets.
        let metrics_start = MMV_HEADER_SIZE + TOC_ENTRY_SIZE * toc_count;
        let (descriptors, descriptors_end) = pack_slots(
            metrics_start,
            metrics.iter().map(|_| (METRIC_DESCRIPTOR_SIZE, NARROW_ALIGN)),
        );

        let values_start = align_up(descriptors_end, WIDE_ALIGN);
        let (records, records_end) = pack_slots(
            values_start,
            metrics.iter().map(|_| (VALUE_RECORD_SIZE, WIDE_ALIGN)),
        );

        let strings_start = align_up(records_end, WIDE_ALIGN);
        // Each string slot is as wide as its own handler.
        let (strings, end) = pack_slots(
            strings_start,
            metrics
                .iter()
                .map(Metric::handler)
                .filter(|h| h.requires_large_storage())
                .map(|h| (h.data_length(), WIDE_ALIGN)),
        );

        let mut string_slots = strings.into_iter();
        let mut offsets = Vec::with_capacity(metrics.len());
        for ((metric, &descriptor), &record) in metrics.iter().zip(&descriptors).zip(&records) {
            let value = if metric.handler().requires_large_storage() {
                string_slots.next().unwrap_or(record + RECORD_PAYLOAD_OFFSET)
            } else {
                record + RECORD_PAYLOAD_OFFSET
            };
            offsets.push(MetricOffsets {
                descriptor: Some(to_u32(descriptor)),
                data_block: Some(to_u32(record)),
                value: to_u32(value),
            });
        }

        let mut blocks = vec![
            LayoutBlock {
                kind: BlockKind::Metrics,
                offset: metrics_start,
                count: metrics.len(),
            },
            LayoutBlock {
                kind: BlockKind::Values,
                offset: values_start,
                count: metrics.len(),
            },
        ];
        if large > 0 {
            blocks.push(LayoutBlock {
                kind: BlockKind::Strings,
                offset: strings_start,
                count: large,
            });
        }

        FileLayout::new(end, offsets, blocks)
    }

    fn write_structure(
        &self,
        buf: &mut [u8],
        layout: &FileLayout,
        metrics: &[Metric],
        generation: u64,
    ) -> Result<()> {
        let toc_count = layout.blocks().len();

        buf[MAGIC_OFFSET..MAGIC_OFFSET + 4].copy_from_slice(&MMV_MAGIC);
        put_u32(buf, VERSION_OFFSET, MMV_VERSION);
        put_u64(buf, GENERATION_A_OFFSET, generation);
        put_u64(buf, GENERATION_B_OFFSET, 0);
        put_u32(buf, TOC_COUNT_OFFSET, to_u32(toc_count));
        put_u32(buf, FLAGS_OFFSET, 0);

        for (index, block) in layout.blocks().iter().enumerate() {
            let entry = MMV_HEADER_SIZE + index * TOC_ENTRY_SIZE;
            put_u32(buf, entry, block.kind.code());
            put_u32(buf, entry + 4, to_u32(block.count));
            put_u32(buf, entry + 8, to_u32(block.offset));
            put_u32(buf, entry + 12, 0);
        }

        for (metric, offsets) in metrics.iter().zip(layout.offsets()) {
            let (Some(descriptor), Some(record)) = (offsets.descriptor, offsets.data_block) else {
                continue;
            };
            let descriptor = descriptor as usize;
            let record = record as usize;

            let name = metric.name().as_bytes();
            let field = &mut buf[descriptor..descriptor + NAME_FIELD_SIZE];
            field.fill(0);
            field[..name.len()].copy_from_slice(name);
            put_i32(buf, descriptor + DESC_TYPE_OFFSET, metric.handler().metric_type().code());
            put_i32(buf, descriptor + DESC_INDOM_OFFSET, NO_INDOM);
            put_u32(buf, descriptor + DESC_DIMENSION_OFFSET, metric.mapping().dimension_code());

            put_u32(buf, record + RECORD_DESCRIPTOR_OFFSET, to_u32(descriptor));
            put_u32(buf, record + RECORD_INSTANCE_OFFSET, 0);
            let payload = record + RECORD_PAYLOAD_OFFSET;
            buf[payload..payload + INLINE_VALUE_SIZE].fill(0);
            if metric.handler().requires_large_storage() {
                put_u64(buf, payload, u64::from(offsets.value));
            }
        }

        write_initial_values(buf, layout, metrics)
    }

    fn publish(&self, buf: &mut [u8], generation: u64) {
        put_u64(buf, GENERATION_B_OFFSET, generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::dimension::UnitMappingTable;
    use crate::format::FileFormat;
    use crate::handler::{STRING_SLOT_SIZE, StringHandler, TypeHandler};
    use crate::metric::test_metric;
    use crate::unit::Unit;
    use crate::value::{MetricValue, Semantics};

    fn u32_at(buf: &[u8], offset: usize) -> u32 {
        u32::from_ne_bytes(buf[offset..offset + 4].try_into().unwrap())
    }

    fn i32_at(buf: &[u8], offset: usize) -> i32 {
        i32::from_ne_bytes(buf[offset..offset + 4].try_into().unwrap())
    }

    fn u64_at(buf: &[u8], offset: usize) -> u64 {
        u64::from_ne_bytes(buf[offset..offset + 8].try_into().unwrap())
    }

    fn numeric_metrics() -> Vec<Metric> {
        vec![
            test_metric("app.requests", MetricValue::I32(3)),
            test_metric("app.bytes", MetricValue::I64(12_345_678_901_234)),
            test_metric("app.load", MetricValue::F64(0.75)),
        ]
    }

    #[test]
    fn test_plan_numeric_only() {
        let layout = MmvFormat.plan(&numeric_metrics()).unwrap();

        // header 32 + 2 TOC entries
        let metrics_block = layout.block(BlockKind::Metrics).unwrap();
        assert_eq!(metrics_block.offset, 64);
        assert_eq!(metrics_block.count, 3);
        assert!(layout.block(BlockKind::Strings).is_none());

        // 64 + 3*76 = 292, aligned to 296
        let values_block = layout.block(BlockKind::Values).unwrap();
        assert_eq!(values_block.offset, 296);
        assert_eq!(layout.length(), 296 + 3 * 24);

        let offsets = layout.offsets();
        assert_eq!(offsets[0].descriptor, Some(64));
        assert_eq!(offsets[1].descriptor, Some(140));
        assert_eq!(offsets[2].descriptor, Some(216));
        assert_eq!(offsets[0].data_block, Some(296));
        assert_eq!(offsets[0].value, 304);
        assert_eq!(offsets[1].value, 328);
        assert_eq!(offsets[2].value, 352);
    }

    #[test]
    fn test_plan_with_strings_adds_block() {
        let metrics = vec![
            test_metric("app.version", MetricValue::from("1.2.3")),
            test_metric("app.count", MetricValue::U64(9)),
        ];
        let layout = MmvFormat.plan(&metrics).unwrap();

        assert_eq!(layout.blocks().len(), 3);
        let metrics_start = 32 + 3 * 16;
        assert_eq!(layout.block(BlockKind::Metrics).unwrap().offset, metrics_start);

        let values_start = align_up(metrics_start + 2 * 76, 8);
        let strings = layout.block(BlockKind::Strings).unwrap();
        assert_eq!(strings.offset, values_start + 2 * 24);
        assert_eq!(strings.count, 1);
        assert_eq!(layout.offsets()[0].value as usize, strings.offset);
        assert_eq!(layout.length(), strings.offset + STRING_SLOT_SIZE);
    }

    #[test]
    fn test_write_structure_layout() {
        let metrics = numeric_metrics();
        let layout = MmvFormat.plan(&metrics).unwrap();
        let mut buf = vec![0u8; layout.length()];
        MmvFormat
            .write_structure(&mut buf, &layout, &metrics, 0xDEAD_BEEF)
            .unwrap();

        assert_eq!(&buf[0..4], b"MMV\0");
        assert_eq!(u32_at(&buf, 4), MMV_VERSION);
        assert_eq!(u64_at(&buf, 8), 0xDEAD_BEEF);
        assert_eq!(u64_at(&buf, 16), 0, "generation B is written last");
        assert_eq!(u32_at(&buf, 24), 2);

        // TOC
        assert_eq!(u32_at(&buf, 32), 2);
        assert_eq!(u32_at(&buf, 36), 3);
        assert_eq!(u32_at(&buf, 40), 64);
        assert_eq!(u32_at(&buf, 44), 0);
        assert_eq!(u32_at(&buf, 48), 3);
        assert_eq!(u32_at(&buf, 52), 3);
        assert_eq!(u32_at(&buf, 56), 296);
        assert_eq!(u32_at(&buf, 60), 0);

        // first descriptor
        assert_eq!(&buf[64..76], b"app.requests");
        assert!(buf[76..128].iter().all(|&b| b == 0));
        assert_eq!(i32_at(&buf, 64 + 64), 0, "I32 type id");
        assert_eq!(i32_at(&buf, 64 + 68), NO_INDOM);
        assert_eq!(u32_at(&buf, 64 + 72), 0x0010_0000);

        // value records point back at descriptors
        assert_eq!(u32_at(&buf, 296), 64);
        assert_eq!(u32_at(&buf, 296 + 24), 140);
        assert_eq!(u32_at(&buf, 296 + 4), 0);

        assert_eq!(i32_at(&buf, 304), 3);
        assert_eq!(u64_at(&buf, 328) as i64, 12_345_678_901_234);
        assert_eq!(f64::from_bits(u64_at(&buf, 352)), 0.75);

        MmvFormat.publish(&mut buf, 0xDEAD_BEEF);
        assert_eq!(u64_at(&buf, 8), u64_at(&buf, 16));
    }

    #[test]
    fn test_string_record_points_at_slot() {
        let metrics = vec![test_metric("app.version", MetricValue::from("1.2.3"))];
        let layout = MmvFormat.plan(&metrics).unwrap();
        let mut buf = vec![0u8; layout.length()];
        MmvFormat.write_structure(&mut buf, &layout, &metrics, 1).unwrap();

        let offsets = layout.offsets()[0];
        let record = offsets.data_block.unwrap() as usize;
        assert_eq!(u64_at(&buf, record + 8), u64::from(offsets.value));
        let slot = offsets.value as usize;
        assert_eq!(&buf[slot..slot + 6], b"1.2.3\0");
        assert_eq!(i32_at(&buf, offsets.descriptor.unwrap() as usize + 64), 6);
    }

    fn wide_text_metric(name: &str, width: usize, text: &str) -> Metric {
        let handler: Arc<dyn TypeHandler> = Arc::new(StringHandler::with_slot_size(width));
        Metric::new(
            name.to_string(),
            Semantics::Discrete,
            Unit::COUNT,
            UnitMappingTable::new().unit_count().clone(),
            handler,
            MetricValue::from(text),
        )
    }

    #[test]
    fn test_string_slots_sized_by_handler() {
        let metrics = vec![
            wide_text_metric("app.banner", 512, "wide"),
            test_metric("app.version", MetricValue::from("1.2.3")),
            wide_text_metric("app.tag", 20, "t"),
        ];
        let layout = MmvFormat.plan(&metrics).unwrap();

        let strings = layout.block(BlockKind::Strings).unwrap();
        assert_eq!(strings.count, 3);
        let slots: Vec<usize> = layout.offsets().iter().map(|o| o.value as usize).collect();
        assert_eq!(slots[0], strings.offset);
        assert_eq!(slots[1], strings.offset + 512);
        assert_eq!(slots[2], strings.offset + 512 + STRING_SLOT_SIZE);
        assert_eq!(layout.length(), slots[2] + 20);

        let mut buf = vec![0u8; layout.length()];
        MmvFormat.write_structure(&mut buf, &layout, &metrics, 1).unwrap();
        assert_eq!(&buf[slots[0]..slots[0] + 5], b"wide\0");
        assert_eq!(&buf[slots[1]..slots[1] + 6], b"1.2.3\0");
        assert_eq!(&buf[slots[2]..slots[2] + 2], b"t\0");
    }

    #[test]
    fn test_short_buffer_is_an_error() {
        let metrics = vec![wide_text_metric("app.banner", 512, "wide")];
        let layout = MmvFormat.plan(&metrics).unwrap();
        let mut buf = vec![0u8; layout.length() - 1];
        let err = MmvFormat
            .write_structure(&mut buf, &layout, &metrics, 1)
            .unwrap_err();
        assert!(err.to_string().contains("beyond mapping"), "{err}");
    }

    #[test]
    fn test_name_limit_boundary() {
        assert!(MmvFormat.validate_name(&"m".repeat(63)).is_ok());
        assert!(MmvFormat.validate_name(&"m".repeat(64)).is_err());
    }
}
