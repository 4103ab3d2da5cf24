//! Minimal packed format with a text sidecar.
//!
//! ```text
//! [0..8)    generation (0 while initializing)
//! [8]       protocol version
//! [9..)     value slots, registration order, aligned per width
//! ```
//!
//! The sidecar `<file>.txt` tells readers where each value lives:
//!
//! ```text
//! version=1
//! generation=<g>
//! <name>=<offset>,<typename>
//! ...
//! ```
//!
//! The sidecar is written before the binary generation word, so a reader
//! that finds both generations equal has a complete pair.

use std::ffi::OsString;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use super::{FileFormat, FormatVariant, check_name, put_u64, write_initial_values};
use crate::error::{ConfigurationError, MappingError, Result};
use crate::layout::{BlockKind, FileLayout, LayoutBlock, MetricOffsets, alignment_for, pack_slots, to_u32};
use crate::metric::Metric;

/// Size of the legacy header in bytes.
pub const LEGACY_HEADER_SIZE: usize = 9;

/// Protocol version byte.
pub const LEGACY_PROTOCOL_VERSION: u8 = 1;

/// Longest metric name the sidecar accepts.
pub const LEGACY_NAME_LIMIT: usize = 255;

const GENERATION_OFFSET: usize = 0;
const VERSION_OFFSET: usize = 8;

/// The legacy packed format.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyFormat;

impl LegacyFormat {
    /// Path of the sidecar for a data file: the data path with `.txt`
    /// appended.
    pub fn sidecar_path(path: &Path) -> PathBuf {
        let mut name = OsString::from(path.as_os_str());
        name.push(".txt");
        PathBuf::from(name)
    }

    fn render_sidecar(layout: &FileLayout, metrics: &[Metric], generation: u64) -> String {
        let mut text = String::new();
        let _ = writeln!(text, "version={LEGACY_PROTOCOL_VERSION}");
        let _ = writeln!(text, "generation={generation}");
        for (metric, offsets) in metrics.iter().zip(layout.offsets()) {
            let _ = writeln!(
                text,
                "{}={},{}",
                metric.name(),
                offsets.value,
                metric.handler().type_name()
            );
        }
        text
    }
}

impl FileFormat for LegacyFormat {
    fn variant(&self) -> FormatVariant {
        FormatVariant::Legacy
    }

    fn name_limit(&self) -> usize {
        LEGACY_NAME_LIMIT
    }

    fn validate_name(&self, name: &str) -> Result<()> {
        if let Some(bad) = name.chars().find(|c| matches!(c, '=' | ',' | '\n' | '\r')) {
            return Err(ConfigurationError::InvalidName {
                name: name.to_string(),
                reason: format!("character {bad:?} is not allowed in the sidecar"),
            }
            .into());
        }
        check_name(name, LEGACY_NAME_LIMIT)
    }

    fn plan(&self, metrics: &[Metric]) -> Result<FileLayout> {
        let widths = metrics.iter().map(|m| {
            let width = m.handler().data_length();
            (width, alignment_for(width))
        });
        let (values, end) = pack_slots(LEGACY_HEADER_SIZE, widths);

        let offsets = values
            .iter()
            .map(|&value| MetricOffsets {
                descriptor: None,
                data_block: None,
                value: to_u32(value),
            })
            .collect();
        let block = LayoutBlock {
            kind: BlockKind::Values,
            offset: values.first().copied().unwrap_or(LEGACY_HEADER_SIZE),
            count: metrics.len(),
        };

        FileLayout::new(end, offsets, vec![block])
    }

    fn write_structure(
        &self,
        buf: &mut [u8],
        layout: &FileLayout,
        metrics: &[Metric],
        _generation: u64,
    ) -> Result<()> {
        put_u64(buf, GENERATION_OFFSET, 0);
        buf[VERSION_OFFSET] = LEGACY_PROTOCOL_VERSION;
        write_initial_values(buf, layout, metrics)
    }

    fn publish(&self, buf: &mut [u8], generation: u64) {
        put_u64(buf, GENERATION_OFFSET, generation);
    }

    fn write_sidecar(
        &self,
        path: &Path,
        layout: &FileLayout,
        metrics: &[Metric],
        generation: u64,
    ) -> Result<Option<PathBuf>> {
        let sidecar = Self::sidecar_path(path);
        let text = Self::render_sidecar(layout, metrics, generation);
        fs::write(&sidecar, text).map_err(|e| MappingError::Sidecar {
            path: sidecar.clone(),
            source: e,
        })?;
        Ok(Some(sidecar))
    }
}
