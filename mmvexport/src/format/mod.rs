//! Wire format variants.
//!
//! Both variants share one contract, expressed by [`FileFormat`]: plan a
//! layout, write the static structure and initial values into a freshly
//! mapped buffer, then publish the generation stamp as the very last write.
//!
//! # Generation protocol
//!
//! The reader has no lock to take. Instead every file carries the generation
//! twice: once written early as an "in progress" marker and once written
//! last. A reader that sees the two disagree must treat the file as not yet
//! initialized. Individual values can still be torn while being rewritten;
//! that window is accepted and is not closed here.
//!
//! - [`LegacyFormat`] — 9-byte header, packed value slots, text sidecar.
//! - [`MmvFormat`] — self-describing MMV file with descriptors and a TOC.

mod legacy;
mod mmv;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, MappingError, Result};
use crate::layout::FileLayout;
use crate::metric::Metric;

pub use legacy::{LEGACY_HEADER_SIZE, LEGACY_NAME_LIMIT, LEGACY_PROTOCOL_VERSION, LegacyFormat};
pub use mmv::{
    INLINE_VALUE_SIZE, METRIC_DESCRIPTOR_SIZE, MMV_HEADER_SIZE, MMV_MAGIC, MMV_NAME_LIMIT,
    MMV_VERSION, MmvFormat, NO_INDOM, TOC_ENTRY_SIZE, VALUE_RECORD_SIZE,
};

/// Which wire format a writer produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatVariant {
    /// Minimal packed format with a text sidecar.
    Legacy,
    /// Self-describing MMV format.
    #[default]
    Mmv,
}

impl FormatVariant {
    /// Returns the format strategy for this variant.
    pub fn format(self) -> Box<dyn FileFormat> {
        match self {
            Self::Legacy => Box::new(LegacyFormat),
            Self::Mmv => Box::new(MmvFormat),
        }
    }
}

/// A layout planning and encoding strategy.
pub trait FileFormat: Send + Sync + fmt::Debug {
    /// The variant this strategy implements.
    fn variant(&self) -> FormatVariant;

    /// Longest metric name, in bytes, the format can carry.
    fn name_limit(&self) -> usize;

    /// Checks a metric name against the format's limits.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::NameTooLong`] or
    /// [`ConfigurationError::InvalidName`].
    fn validate_name(&self, name: &str) -> Result<()> {
        check_name(name, self.name_limit())
    }

    /// Computes offsets for `metrics` in registration order.
    ///
    /// # Errors
    ///
    /// Returns an error if the layout does not fit the format.
    fn plan(&self, metrics: &[Metric]) -> Result<FileLayout>;

    /// Writes the header (with an "in progress" generation), any
    /// descriptors, and every initial value into `buf`.
    ///
    /// # Errors
    ///
    /// Returns an error if an initial value cannot be encoded.
    fn write_structure(
        &self,
        buf: &mut [u8],
        layout: &FileLayout,
        metrics: &[Metric],
        generation: u64,
    ) -> Result<()>;

    /// Writes the final generation word, marking the file ready.
    fn publish(&self, buf: &mut [u8], generation: u64);

    /// Writes a text sidecar next to `path`, if the format uses one.
    ///
    /// Returns the sidecar path.
    ///
    /// # Errors
    ///
    /// Returns an error if the sidecar cannot be written.
    fn write_sidecar(
        &self,
        _path: &Path,
        _layout: &FileLayout,
        _metrics: &[Metric],
        _generation: u64,
    ) -> Result<Option<PathBuf>> {
        Ok(None)
    }
}

/// Rejects empty names, embedded NULs, and names longer than `limit` bytes.
fn check_name(name: &str, limit: usize) -> Result<()> {
    if name.is_empty() {
        return Err(ConfigurationError::InvalidName {
            name: name.to_string(),
            reason: "name cannot be empty".to_string(),
        }
        .into());
    }
    if name.contains('\0') {
        return Err(ConfigurationError::InvalidName {
            name: name.to_string(),
            reason: "name cannot contain NUL".to_string(),
        }
        .into());
    }
    if name.len() > limit {
        return Err(ConfigurationError::NameTooLong {
            name: name.to_string(),
            length: name.len(),
            limit,
        }
        .into());
    }
    Ok(())
}

/// Encodes every metric's initial value into its slot.
fn write_initial_values(buf: &mut [u8], layout: &FileLayout, metrics: &[Metric]) -> Result<()> {
    for (metric, offsets) in metrics.iter().zip(layout.offsets()) {
        let handler = metric.handler();
        let start = offsets.value as usize;
        let length = handler.data_length();
        let size = buf.len();
        let slot = buf
            .get_mut(start..start + length)
            .ok_or(MappingError::BoundsViolation {
                offset: start,
                length,
                size,
            })?;
        handler.put_bytes(slot, metric.initial())?;
    }
    Ok(())
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
}

fn put_i32(buf: &mut [u8], offset: usize, value: i32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
}

fn put_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_ne_bytes());
}
