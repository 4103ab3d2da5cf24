//! Unit classification into the packed MMV dimension word.
//!
//! The monitoring agent does not understand arbitrary units. It knows three
//! dimensions (space, time, count), a fixed list of scales per dimension, and
//! nine shapes: each dimension alone, or any ordered ratio of two of them.
//! [`UnitMappingTable`] enumerates every legal (shape, scale, scale)
//! combination once, and [`UnitMappingTable::find_unit_mapping`] picks the
//! entry describing a given [`Unit`].
//!
//! # Dimension word
//!
//! ```text
//! bits  0..8    zero
//! bits  8..12   count scale
//! bits 12..16   time scale
//! bits 16..20   space scale
//! bits 20..24   count exponent
//! bits 24..28   time exponent
//! bits 28..32   space exponent
//! ```
//!
//! Exponents are -1, 0 or +1, each stored as a full nibble (`0xF` for -1).
//! This layout is shared with the external reader and must not change.

use std::collections::HashMap;

use crate::unit::{CountScale, SpaceScale, TimeScale, Unit};

const COUNT_SCALE_SHIFT: u32 = 8;
const TIME_SCALE_SHIFT: u32 = 12;
const SPACE_SCALE_SHIFT: u32 = 16;
const COUNT_DIM_SHIFT: u32 = 20;
const TIME_DIM_SHIFT: u32 = 24;
const SPACE_DIM_SHIFT: u32 = 28;
const NIBBLE: u32 = 0xF;

/// One of the three physical dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    /// Bytes.
    Space,
    /// Seconds.
    Time,
    /// Items.
    Count,
}

impl Dimension {
    fn scale_shift(self) -> u32 {
        match self {
            Self::Space => SPACE_SCALE_SHIFT,
            Self::Time => TIME_SCALE_SHIFT,
            Self::Count => COUNT_SCALE_SHIFT,
        }
    }

    fn exponent_shift(self) -> u32 {
        match self {
            Self::Space => SPACE_DIM_SHIFT,
            Self::Time => TIME_DIM_SHIFT,
            Self::Count => COUNT_DIM_SHIFT,
        }
    }

    fn scales(self) -> Vec<UnitScale> {
        match self {
            Self::Space => SpaceScale::ALL.into_iter().map(UnitScale::Space).collect(),
            Self::Time => TimeScale::ALL.into_iter().map(UnitScale::Time).collect(),
            Self::Count => CountScale::ALL.into_iter().map(UnitScale::Count).collect(),
        }
    }
}

/// The nine legal dimension shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DimensionSet {
    /// Bytes.
    Space,
    /// Time.
    Time,
    /// Items.
    Count,
    /// Bytes per unit time.
    SpacePerTime,
    /// Bytes per item.
    SpacePerCount,
    /// Time per byte.
    TimePerSpace,
    /// Time per item.
    TimePerCount,
    /// Items per byte.
    CountPerSpace,
    /// Items per unit time.
    CountPerTime,
}

impl DimensionSet {
    /// All shapes, in table order.
    pub const ALL: [Self; 9] = [
        Self::Space,
        Self::Time,
        Self::Count,
        Self::SpacePerTime,
        Self::SpacePerCount,
        Self::TimePerSpace,
        Self::TimePerCount,
        Self::CountPerSpace,
        Self::CountPerTime,
    ];

    /// The dimension in the numerator.
    pub fn numerator(self) -> Dimension {
        match self {
            Self::Space | Self::SpacePerTime | Self::SpacePerCount => Dimension::Space,
            Self::Time | Self::TimePerSpace | Self::TimePerCount => Dimension::Time,
            Self::Count | Self::CountPerSpace | Self::CountPerTime => Dimension::Count,
        }
    }

    /// The dimension in the denominator, if this is a ratio.
    pub fn denominator(self) -> Option<Dimension> {
        match self {
            Self::Space | Self::Time | Self::Count => None,
            Self::TimePerSpace | Self::CountPerSpace => Some(Dimension::Space),
            Self::SpacePerTime | Self::CountPerTime => Some(Dimension::Time),
            Self::SpacePerCount | Self::TimePerCount => Some(Dimension::Count),
        }
    }
}

/// A scale within one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitScale {
    /// A space scale.
    Space(SpaceScale),
    /// A time scale.
    Time(TimeScale),
    /// A count scale.
    Count(CountScale),
}

impl UnitScale {
    /// The dimension this scale belongs to.
    pub fn dimension(self) -> Dimension {
        match self {
            Self::Space(_) => Dimension::Space,
            Self::Time(_) => Dimension::Time,
            Self::Count(_) => Dimension::Count,
        }
    }

    /// The scale code written into the dimension word.
    pub fn code(self) -> u32 {
        match self {
            Self::Space(s) => s.code(),
            Self::Time(s) => s.code(),
            Self::Count(s) => s.code(),
        }
    }

    /// The canonical unit for this scale.
    pub fn unit(self) -> Unit {
        match self {
            Self::Space(s) => Unit::space(s),
            Self::Time(s) => Unit::time(s),
            Self::Count(s) => Unit::count(s),
        }
    }
}

/// A classified unit: its shape and the scale of each component.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitMapping {
    unit: Unit,
    dimension_set: DimensionSet,
    numerator: UnitScale,
    denominator: Option<UnitScale>,
}

impl UnitMapping {
    fn new(dimension_set: DimensionSet, numerator: UnitScale, denominator: Option<UnitScale>) -> Self {
        let unit = match denominator {
            Some(den) => numerator.unit().per(&den.unit()),
            None => numerator.unit(),
        };
        Self {
            unit,
            dimension_set,
            numerator,
            denominator,
        }
    }

    /// The canonical unit this entry stands for.
    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    /// The dimension shape.
    pub fn dimension_set(&self) -> DimensionSet {
        self.dimension_set
    }

    /// Scale of the numerator.
    pub fn numerator(&self) -> UnitScale {
        self.numerator
    }

    /// Scale of the denominator, if any.
    pub fn denominator(&self) -> Option<UnitScale> {
        self.denominator
    }

    /// Packs this mapping into the 32-bit dimension word.
    pub fn dimension_code(&self) -> u32 {
        let mut code = pack(0, self.numerator, 1);
        if let Some(den) = self.denominator {
            code = pack(code, den, -1);
        }
        code
    }
}

fn pack(code: u32, scale: UnitScale, exponent: i32) -> u32 {
    let dimension = scale.dimension();
    // two's complement, truncated to a nibble: -1 -> 0xF
    #[allow(clippy::cast_sign_loss)]
    let exponent_bits = (exponent as u32) & NIBBLE;
    code | ((scale.code() & NIBBLE) << dimension.scale_shift())
        | (exponent_bits << dimension.exponent_shift())
}

/// Immutable table of every legal unit mapping.
///
/// Build it once and share it (it is cheap to wrap in an `Arc`). Lookups
/// never mutate it.
#[derive(Debug, Clone)]
pub struct UnitMappingTable {
    entries: Vec<UnitMapping>,
    by_symbol: HashMap<String, usize>,
    unit_count: usize,
}

impl UnitMappingTable {
    /// Builds the full cross product of shapes and scales.
    ///
    /// Entries are ordered by shape (as in [`DimensionSet::ALL`]), then by
    /// numerator scale, then by denominator scale, smallest first. That
    /// order decides which entry wins when several are equivalent.
    pub fn new() -> Self {
        let mut entries = Vec::new();
        for set in DimensionSet::ALL {
            for numerator in set.numerator().scales() {
                match set.denominator() {
                    None => entries.push(UnitMapping::new(set, numerator, None)),
                    Some(den_dim) => {
                        for denominator in den_dim.scales() {
                            entries.push(UnitMapping::new(set, numerator, Some(denominator)));
                        }
                    }
                }
            }
        }

        let mut by_symbol = HashMap::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            by_symbol.entry(entry.unit.symbol().to_string()).or_insert(index);
        }

        let unit_count = entries
            .iter()
            .position(|e| {
                e.dimension_set == DimensionSet::Count
                    && e.numerator == UnitScale::Count(CountScale::One)
            })
            .unwrap_or_default();

        Self {
            entries,
            by_symbol,
            unit_count,
        }
    }

    /// Number of entries in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty. Never true for a built table.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over all entries in table order.
    pub fn iter(&self) -> impl Iterator<Item = &UnitMapping> {
        self.entries.iter()
    }

    /// The dimensionless "unit count" fallback mapping.
    pub fn unit_count(&self) -> &UnitMapping {
        &self.entries[self.unit_count]
    }

    /// Classifies a unit.
    ///
    /// An exact match wins. Otherwise the first entry in table order whose
    /// unit is equivalent (same dimensions, identity conversion) is used, so
    /// non-canonical spellings get a consistent canonical scale. If nothing
    /// is compatible the unit is treated as a plain count and a warning is
    /// logged. This never fails.
    pub fn find_unit_mapping(&self, unit: &Unit) -> &UnitMapping {
        if let Some(&index) = self.by_symbol.get(unit.symbol())
            && self.entries[index].unit == *unit
        {
            return &self.entries[index];
        }

        if let Some(entry) = self.entries.iter().find(|e| e.unit.is_equivalent(unit)) {
            tracing::debug!(unit = %unit, canonical = %entry.unit, "mapped unit to equivalent canonical unit");
            return entry;
        }

        tracing::warn!(unit = %unit, "no dimension mapping for unit, exporting as a plain count");
        self.unit_count()
    }
}

impl Default for UnitMappingTable {
    fn default() -> Self {
        Self::new()
    }
}
