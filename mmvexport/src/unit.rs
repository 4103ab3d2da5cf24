//! Physical units for exported metrics.
//!
//! A [`Unit`] is a product of three dimensions (space in bytes, time and
//! count), each with an integer exponent, plus a conversion factor to the
//! base product `byte^s · second^t · count^c`. Units are built from the
//! canonical scales ([`SpaceScale`], [`TimeScale`], [`CountScale`]) with
//! [`Unit::times`], [`Unit::per`] and [`Unit::product`], or parsed from text.
//!
//! Two notions of sameness matter to the classifier:
//!
//! - `==` is exact structural equality: exponents, factor and symbol.
//! - [`Unit::is_equivalent`] only asks whether the two units measure the same
//!   thing with a conversion factor of one, so `1024*B/s` is equivalent to
//!   `KiB/s` but not equal to it.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use crate::error::{ConfigurationError, MmvError};

/// Relative tolerance used when comparing conversion factors.
const FACTOR_TOLERANCE: f64 = 1e-9;

/// Units of space, in binary powers of a byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpaceScale {
    /// 1 byte.
    Byte,
    /// 2^10 bytes.
    Kilobyte,
    /// 2^20 bytes.
    Megabyte,
    /// 2^30 bytes.
    Gigabyte,
    /// 2^40 bytes.
    Terabyte,
    /// 2^50 bytes.
    Petabyte,
    /// 2^60 bytes.
    Exabyte,
}

impl SpaceScale {
    /// All space scales, smallest first.
    pub const ALL: [Self; 7] = [
        Self::Byte,
        Self::Kilobyte,
        Self::Megabyte,
        Self::Gigabyte,
        Self::Terabyte,
        Self::Petabyte,
        Self::Exabyte,
    ];

    /// Scale code written into the dimension word.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Size in bytes.
    pub fn factor(self) -> f64 {
        // 1024^n; exact in f64 up to exabytes
        f64::from(1u32 << 10).powi(self as i32)
    }

    /// Short symbol.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Byte => "B",
            Self::Kilobyte => "KiB",
            Self::Megabyte => "MiB",
            Self::Gigabyte => "GiB",
            Self::Terabyte => "TiB",
            Self::Petabyte => "PiB",
            Self::Exabyte => "EiB",
        }
    }
}

/// Units of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeScale {
    /// 10^-9 seconds.
    Nanosecond,
    /// 10^-6 seconds.
    Microsecond,
    /// 10^-3 seconds.
    Millisecond,
    /// 1 second.
    Second,
    /// 60 seconds.
    Minute,
    /// 3600 seconds.
    Hour,
}

impl TimeScale {
    /// All time scales, shortest first.
    pub const ALL: [Self; 6] = [
        Self::Nanosecond,
        Self::Microsecond,
        Self::Millisecond,
        Self::Second,
        Self::Minute,
        Self::Hour,
    ];

    /// Scale code written into the dimension word.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Length in seconds.
    pub fn factor(self) -> f64 {
        match self {
            Self::Nanosecond => 1e-9,
            Self::Microsecond => 1e-6,
            Self::Millisecond => 1e-3,
            Self::Second => 1.0,
            Self::Minute => 60.0,
            Self::Hour => 3600.0,
        }
    }

    /// Short symbol.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Nanosecond => "ns",
            Self::Microsecond => "us",
            Self::Millisecond => "ms",
            Self::Second => "s",
            Self::Minute => "min",
            Self::Hour => "h",
        }
    }
}

/// Units of count, in decimal powers. The scale code is the exponent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CountScale {
    /// 10^0.
    One,
    /// 10^1.
    Ten,
    /// 10^2.
    Hundred,
    /// 10^3.
    Thousand,
    /// 10^4.
    TenThousand,
    /// 10^5.
    HundredThousand,
    /// 10^6.
    Million,
    /// 10^7.
    TenMillion,
    /// 10^8.
    HundredMillion,
    /// 10^9.
    Billion,
    /// 10^10.
    TenBillion,
    /// 10^11.
    HundredBillion,
    /// 10^12.
    Trillion,
}

impl CountScale {
    /// All count scales, smallest first.
    pub const ALL: [Self; 13] = [
        Self::One,
        Self::Ten,
        Self::Hundred,
        Self::Thousand,
        Self::TenThousand,
        Self::HundredThousand,
        Self::Million,
        Self::TenMillion,
        Self::HundredMillion,
        Self::Billion,
        Self::TenBillion,
        Self::HundredBillion,
        Self::Trillion,
    ];

    /// Scale code written into the dimension word.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Number of items.
    pub fn factor(self) -> f64 {
        10f64.powi(self as i32)
    }

    /// Short symbol.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::One => "count",
            Self::Ten => "ten",
            Self::Hundred => "hundred",
            Self::Thousand => "thousand",
            Self::TenThousand => "ten-thousand",
            Self::HundredThousand => "hundred-thousand",
            Self::Million => "million",
            Self::TenMillion => "ten-million",
            Self::HundredMillion => "hundred-million",
            Self::Billion => "billion",
            Self::TenBillion => "ten-billion",
            Self::HundredBillion => "hundred-billion",
            Self::Trillion => "trillion",
        }
    }
}

/// A physical unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    space: i8,
    time: i8,
    count: i8,
    factor: f64,
    symbol: Cow<'static, str>,
}

impl Unit {
    /// One byte.
    pub const BYTE: Unit = Unit::base(1, 0, 0, "B");
    /// One second.
    pub const SECOND: Unit = Unit::base(0, 1, 0, "s");
    /// A single counted item.
    pub const COUNT: Unit = Unit::base(0, 0, 1, "count");

    const fn base(space: i8, time: i8, count: i8, symbol: &'static str) -> Self {
        Self {
            space,
            time,
            count,
            factor: 1.0,
            symbol: Cow::Borrowed(symbol),
        }
    }

    /// The canonical unit for a space scale.
    pub fn space(scale: SpaceScale) -> Self {
        Self {
            space: 1,
            time: 0,
            count: 0,
            factor: scale.factor(),
            symbol: Cow::Borrowed(scale.symbol()),
        }
    }

    /// The canonical unit for a time scale.
    pub fn time(scale: TimeScale) -> Self {
        Self {
            space: 0,
            time: 1,
            count: 0,
            factor: scale.factor(),
            symbol: Cow::Borrowed(scale.symbol()),
        }
    }

    /// The canonical unit for a count scale.
    pub fn count(scale: CountScale) -> Self {
        Self {
            space: 0,
            time: 0,
            count: 1,
            factor: scale.factor(),
            symbol: Cow::Borrowed(scale.symbol()),
        }
    }

    /// Scales this unit by a constant, e.g. `BYTE.times(1024.0)`.
    pub fn times(&self, multiplier: f64) -> Self {
        Self {
            factor: self.factor * multiplier,
            symbol: Cow::Owned(format!("{multiplier}*{}", self.symbol)),
            ..*self
        }
    }

    /// Divides this unit by another, e.g. `BYTE.per(&SECOND)`.
    pub fn per(&self, other: &Unit) -> Self {
        let denominator = if other.symbol.contains(['/', '.']) {
            format!("({})", other.symbol)
        } else {
            other.symbol.to_string()
        };
        Self {
            space: self.space - other.space,
            time: self.time - other.time,
            count: self.count - other.count,
            factor: self.factor / other.factor,
            symbol: Cow::Owned(format!("{}/{denominator}", self.symbol)),
        }
    }

    /// Multiplies two units, e.g. `BYTE.product(&SECOND)` is a byte-second.
    pub fn product(&self, other: &Unit) -> Self {
        Self {
            space: self.space + other.space,
            time: self.time + other.time,
            count: self.count + other.count,
            factor: self.factor * other.factor,
            symbol: Cow::Owned(format!("{}.{}", self.symbol, other.symbol)),
        }
    }

    /// Exponent of the space dimension.
    pub fn space_exponent(&self) -> i8 {
        self.space
    }

    /// Exponent of the time dimension.
    pub fn time_exponent(&self) -> i8 {
        self.time
    }

    /// Exponent of the count dimension.
    pub fn count_exponent(&self) -> i8 {
        self.count
    }

    /// Conversion factor to the base product of bytes, seconds and counts.
    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Human-readable symbol.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Whether every dimension exponent is zero.
    pub fn is_dimensionless(&self) -> bool {
        self.space == 0 && self.time == 0 && self.count == 0
    }

    /// Whether both units measure the same dimensions with an identity
    /// conversion between them.
    pub fn is_equivalent(&self, other: &Unit) -> bool {
        self.space == other.space
            && self.time == other.time
            && self.count == other.count
            && (self.factor / other.factor - 1.0).abs() <= FACTOR_TOLERANCE
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.symbol)
    }
}

/// Parses unit text of the form `[multiplier*]term[/term]`.
///
/// Terms are names or symbols such as `byte`, `KiB`, `ms`, `second`,
/// `count`, `thousand` or `1`. `·` is accepted in place of `*`.
///
/// ```rust
/// use mmvexport::unit::{SpaceScale, TimeScale, Unit};
///
/// let parsed: Unit = "byte/second".parse().unwrap();
/// assert_eq!(parsed, Unit::space(SpaceScale::Byte).per(&Unit::time(TimeScale::Second)));
/// ```
impl FromStr for Unit {
    type Err = MmvError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| -> MmvError {
            ConfigurationError::InvalidUnit {
                unit: text.to_string(),
                reason: reason.to_string(),
            }
            .into()
        };

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty unit"));
        }

        let (numerator_text, denominator_text) = match trimmed.split_once('/') {
            Some((num, den)) => (num.trim(), Some(den.trim())),
            None => (trimmed, None),
        };

        let (multiplier, term) = match numerator_text.split_once(['*', '·']) {
            Some((k, term)) => {
                let k: f64 = k
                    .trim()
                    .parse()
                    .map_err(|_| invalid("multiplier is not a number"))?;
                if !k.is_finite() || k <= 0.0 {
                    return Err(invalid("multiplier must be positive"));
                }
                (Some(k), term.trim())
            }
            None => (None, numerator_text),
        };

        let mut unit = parse_term(term).ok_or_else(|| invalid("unknown unit name"))?;
        if let Some(k) = multiplier {
            unit = unit.times(k);
        }
        if let Some(den) = denominator_text {
            if den.contains('/') {
                return Err(invalid("at most one '/' is supported"));
            }
            let den = parse_term(den).ok_or_else(|| invalid("unknown unit name"))?;
            unit = unit.per(&den);
        }
        Ok(unit)
    }
}

fn parse_term(term: &str) -> Option<Unit> {
    let space = match term {
        "byte" | "bytes" | "B" => Some(SpaceScale::Byte),
        "kilobyte" | "kilobytes" | "KiB" | "KB" => Some(SpaceScale::Kilobyte),
        "megabyte" | "megabytes" | "MiB" | "MB" => Some(SpaceScale::Megabyte),
        "gigabyte" | "gigabytes" | "GiB" | "GB" => Some(SpaceScale::Gigabyte),
        "terabyte" | "terabytes" | "TiB" | "TB" => Some(SpaceScale::Terabyte),
        "petabyte" | "petabytes" | "PiB" | "PB" => Some(SpaceScale::Petabyte),
        "exabyte" | "exabytes" | "EiB" | "EB" => Some(SpaceScale::Exabyte),
        _ => None,
    };
    if let Some(scale) = space {
        return Some(Unit::space(scale));
    }

    let time = match term {
        "nanosecond" | "nanoseconds" | "ns" | "nsec" => Some(TimeScale::Nanosecond),
        "microsecond" | "microseconds" | "us" | "usec" | "µs" => Some(TimeScale::Microsecond),
        "millisecond" | "milliseconds" | "ms" | "msec" => Some(TimeScale::Millisecond),
        "second" | "seconds" | "s" | "sec" => Some(TimeScale::Second),
        "minute" | "minutes" | "min" => Some(TimeScale::Minute),
        "hour" | "hours" | "h" | "hr" => Some(TimeScale::Hour),
        _ => None,
    };
    if let Some(scale) = time {
        return Some(Unit::time(scale));
    }

    if matches!(term, "1" | "one" | "count" | "counts") {
        return Some(Unit::count(CountScale::One));
    }
    CountScale::ALL
        .into_iter()
        .find(|scale| scale.symbol() == term)
        .map(Unit::count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_factors() {
        assert_eq!(SpaceScale::Byte.factor(), 1.0);
        assert_eq!(SpaceScale::Kilobyte.factor(), 1024.0);
        assert_eq!(SpaceScale::Exabyte.factor(), 2f64.powi(60));
        assert_eq!(TimeScale::Hour.factor(), 3600.0);
        assert_eq!(CountScale::Thousand.factor(), 1000.0);
        assert_eq!(CountScale::Trillion.factor(), 1e12);
        assert_eq!(CountScale::Trillion.code(), 12);
    }

    #[test]
    fn test_per_and_product() {
        let rate = Unit::BYTE.per(&Unit::SECOND);
        assert_eq!(rate.space_exponent(), 1);
        assert_eq!(rate.time_exponent(), -1);
        assert_eq!(rate.symbol(), "B/s");

        let byte_seconds = Unit::BYTE.product(&Unit::SECOND);
        assert_eq!(byte_seconds.space_exponent(), 1);
        assert_eq!(byte_seconds.time_exponent(), 1);

        let ratio = Unit::SECOND.per(&Unit::SECOND);
        assert!(ratio.is_dimensionless());
    }

    #[test]
    fn test_equivalent_but_not_equal() {
        let kib = Unit::space(SpaceScale::Kilobyte);
        let scaled = Unit::BYTE.times(1024.0);
        assert_ne!(kib, scaled);
        assert!(kib.is_equivalent(&scaled));
        assert!(!kib.is_equivalent(&Unit::BYTE));
        assert!(!Unit::BYTE.is_equivalent(&Unit::SECOND));
    }

    #[test]
    fn test_parse_names_and_symbols() {
        let a: Unit = "byte/second".parse().unwrap();
        let b: Unit = "B/s".parse().unwrap();
        assert_eq!(a, b);

        let c: Unit = "1024*byte/second".parse().unwrap();
        assert_eq!(c.factor(), 1024.0);
        assert_eq!(c.symbol(), "1024*B/s");

        let d: Unit = "1024·byte/second".parse().unwrap();
        assert_eq!(c, d);

        let e: Unit = "thousand/ms".parse().unwrap();
        assert_eq!(e.count_exponent(), 1);
        assert_eq!(e.time_exponent(), -1);
        assert!((e.factor() - 1e6).abs() < 1e-3);

        let one: Unit = "1".parse().unwrap();
        assert_eq!(one, Unit::COUNT);
    }

    #[test]
    fn test_parse_errors() {
        assert!("".parse::<Unit>().is_err());
        assert!("furlong".parse::<Unit>().is_err());
        assert!("x*byte".parse::<Unit>().is_err());
        assert!("-2*byte".parse::<Unit>().is_err());
        assert!("byte/second/second".parse::<Unit>().is_err());
    }
}
