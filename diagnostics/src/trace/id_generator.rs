//! Trace and span identifiers and the generators that produce them.
#[cfg(any(feature = "testing", test))]
pub use increment::IncrementIdGenerator;

use rand::{rngs, Rng, SeedableRng};
use std::cell::RefCell;
use std::fmt;
use std::num::ParseIntError;

/// An 8-byte value shared by every span of one request tree.
///
/// Rendered as exactly 16 lowercase hex characters, zero padded.
#[derive(Clone, PartialEq, Eq, Copy, Hash)]
pub struct TraceId(u64);

impl TraceId {
    /// Converts a string in base 16 to a trace id.
    ///
    /// # Examples
    ///
    /// ```
    /// use diagnostics::trace::TraceId;
    ///
    /// assert!(TraceId::from_hex("42").is_ok());
    /// assert!(TraceId::from_hex("5840652a0064912e").is_ok());
    ///
    /// assert!(TraceId::from_hex("not_hex").is_err());
    /// ```
    pub fn from_hex(hex: &str) -> Result<Self, ParseIntError> {
        u64::from_str_radix(hex, 16).map(TraceId)
    }
}

impl From<u64> for TraceId {
    fn from(value: u64) -> Self {
        TraceId(value)
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:016x}", self.0))
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:016x}", self.0))
    }
}

/// An 8-byte value which identifies a single span within a trace.
#[derive(Clone, PartialEq, Eq, Copy, Hash)]
pub struct SpanId(u64);

impl SpanId {
    /// Converts a string in base 16 to a span id.
    ///
    /// # Examples
    ///
    /// ```
    /// use diagnostics::trace::SpanId;
    ///
    /// assert!(SpanId::from_hex("42").is_ok());
    /// assert!(SpanId::from_hex("58406520a0066491").is_ok());
    ///
    /// assert!(SpanId::from_hex("not_hex").is_err());
    /// ```
    pub fn from_hex(hex: &str) -> Result<Self, ParseIntError> {
        u64::from_str_radix(hex, 16).map(SpanId)
    }
}

impl From<u64> for SpanId {
    fn from(value: u64) -> Self {
        SpanId(value)
    }
}

/// A root span is identified by its trace id.
impl From<TraceId> for SpanId {
    fn from(trace_id: TraceId) -> Self {
        SpanId(trace_id.0)
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:016x}", self.0))
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:016x}", self.0))
    }
}

/// Interface for generating IDs
pub trait IdGenerator: Send + Sync + fmt::Debug {
    /// Generate a new `TraceId`
    fn new_trace_id(&self) -> TraceId;

    /// Generate a new `SpanId`
    fn new_span_id(&self) -> SpanId;
}

/// Default [`IdGenerator`] implementation.
///
/// Generates Trace and Span ids using a random number generator.
#[derive(Clone, Debug, Default)]
pub struct RandomIdGenerator {
    _private: (),
}

impl IdGenerator for RandomIdGenerator {
    fn new_trace_id(&self) -> TraceId {
        CURRENT_RNG.with(|rng| TraceId::from(rng.borrow_mut().random::<u64>()))
    }

    fn new_span_id(&self) -> SpanId {
        CURRENT_RNG.with(|rng| SpanId::from(rng.borrow_mut().random::<u64>()))
    }
}

thread_local! {
    /// Store random number generator for each thread
    static CURRENT_RNG: RefCell<rngs::SmallRng> = RefCell::new(rngs::SmallRng::from_os_rng());
}

#[cfg(any(feature = "testing", test))]
mod increment {
    use super::{IdGenerator, SpanId, TraceId};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    /// [`IdGenerator`] implementation that increments a counter for each new ID. This helps produce
    /// predictable IDs for testing.
    #[derive(Clone, Debug)]
    pub struct IncrementIdGenerator(Arc<AtomicU64>);

    impl IncrementIdGenerator {
        /// Create a new [`IncrementIdGenerator`]
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl Default for IncrementIdGenerator {
        fn default() -> Self {
            Self(Arc::new(AtomicU64::new(1)))
        }
    }

    impl IdGenerator for IncrementIdGenerator {
        fn new_trace_id(&self) -> TraceId {
            TraceId::from(self.0.fetch_add(1, Ordering::SeqCst))
        }

        fn new_span_id(&self) -> SpanId {
            SpanId::from(self.0.fetch_add(1, Ordering::SeqCst))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[rustfmt::skip]
    fn trace_id_test_data() -> Vec<(TraceId, &'static str)> {
        vec![
            (TraceId(0), "0000000000000000"),
            (TraceId(42), "000000000000002a"),
            (TraceId(0x0fff_ffff_ffff_ffff), "0fffffffffffffff"),
            (TraceId(u64::MAX), "ffffffffffffffff"),
        ]
    }

    #[test]
    fn test_trace_id() {
        for (id, hex) in trace_id_test_data() {
            assert_eq!(format!("{}", id), hex);
            assert_eq!(format!("{:?}", id), hex);
            assert_eq!(TraceId::from_hex(hex).unwrap(), id);
        }
    }

    #[test]
    fn span_id_renders_padded_hex() {
        assert_eq!(SpanId::from(1).to_string(), "0000000000000001");
        assert_eq!(SpanId::from_hex("00000000000000ff").unwrap(), SpanId::from(255));
        assert_eq!(SpanId::from(TraceId::from(7)), SpanId::from(7));
    }

    #[test]
    fn random_ids_are_fixed_width_with_unbiased_first_digit() {
        let generator = RandomIdGenerator::default();
        let mut first_digits: HashMap<char, usize> = HashMap::new();

        for _ in 0..10_000 {
            let id = generator.new_trace_id().to_string();
            assert_eq!(id.len(), 16);
            assert!(id.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
            *first_digits.entry(id.chars().next().unwrap()).or_default() += 1;
        }

        // Every hex digit, including '0', shows up in the leading position at
        // roughly 1/16 of the draws (625 expected).
        assert_eq!(first_digits.len(), 16);
        for (digit, count) in first_digits {
            assert!(
                (400..=850).contains(&count),
                "leading digit {digit} seen {count} times"
            );
        }
    }

    #[test]
    fn increment_generator_is_predictable() {
        let generator = IncrementIdGenerator::new();
        assert_eq!(generator.new_trace_id(), TraceId::from(1));
        assert_eq!(generator.new_span_id(), SpanId::from(2));
        assert_eq!(generator.clone().new_span_id(), SpanId::from(3));
    }
}
