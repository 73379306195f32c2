use crate::error::{DiagnosticsError, DiagnosticsResult};
use rand::Rng;

/// Decides whether a new root span is traced.
///
/// One uniform draw in `[0, 1)` is made per root span. The span is dropped
/// from tracing when the draw exceeds `sample_rate`, unless `force_sampling`
/// is set.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sampler {
    force_sampling: bool,
    sample_rate: f64,
}

impl Default for Sampler {
    fn default() -> Self {
        Sampler {
            force_sampling: false,
            sample_rate: 1.0,
        }
    }
}

impl Sampler {
    /// Create a sampler. Fails when `sample_rate` is outside `[0, 1]`.
    pub fn new(force_sampling: bool, sample_rate: f64) -> DiagnosticsResult<Self> {
        if !(0.0..=1.0).contains(&sample_rate) {
            return Err(DiagnosticsError::Configuration(format!(
                "sample rate must be within [0, 1], got {sample_rate}"
            )));
        }
        Ok(Sampler {
            force_sampling,
            sample_rate,
        })
    }

    /// A sampler that traces every root span.
    pub fn always() -> Self {
        Sampler {
            force_sampling: true,
            sample_rate: 1.0,
        }
    }

    /// Draw once and decide.
    pub fn should_sample(&self) -> bool {
        if self.force_sampling {
            return true;
        }
        self.decide(rand::rng().random::<f64>())
    }

    fn decide(&self, draw: f64) -> bool {
        self.force_sampling || draw <= self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::Sampler;
    use rstest::rstest;

    #[rstest]
    #[case(false, 0.5, 0.4, true)]
    #[case(false, 0.5, 0.5, true)]
    #[case(false, 0.5, 0.6, false)]
    #[case(false, 0.0, 0.3, false)]
    #[case(true, 0.0, 0.9, true)]
    #[case(false, 1.0, 0.999, true)]
    fn decision_compares_draw_with_rate(
        #[case] force_sampling: bool,
        #[case] sample_rate: f64,
        #[case] draw: f64,
        #[case] expected: bool,
    ) {
        let sampler = Sampler::new(force_sampling, sample_rate).unwrap();
        assert_eq!(sampler.decide(draw), expected);
    }

    #[rstest]
    #[case(-0.1)]
    #[case(1.5)]
    #[case(f64::NAN)]
    fn out_of_range_rate_is_rejected(#[case] sample_rate: f64) {
        assert!(Sampler::new(false, sample_rate).is_err());
    }

    #[test]
    fn full_rate_always_samples() {
        let sampler = Sampler::default();
        assert!((0..1_000).all(|_| sampler.should_sample()));
    }
}
