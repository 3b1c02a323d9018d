//! Signal function families: the per-producer generators that compute the
//! next value to write into the memory image on every tick.

use plc_common::config::{FunctionConfig, InputMatch, TransformRule};
use plc_common::{PlcError, PlcResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, LogNormal as LogNormalDist, Uniform as UniformDist};

/// Resolution used by the wave family: the number of ticks in one full
/// cycle, and the peak amplitude of sin/cos/sawtooth/square output.
pub const WAVE_RESOLUTION: i64 = 1000;

/// A waveform shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveKind {
    /// Sine wave.
    Sin,
    /// Cosine wave.
    Cos,
    /// Linear ramp from `-R` to `R`, then wraps.
    Sawtooth,
    /// Alternates between `+R` and `-R` at the half-cycle.
    Square,
}

impl WaveKind {
    fn parse(kind: &str) -> Option<Self> {
        match kind {
            "sin" | "sine" => Some(Self::Sin),
            "cos" | "cosine" => Some(Self::Cos),
            "sawtooth" => Some(Self::Sawtooth),
            "square" => Some(Self::Square),
            _ => None,
        }
    }
}

/// A signal function family and its running state.
///
/// Each producer owns one `SignalFunction`; every tick calls [`Self::next`]
/// to compute the value written into its target window.
pub enum SignalFunction {
    /// Wraps from `start` to `stop` in steps of `step`.
    Counter {
        /// Range lower bound, and the value wrapped back to.
        start: i64,
        /// Range upper bound (exclusive in the wrap sense: reaching or
        /// passing it wraps back to `start`).
        stop: i64,
        /// Signed step applied every tick.
        step: i64,
        /// Current value.
        current: i64,
    },
    /// Alternates 0/1 every tick.
    Binary {
        /// Current state.
        current: bool,
    },
    /// Always emits the same value.
    Static {
        /// The constant value.
        value: i64,
    },
    /// A periodic waveform over [`WAVE_RESOLUTION`] ticks.
    Wave {
        /// The waveform shape.
        kind: WaveKind,
        /// Current phase, in `0..WAVE_RESOLUTION`.
        phase: i64,
    },
    /// Uniform random integer in `[start, stop)`.
    RandRange {
        /// Inclusive lower bound.
        start: i64,
        /// Exclusive upper bound.
        stop: i64,
        /// Per-producer RNG.
        rng: StdRng,
    },
    /// Log-normal distributed value, rounded to the nearest integer.
    LogNormal {
        /// Mean of the underlying normal distribution.
        mu: f64,
        /// Standard deviation of the underlying normal distribution.
        sigma: f64,
        /// Per-producer RNG.
        rng: StdRng,
    },
    /// Uniform real value in `[a, b)`, rounded to the nearest integer.
    Uniform {
        /// Lower bound.
        a: f64,
        /// Upper bound.
        b: f64,
        /// Per-producer RNG.
        rng: StdRng,
    },
    /// Passes a source value through unchanged.
    Copy,
    /// Maps a source value through an ordered rule list; first match wins.
    Transform {
        /// The rule list, evaluated in order.
        rules: Vec<TransformRule>,
    },
}

impl SignalFunction {
    /// Build a signal function from its configuration block.
    ///
    /// `wlen` is the target section's word width in bytes (1 for `bits`, 2/4/8
    /// for the word sections); it fills in the zero-/one-param `counter` and
    /// `randrange` range default of `[0, 2^(wlen*8), 1]`.
    ///
    /// # Errors
    ///
    /// Returns [`PlcError::ConfigError`] if `kind` is unrecognized or a
    /// family's required parameters are missing or malformed.
    pub fn from_config(cfg: &FunctionConfig, wlen: usize) -> PlcResult<Self> {
        match cfg.kind.as_str() {
            "counter" => {
                let (start, stop, step) = range_params(cfg.range.as_deref(), wlen)?;
                Ok(Self::Counter {
                    start,
                    stop,
                    step,
                    current: start,
                })
            }
            "binary" => Ok(Self::Binary { current: false }),
            "static" => {
                let value = cfg.value.ok_or_else(|| {
                    PlcError::ConfigError("static function requires a value".to_string())
                })?;
                Ok(Self::Static { value })
            }
            "randrange" => {
                let (start, stop, _step) = range_params(cfg.range.as_deref(), wlen)?;
                Ok(Self::RandRange {
                    start,
                    stop,
                    rng: seeded_rng(cfg.seed),
                })
            }
            "lognormal" => Ok(Self::LogNormal {
                mu: cfg.mu.unwrap_or(0.0),
                sigma: cfg.sigma.unwrap_or(1.0),
                rng: seeded_rng(cfg.seed),
            }),
            "uniform" => Ok(Self::Uniform {
                a: cfg.a.unwrap_or(0.0),
                b: cfg.b.unwrap_or(1.0),
                rng: seeded_rng(cfg.seed),
            }),
            "copy" => Ok(Self::Copy),
            "transform" => Ok(Self::Transform {
                rules: cfg.rules.clone().unwrap_or_default(),
            }),
            other => {
                if let Some(kind) = WaveKind::parse(other) {
                    Ok(Self::Wave { kind, phase: 0 })
                } else {
                    Err(PlcError::ConfigError(format!(
                        "unknown signal function: {other}"
                    )))
                }
            }
        }
    }

    /// Whether this family reads a source value (`copy`/`transform`)
    /// rather than generating one on its own.
    #[must_use]
    pub fn needs_source(&self) -> bool {
        matches!(self, Self::Copy | Self::Transform { .. })
    }

    /// Compute the next value. `source` must be `Some` for `copy`/`transform`
    /// families and is ignored otherwise. Returns `None` only when a
    /// `transform` rule list has no match for the current source value --
    /// the caller must skip writing the memory image this tick.
    ///
    /// # Errors
    ///
    /// Returns [`PlcError::ConfigError`] if a `copy`/`transform` producer is
    /// ticked without a source value.
    pub fn next(&mut self, source: Option<i64>) -> PlcResult<Option<i64>> {
        match self {
            Self::Counter {
                start,
                stop,
                step,
                current,
            } => {
                let value = *current;
                let advanced = *current + *step;
                *current = if *step < 0 {
                    if advanced <= *stop {
                        *start
                    } else {
                        advanced
                    }
                } else if advanced >= *stop {
                    *start
                } else {
                    advanced
                };
                Ok(Some(value))
            }
            Self::Binary { current } => {
                let value = i64::from(*current);
                *current = !*current;
                Ok(Some(value))
            }
            Self::Static { value } => Ok(Some(*value)),
            Self::Wave { kind, phase } => {
                let angle = 2.0 * std::f64::consts::PI * (*phase as f64) / (WAVE_RESOLUTION as f64);
                let value = match kind {
                    WaveKind::Sin => (WAVE_RESOLUTION as f64 * angle.sin()).round() as i64,
                    WaveKind::Cos => (WAVE_RESOLUTION as f64 * angle.cos()).round() as i64,
                    WaveKind::Sawtooth => 2 * *phase - WAVE_RESOLUTION,
                    WaveKind::Square => {
                        if *phase < WAVE_RESOLUTION / 2 {
                            WAVE_RESOLUTION
                        } else {
                            -WAVE_RESOLUTION
                        }
                    }
                };
                *phase = (*phase + 1) % WAVE_RESOLUTION;
                Ok(Some(value))
            }
            Self::RandRange { start, stop, rng } => {
                if *stop <= *start {
                    return Ok(Some(*start));
                }
                Ok(Some(rng.gen_range(*start..*stop)))
            }
            Self::LogNormal { mu, sigma, rng } => {
                let dist = LogNormalDist::new(*mu, *sigma)
                    .map_err(|e| PlcError::ConfigError(format!("invalid lognormal params: {e}")))?;
                Ok(Some(dist.sample(rng).round() as i64))
            }
            Self::Uniform { a, b, rng } => {
                let dist = UniformDist::new(*a, *b);
                Ok(Some(dist.sample(rng).round() as i64))
            }
            Self::Copy => source
                .ok_or_else(|| {
                    PlcError::ConfigError("copy function requires a source value".to_string())
                })
                .map(Some),
            Self::Transform { rules } => {
                let state = source.ok_or_else(|| {
                    PlcError::ConfigError("transform function requires a source value".to_string())
                })?;
                for rule in rules.iter() {
                    if rule.input.matches(state) {
                        return Ok(Some(rule.out.unwrap_or(state)));
                    }
                }
                Ok(None)
            }
        }
    }
}

fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    }
}

/// The zero-param range default upper bound for a `wlen`-byte-wide section:
/// `2^(wlen*8)`, clamped to `i64::MAX` once that power no longer fits a
/// signed 64-bit integer (i.e. `wlen >= 8`, the `words64` section).
fn default_range_stop(wlen: usize) -> i64 {
    let bits = (wlen * 8) as u32;
    if bits >= 63 {
        i64::MAX
    } else {
        1i64 << bits
    }
}

fn range_params(range: Option<&[i64]>, wlen: usize) -> PlcResult<(i64, i64, i64)> {
    let range = range.unwrap_or(&[]);
    let (start, stop) = match range {
        [] => (0, default_range_stop(wlen)),
        [stop] => (0, *stop),
        [start, stop] | [start, stop, _] => (*start, *stop),
        _ => {
            return Err(PlcError::ConfigError(
                "range must have at most 3 elements: [start, stop, step]".to_string(),
            ))
        }
    };
    let step = match range {
        [_, _, step] => *step,
        _ => {
            if stop < start {
                -1
            } else {
                1
            }
        }
    };
    if step == 0 {
        return Err(PlcError::ConfigError("range step must not be zero".to_string()));
    }
    Ok((start, stop, step))
}

/// Evaluate whether `state` matches `rule`'s input side. Re-exported for
/// callers that want to test rule matching without a full `Transform`.
#[must_use]
pub fn matches_rule(rule: &TransformRule, state: i64) -> bool {
    rule.input.matches(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_wraps_forward() {
        let mut f = SignalFunction::Counter {
            start: 0,
            stop: 3,
            step: 1,
            current: 0,
        };
        // output current, then advance: 0, 1, 2, then wrap back to 0.
        assert_eq!(f.next(None).unwrap(), Some(0));
        assert_eq!(f.next(None).unwrap(), Some(1));
        assert_eq!(f.next(None).unwrap(), Some(2));
        assert_eq!(f.next(None).unwrap(), Some(0));
    }

    #[test]
    fn counter_wraps_backward() {
        let mut f = SignalFunction::Counter {
            start: 5,
            stop: 0,
            step: -1,
            current: 5,
        };
        assert_eq!(f.next(None).unwrap(), Some(5));
        for _ in 0..4 {
            f.next(None).unwrap();
        }
        // should have wrapped back to start by now
        assert_eq!(f.next(None).unwrap(), Some(5));
    }

    #[test]
    fn binary_alternates() {
        let mut f = SignalFunction::Binary { current: false };
        assert_eq!(f.next(None).unwrap(), Some(0));
        assert_eq!(f.next(None).unwrap(), Some(1));
    }

    #[test]
    fn wave_square_switches_at_half_cycle() {
        let mut f = SignalFunction::Wave {
            kind: WaveKind::Square,
            phase: WAVE_RESOLUTION / 2 - 1,
        };
        assert_eq!(f.next(None).unwrap(), Some(WAVE_RESOLUTION));
        assert_eq!(f.next(None).unwrap(), Some(-WAVE_RESOLUTION));
    }

    #[test]
    fn copy_requires_source() {
        let mut f = SignalFunction::Copy;
        assert!(f.next(None).is_err());
        assert_eq!(f.next(Some(7)).unwrap(), Some(7));
    }

    #[test]
    fn transform_first_match_wins() {
        let mut f = SignalFunction::Transform {
            rules: vec![
                TransformRule {
                    input: InputMatch::Range(vec![0, 10]),
                    out: Some(1),
                },
                TransformRule {
                    input: InputMatch::Scalar(20),
                    out: Some(2),
                },
            ],
        };
        assert_eq!(f.next(Some(5)).unwrap(), Some(1));
        assert_eq!(f.next(Some(20)).unwrap(), Some(2));
        assert_eq!(f.next(Some(99)).unwrap(), None); // no match: skip write
    }

    #[test]
    fn transform_no_match_produces_no_value_but_keeps_state_usable() {
        let mut f = SignalFunction::Transform {
            rules: vec![TransformRule {
                input: InputMatch::Scalar(1),
                out: None,
            }],
        };
        assert_eq!(f.next(Some(1)).unwrap(), Some(1)); // match, null out: passthrough
        assert_eq!(f.next(Some(2)).unwrap(), None); // no match: skip write
    }

    #[test]
    fn static_never_changes() {
        let mut f = SignalFunction::Static { value: 42 };
        assert_eq!(f.next(None).unwrap(), Some(42));
        assert_eq!(f.next(None).unwrap(), Some(42));
    }

    #[test]
    fn randrange_seeded_is_deterministic() {
        let cfg = FunctionConfig {
            kind: "randrange".to_string(),
            range: Some(vec![0, 100]),
            seed: Some(42),
            ..Default::default()
        };
        let mut a = SignalFunction::from_config(&cfg, 2).unwrap();
        let mut b = SignalFunction::from_config(&cfg, 2).unwrap();
        assert_eq!(a.next(None).unwrap(), b.next(None).unwrap());
    }

    #[test]
    fn counter_zero_params_defaults_to_word_width_range() {
        let cfg = FunctionConfig {
            kind: "counter".to_string(),
            ..Default::default()
        };
        let words16 = SignalFunction::from_config(&cfg, 2).unwrap();
        match words16 {
            SignalFunction::Counter { stop, .. } => assert_eq!(stop, 65536),
            _ => panic!("expected a counter"),
        }

        let words64 = SignalFunction::from_config(&cfg, 8).unwrap();
        match words64 {
            SignalFunction::Counter { stop, .. } => assert_eq!(stop, i64::MAX),
            _ => panic!("expected a counter"),
        }
    }
}
