//! Per-program presentation clock.
//!
//! Maps source reference-clock (PCR) values to presentation time on the
//! local monotonic timeline. The mapping is recalibrated on every PCR
//! update, scaled by the playback rate, and forced to a fresh calibration
//! after seeks, pauses and discontinuities via [`ProgramClock::reset`].

use std::cell::Cell;
use std::sync::OnceLock;
use std::time::Instant;

/// Smoothing divisor applied to the observed offset between projected and
/// actual system time on each recalibration.
const DRIFT_DIVISOR: i64 = 8;

/// Current process-monotonic time in microseconds.
pub fn mono_now_us() -> i64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_micros() as i64
}

#[derive(Debug, Clone, Copy)]
struct Reference {
    stream: i64,
    system: i64,
}

/// A rate- and discontinuity-aware PCR-to-presentation-time mapping.
#[derive(Debug)]
pub struct ProgramClock {
    rate: f64,
    reference: Option<Reference>,
    /// Last PCR fed to [`ProgramClock::update`].
    last_stream: i64,
    /// Smoothed source drift per recalibration, microseconds. Logged, not
    /// fed back into the mapping.
    drift: i64,
    needs_reset: bool,
    /// Highest presentation time issued so far; recalibration anchors
    /// never regress below it.
    floor: Cell<i64>,
}

impl Default for ProgramClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramClock {
    pub fn new() -> Self {
        Self {
            rate: 1.0,
            reference: None,
            last_stream: 0,
            drift: 0,
            needs_reset: false,
            floor: Cell::new(i64::MIN),
        }
    }

    /// True once at least one PCR has calibrated the mapping.
    pub fn has_reference(&self) -> bool {
        self.reference.is_some()
    }

    /// Feed one PCR sample observed at local time `system_now`.
    pub fn update(&mut self, pcr: i64, system_now: i64) {
        match self.reference {
            Some(reference) if !self.needs_reset => {
                let projected = self.project(reference, pcr);
                let offset = system_now - projected;
                let d_stream = pcr - self.last_stream;
                // A zero-duration PCR interval must not feed the drift
                // estimate or later arithmetic.
                if d_stream != 0 {
                    self.drift += (offset - self.drift) / DRIFT_DIVISOR;
                    if self.drift.abs() > 500_000 {
                        log::debug!(
                            "program clock drift {}us over pcr interval {}us",
                            self.drift,
                            d_stream
                        );
                    }
                }
                // Moving reference: follow the source, absorbing a
                // fraction of the observed offset per update.
                let system = projected + offset / DRIFT_DIVISOR;
                self.reference = Some(Reference {
                    stream: pcr,
                    system: system.max(self.floor.get()),
                });
            }
            _ => {
                // First calibration, or one forced by reset(): re-anchor
                // at the current system time without regressing below
                // timestamps already issued.
                // Anchoring at or above the floor keeps every later
                // translation of ts >= pcr at or above it too.
                self.reference = Some(Reference {
                    stream: pcr,
                    system: system_now.max(self.floor.get()),
                });
                self.needs_reset = false;
            }
        }
        self.last_stream = pcr;
    }

    /// Translate a stream timestamp through the current calibration.
    ///
    /// Returns `None` before the first calibration. Not retroactive: the
    /// result reflects the calibration in effect at the time of the call.
    /// The output itself is never clamped (dts may legitimately precede
    /// an already-translated pts); only recalibration anchors honor the
    /// floor.
    pub fn translate(&self, ts: i64) -> Option<i64> {
        let reference = self.reference?;
        let out = self.project(reference, ts);
        if out > self.floor.get() {
            self.floor.set(out);
        }
        Some(out)
    }

    /// Change the playback rate (1.0 = nominal). The calibration is
    /// re-anchored at the last PCR so already-issued timestamps keep
    /// their value and only the slope changes.
    pub fn set_rate(&mut self, rate: f64) {
        if rate <= 0.0 || rate == self.rate {
            return;
        }
        if let Some(reference) = self.reference {
            let system = self.project(reference, self.last_stream);
            self.reference = Some(Reference {
                stream: self.last_stream,
                system,
            });
        }
        self.rate = rate;
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Force a fresh calibration on the next [`ProgramClock::update`].
    /// Used after seeks, pause/resume and detected discontinuities.
    pub fn reset(&mut self) {
        self.needs_reset = true;
        self.drift = 0;
    }

    fn project(&self, reference: Reference, ts: i64) -> i64 {
        reference.system + ((ts - reference.stream) as f64 / self.rate) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_translate_before_calibration() {
        let clock = ProgramClock::new();
        assert_eq!(clock.translate(1_000), None);
    }

    #[test]
    fn test_monotonic_at_fixed_rate() {
        let mut clock = ProgramClock::new();
        let mut prev = i64::MIN;
        for i in 0..100i64 {
            clock.update(i * 10_000, 500_000 + i * 10_000);
            let out = clock.translate(i * 10_000 + 5_000).unwrap();
            assert!(out >= prev, "regressed at pcr {}: {} < {}", i, out, prev);
            prev = out;
        }
    }

    #[test]
    fn test_translate_preserves_decode_lead() {
        let mut clock = ProgramClock::new();
        clock.update(0, 1_000_000);
        // dts precedes pts; translating pts first must not drag dts up.
        let pts = clock.translate(50_000).unwrap();
        let dts = clock.translate(30_000).unwrap();
        assert_eq!(pts - dts, 20_000);
    }

    #[test]
    fn test_reset_does_not_regress() {
        let mut clock = ProgramClock::new();
        clock.update(100_000, 1_000_000);
        let before = clock.translate(150_000).unwrap();

        clock.reset();
        // New calibration anchored earlier in system time than the last
        // issued timestamp.
        clock.update(0, 500_000);
        let after = clock.translate(10_000).unwrap();
        assert!(after >= before, "{} < {}", after, before);
    }

    #[test]
    fn test_rate_scales_slope_without_jump() {
        let mut clock = ProgramClock::new();
        clock.update(0, 0);
        let at_ref = clock.translate(0).unwrap();
        clock.set_rate(2.0);
        // Anchor value unchanged at the re-anchor point.
        assert_eq!(clock.translate(0).unwrap(), at_ref);
        // Twice the rate: half the presentation interval.
        let one_sec = clock.translate(1_000_000).unwrap();
        assert_eq!(one_sec - at_ref, 500_000);
    }

    #[test]
    fn test_zero_duration_interval_is_harmless() {
        let mut clock = ProgramClock::new();
        clock.update(50_000, 50_000);
        // Same PCR twice: zero stream duration.
        clock.update(50_000, 60_000);
        assert!(clock.translate(70_000).is_some());
    }

    #[quickcheck]
    fn prop_monotonic_for_increasing_pcr(steps: Vec<u16>) -> bool {
        let mut clock = ProgramClock::new();
        let mut pcr = 0i64;
        let mut prev = i64::MIN;
        for step in steps {
            pcr += i64::from(step);
            clock.update(pcr, pcr);
            let out = clock.translate(pcr).unwrap();
            if out < prev {
                return false;
            }
            prev = out;
        }
        true
    }
}
