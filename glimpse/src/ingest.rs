//! Raw sample processing: turning counter/gauge observations into per-step
//! values or the unknown marker.
//!
//! This is a pure state machine over [`SourceState`]; the series drives it
//! once per accepted sample and owns persisting the state back into the slab.

use crate::schema::{DataSourceSpec, SourceKind};
use crate::slab::SourceState;

/// A wrap-recovered counter rate above this multiple of the source's declared
/// maximum is treated as nonsense and recorded as unknown.
pub const COUNTER_SANITY_MULTIPLE: f64 = 8.0;

/// Processes one raw observation for a source.
///
/// Returns the per-second rate (counters) or the raw reading (gauges), or
/// `None` when this step is unknown: out-of-range or non-finite input, a
/// first counter observation, a gap beyond the heartbeat, an elapsed time of
/// zero, or a wrap recovery that still makes no sense.
///
/// Side effect: the previous raw value and timestamp in `state` are updated
/// for the next call whenever the input is finite.
pub(crate) fn process_sample(
    spec: &DataSourceSpec,
    state: &mut SourceState,
    raw: f64,
    at: u64,
) -> Option<f64> {
    if !raw.is_finite() {
        return None;
    }

    let had_prev = state.has_prev != 0;
    let prev_raw = state.prev_raw;
    let elapsed = at.saturating_sub(state.prev_time);

    state.prev_raw = raw;
    state.prev_time = at;
    state.has_prev = 1;

    // Range validity applies to the raw observation.
    if let Some(min) = spec.min_value
        && raw < min
    {
        return None;
    }
    if let Some(max) = spec.max_value
        && raw > max
    {
        return None;
    }

    // A source silent for longer than its heartbeat is stale: the step is
    // unknown regardless of kind, never interpolated.
    if had_prev && elapsed > spec.heartbeat.as_secs() {
        return None;
    }

    match spec.kind {
        SourceKind::Gauge => Some(raw),
        SourceKind::Counter => {
            if !had_prev || elapsed == 0 {
                return None;
            }

            let mut delta = raw - prev_raw;
            if delta < 0.0 {
                // The counter wrapped at its declared width.
                delta = (spec.wrap_modulus() - prev_raw) + raw + 1.0;
                if delta < 0.0 {
                    return None;
                }
                #[allow(clippy::cast_precision_loss)]
                let rate = delta / elapsed as f64;
                if let Some(max) = spec.max_value
                    && max.is_finite()
                    && rate > COUNTER_SANITY_MULTIPLE * max
                {
                    return None;
                }
                return Some(rate);
            }

            #[allow(clippy::cast_precision_loss)]
            let rate = delta / elapsed as f64;
            Some(rate)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fresh_state() -> SourceState {
        SourceState {
            prev_raw: f64::NAN,
            prev_time: 0,
            step_sum: 0.0,
            step_count: 0,
            has_prev: 0,
            last_known: f64::NAN,
        }
    }

    fn counter_spec() -> DataSourceSpec {
        DataSourceSpec::counter("c", Duration::from_secs(600))
    }

    fn gauge_spec() -> DataSourceSpec {
        DataSourceSpec::gauge("g", Duration::from_secs(600))
    }

    #[test]
    fn test_first_counter_sample_is_unknown() {
        let spec = counter_spec();
        let mut state = fresh_state();

        assert_eq!(process_sample(&spec, &mut state, 100.0, 1000), None);
        // The observation is remembered for the next differencing.
        assert_eq!(state.prev_raw, 100.0);
        assert_eq!(state.prev_time, 1000);
        assert_eq!(state.has_prev, 1);
    }

    #[test]
    fn test_counter_rate() {
        let spec = counter_spec();
        let mut state = fresh_state();

        process_sample(&spec, &mut state, 100.0, 1000);
        let rate = process_sample(&spec, &mut state, 400.0, 1010).unwrap();
        assert_eq!(rate, 30.0); // (400 - 100) / 10s
    }

    #[test]
    fn test_counter_wraparound() {
        let spec = counter_spec().with_counter_width(8);
        let mut state = fresh_state();

        process_sample(&spec, &mut state, 100.0, 1000);
        process_sample(&spec, &mut state, 140.0, 1010);
        // 90 < 140 means the 8-bit counter wrapped: (256 - 140) + 90 + 1 = 207.
        let rate = process_sample(&spec, &mut state, 90.0, 1020).unwrap();
        assert_eq!(rate, 20.7);
    }

    #[test]
    fn test_wrap_recovery_still_negative_is_unknown() {
        // A previous value beyond the declared width makes the recovery
        // arithmetic negative; the step must be unknown, not a wild rate.
        let spec = counter_spec().with_counter_width(8);
        let mut state = fresh_state();

        process_sample(&spec, &mut state, 300.0, 1000);
        assert_eq!(process_sample(&spec, &mut state, 10.0, 1010), None);
    }

    #[test]
    fn test_wrap_recovery_beyond_sanity_cap_is_unknown() {
        let spec = counter_spec()
            .with_counter_width(32)
            .with_bounds(Some(0.0), Some(100.0));
        let mut state = fresh_state();

        process_sample(&spec, &mut state, 50.0, 1000);
        // Recovered delta ~= 2^32, rate ~= 4e8/s against a declared max of 100.
        assert_eq!(process_sample(&spec, &mut state, 40.0, 1010), None);
    }

    #[test]
    fn test_gauge_passthrough_and_first_sample() {
        let spec = gauge_spec();
        let mut state = fresh_state();

        // Gauges do not need two points.
        assert_eq!(process_sample(&spec, &mut state, 0.75, 1000), Some(0.75));
        assert_eq!(process_sample(&spec, &mut state, 1.25, 1300), Some(1.25));
    }

    #[test]
    fn test_out_of_range_is_unknown() {
        let spec = gauge_spec().with_bounds(Some(0.0), Some(100.0));
        let mut state = fresh_state();

        assert_eq!(process_sample(&spec, &mut state, -1.0, 1000), None);
        assert_eq!(process_sample(&spec, &mut state, 250.0, 1300), None);
        assert_eq!(process_sample(&spec, &mut state, 50.0, 1600), Some(50.0));
    }

    #[test]
    fn test_non_finite_is_unknown() {
        let spec = gauge_spec();
        let mut state = fresh_state();

        assert_eq!(process_sample(&spec, &mut state, f64::NAN, 1000), None);
        assert_eq!(process_sample(&spec, &mut state, f64::INFINITY, 1300), None);
        // Non-finite input never becomes the differencing baseline.
        assert_eq!(state.has_prev, 0);
    }

    #[test]
    fn test_heartbeat_staleness() {
        let spec = counter_spec(); // heartbeat 600s
        let mut state = fresh_state();

        process_sample(&spec, &mut state, 100.0, 1000);
        // 601s of silence exceeds the heartbeat: unknown even though a
        // perfectly good delta exists.
        assert_eq!(process_sample(&spec, &mut state, 700.0, 1601), None);
        // The next sample differences against the late one, which is fine.
        let rate = process_sample(&spec, &mut state, 760.0, 1611).unwrap();
        assert_eq!(rate, 6.0);
    }

    #[test]
    fn test_stale_gauge_is_unknown_too() {
        let spec = gauge_spec();
        let mut state = fresh_state();

        process_sample(&spec, &mut state, 1.0, 1000);
        assert_eq!(process_sample(&spec, &mut state, 2.0, 1601), None);
    }

    #[test]
    fn test_zero_elapsed_counter_is_unknown() {
        let spec = counter_spec();
        let mut state = fresh_state();

        process_sample(&spec, &mut state, 100.0, 1000);
        assert_eq!(process_sample(&spec, &mut state, 200.0, 1000), None);
    }
}
