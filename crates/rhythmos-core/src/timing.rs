// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Derivation of per-step and per-iteration durations from a target rate.

use std::time::Duration;

/// Step rate above which multiple steps are grouped into one pacing
/// iteration, so the OS is never asked to sleep below millisecond
/// resolution.
const GROUPING_THRESHOLD_HZ: f64 = 1000.0;

/// Durations derived from a target step rate.
///
/// Recomputing a `TimingModel` is pure: it holds no frame or deadline state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingModel {
    /// The target rate the model was derived from, in steps per second.
    pub hz: f64,
    /// Duration of one simulation step, in seconds.
    pub dt: f64,
    /// Steps executed per pacing iteration.
    pub sub_steps: u32,
    /// Wall-clock period of one pacing iteration (`dt * sub_steps`).
    pub outer_dt: f64,
}

impl TimingModel {
    /// Derives the model from a step rate. The rate must already be
    /// sanitized to a finite, strictly positive value.
    pub fn from_hz(hz: f64) -> Self {
        let dt = 1.0 / hz;
        let sub_steps = if hz > GROUPING_THRESHOLD_HZ {
            (hz / GROUPING_THRESHOLD_HZ).ceil() as u32
        } else {
            1
        };
        Self {
            hz,
            dt,
            sub_steps,
            outer_dt: dt * f64::from(sub_steps),
        }
    }

    /// Per-step duration as a [`Duration`].
    pub fn dt_duration(&self) -> Duration {
        Duration::from_secs_f64(self.dt)
    }

    /// Pacing-iteration period as a [`Duration`].
    pub fn outer_duration(&self) -> Duration {
        Duration::from_secs_f64(self.outer_dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_rates_run_one_step_per_iteration() {
        for hz in [1.0, 60.0, 500.0, 1000.0] {
            let t = TimingModel::from_hz(hz);
            assert_eq!(t.sub_steps, 1, "hz={hz}");
            assert_eq!(t.outer_dt, t.dt, "hz={hz}");
        }
    }

    #[test]
    fn high_rates_group_sub_steps() {
        assert_eq!(TimingModel::from_hz(1001.0).sub_steps, 2);
        assert_eq!(TimingModel::from_hz(2000.0).sub_steps, 2);
        assert_eq!(TimingModel::from_hz(8000.0).sub_steps, 8);
        assert_eq!(TimingModel::from_hz(10_000.0).sub_steps, 10);
    }

    #[test]
    fn grouped_iteration_stays_at_or_above_one_millisecond() {
        for hz in [1001.0, 4000.0, 25_000.0, 100_000.0] {
            let t = TimingModel::from_hz(hz);
            assert!(
                t.outer_dt >= 1.0e-3,
                "hz={hz} outer_dt={}",
                t.outer_dt
            );
        }
    }

    #[test]
    fn dt_matches_rate() {
        let t = TimingModel::from_hz(500.0);
        assert!((t.dt - 0.002).abs() < 1e-12);
        assert_eq!(t.dt_duration(), Duration::from_secs_f64(t.dt));
        assert_eq!(t.outer_duration(), Duration::from_secs_f64(t.outer_dt));
    }
}
