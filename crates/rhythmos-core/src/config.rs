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

//! Run configuration for the simulation driver.

use serde::{Deserialize, Serialize};

/// Immutable-once-running configuration of a simulation run.
///
/// Values are repaired, not rejected: [`SimConfig::sanitize`] clamps fields
/// that cannot be honored and reports what it changed so the driver can log
/// the repairs once a logger is attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Target step rate in steps per second. Must be strictly positive.
    pub hz: f64,
    /// Step budget for the run. `None` runs until an exit is requested.
    pub max_frames: Option<u64>,
    /// Enables catch-up bursts when the loop falls behind real time.
    pub adaptive: bool,
    /// Upper bound on catch-up steps per loop iteration.
    pub max_catch_up: u32,
    /// Worker population size.
    pub threads: usize,
    /// Whether the driver thread also consumes chunks of the active range.
    pub main_helps: bool,
    /// Elements per chunk for parallel range tasks.
    pub chunk_size: usize,
    /// Threshold, in microseconds, under which the driver busy-yields to the
    /// deadline instead of sleeping.
    pub spin_micros: u32,
    /// Frame stride for periodic drift records. Zero disables the record
    /// (drift is still measured).
    pub drift_log_interval: u64,
    /// A catch-up burst is counted in the statistics when it runs more than
    /// this many extra steps.
    pub catch_up_threshold_frames: u32,
    /// Emit phase begin/end records at debug level.
    pub log_phases: bool,
    /// Emit per-chunk begin/end records at trace level.
    pub log_range_tasks: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            hz: 500.0,
            max_frames: Some(2500),
            adaptive: false,
            max_catch_up: 4,
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            main_helps: true,
            chunk_size: 256,
            spin_micros: 200,
            drift_log_interval: 250,
            catch_up_threshold_frames: 0,
            log_phases: false,
            log_range_tasks: false,
        }
    }
}

impl SimConfig {
    /// Loads a configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Loads a configuration from a JSON file.
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&content)?)
    }

    /// Writes the configuration to a JSON file.
    pub fn to_file(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Clamps fields that cannot be honored as given and returns one message
    /// per repair performed.
    pub fn sanitize(&mut self) -> Vec<String> {
        let mut repairs = Vec::new();
        if self.hz <= 0.0 || !self.hz.is_finite() {
            repairs.push(format!("hz {} corrected to 1.0", self.hz));
            self.hz = 1.0;
        }
        if self.threads == 0 {
            repairs.push("threads 0 corrected to 1".to_string());
            self.threads = 1;
        }
        if self.chunk_size == 0 {
            repairs.push("chunk_size 0 corrected to 1".to_string());
            self.chunk_size = 1;
        }
        repairs
    }
}
