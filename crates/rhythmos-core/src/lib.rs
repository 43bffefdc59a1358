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

//! # Rhythmos Core
//!
//! Foundational crate for the Rhythmos fixed-timestep driver: run
//! configuration, the timing model, and the injectable telemetry services
//! (levelled logging and named-scope profiling) the driver reports through.

#![warn(missing_docs)]

pub mod config;
pub mod hash;
pub mod telemetry;
pub mod timing;

pub use config::SimConfig;
pub use telemetry::{Level, LogRecord, LogSink, Logger, ProfileEntry, ProfileScope, Profiler};
pub use timing::TimingModel;
