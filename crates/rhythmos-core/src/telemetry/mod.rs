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

//! Injectable telemetry services for the driver.
//!
//! The driver never touches process-global state: a [`Logger`] handle and an
//! optional [`Profiler`] handle are attached explicitly, and every hook site
//! is a cheap branch when they are disabled or absent.

pub mod logging;
pub mod profiling;

pub use self::logging::{FileSink, Level, LogRecord, LogSink, Logger, RingBufferSink, StdoutSink};
pub use self::profiling::{ProfileEntry, ProfileScope, Profiler};
