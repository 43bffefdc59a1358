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

//! # Rhythmos Engine
//!
//! Fixed-timestep simulation driver: a pacing loop advancing a logical
//! clock against wall time, an ordered phase registry, and a lock-free
//! range dispatcher farming chunked index ranges out to a persistent
//! worker set.

mod dispatch;
mod worker;

pub mod error;
pub mod phase;
pub mod scratch;
pub mod sim;

pub use error::SimError;
pub use phase::{PhaseId, RangeTaskFn, ReductionFn, SerialFn};
pub use scratch::SliceCell;
pub use sim::{ExitHandle, HashSlot, Sim};
