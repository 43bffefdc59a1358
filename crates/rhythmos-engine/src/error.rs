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

//! Errors that end a simulation run.

use std::fmt::{self, Display};

/// A failure surfaced by [`Sim::run`](crate::sim::Sim::run).
#[derive(Debug, Clone)]
pub enum SimError {
    /// A user callback panicked inside a parallel range task. The chunk's
    /// completion was still accounted for, then the run was stopped.
    TaskPanicked {
        /// Frame on which the chunk executed.
        frame: u64,
        /// Chunk index whose callback panicked.
        chunk: usize,
        /// Rendered panic payload.
        detail: String,
    },
}

impl Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimError::TaskPanicked {
                frame,
                chunk,
                detail,
            } => {
                write!(
                    f,
                    "range task panicked on frame {frame}, chunk {chunk}: {detail}"
                )
            }
        }
    }
}

impl std::error::Error for SimError {}
