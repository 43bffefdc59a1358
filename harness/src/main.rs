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

//! Command-line entry point for the Rhythmos driver.
//!
//! Builds a physics-style workload from a handful of flags, runs it, and
//! prints the adaptive statistics and the profiler summary.

use anyhow::Context as _;
use rhythmos_core::hash::Fnv1a64;
use rhythmos_core::telemetry::{Level, StdoutSink};
use rhythmos_core::{Profiler, SimConfig};
use rhythmos_engine::{Sim, SliceCell};
use std::sync::Arc;

struct CliOptions {
    config: SimConfig,
    elements: usize,
    stress: bool,
    warnings: Vec<String>,
}

/// Parses the recognized flags; anything else is ignored so wrappers can
/// pass extra arguments through.
fn parse_args(args: &[String]) -> CliOptions {
    let mut opts = CliOptions {
        config: SimConfig::default(),
        elements: 5000,
        stress: false,
        warnings: Vec::new(),
    };

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--stress" {
            opts.stress = true;
            continue;
        }
        let needs_value = matches!(
            arg.as_str(),
            "--hz" | "--frames" | "--threads" | "--chunk" | "--maxCatchUp"
                | "--thresholdFrames" | "--elements" | "--adaptive" | "--spinMicros"
        );
        if !needs_value {
            continue;
        }
        let Some(value) = iter.next() else {
            opts.warnings.push(format!("{arg} expects a value"));
            continue;
        };
        let mut bad = |what: &str| {
            opts.warnings
                .push(format!("{arg} {value} is not a valid {what}; keeping default"));
        };
        match arg.as_str() {
            "--hz" => match value.parse::<f64>() {
                Ok(v) => opts.config.hz = v,
                Err(_) => bad("rate"),
            },
            "--frames" => match value.parse::<i64>() {
                Ok(v) if v < 0 => opts.config.max_frames = None,
                Ok(v) => opts.config.max_frames = Some(v as u64),
                Err(_) => bad("frame count"),
            },
            "--threads" => match value.parse::<usize>() {
                Ok(v) => opts.config.threads = v,
                Err(_) => bad("thread count"),
            },
            "--chunk" => match value.parse::<usize>() {
                Ok(v) => opts.config.chunk_size = v,
                Err(_) => bad("chunk size"),
            },
            "--maxCatchUp" => match value.parse::<u32>() {
                Ok(v) => opts.config.max_catch_up = v,
                Err(_) => bad("step count"),
            },
            "--thresholdFrames" => match value.parse::<u32>() {
                Ok(v) => opts.config.catch_up_threshold_frames = v,
                Err(_) => bad("frame count"),
            },
            "--elements" => match value.parse::<usize>() {
                Ok(v) => opts.elements = v,
                Err(_) => bad("element count"),
            },
            "--adaptive" => match value.as_str() {
                "0" => opts.config.adaptive = false,
                "1" => opts.config.adaptive = true,
                _ => bad("flag (0 or 1)"),
            },
            "--spinMicros" => match value.parse::<u32>() {
                Ok(v) => opts.config.spin_micros = v,
                Err(_) => bad("duration"),
            },
            _ => unreachable!(),
        }
    }
    opts
}

/// Velocity/position integration over the element domain with an FNV-1a
/// fingerprint of the final velocities.
fn build_physics_phase(sim: &mut Sim, elements: usize) {
    let phase = sim.add_phase("Physics", elements);
    let vel = Arc::new(SliceCell::new(elements, 10.0f64));
    let pos = Arc::new(SliceCell::new(elements, 0.0f64));

    let vel_writer = Arc::clone(&vel);
    sim.add_parallel_range_task(phase, move |begin, end, _, dt| {
        // SAFETY: the dispatcher hands each interval out exactly once.
        let v = unsafe { vel_writer.slice_mut(begin, end) };
        for item in v {
            *item += 0.001 * dt;
        }
    });

    let vel_reader = Arc::clone(&vel);
    let pos_writer = Arc::clone(&pos);
    sim.add_parallel_range_task(phase, move |begin, end, _, dt| {
        // SAFETY: disjoint interval; the velocity pass has completed.
        let p = unsafe { pos_writer.slice_mut(begin, end) };
        for (offset, item) in p.iter_mut().enumerate() {
            *item += vel_reader.get(begin + offset) * dt;
        }
    });

    let final_frame = sim.config().max_frames.map(|f| f.saturating_sub(1));
    let hash_slot = sim.hash_slot();
    sim.add_reduction_task(phase, move |frame, _| {
        if Some(frame) == final_frame {
            let mut hasher = Fnv1a64::new();
            for i in 0..vel.len() {
                hasher.write_f64(vel.get(i));
            }
            hash_slot.store(hasher.finish());
        }
    });
}

/// Deliberately heavy trigonometric pass, useful for watching the adaptive
/// loop absorb overruns.
fn build_stress_phase(sim: &mut Sim, elements: usize) {
    let phase = sim.add_phase("Stress", elements);
    let field = Arc::new(SliceCell::new(elements, 0.0f64));
    sim.add_parallel_range_task(phase, move |begin, end, frame, dt| {
        // SAFETY: disjoint interval per invocation.
        let slice = unsafe { field.slice_mut(begin, end) };
        for (offset, v) in slice.iter_mut().enumerate() {
            let x = (begin + offset) as f64 * dt + frame as f64 * 1.0e-6;
            *v += x.sin() * x.cos();
        }
    });
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let opts = parse_args(&args);

    let mut sim = Sim::new(opts.config);
    sim.attach_log_sink(Arc::new(StdoutSink));
    sim.set_log_level(Level::Info);

    // Route the global facade into the same sinks.
    if log::set_boxed_logger(Box::new(sim.logger())).is_ok() {
        log::set_max_level(log::LevelFilter::Info);
    }
    for warning in &opts.warnings {
        log::warn!("{warning}");
    }

    let profiler = Profiler::new();
    sim.attach_profiler(profiler.clone());

    build_physics_phase(&mut sim, opts.elements);
    if opts.stress {
        build_stress_phase(&mut sim, opts.elements);
    }

    sim.run().context("simulation run failed")?;

    log::info!(
        "Finished frame={} drift={:.2}ms hash={:#018x}",
        sim.frame(),
        sim.last_drift_ms(),
        sim.deterministic_hash()
    );
    if sim.config().adaptive {
        log::info!(
            "CatchUp bursts={} extraSteps={} recoveredMs={:.2}",
            sim.bursts(),
            sim.extra_steps(),
            sim.recovered_ms()
        );
    }

    let table = profiler.render_summary();
    if !table.is_empty() {
        print!("{table}");
    }
    Ok(())
}
