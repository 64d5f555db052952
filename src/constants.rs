// src/constants.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Alignment of buffers allocated by the native side (64 bytes)
/// Matches a cache line and satisfies every supported element type
pub const BUFFER_ALIGNMENT: usize = 64;

/// Minimum element count before `SimpleArray::fill` fans out over rayon
/// Below this the thread handoff costs more than the memset it replaces
pub const PARALLEL_FILL_THRESHOLD: usize = 1 << 20;

/// Elements per rayon task for parallel fill
pub const PARALLEL_FILL_CHUNK: usize = 1 << 16;

/// Separator between scope name and method name in timer entries
pub const TIMER_NAME_SEPARATOR: &str = ".";

/// Environment variable consulted by `ProfilerConfig::from_env`
pub const PROFILER_ENV_VAR: &str = "SABRIDGE_PROFILER";
