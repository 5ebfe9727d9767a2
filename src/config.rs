//! Compile-time configuration.
//!
//! Tunables come from `runmalloc.toml` via `build.rs` (see the generated
//! `config_gen.rs`); the sentinel values and cache-line size below are fixed
//! because the on-memory layout depends on them.

include!(concat!(env!("OUT_DIR"), "/config_gen.rs"));

/// Cache line size assumed for false-sharing isolation and block alignment
/// within a run.
pub const CACHE_LINE: usize = 64;

/// Sentinel stamped into every boundary-tag block header in the arena.
pub const BLOCK_MAGIC: u64 = 0xDEAD_C0DE_DEAD_C0DE;

/// Sentinel stamped at offset 0 of every slab run.
pub const RUN_MAGIC: u32 = 0xA110_CA7E;

const _: () = assert!(RUN_SIZE.is_power_of_two());
const _: () = assert!(SMALL_MAX == SIZE_CLASS_COUNT * 8);
const _: () = assert!(RUN_SIZE == 1 << RUN_SHIFT);
