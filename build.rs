use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Deserialize, Default)]
struct ConfigSection {
    small_max: Option<usize>,
    run_size: Option<usize>,
    arena_region_size: Option<usize>,
    tls_max_local: Option<u32>,
    stats_flush_bytes: Option<usize>,
    stats_flush_ops: Option<usize>,
}

#[derive(Deserialize, Default)]
struct Config {
    #[serde(default)]
    config: ConfigSection,
}

struct ResolvedConfig {
    small_max: usize,
    run_size: usize,
    run_shift: u32,
    arena_region_size: usize,
    tls_max_local: u32,
    stats_flush_bytes: usize,
    stats_flush_ops: usize,
}

fn resolve_config(cfg: &ConfigSection) -> ResolvedConfig {
    let small_max = cfg.small_max.unwrap_or(512);
    let run_size = cfg.run_size.unwrap_or(65536);
    let arena_region_size = cfg.arena_region_size.unwrap_or(64 * 1024 * 1024);
    let tls_max_local = cfg.tls_max_local.unwrap_or(256);
    let stats_flush_bytes = cfg.stats_flush_bytes.unwrap_or(64 * 1024);
    let stats_flush_ops = cfg.stats_flush_ops.unwrap_or(4096);

    assert!(
        small_max > 0 && small_max % 8 == 0,
        "small_max ({}) must be a positive multiple of 8",
        small_max
    );
    assert!(
        run_size.is_power_of_two(),
        "run_size ({}) must be a power of 2 (free-path dispatch masks pointers with it)",
        run_size
    );
    assert!(
        (4096..=1024 * 1024).contains(&run_size),
        "run_size ({}) must be between 4 KiB and 1 MiB",
        run_size
    );
    assert!(
        run_size > small_max,
        "run_size ({}) must exceed small_max ({})",
        run_size,
        small_max
    );
    assert!(
        arena_region_size >= 2 * run_size,
        "arena_region_size ({}) must be at least 2 * run_size ({})",
        arena_region_size,
        run_size
    );
    assert!(tls_max_local > 0, "tls_max_local must be > 0");
    assert!(stats_flush_bytes > 0, "stats_flush_bytes must be > 0");
    assert!(stats_flush_ops > 0, "stats_flush_ops must be > 0");

    ResolvedConfig {
        small_max,
        run_size,
        run_shift: run_size.trailing_zeros(),
        arena_region_size,
        tls_max_local,
        stats_flush_bytes,
        stats_flush_ops,
    }
}

fn default_config_path() -> String {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    format!("{}/runmalloc.toml", manifest_dir)
}

fn generate_config(cfg: &ResolvedConfig, out_path: &Path) {
    let code = format!(
        "// Auto-generated by build.rs. Do not edit.\n\n\
         pub const SMALL_MAX: usize = {};\n\
         pub const SIZE_CLASS_COUNT: usize = {};\n\
         pub const RUN_SIZE: usize = {};\n\
         pub const RUN_SHIFT: usize = {};\n\
         pub const ARENA_REGION_SIZE: usize = {};\n\
         pub const TLS_MAX_LOCAL: u32 = {};\n\
         pub const STATS_FLUSH_BYTES: usize = {};\n\
         pub const STATS_FLUSH_OPS: usize = {};\n",
        cfg.small_max,
        cfg.small_max / 8,
        cfg.run_size,
        cfg.run_shift,
        cfg.arena_region_size,
        cfg.tls_max_local,
        cfg.stats_flush_bytes,
        cfg.stats_flush_ops,
    );
    fs::write(out_path, code).expect("failed to write config_gen.rs");
}

fn main() {
    println!("cargo:rerun-if-env-changed=RUNMALLOC_CONFIG");

    let out_dir = env::var("OUT_DIR").unwrap();

    let config_path = env::var("RUNMALLOC_CONFIG").unwrap_or_else(|_| default_config_path());
    println!("cargo:rerun-if-changed={}", config_path);
    let content = fs::read_to_string(&config_path)
        .unwrap_or_else(|e| panic!("failed to read {}: {}", config_path, e));

    let config: Config = toml::from_str(&content).expect("failed to parse TOML config");
    let resolved = resolve_config(&config.config);

    generate_config(&resolved, &Path::new(&out_dir).join("config_gen.rs"));
}
