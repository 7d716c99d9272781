//! Kernel configuration assembled from the command line.
//!
//! One instance is built in the `pre-mm` boot phase by [`crate::cmdline`] and
//! read (never mutated) afterwards, following the "initialized-once
//! configuration structure" pattern spec §9 calls for.

/// Which page-table format to use, or let the kernel probe CPU capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingRequest {
    Auto,
    Classical,
    Extended,
}

/// Slab allocator debug knobs, settable from the command line for bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlabDebugConfig {
    pub poison: bool,
    pub red_zone: bool,
}

/// Top-level kernel configuration.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub serial_enable: bool,
    pub serial_baud: u32,
    pub paging: PagingRequest,
    pub slab_debug: SlabDebugConfig,
    pub log_level: log::LevelFilter,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            serial_enable: true,
            serial_baud: 38_400,
            paging: PagingRequest::Auto,
            slab_debug: SlabDebugConfig::default(),
            log_level: log::LevelFilter::Info,
        }
    }
}
