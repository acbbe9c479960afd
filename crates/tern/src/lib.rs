//
// lib.rs
//
// Incremental project graph and versioned text engine
//
// The binary in main.rs only drives `server::run_stdio`; everything else is
// exposed here for benches/ and tests/.
//

pub mod config;
pub mod config_file;
pub mod error;
pub mod events;
pub mod gc_timer;
pub mod host;
pub mod multistep;
pub mod path;
pub mod plugin;
pub mod project;
pub mod script_info;
pub mod script_registry;
pub mod server;
pub mod service;
pub mod session;
pub mod text;
pub mod throttle;
// test_utils is available in test builds and when the `test-support` feature is enabled.
#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;
