//
// test_utils/mod.rs
//
// Test support: in-memory host and fixture workspaces
//

pub mod fixture_workspace;
mod memory_host;

pub use memory_host::MemoryHost;
