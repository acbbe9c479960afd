//
// text/mod.rs
//
// Versioned text engine
//

mod line_index;
mod storage;
mod version_cache;


pub use line_index::{LineIndexSnapshot, LineOffset, TextChangeRange, TextSpan};
pub use storage::{compute_line_starts, TextStorage, TextVersion};
pub use version_cache::{ScriptVersionCache, DEFAULT_MAX_VERSIONS};
