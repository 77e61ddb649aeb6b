//! The five investigation stages, one module each.
//!
//! `characterize` and `gather_evidence` are pure data retrieval; the other
//! three call the external reasoning capability and validate its output
//! into typed artifacts before anything downstream sees it.

pub mod characterize;
pub mod confirm;
pub mod fix;
pub mod gather_evidence;
pub mod hypothesize;

pub use characterize::characterize;
pub use confirm::confirm_root_cause;
pub use fix::generate_fix;
pub use gather_evidence::gather_evidence;
pub use hypothesize::hypothesize;
