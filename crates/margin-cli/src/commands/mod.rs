pub mod cache;
pub mod common;
pub mod drafts;
pub mod notes;
pub mod queue;
pub mod status;
pub mod sync;
