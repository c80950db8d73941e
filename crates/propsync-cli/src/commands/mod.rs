pub mod archive;
pub mod common;
pub mod delete;
pub mod dropped;
pub mod list;
pub mod show;
pub mod status;
pub mod sync;
pub mod write;
