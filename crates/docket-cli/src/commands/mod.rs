pub mod common;
pub mod completions;
pub mod replay;
pub mod validate;
