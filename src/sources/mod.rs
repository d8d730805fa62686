//! The individual build input kinds.
//!
//! Each submodule materializes one kind of input into the build directory and knows
//! nothing about the others; [`crate::fetcher::SourceFetcher`] decides the order.

pub mod binary;
pub mod git;
pub mod image;

pub use binary::{extract_input_binary, DEFAULT_ARCHIVE_PROGRAM};
pub use git::extract_git_source;
pub use image::{copy_image_source, extract_source_from_image, FAKE_ENTRYPOINT};
