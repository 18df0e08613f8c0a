//! GitHub implementation of the source control seam.
//!
//! Key features:
//! - Exponential backoff retry for transient failures
//! - Distinguishes not-found, rate-limited, transient and permanent errors
//! - Annotated tags resolve to the tag object hash, matching what push
//!   notifications carry

mod client;
mod error;
mod retry;
mod source_control;

pub use client::GitHubClient;
pub use error::from_octocrab;
pub use retry::{RetryConfig, retry_with_backoff};
pub use source_control::GitHubSourceControl;
