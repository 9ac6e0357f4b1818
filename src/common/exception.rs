use crate::common::config::PageId;
use thiserror::Error;

/// Failure surfaced by index operations when the buffer pool cannot satisfy
/// a page request. Every other outcome (duplicate pair, missing pair, full
/// bucket) is reported through the operation's boolean return.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index unavailable: failed to fetch page {0}")]
    FetchFailed(PageId),
    #[error("index unavailable: buffer pool could not allocate a new page")]
    AllocFailed,
}
