pub const DB_PAGE_SIZE: usize = 4096; // size of a data page in bytes
pub const BUFFER_POOL_SIZE: usize = 10; // default size of the buffer pool
pub const LRUK_REPLACER_K: usize = 2; // lookback window for the lru-k replacer

pub type PageId = i32; // page id type
pub type FrameId = usize; // frame id type

pub const INVALID_PAGE_ID: PageId = -1; // invalid page id
