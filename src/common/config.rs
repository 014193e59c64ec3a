// Size of a data page in bytes.
pub const PAGE_SIZE: usize = 4096;
pub const INVALID_PAGE_ID: PageId = -1;

pub type FrameId = usize;
pub type PageId = i32;
pub type TxnId = u32;
