use std::fmt;

use crate::common::config::PageId;

/// Identifier of a row: the page it lives on plus its slot within that page.
///
/// The lock manager keys its lock table by `Rid` and otherwise treats it as
/// opaque. The hash index can also store `Rid`s as values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rid {
    pub page_id: PageId,
    pub slot_num: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot_num: u32) -> Rid {
        Rid { page_id, slot_num }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot_num)
    }
}
