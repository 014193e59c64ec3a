use std::fmt::Debug;

use crate::common::config::PageId;
use crate::common::rid::Rid;

/// Fixed-width little-endian encoding for keys and values stored in index
/// pages. Slot sizes are known up front so a bucket page can derive its
/// capacity from the page size.
pub trait Storable: Copy + PartialEq + Debug {
    /// Number of bytes this type occupies inside a slot.
    const STORED_SIZE: usize;

    /// Writes the value into `buf`, which is exactly `STORED_SIZE` bytes.
    fn store(&self, buf: &mut [u8]);

    /// Reads a value back out of `buf`.
    fn load(buf: &[u8]) -> Self;
}

macro_rules! storable_int {
    ($t:ty) => {
        impl Storable for $t {
            const STORED_SIZE: usize = std::mem::size_of::<$t>();

            fn store(&self, buf: &mut [u8]) {
                buf.copy_from_slice(&self.to_le_bytes());
            }

            fn load(buf: &[u8]) -> Self {
                <$t>::from_le_bytes(buf.try_into().unwrap())
            }
        }
    };
}

storable_int!(i32);
storable_int!(u32);
storable_int!(i64);
storable_int!(u64);

impl Storable for Rid {
    const STORED_SIZE: usize = 8;

    fn store(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.page_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.slot_num.to_le_bytes());
    }

    fn load(buf: &[u8]) -> Self {
        Rid {
            page_id: PageId::from_le_bytes(buf[0..4].try_into().unwrap()),
            slot_num: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_roundtrip() {
        let mut buf = [0u8; 4];
        (-7i32).store(&mut buf);
        assert_eq!(-7, i32::load(&buf));
    }

    #[test]
    fn rid_roundtrip() {
        let mut buf = [0u8; 8];
        let rid = Rid::new(42, 7);
        rid.store(&mut buf);
        assert_eq!(rid, Rid::load(&buf));
    }
}
