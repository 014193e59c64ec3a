pub mod codec;
pub mod hash_table_bucket_page;
pub mod hash_table_directory_page;
pub mod page;
pub mod page_guard;

pub use codec::Storable;
pub use hash_table_bucket_page::{bucket_array_size, HashTableBucketPage};
pub use hash_table_directory_page::{
    HashTableDirectoryPage, DIRECTORY_ARRAY_SIZE, MAX_BUCKET_DEPTH,
};
pub use page::{MutRefPageData, Page, RefPageData};
pub use page_guard::PageGuard;
