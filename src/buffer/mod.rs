pub mod buffer_pool_instance;
pub mod lru_replacer;
pub mod parallel_buffer_pool;

pub use buffer_pool_instance::BufferPoolInstance;
pub use lru_replacer::LruReplacer;
pub use parallel_buffer_pool::ParallelBufferPool;
