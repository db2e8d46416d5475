pub mod config;
pub mod master;
pub mod pool;
pub mod scripts;
pub mod txn;

pub use config::RedisConfig;
pub use master::RedisMaster;
pub use pool::create_pool;
pub use txn::{optimistic, Staged, TxnOptions};
