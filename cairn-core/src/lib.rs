pub mod encoding;
pub mod error;
pub mod fingerprint;
pub mod quorum;
pub mod retry;

pub use encoding::{decode, encode, encode_value};
pub use error::{Error, Result};
pub use fingerprint::CallArgs;
pub use retry::RetryStrategy;
