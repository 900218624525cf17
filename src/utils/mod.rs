pub mod encoding;
pub mod id;
pub(crate) mod log;

pub use encoding::{base32_encode, i2p_base64_decode, i2p_base64_encode};
pub use id::random_session_id;
