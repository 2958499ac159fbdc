pub mod codec;
pub mod correlation;
pub mod message;
pub mod ops;
pub mod session;
pub mod session_state;
pub mod types;
pub mod utils;
pub mod wire;

#[cfg(test)]
mod testing;

pub use session::SftpSession;
pub use session_state::*;
