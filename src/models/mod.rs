pub mod error;
pub mod messages;
pub mod status;

pub use error::*;
pub use messages::*;
pub use status::*;
