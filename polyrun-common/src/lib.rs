pub mod messages;
pub mod result;
pub mod types;

pub use messages::*;
pub use result::*;
pub use types::*;
