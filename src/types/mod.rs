pub mod import;
pub mod messages;
pub mod property;

pub use import::*;
pub use messages::*;
pub use property::*;
