pub mod notification;
pub mod transfer;

pub use notification::*;
pub use transfer::*;
