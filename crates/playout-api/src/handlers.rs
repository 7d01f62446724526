//! Request handlers.

pub mod health;
pub mod prepare;
pub mod rooms;
pub mod transitions;

pub use health::*;
pub use prepare::*;
pub use rooms::*;
pub use transitions::*;
