pub mod event;
pub mod notification;
pub mod policy;
pub mod scoring;

pub use event::*;
pub use notification::*;
pub use policy::*;
pub use scoring::{AgeBand, score};
