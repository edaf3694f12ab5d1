pub mod accumulator;
pub mod debounce;
pub mod outbox;
pub mod ports;
pub mod usecases;

pub use accumulator::*;
pub use debounce::*;
pub use outbox::*;
pub use ports::*;
