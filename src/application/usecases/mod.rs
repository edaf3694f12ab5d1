pub mod handle_event;
pub mod intake_loop;
pub mod relay_outbox;

pub use handle_event::*;
pub use intake_loop::*;
pub use relay_outbox::*;
