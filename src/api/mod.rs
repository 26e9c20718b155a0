pub mod events;
pub mod sessions;

pub use events::event_stream;
pub use sessions::{get_session, list_sessions};
