pub mod event;
pub mod tokens;
pub mod trailer;
pub mod types;

pub use event::{Event, EventType};
pub use tokens::TokenUsage;
pub use trailer::{
    append_trailer, format_trailer, is_trailer_only, parse_checkpoint_trailer, parse_trailers,
    strip_trailer, trailer_value, CHECKPOINT_TRAILER, SESSION_TRAILER, STRATEGY_TRAILER,
};
pub use types::*;
