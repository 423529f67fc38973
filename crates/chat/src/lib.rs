#![deny(unsafe_code)]

//! Client-side chat state: the message list, model selection, theme, and the
//! engine that reconciles backend replies and stream chunks into them.

pub mod app;
pub mod engine;
pub mod error;
pub mod events;
pub mod message;
pub mod models;
pub mod settings;
pub mod store;
pub mod stream;
pub mod theme;

#[cfg(test)]
mod test_support;

pub use app::AppState;
pub use engine::{ChatEngine, SendOutcome};
pub use error::{ChatError, ErrorKind, ErrorSlot, FailedOperation};
pub use events::ChatEvent;
pub use message::{Message, MessageId, Reactions, Role, StreamingState};
pub use models::{Model, ModelLoadState, ModelRegistry, catalog_from_config};
pub use settings::{ClientSettings, SettingsError, SettingsStore};
pub use store::{ConversationRegistry, MessageStore};
pub use stream::{RoutedChunk, StreamMode, StreamRouter};
pub use theme::{DARK_PALETTE, LIGHT_PALETTE, Palette, ThemeMode, ThemeStore};
