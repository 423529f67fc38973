use std::sync::Arc;

use murmur_bridge::Backend;

use crate::engine::ChatEngine;
use crate::settings::SettingsStore;
use crate::theme::ThemeStore;

/// Everything a front end needs, wired to one backend and one settings file.
pub struct AppState {
    pub settings: SettingsStore,
    pub theme: ThemeStore,
    pub chat: ChatEngine,
}

impl AppState {
    pub fn new(backend: Arc<dyn Backend>, settings: SettingsStore, system_prefers_dark: bool) -> Self {
        let theme = ThemeStore::new(settings.clone(), system_prefers_dark);
        let chat = ChatEngine::new(backend, settings.clone());

        Self {
            settings,
            theme,
            chat,
        }
    }

    /// Loads models, conversations and the current chat.
    pub async fn start(&mut self) {
        tracing::info!(theme = self.theme.mode().name(), "starting chat client");
        self.chat.initialize().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ClientSettings;
    use crate::test_support::{ScriptedBackend, record};

    #[tokio::test]
    async fn start_loads_models_and_history() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.set_history(vec![record("1", "user", "Hi")]);
        let mut app = AppState::new(
            backend,
            SettingsStore::in_memory(ClientSettings::default()),
            false,
        );

        app.start().await;

        assert_eq!(app.chat.messages().len(), 1);
        assert_eq!(app.chat.models().available().len(), 2);
        assert!(app.chat.error().is_none());
        assert!(!app.theme.mode().is_dark());
    }
}
