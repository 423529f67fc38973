use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::settings::{SettingsError, SettingsStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    #[default]
    Light,
    Dark,
}

impl ThemeMode {
    pub fn name(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }

    pub fn is_dark(self) -> bool {
        self == Self::Dark
    }

    pub fn toggled(self) -> Self {
        match self {
            Self::Light => Self::Dark,
            Self::Dark => Self::Light,
        }
    }

    pub fn palette(self) -> &'static Palette {
        match self {
            Self::Light => &LIGHT_PALETTE,
            Self::Dark => &DARK_PALETTE,
        }
    }
}

/// Color tokens pushed to the presentation layer on every theme change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub background: &'static str,
    pub surface: &'static str,
    pub border: &'static str,
    pub text: &'static str,
    pub text_secondary: &'static str,
    pub shadow_color: &'static str,
}

pub const LIGHT_PALETTE: Palette = Palette {
    background: "#FFFFFF",
    surface: "#F5F5F5",
    border: "#E6E6E6",
    text: "#333333",
    text_secondary: "#757575",
    shadow_color: "rgba(0, 0, 0, 0.1)",
};

pub const DARK_PALETTE: Palette = Palette {
    background: "#2C3E50",
    surface: "#34495E",
    border: "#4A5568",
    text: "#E2E8F0",
    text_secondary: "#A0AEC0",
    shadow_color: "rgba(0, 0, 0, 0.2)",
};

/// Light/dark state persisted through [`SettingsStore`].
pub struct ThemeStore {
    settings: SettingsStore,
    mode_tx: watch::Sender<ThemeMode>,
}

impl ThemeStore {
    /// Starts from the persisted choice, falling back to the system preference.
    pub fn new(settings: SettingsStore, system_prefers_dark: bool) -> Self {
        let mode = settings.settings().theme_mode.unwrap_or(if system_prefers_dark {
            ThemeMode::Dark
        } else {
            ThemeMode::Light
        });
        let (mode_tx, _) = watch::channel(mode);

        Self { settings, mode_tx }
    }

    pub fn mode(&self) -> ThemeMode {
        *self.mode_tx.borrow()
    }

    pub fn palette(&self) -> &'static Palette {
        self.mode().palette()
    }

    /// Receives every applied mode; the current one is marked seen.
    pub fn subscribe(&self) -> watch::Receiver<ThemeMode> {
        self.mode_tx.subscribe()
    }

    pub fn toggle(&self) -> Result<ThemeMode, SettingsError> {
        let next = self.mode().toggled();
        self.set(next)?;
        Ok(next)
    }

    /// Persists `mode` and then applies it. A failed write leaves the current
    /// mode in place.
    pub fn set(&self, mode: ThemeMode) -> Result<(), SettingsError> {
        self.settings
            .update_with(|settings| settings.theme_mode = Some(mode))?;
        self.mode_tx.send_replace(mode);
        tracing::info!(theme = mode.name(), "applied theme");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ClientSettings;

    #[test]
    fn system_preference_applies_without_saved_choice() {
        let store = ThemeStore::new(SettingsStore::in_memory(ClientSettings::default()), true);
        assert_eq!(store.mode(), ThemeMode::Dark);
        assert_eq!(store.palette().background, "#2C3E50");

        let saved = ClientSettings {
            theme_mode: Some(ThemeMode::Light),
            ..ClientSettings::default()
        };
        let store = ThemeStore::new(SettingsStore::in_memory(saved), true);
        assert_eq!(store.mode(), ThemeMode::Light);
    }

    #[tokio::test]
    async fn toggle_persists_and_notifies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = ThemeStore::new(SettingsStore::new(path.clone()), false);
        let mut changes = store.subscribe();

        assert_eq!(store.toggle().unwrap(), ThemeMode::Dark);
        changes.changed().await.unwrap();
        assert_eq!(*changes.borrow(), ThemeMode::Dark);

        let reloaded = ThemeStore::new(SettingsStore::new(path), false);
        assert_eq!(reloaded.mode(), ThemeMode::Dark);
    }

    #[test]
    fn theme_mode_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ThemeMode::Dark).unwrap(), "\"dark\"");
    }
}
