use std::collections::BTreeMap;

use murmur_bridge::{AppConfig, Backend, ModelDescriptor};

use crate::error::{ChatError, ErrorKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    pub id: String,
    pub name: String,
    pub provider: String,
}

impl Model {
    pub fn new(id: impl Into<String>, provider: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            provider: provider.into(),
        }
    }

    pub fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor::new(self.id.clone(), self.provider.clone())
    }
}

/// Availability state. `Failed` is distinct from `Empty` so the selector can
/// offer a retry instead of an empty list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelLoadState {
    Loading,
    Ready,
    Empty,
    Failed(ChatError),
}

/// Available models and the subset selected for the next send.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    available: Vec<Model>,
    selected: Vec<Model>,
    state: ModelLoadState,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            available: Vec::new(),
            selected: Vec::new(),
            state: ModelLoadState::Loading,
        }
    }

    pub fn available(&self) -> &[Model] {
        &self.available
    }

    pub fn selected(&self) -> &[Model] {
        &self.selected
    }

    pub fn state(&self) -> &ModelLoadState {
        &self.state
    }

    pub fn is_selected(&self, model_id: &str) -> bool {
        self.selected.iter().any(|model| model.id == model_id)
    }

    pub fn selected_descriptors(&self) -> Vec<ModelDescriptor> {
        self.selected.iter().map(Model::descriptor).collect()
    }

    pub fn grouped_by_provider(&self) -> BTreeMap<&str, Vec<&Model>> {
        let mut groups: BTreeMap<&str, Vec<&Model>> = BTreeMap::new();
        for model in &self.available {
            groups.entry(model.provider.as_str()).or_default().push(model);
        }
        groups
    }

    /// Adds an available model to the selection. Unknown or already selected
    /// ids leave the selection untouched.
    pub fn select(&mut self, model_id: &str) -> bool {
        if self.is_selected(model_id) {
            return false;
        }

        let Some(model) = self.available.iter().find(|model| model.id == model_id) else {
            tracing::debug!(model_id, "ignoring selection of unavailable model");
            return false;
        };

        self.selected.push(model.clone());
        true
    }

    /// Removes a model from the selection unless it is the last one left.
    pub fn deselect(&mut self, model_id: &str) -> bool {
        if !self.is_selected(model_id) {
            return false;
        }

        if self.selected.len() == 1 {
            tracing::debug!(model_id, "refusing to deselect the only selected model");
            return false;
        }

        self.selected.retain(|model| model.id != model_id);
        true
    }

    /// Installs a fresh catalog. Selected models that disappeared are dropped,
    /// and the first available model is selected when nothing remains.
    pub fn set_catalog(&mut self, models: Vec<Model>) {
        self.available = models;
        let available = &self.available;
        self.selected
            .retain(|selected| available.iter().any(|model| model.id == selected.id));

        if self.selected.is_empty()
            && let Some(first) = self.available.first()
        {
            tracing::info!(model_id = %first.id, provider = %first.provider, "selecting default model");
            self.selected.push(first.clone());
        }

        self.state = if self.available.is_empty() {
            ModelLoadState::Empty
        } else {
            ModelLoadState::Ready
        };
    }

    pub async fn load(&mut self, backend: &dyn Backend) -> Result<(), ChatError> {
        self.state = ModelLoadState::Loading;

        match backend.get_config().await {
            Ok(config) => {
                let models = catalog_from_config(&config);
                tracing::info!(model_count = models.len(), "loaded available models");
                self.set_catalog(models);
                Ok(())
            }
            Err(error) => {
                tracing::warn!(stage = error.stage(), error = %error, "failed to load available models");
                let error = ChatError::from_bridge(ErrorKind::Config, "Failed to load models", &error);
                self.state = ModelLoadState::Failed(error.clone());
                Err(error)
            }
        }
    }
}

/// Flattens every provider's `available_models` into one list: providers in
/// name order, model ids sorted within each provider. The first occurrence of
/// a model id wins since streams are routed by id alone.
pub fn catalog_from_config(config: &AppConfig) -> Vec<Model> {
    let mut models: Vec<Model> = Vec::new();

    for (provider, settings) in &config.providers {
        let mut ids = settings
            .available_models
            .iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
            .collect::<Vec<_>>();
        ids.sort_unstable();
        ids.dedup();

        for id in ids {
            if models.iter().any(|model| model.id == id) {
                continue;
            }
            models.push(Model::new(id, provider.clone()));
        }
    }

    models
}

#[cfg(test)]
mod tests {
    use murmur_bridge::{BridgeError, LoopbackBackend, ProviderSettings};

    use super::*;
    use crate::test_support::ScriptedBackend;

    fn registry_with(ids: &[&str]) -> ModelRegistry {
        let mut registry = ModelRegistry::new();
        registry.set_catalog(ids.iter().map(|id| Model::new(*id, "openai")).collect());
        registry
    }

    #[test]
    fn sole_selected_model_cannot_be_deselected() {
        let mut registry = registry_with(&["m1", "m2"]);
        assert_eq!(registry.selected().len(), 1);

        assert!(!registry.deselect("m1"));
        assert_eq!(registry.selected().len(), 1);
        assert!(registry.is_selected("m1"));
    }

    #[test]
    fn select_then_deselect_keeps_floor() {
        let mut registry = registry_with(&["m1", "m2"]);
        assert!(registry.select("m2"));
        assert!(!registry.select("m2"));
        assert!(!registry.select("missing"));

        assert!(registry.deselect("m1"));
        assert!(!registry.deselect("m2"));
        assert_eq!(
            registry
                .selected()
                .iter()
                .map(|model| model.id.as_str())
                .collect::<Vec<_>>(),
            vec!["m2"]
        );
    }

    #[test]
    fn reload_prunes_vanished_selection() {
        let mut registry = registry_with(&["m1", "m2"]);
        registry.select("m2");
        registry.deselect("m1");

        registry.set_catalog(vec![Model::new("m3", "openai")]);
        assert_eq!(registry.selected()[0].id, "m3");
    }

    #[test]
    fn catalog_is_grouped_and_sorted() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "zeta".to_string(),
            ProviderSettings::new("b").with_available_models(["b", "a", " ", "gpt-4"]),
        );

        let models = catalog_from_config(&config);
        let zeta = models
            .iter()
            .filter(|model| model.provider == "zeta")
            .map(|model| model.id.as_str())
            .collect::<Vec<_>>();
        // gpt-4 is already listed under openai.
        assert_eq!(zeta, vec!["a", "b"]);
        assert_eq!(models[0].provider, "anthropic");

        let mut registry = ModelRegistry::new();
        registry.set_catalog(models);
        let groups = registry.grouped_by_provider();
        assert_eq!(
            groups.keys().copied().collect::<Vec<_>>(),
            vec!["anthropic", "openai", "openrouter", "zeta"]
        );
    }

    #[tokio::test]
    async fn load_distinguishes_failure_from_empty() {
        let mut registry = ModelRegistry::new();
        assert_eq!(registry.state(), &ModelLoadState::Loading);

        let failing = ScriptedBackend::new();
        failing.fail_config(BridgeError::rejected("get_config", "bridge offline", None));
        assert!(registry.load(&failing).await.is_err());
        assert!(matches!(registry.state(), ModelLoadState::Failed(error) if error.message == "bridge offline"));

        let mut empty_config = AppConfig::default();
        for settings in empty_config.providers.values_mut() {
            settings.available_models.clear();
        }
        let empty = LoopbackBackend::new().with_config(empty_config);
        registry.load(&empty).await.unwrap();
        assert_eq!(registry.state(), &ModelLoadState::Empty);

        registry.load(&LoopbackBackend::new()).await.unwrap();
        assert_eq!(registry.state(), &ModelLoadState::Ready);
        assert_eq!(registry.selected()[0].id, "claude-2.1");
    }
}
