use serde::Serialize;

/// A model the client knows how to address
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelSpec {
    /// Short name callers may use instead of the full identifier
    pub alias: &'static str,
    /// Identifier sent in requests
    pub name: &'static str,
    pub max_output_tokens: u32,
}

pub const DEFAULT_MODELS: &[ModelSpec] = &[
    ModelSpec {
        alias: "opus",
        name: "claude-3-opus-20240229",
        max_output_tokens: 4096,
    },
    ModelSpec {
        alias: "sonnet",
        name: "claude-3-sonnet-20240229",
        max_output_tokens: 4096,
    },
    ModelSpec {
        alias: "haiku",
        name: "claude-3-haiku-20240307",
        max_output_tokens: 4096,
    },
    ModelSpec {
        alias: "sonnet35",
        name: "claude-3-5-sonnet-20240620",
        max_output_tokens: 4096,
    },
];

/// Read-only table of known models, injected into the client configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelCatalog {
    models: &'static [ModelSpec],
}

impl ModelCatalog {
    pub const fn new(models: &'static [ModelSpec]) -> Self {
        Self { models }
    }

    /// Look a model up by alias or by full name
    pub fn resolve(&self, name: &str) -> Option<&'static ModelSpec> {
        self.models
            .iter()
            .find(|model| model.alias == name || model.name == name)
    }

    pub fn models(&self) -> &'static [ModelSpec] {
        self.models
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_MODELS)
    }
}
