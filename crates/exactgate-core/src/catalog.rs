//! Static model tables consulted before any worker interaction.
//!
//! The guardrail table lists detectors that can never run exactly (no public
//! checkpoint, vendor-only access); the mapping table ties each runnable
//! model id to the repository the worker loads.

use std::collections::BTreeMap;

/// Outcome of looking a model id up in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelLookup<'a> {
    /// Guardrail hit. Carries the unavailability reason.
    Unavailable(&'a str),
    /// Runnable. Carries the backing model repository id.
    Mapped(&'a str),
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelCatalog {
    repositories: BTreeMap<String, String>,
    unavailable: BTreeMap<String, String>,
}

impl ModelCatalog {
    /// Empty catalog; every lookup is `Unknown`.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Tables of the reference deployment.
    pub fn reference() -> Self {
        Self::empty()
            .with_model("univfd-clip", "slxhere/UnivFD")
            .with_model("ateeqq-detector", "Ateeqq/ai-vs-human-image-detector")
            .with_model(
                "deepfake-v1-siglip",
                "prithivMLmods/deepfake-detector-model-v1",
            )
            .with_model("umm-maybe-detector", "umm-maybe/AI-image-detector")
            .with_model("umm-maybe", "umm-maybe/AI-image-detector")
            .with_model(
                "dima806-detector",
                "dima806/deepfake_vs_real_image_detection",
            )
            .with_model("dima", "dima806/deepfake_vs_real_image_detection")
            .with_unavailable(
                "distil-dire",
                "No public inference-ready DistilDIRE checkpoint/API is available for exact execution.",
            )
            .with_unavailable(
                "gramnet-detector",
                "No public inference-ready GramNet checkpoint/API is available for exact execution.",
            )
            .with_unavailable(
                "npr-r50",
                "No public inference-ready NPR-R50 checkpoint/API is available for exact execution.",
            )
            .with_unavailable(
                "hive-det",
                "Hive detector requires proprietary vendor access; exact public checkpoint is unavailable.",
            )
    }

    #[must_use]
    pub fn with_model(mut self, model_id: impl Into<String>, repo: impl Into<String>) -> Self {
        self.repositories.insert(model_id.into(), repo.into());
        self
    }

    #[must_use]
    pub fn with_unavailable(
        mut self,
        model_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        self.unavailable.insert(model_id.into(), reason.into());
        self
    }

    /// Guardrail table first, then the mapping table.
    pub fn lookup(&self, model_id: &str) -> ModelLookup<'_> {
        if let Some(reason) = self.unavailable.get(model_id) {
            return ModelLookup::Unavailable(reason);
        }
        match self.repositories.get(model_id) {
            Some(repo) => ModelLookup::Mapped(repo),
            None => ModelLookup::Unknown,
        }
    }

    pub fn repository(&self, model_id: &str) -> Option<&str> {
        self.repositories.get(model_id).map(String::as_str)
    }

    /// `(model_id, repository)` pairs, sorted by model id.
    pub fn mapped_models(&self) -> impl Iterator<Item = (&str, &str)> {
        self.repositories
            .iter()
            .map(|(id, repo)| (id.as_str(), repo.as_str()))
    }

    /// `(model_id, reason)` pairs, sorted by model id.
    pub fn unavailable_models(&self) -> impl Iterator<Item = (&str, &str)> {
        self.unavailable
            .iter()
            .map(|(id, reason)| (id.as_str(), reason.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_maps_aliases_to_same_repo() {
        let catalog = ModelCatalog::reference();
        assert_eq!(
            catalog.lookup("umm-maybe"),
            ModelLookup::Mapped("umm-maybe/AI-image-detector")
        );
        assert_eq!(
            catalog.lookup("umm-maybe-detector"),
            ModelLookup::Mapped("umm-maybe/AI-image-detector")
        );
        assert_eq!(catalog.repository("dima"), catalog.repository("dima806-detector"));
    }

    #[test]
    fn guardrail_wins_over_mapping() {
        let catalog = ModelCatalog::empty()
            .with_model("x", "org/x")
            .with_unavailable("x", "retired");
        assert_eq!(catalog.lookup("x"), ModelLookup::Unavailable("retired"));
    }

    #[test]
    fn unknown_model() {
        let catalog = ModelCatalog::reference();
        assert_eq!(catalog.lookup("gemini-pro"), ModelLookup::Unknown);
        assert_eq!(ModelCatalog::empty().lookup("univfd-clip"), ModelLookup::Unknown);
    }

    #[test]
    fn reference_guardrail_entries() {
        let catalog = ModelCatalog::reference();
        let ids: Vec<&str> = catalog.unavailable_models().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["distil-dire", "gramnet-detector", "hive-det", "npr-r50"]);
        assert!(matches!(
            catalog.lookup("hive-det"),
            ModelLookup::Unavailable(reason) if reason.contains("proprietary")
        ));
    }

    #[test]
    fn ensemble_members_are_mapped() {
        let catalog = ModelCatalog::reference();
        for spec in crate::ensemble::reference_members() {
            assert!(
                matches!(catalog.lookup(&spec.id), ModelLookup::Mapped(_)),
                "{} must be runnable",
                spec.id
            );
        }
    }
}
