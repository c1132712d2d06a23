//! `exactgate models`: catalog listing.

use exactgate_core::ensemble::{self, HYBRID_MODEL_ID};
use exactgate_core::{DetectorSpec, ModelCatalog};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MappedModel {
    pub model_id: String,
    pub model_repo: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnavailableModel {
    pub model_id: String,
    pub reason: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsembleListing {
    pub model_id: &'static str,
    pub members: Vec<DetectorSpec>,
}

#[derive(Debug, Serialize)]
pub struct CatalogListing {
    pub mapped: Vec<MappedModel>,
    pub unavailable: Vec<UnavailableModel>,
    pub ensemble: EnsembleListing,
}

pub fn listing(catalog: &ModelCatalog, members: &[DetectorSpec]) -> CatalogListing {
    CatalogListing {
        mapped: catalog
            .mapped_models()
            .map(|(id, repo)| MappedModel {
                model_id: id.to_string(),
                model_repo: repo.to_string(),
            })
            .collect(),
        unavailable: catalog
            .unavailable_models()
            .map(|(id, reason)| UnavailableModel {
                model_id: id.to_string(),
                reason: reason.to_string(),
            })
            .collect(),
        ensemble: EnsembleListing {
            model_id: HYBRID_MODEL_ID,
            members: members.to_vec(),
        },
    }
}

pub fn cmd_models() -> anyhow::Result<()> {
    let listing = listing(&ModelCatalog::reference(), &ensemble::reference_members());
    println!("{}", serde_json::to_string_pretty(&listing)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_listing() {
        let listing = listing(&ModelCatalog::reference(), &ensemble::reference_members());
        assert_eq!(listing.mapped.len(), 7);
        assert_eq!(listing.unavailable.len(), 4);

        let json = serde_json::to_value(&listing).expect("serialize");
        assert_eq!(json["ensemble"]["modelId"], "hybrid-detector");
        assert_eq!(json["ensemble"]["members"][1]["name"], "Umm_Maybe");
        assert_eq!(json["ensemble"]["members"][1]["threshold"], 0.58);
        assert_eq!(json["mapped"][0]["modelId"], "ateeqq-detector");
        assert_eq!(json["unavailable"][0]["modelId"], "distil-dire");
    }
}
