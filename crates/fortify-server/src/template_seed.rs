use crate::api::compliance::check_template_documents;
use crate::config::{SeedTemplate, TemplatesSeedFile};
use anyhow::Result;
use fortify_storage::store::{NewTemplate, TemplateFilter};
use fortify_storage::{Actor, FortifyStore};

/// Outcome of an `init-templates` run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub created: u32,
    pub skipped: u32,
    pub invalid: u32,
}

async fn name_taken(store: &FortifyStore, name: &str) -> Result<bool> {
    let filter = TemplateFilter {
        name: Some(name.to_string()),
        ..Default::default()
    };
    Ok(store.count_templates(&filter).await? > 0)
}

/// Creates every seed template whose name is not taken yet. Templates whose
/// documents do not parse or cross-check are logged and skipped.
pub async fn seed_templates(store: &FortifyStore, seed: &TemplatesSeedFile) -> Result<SeedSummary> {
    let mut summary = SeedSummary::default();
    for SeedTemplate {
        name,
        description,
        sections,
        scoring_rules,
    } in &seed.templates
    {
        if name_taken(store, name).await? {
            tracing::warn!(name = %name, "Template already exists, skipping");
            summary.skipped += 1;
            continue;
        }
        if let Err(e) = check_template_documents(sections, scoring_rules) {
            tracing::error!(name = %name, error = %e, "Invalid template in seed file");
            summary.invalid += 1;
            continue;
        }
        let new = NewTemplate {
            name: name.clone(),
            description: description.clone(),
            sections: sections.clone(),
            scoring_rules: scoring_rules.clone(),
        };
        let template = store.create_template(new, &Actor::system()).await?;
        tracing::info!(name = %name, id = %template.id, "Template created");
        summary.created += 1;
    }
    Ok(summary)
}

/// Reads and applies a JSON seed file.
pub async fn seed_templates_from_file(store: &FortifyStore, path: &str) -> Result<SeedSummary> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read seed file '{}': {}", path, e))?;
    let seed: TemplatesSeedFile = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse seed file '{}': {}", path, e))?;
    seed_templates(store, &seed).await
}
