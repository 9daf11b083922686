//! Project summary statistics and the generated overview.

use std::collections::{BTreeMap, BTreeSet};

use coderev_llm::LlmProvider;
use coderev_llm::provider::Message;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::index_manager::FileDetail;

const OVERVIEW_SYSTEM: &str =
    "As an AI assistant, generate a project overview based on the provided summary.";

/// README text beyond this many characters is left out of the overview prompt.
const README_PROMPT_CHARS: usize = 6000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub total_files: usize,
    pub languages: BTreeMap<String, usize>,
    pub total_code_elements: usize,
    pub element_types: BTreeMap<String, usize>,
    pub average_elements_per_file: f64,
    /// Percent of files per language.
    pub language_distribution: BTreeMap<String, f64>,
    /// Percent of elements per element type.
    pub element_type_distribution: BTreeMap<String, f64>,
    pub dependencies: BTreeMap<String, BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_overview: Option<String>,
}

impl ProjectSummary {
    pub fn record_file(&mut self, detail: &FileDetail) {
        self.total_files += 1;
        *self
            .languages
            .entry(detail.language.id().to_string())
            .or_insert(0) += 1;
        self.total_code_elements += detail.elements.len();
        for element in &detail.elements {
            *self
                .element_types
                .entry(element.kind.as_str().to_string())
                .or_insert(0) += 1;
        }
        self.dependencies
            .insert(detail.file_name.clone(), detail.dependencies.clone());
    }

    /// Compute the derived averages and percentages.
    #[allow(clippy::cast_precision_loss)]
    pub fn finalize(&mut self) {
        let files = self.total_files as f64;
        let elements = self.total_code_elements as f64;

        self.average_elements_per_file = if self.total_files > 0 {
            elements / files
        } else {
            0.0
        };
        self.language_distribution = self
            .languages
            .iter()
            .filter(|_| self.total_files > 0)
            .map(|(lang, n)| (lang.clone(), *n as f64 / files * 100.0))
            .collect();
        self.element_type_distribution = self
            .element_types
            .iter()
            .filter(|_| self.total_code_elements > 0)
            .map(|(kind, n)| (kind.clone(), *n as f64 / elements * 100.0))
            .collect();
    }

    fn overview_prompt(&self) -> Result<String> {
        let mut view = self.clone();
        view.project_overview = None;
        view.dependencies.clear();
        if let Some(readme) = &mut view.readme
            && readme.chars().count() > README_PROMPT_CHARS
        {
            *readme = readme.chars().take(README_PROMPT_CHARS).collect();
        }
        let json = serde_json::to_string_pretty(&view)?;
        Ok(format!(
            "Based on the following project summary, please provide a concise overview of the project:\n\n\
             {json}\n\n---\n\n\
             1. You need to answer in English.\n\
             2. The overview you provide is not for humans, but for other AIs to easily understand the project.\n\
             3. The overview you provide cannot exceed 250 characters. If it exceeds, please reflect and rewrite it.\n"
        ))
    }
}

/// Ask the chat model for a short project overview.
///
/// # Errors
///
/// Returns an error if the summary cannot be serialized or the provider fails.
pub async fn generate_overview<P: LlmProvider>(
    provider: &P,
    summary: &ProjectSummary,
) -> Result<String> {
    let prompt = summary.overview_prompt()?;
    let messages = [Message::system(OVERVIEW_SYSTEM), Message::user(prompt)];
    let overview = provider.chat(&messages).await?;
    Ok(overview.trim().to_string())
}
