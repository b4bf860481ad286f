//! # Formatting template
//!
//! The chat model only ever gets one job: turn a list of raw snippets into a
//! Spanish `<ol>` with LaTeX delimiters. The instruction for that job is a
//! small YAML document:
//!
//! ```yaml
//! system_prompt: "Eres un formateador HTML muy estricto. ..."
//! user_message: "Por favor formatea la lista."
//! ```
//!
//! The snippets are appended to `system_prompt`, one `- ` line each, after a
//! blank line. A built-in default is used unless the configuration points at a
//! file (see [`crate::config::AsesorConfig::formatter_template`]).

use serde::{Deserialize, Serialize};
use std::{error::Error, fs, path::Path};

use crate::router::Snippet;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FormattingTemplate {
    /// Instruction sent as the system message, before the snippet list.
    pub system_prompt: String,

    /// Fixed user turn that triggers the formatting.
    pub user_message: String,
}

impl Default for FormattingTemplate {
    fn default() -> Self {
        FormattingTemplate {
            system_prompt: "Eres un formateador HTML muy estricto. Toma estas frases y devuélvelas \
                            como una lista ordenada (<ol><li>…</li></ol>) en español, sin texto \
                            adicional. Usa siempre los delimitadores LaTeX \\(…\\) para las fórmulas."
                .to_string(),
            user_message: "Por favor formatea la lista.".to_string(),
        }
    }
}

impl FormattingTemplate {
    /// System message with the snippets appended as a bulleted list.
    pub fn system_message(&self, snippets: &[Snippet]) -> String {
        let bullets = snippets
            .iter()
            .map(|snippet| format!("- {}", snippet.text()))
            .collect::<Vec<_>>()
            .join("\n");
        format!("{}\n\n{bullets}", self.system_prompt)
    }
}

/// Load a formatting template from a YAML file.
///
/// ### Errors
/// Returns an error if the file cannot be read or does not deserialize into a
/// [`FormattingTemplate`].
pub fn load_template(path: impl AsRef<Path>) -> Result<FormattingTemplate, Box<dyn Error>> {
    let path = path.as_ref();
    tracing::info!("Loading template: {}", path.display());

    let content = fs::read_to_string(path)?;
    let template: FormattingTemplate = serde_yaml::from_str(&content)?;
    Ok(template)
}
