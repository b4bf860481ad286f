//! This module provides functionality for loading and handling the application's configuration.
//!
//! Configuration is split in two:
//!
//! - [`AsesorConfig`]: tunables read from a YAML file (models, `top_k`, fallback
//!   source, the [`ExamCatalog`]). Every field has a default, so an empty file or
//!   no file at all is valid.
//! - [`Credentials`]: API keys and endpoints, which only ever come from the
//!   environment (see [`crate::commands`]).
//!
//! # Examples
//!
//! Loading the configuration from a file:
//!
//! ```no_run
//! use asesor::config::{AsesorConfig, load_config};
//!
//! let config: AsesorConfig = load_config("/path/to/config.yaml").unwrap();
//! println!("{:?}", config);
//! ```

use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    error::Error,
    fmt, fs,
    path::{Path, PathBuf},
};

use tracing::*;

use crate::submission::Section;

/// Which exams, sections and question numbers the form exposes.
///
/// Loaded once at start and shared read-only with every request.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct ExamCatalog {
    /// Exams are numbered `1..=total`.
    pub total: u32,

    /// Exam numbers that are switched on.
    pub enabled: BTreeSet<u32>,

    /// Highest question number per section.
    pub question_limits: BTreeMap<Section, u32>,
}

impl Default for ExamCatalog {
    fn default() -> Self {
        ExamCatalog {
            total: 60,
            enabled: BTreeSet::from([1, 2]),
            question_limits: BTreeMap::from([
                (Section::Lectura, 45),
                (Section::Redaccion, 25),
                (Section::Matematicas, 55),
                (Section::Variable, 25),
            ]),
        }
    }
}

impl ExamCatalog {
    pub fn is_enabled(&self, exam: u32) -> bool {
        (1..=self.total).contains(&exam) && self.enabled.contains(&exam)
    }

    /// Enabled exams in ascending order.
    pub fn enabled_exams(&self) -> impl Iterator<Item = u32> + '_ {
        self.enabled
            .iter()
            .copied()
            .filter(|exam| (1..=self.total).contains(exam))
    }

    /// Sections without a configured limit have no selectable questions.
    pub fn question_limit(&self, section: Section) -> u32 {
        self.question_limits.get(&section).copied().unwrap_or(0)
    }
}

/// Tunables for the question router.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct AsesorConfig {
    /// Chat model that turns snippets into an HTML list.
    pub chat_model: String,

    /// Embedding model for free-text questions.
    pub text_embedding_model: String,

    /// Embedding model for uploaded images.
    pub image_embedding_model: String,

    /// Neighbours requested from the index during similarity lookup.
    pub top_k: u32,

    /// Dimension of the Pinecone index.
    pub dimension: usize,

    /// Random-summary endpoint used when the index has nothing.
    pub fallback_url: String,

    pub fallback_timeout_secs: u64,

    /// Optional YAML file overriding the built-in formatting prompt.
    pub formatter_template: Option<PathBuf>,

    pub exams: ExamCatalog,
}

impl Default for AsesorConfig {
    fn default() -> Self {
        AsesorConfig {
            chat_model: "gpt-4o-mini".to_string(),
            text_embedding_model: "text-embedding-3-small".to_string(),
            image_embedding_model: "image-embedding-001".to_string(),
            top_k: 5,
            dimension: 1536,
            fallback_url: "https://es.wikipedia.org/api/rest_v1/page/random/summary".to_string(),
            fallback_timeout_secs: 5,
            formatter_template: None,
            exams: ExamCatalog::default(),
        }
    }
}

impl AsesorConfig {
    fn check(&self) -> Result<(), Box<dyn Error>> {
        if self.top_k == 0 {
            return Err("top_k must be at least 1".into());
        }
        if self.dimension == 0 {
            return Err("dimension must be at least 1".into());
        }
        if self.fallback_timeout_secs == 0 {
            return Err("fallback_timeout_secs must be at least 1".into());
        }
        if let Some(exam) = self.exams.enabled.iter().find(|e| **e == 0 || **e > self.exams.total) {
            return Err(format!(
                "enabled exam {exam} is outside 1..={}",
                self.exams.total
            )
            .into());
        }
        Ok(())
    }
}

/// API keys and endpoints for the external collaborators.
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub pinecone_api_key: String,

    /// Legacy pod environment. Serverless indexes ignore it; it is only logged.
    pub pinecone_env: Option<String>,

    pub pinecone_index: String,

    /// Data-plane host. Resolved through the control plane when absent.
    pub pinecone_host: Option<String>,

    pub pinecone_controller: String,

    pub openai_api_key: String,

    pub openai_api_base: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("pinecone_api_key", &"<redacted>")
            .field("pinecone_env", &self.pinecone_env)
            .field("pinecone_index", &self.pinecone_index)
            .field("pinecone_host", &self.pinecone_host)
            .field("pinecone_controller", &self.pinecone_controller)
            .field("openai_api_key", &"<redacted>")
            .field("openai_api_base", &self.openai_api_base)
            .finish()
    }
}

/// Loads the application's configuration from a YAML file.
///
/// Missing fields fall back to [`AsesorConfig::default`].
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid YAML, or holds
/// values the router cannot work with (`top_k: 0`, a zero fallback timeout,
/// enabled exams out of range).
pub fn load_config(file: impl AsRef<Path>) -> Result<AsesorConfig, Box<dyn Error>> {
    let file = file.as_ref();
    debug!("Loading config from: {}", file.display());
    let content = fs::read_to_string(file)?;
    let config: AsesorConfig = if content.trim().is_empty() {
        AsesorConfig::default()
    } else {
        serde_yaml::from_str(&content)?
    };
    config.check()?;
    Ok(config)
}

/// Pick the configuration to run with.
///
/// An explicit path wins; otherwise `<config_dir>/config.yaml` is used when it
/// exists, and the built-in defaults when it does not.
pub fn resolve_config(explicit: Option<&Path>) -> Result<AsesorConfig, Box<dyn Error>> {
    if let Some(path) = explicit {
        return load_config(path);
    }

    let default_path = config_path(None)?;
    if default_path.is_file() {
        load_config(default_path)
    } else {
        info!("No config file found, using built-in defaults");
        Ok(AsesorConfig::default())
    }
}

/// Where `init` writes and `serve`/`ask` read: the explicit path, or
/// `<config_dir>/config.yaml`.
pub fn config_path(explicit: Option<&Path>) -> Result<PathBuf, Box<dyn Error>> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(crate::config_dir()?.join("config.yaml")),
    }
}

/// Write default settings to `config_path` and the formatting prompt to
/// `templates/formatter.yaml` beside it.
///
/// The written config points at the written template so the prompt can be
/// edited in place. Returns both paths.
pub fn write_defaults(config_path: &Path) -> Result<(PathBuf, PathBuf), Box<dyn Error>> {
    let dir = config_path.parent().unwrap_or_else(|| Path::new(""));
    let templates_dir = dir.join("templates");
    info!("Creating template config directory: {}", templates_dir.display());
    fs::create_dir_all(&templates_dir)?;

    let template_path = templates_dir.join("formatter.yaml");
    info!("Creating template file: {}", template_path.display());
    let template_yaml = serde_yaml::to_string(&crate::template::FormattingTemplate::default())?;
    fs::write(&template_path, template_yaml)?;

    info!("Creating config file: {}", config_path.display());
    let config = AsesorConfig {
        formatter_template: Some(template_path.clone()),
        ..Default::default()
    };
    fs::write(config_path, serde_yaml::to_string(&config)?)?;

    Ok((config_path.to_path_buf(), template_path))
}
