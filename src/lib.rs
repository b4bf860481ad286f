//! # Asesor (library root)
//!
//! A small tutoring service: a student asks a question (free text, an
//! exam/section/question selection, or a photo), the answer is looked up in a
//! Pinecone index, a random Wikipedia summary stands in when nothing is found,
//! and an OpenAI chat model formats the result as a Spanish `<ol>` ready for
//! MathJax.
//!
//! - Request decision logic (`router`) and input validation (`submission`).
//! - Collaborator clients: Pinecone (`vector_store`), OpenAI (`api`),
//!   Wikipedia (`fallback`).
//! - HTTP surface (`server`), CLI parsing (`commands`).
//! - Configuration (`config`) and the formatting prompt (`template`).
//!
//! ## Modules
//! - [`api`], [`commands`], [`config`], [`error`], [`fallback`], [`router`],
//!   [`server`], [`submission`], [`template`], [`vector_store`]

use directories::ProjectDirs;
use std::error::Error;

pub mod api;
pub mod commands;
pub mod config;
pub mod error;
pub mod fallback;
pub mod router;
pub mod server;
pub mod submission;
pub mod template;
pub mod vector_store;

/// Return the per-platform configuration directory used by Asesor.
///
/// This uses [`directories::ProjectDirs`] with the application triple
/// `("com", "asesor-qualificato", "asesor")`, e.g. `~/.config/asesor` on Linux.
///
/// The directory is **not** created by this function.
///
/// # Errors
/// Returns an error if the platform configuration directory cannot be determined
/// (which is rare but possible in heavily sandboxed environments).
pub fn config_dir() -> Result<std::path::PathBuf, Box<dyn Error>> {
    let proj_dirs = ProjectDirs::from("com", "asesor-qualificato", "asesor")
        .ok_or("Unable to determine config directory")?;
    Ok(proj_dirs.config_dir().to_path_buf())
}
