//! # Submissions and validation
//!
//! A [`Submission`] is what the form (or the `ask` subcommand) hands us: every
//! field optional, values still as strings. [`Submission::validate`] turns it
//! into an [`Inquiry`], the only shape the router accepts.
//!
//! The form supports three modes:
//!
//! - **free text**: `texto` alone,
//! - **selector**: `examen` + `seccion` + `pregunta`, optionally with an image,
//! - **image**: `image` alone.
//!
//! Free text cannot be combined with anything else, and a selector must be
//! complete. Every rule is checked before any network call is made.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::config::ExamCatalog;
use crate::error::AsesorError;

pub const CONFLICT_MESSAGE: &str = "Si escribes tu pregunta, no puedes usar “Examen”, “Sección”, \
     “Pregunta” ni subir imagen al mismo tiempo.";
pub const EMPTY_MESSAGE: &str =
    "Proporciona texto, selecciona examen/sección/pregunta o sube una imagen.";
pub const INCOMPLETE_SELECTOR_MESSAGE: &str =
    "Cuando seleccionas examen, debes elegir sección y pregunta.";
pub const MISSING_EXAM_MESSAGE: &str = "Debes seleccionar examen, sección y pregunta.";

/// Exam sections, spelled exactly as they appear on the form and in the
/// vector store metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Section {
    Lectura,
    #[serde(rename = "Redacción")]
    Redaccion,
    #[serde(rename = "Matemáticas")]
    Matematicas,
    Variable,
}

impl Section {
    pub const ALL: [Section; 4] = [
        Section::Lectura,
        Section::Redaccion,
        Section::Matematicas,
        Section::Variable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Lectura => "Lectura",
            Section::Redaccion => "Redacción",
            Section::Matematicas => "Matemáticas",
            Section::Variable => "Variable",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = AsesorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Section::ALL
            .into_iter()
            .find(|section| section.as_str() == s.trim())
            .ok_or_else(|| AsesorError::validation("Sección no válida."))
    }
}

/// A fully specified exam question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selector {
    pub exam: u32,
    pub section: Section,
    pub question: u32,
}

/// Raw form input. Empty strings and empty uploads count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Submission {
    pub free_text: Option<String>,
    pub exam: Option<String>,
    pub section: Option<String>,
    pub question: Option<String>,
    pub image: Option<Vec<u8>>,
}

/// A submission that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inquiry {
    text: Option<String>,
    selector: Option<Selector>,
    image: Option<Vec<u8>>,
}

/// Free text is trimmed; selector values only need to be non-empty, so a
/// blank-but-sent field still counts as present.
fn present(field: &Option<String>, trim: bool) -> Option<&str> {
    field
        .as_deref()
        .map(|s| if trim { s.trim() } else { s })
        .filter(|s| !s.is_empty())
}

fn parse_number(value: &str, message: &str) -> Result<u32, AsesorError> {
    value
        .trim()
        .parse::<u32>()
        .map_err(|_| AsesorError::validation(message))
}

impl Submission {
    /// Convenience constructor for a free-text question.
    pub fn text(question: impl Into<String>) -> Self {
        Submission {
            free_text: Some(question.into()),
            ..Default::default()
        }
    }

    /// Convenience constructor for an exam/section/question selection.
    pub fn selector(exam: u32, section: Section, question: u32) -> Self {
        Submission {
            exam: Some(exam.to_string()),
            section: Some(section.to_string()),
            question: Some(question.to_string()),
            ..Default::default()
        }
    }

    /// Check the combination of fields and parse the selector.
    ///
    /// The catalog limits which exams and question numbers are accepted; it is
    /// the same table that drives the form page.
    pub fn validate(&self, catalog: &ExamCatalog) -> Result<Inquiry, AsesorError> {
        let text = present(&self.free_text, true);
        let exam = present(&self.exam, false);
        let section = present(&self.section, false);
        let question = present(&self.question, false);
        let image = self.image.as_ref().filter(|bytes| !bytes.is_empty());

        let any_selector = exam.is_some() || section.is_some() || question.is_some();

        if text.is_some() && (any_selector || image.is_some()) {
            return Err(AsesorError::validation(CONFLICT_MESSAGE));
        }
        if text.is_none() && !any_selector && image.is_none() {
            return Err(AsesorError::validation(EMPTY_MESSAGE));
        }

        let selector = match (exam, section, question) {
            (None, None, None) => None,
            (Some(exam), Some(section), Some(question)) => {
                let exam = parse_number(exam, "El examen debe ser un número.")?;
                let section: Section = section.trim().parse()?;
                let question = parse_number(question, "La pregunta debe ser un número.")?;

                if !catalog.is_enabled(exam) {
                    return Err(AsesorError::validation("Examen no disponible."));
                }
                if question == 0 || question > catalog.question_limit(section) {
                    return Err(AsesorError::validation(
                        "Pregunta fuera de rango para la sección.",
                    ));
                }

                Some(Selector {
                    exam,
                    section,
                    question,
                })
            }
            (Some(_), _, _) => return Err(AsesorError::validation(INCOMPLETE_SELECTOR_MESSAGE)),
            (None, _, _) => return Err(AsesorError::validation(MISSING_EXAM_MESSAGE)),
        };

        Ok(Inquiry {
            text: text.map(str::to_string),
            selector,
            image: image.cloned(),
        })
    }
}

impl Inquiry {
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn selector(&self) -> Option<&Selector> {
        self.selector.as_ref()
    }

    pub fn image(&self) -> Option<&[u8]> {
        self.image.as_deref()
    }
}
