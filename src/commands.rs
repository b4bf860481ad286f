//! This module defines the command-line interface for the application using `clap`.
//!
//! Credentials are read from the environment (or a `.env` file) through
//! `clap`'s `env` support, so the usual deployment needs no flags at all:
//!
//! ```sh
//! PINECONE_API_KEY=... PINECONE_INDEX=examenes OPENAI_API_KEY=... asesor serve
//! asesor ask --texto "¿Qué es una derivada?"
//! asesor ask --examen 1 --seccion Matemáticas --pregunta 3
//! ```

use clap::{Args, Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;

use crate::config::Credentials;
use crate::router::QuestionRouter;
use crate::submission::Submission;

/// Represents the parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// YAML configuration file. Defaults to `config.yaml` in the config directory.
    #[arg(long, short = 'c', env = "ASESOR_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// The parsed subcommand and its options.
    #[command(subcommand)]
    pub command: Commands,
}

/// API keys and endpoints of the external services.
#[derive(Args, Debug, Clone)]
pub struct CredentialArgs {
    #[arg(long, env = "PINECONE_API_KEY", hide_env_values = true)]
    pub pinecone_api_key: String,

    #[arg(long, env = "PINECONE_ENV")]
    pub pinecone_env: Option<String>,

    #[arg(long, env = "PINECONE_INDEX")]
    pub pinecone_index: String,

    /// Data-plane host of the index; looked up through the controller when omitted.
    #[arg(long, env = "PINECONE_HOST")]
    pub pinecone_host: Option<String>,

    #[arg(long, env = "PINECONE_CONTROLLER_URL", default_value = "https://api.pinecone.io")]
    pub pinecone_controller: String,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: String,

    #[arg(long, env = "OPENAI_API_BASE", default_value = "https://api.openai.com/v1")]
    pub openai_api_base: String,
}

impl From<CredentialArgs> for Credentials {
    fn from(args: CredentialArgs) -> Self {
        Credentials {
            pinecone_api_key: args.pinecone_api_key,
            pinecone_env: args.pinecone_env.filter(|env| !env.is_empty()),
            pinecone_index: args.pinecone_index,
            pinecone_host: args.pinecone_host.filter(|host| !host.is_empty()),
            pinecone_controller: args.pinecone_controller,
            openai_api_key: args.openai_api_key,
            openai_api_base: args.openai_api_base,
        }
    }
}

/// The question as given on the command line, mirroring the web form.
#[derive(Args, Debug, Clone, Default)]
pub struct QuestionArgs {
    /// Free-text question.
    #[arg(long)]
    pub texto: Option<String>,

    #[arg(long)]
    pub examen: Option<String>,

    #[arg(long)]
    pub seccion: Option<String>,

    #[arg(long)]
    pub pregunta: Option<String>,

    /// Image file to embed instead of text.
    #[arg(long)]
    pub image: Option<PathBuf>,
}

impl QuestionArgs {
    /// Build the submission, reading the image file if one was given.
    pub async fn into_submission(self) -> std::io::Result<Submission> {
        let image = match self.image {
            Some(path) => Some(tokio::fs::read(path).await?),
            None => None,
        };
        Ok(Submission {
            free_text: self.texto,
            exam: self.examen,
            section: self.seccion,
            question: self.pregunta,
            image,
        })
    }
}

/// Represents the available subcommands and their options.
#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Serve the question form over HTTP.
    #[clap(name = "serve", alias = "s")]
    Serve {
        #[command(flatten)]
        credentials: CredentialArgs,

        #[arg(long, short = 'p', env = "PORT", default_value_t = 8000)]
        port: u16,
    },

    /// Answer one question and print the HTML fragment.
    #[clap(name = "ask", alias = "a")]
    Ask {
        #[command(flatten)]
        credentials: CredentialArgs,

        #[command(flatten)]
        question: QuestionArgs,
    },

    /// Write a default config (to `--config`, or `config.yaml` in the config
    /// directory) and the formatting template beside it.
    Init,
}

/// Answer one question for the `ask` subcommand.
///
/// The fragment goes to `out`; a rejected or failed question prints only its
/// Spanish message to `err`. Returns the process exit status.
pub async fn ask<O: Write, E: Write>(
    router: &QuestionRouter,
    submission: &Submission,
    out: &mut O,
    err: &mut E,
) -> io::Result<u8> {
    match router.answer(submission).await {
        Ok(answer) => {
            tracing::info!("Answered from {:?}", answer.source);
            writeln!(out, "{}", answer.html_fragment)?;
            Ok(0)
        }
        Err(e) => {
            writeln!(err, "{e}")?;
            Ok(1)
        }
    }
}
