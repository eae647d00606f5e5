//! Error types and reporting

use crate::instrument::InstrumentError;
use crate::ir::VerifyError;
use crate::span::Span;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Front-end and pipeline error
#[derive(Debug, Error)]
pub enum Error {
    #[error("Lexer error at {span}: {message}")]
    Lexer { message: String, span: Span },

    #[error("Parser error at {span}: {message}")]
    Parser { message: String, span: Span },

    #[error("IO error: {message}")]
    Io { message: String },

    /// JSON module input/output
    #[error("JSON error: {message}")]
    Json { message: String },

    /// Pipeline names a pass that is not registered
    #[error("Unknown pass `{name}` in pipeline")]
    UnknownPass { name: String },

    #[error("Module verification failed with {} error(s)", .0.len())]
    Verify(Vec<VerifyError>),

    #[error("Instrumentation failed: {0}")]
    Instrument(#[from] InstrumentError),
}

impl Error {
    pub fn lexer(message: impl Into<String>, span: Span) -> Self {
        Self::Lexer {
            message: message.into(),
            span,
        }
    }

    pub fn parser(message: impl Into<String>, span: Span) -> Self {
        Self::Parser {
            message: message.into(),
            span,
        }
    }

    pub fn io_error(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    pub fn json_error(message: impl Into<String>) -> Self {
        Self::Json {
            message: message.into(),
        }
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            Self::Lexer { span, .. } | Self::Parser { span, .. } => Some(*span),
            _ => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Lexer { message, .. }
            | Self::Parser { message, .. }
            | Self::Io { message }
            | Self::Json { message } => message.clone(),
            Self::Verify(errors) => errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n"),
            other => other.to_string(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::json_error(e.to_string())
    }
}

impl From<Vec<VerifyError>> for Error {
    fn from(errors: Vec<VerifyError>) -> Self {
        Self::Verify(errors)
    }
}

/// Report error with ariadne
pub fn report_error(filename: &str, source: &str, error: &Error) {
    use ariadne::{Color, Label, Report, ReportKind, Source};

    let kind = match error {
        Error::Lexer { .. } => "Lexer",
        Error::Parser { .. } => "Parser",
        Error::Io { .. } => "IO",
        Error::Json { .. } => "JSON",
        Error::UnknownPass { .. } => "Pipeline",
        Error::Verify(_) => "Verify",
        Error::Instrument(_) => "Instrumentation",
    };

    let report = match error.span() {
        Some(span) => Report::build(ReportKind::Error, (filename, span.start..span.end))
            .with_message(format!("{kind} error"))
            .with_label(
                Label::new((filename, span.start..span.end))
                    .with_message(error.message())
                    .with_color(Color::Red),
            )
            .finish(),
        // Errors without span (IO, pipeline, verification)
        None => Report::build(ReportKind::Error, (filename, 0..0))
            .with_message(format!("{kind} error: {}", error.message()))
            .finish(),
    };

    if let Err(e) = report.eprint((filename, Source::from(source))) {
        eprintln!("Error: {error} ({e})");
    }
}
