//! Per-compilation state.
//!
//! A [`Session`] lives as long as the compilation of one unit:
//! it owns the type-id counter, the source-document table,
//! the block label accumulator and the user diagnostics.
//! It is passed by reference to every lowering phase.

use crate::error::{LowerError, narrow};
use crate::program::{DocId, Span};
use log::warn;
use std::fmt;

/// Options controlling the lowering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LowerOptions {
    /// Record a human-readable label for every emitted block.
    pub dump_labels: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// A user-facing diagnostic.
///
/// Diagnostics do not abort the lowering:
/// only the semantic effect of the offending fragment is suppressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Span,
}

#[derive(Debug, Default)]
pub struct Session {
    pub options: LowerOptions,
    next_type_id: u32,
    documents: Vec<String>,
    labels: Vec<(String, String)>,
    diagnostics: Vec<Diagnostic>,
}

impl Session {
    pub fn new(options: LowerOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    /// Registers a source document, returning its index.
    pub fn add_document(&mut self, name: impl Into<String>) -> Result<DocId, LowerError> {
        let id = DocId(narrow(self.documents.len(), "source documents")?);
        self.documents.push(name.into());
        Ok(id)
    }

    pub fn document(&self, doc: DocId) -> Option<&str> {
        self.documents.get(doc.0 as usize).map(String::as_str)
    }

    /// Renders a span as `file:line:col`.
    pub fn render(&self, span: Span) -> String {
        match self.document(span.doc) {
            Some(doc) => format!("{doc}:{span}"),
            None => span.to_string(),
        }
    }

    /// Hands out a fresh type id.
    pub fn fresh_type_id(&mut self) -> u32 {
        let id = self.next_type_id;
        self.next_type_id += 1;
        id
    }

    pub(crate) fn record_label(&mut self, block: String, label: String) {
        if self.options.dump_labels {
            self.labels.push((block, label));
        }
    }

    /// The block label table, in emission order.
    pub fn labels(&self) -> &[(String, String)] {
        &self.labels
    }

    pub(crate) fn warn(&mut self, message: String, span: Span) {
        warn!("{}: {message}", self.render(span));
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            message,
            span,
        });
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }
}
