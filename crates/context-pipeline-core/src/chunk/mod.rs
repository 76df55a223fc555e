//! Document chunker.
//!
//! Splits a [`Document`] into embedding-less [`Chunk`]s, choosing the
//! splitter from the document's filename:
//!
//! | Filename | Extension key | Splitter |
//! |----------|---------------|----------|
//! | `src/main.rs` | `rs` | code (`rust`), overlap in lines |
//! | `notes.txt` | `txt` | prose, overlap in characters |
//! | *(none)* | `generic` | prose |
//!
//! The extension key is the last dot-separated segment of the filename. A
//! key found in the extension table routes to the structure-aware
//! [`code`] splitter with `max_chars = size`; anything else goes to the
//! [`prose`] splitter.
//!
//! A document whose code cannot be parsed does not fail the job: the
//! chunker logs a warning and re-splits it as prose.
//!
//! # Example
//!
//! ```rust
//! use context_pipeline_core::chunk::{Chunker, SplitterKind};
//! use context_pipeline_core::models::Document;
//!
//! let chunker = Chunker::new(1000, 100).unwrap();
//! let mut doc = Document::new("asset", "alice", "def main():\n    pass\n");
//! doc.filename = Some("main.py".into());
//!
//! assert_eq!(Chunker::route(doc.filename.as_deref()), SplitterKind::Code("python"));
//! assert_eq!(chunker.chunk(&doc).len(), 1);
//! ```

pub mod code;
pub mod prose;

use crate::error::{PipelineError, Result};
use crate::models::{Chunk, Document};

/// Extension key used when a document has no filename.
pub const GENERIC_EXTENSION: &str = "generic";

/// Extension (without the dot) to language table.
const EXTENSION_LANGUAGES: &[(&str, &str)] = &[
    ("bash", "bash"),
    ("c", "c"),
    ("cs", "c-sharp"),
    ("lisp", "commonlisp"),
    ("cpp", "cpp"),
    ("css", "css"),
    ("dockerfile", "dockerfile"),
    ("dot", "dot"),
    ("elisp", "elisp"),
    ("ex", "elixir"),
    ("elm", "elm"),
    ("et", "embedded-template"),
    ("erl", "erlang"),
    ("f", "fixed-form-fortran"),
    ("f90", "fortran"),
    ("go", "go"),
    ("mod", "go-mod"),
    ("hack", "hack"),
    ("hs", "haskell"),
    ("hcl", "hcl"),
    ("html", "html"),
    ("java", "java"),
    ("js", "javascript"),
    ("jsdoc", "jsdoc"),
    ("json", "json"),
    ("jl", "julia"),
    ("kt", "kotlin"),
    ("lua", "lua"),
    ("mk", "make"),
    ("md", "markdown"),
    ("m", "objc"),
    ("ml", "ocaml"),
    ("pl", "perl"),
    ("php", "php"),
    ("py", "python"),
    ("ql", "ql"),
    ("r", "r"),
    ("regex", "regex"),
    ("rst", "rst"),
    ("rb", "ruby"),
    ("rs", "rust"),
    ("scala", "scala"),
    ("sql", "sql"),
    ("sqlite", "sqlite"),
    ("toml", "toml"),
    ("tsq", "tsq"),
    ("tsx", "tsx"),
    ("ts", "typescript"),
    ("yaml", "yaml"),
];

/// Which splitter a document is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitterKind {
    /// Structure-aware splitter for the named language.
    Code(&'static str),
    Prose,
}

/// Extension key of `filename`: its last dot-separated segment, or
/// [`GENERIC_EXTENSION`] when there is no filename.
pub fn extension_key(filename: Option<&str>) -> &str {
    match filename {
        Some(name) => name.rsplit('.').next().unwrap_or(name),
        None => GENERIC_EXTENSION,
    }
}

/// Look up the language for an extension key.
pub fn language_for_extension(extension: &str) -> Option<&'static str> {
    EXTENSION_LANGUAGES
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, language)| *language)
}

/// Splits documents into chunks of `size` characters with `overlap`.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    size: usize,
    overlap: usize,
}

impl Chunker {
    /// Create a chunker. `size` must be positive and `overlap` smaller than
    /// `size`.
    pub fn new(size: usize, overlap: usize) -> Result<Self> {
        if size == 0 {
            return Err(PipelineError::Config("chunk_size must be > 0".to_string()));
        }
        if overlap >= size {
            return Err(PipelineError::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                overlap, size
            )));
        }
        Ok(Self { size, overlap })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Splitter a document with this filename is routed to.
    pub fn route(filename: Option<&str>) -> SplitterKind {
        match language_for_extension(extension_key(filename)) {
            Some(language) => SplitterKind::Code(language),
            None => SplitterKind::Prose,
        }
    }

    /// Split raw text, returning the splitter that produced the pieces.
    ///
    /// A [`PipelineError::SplitterFailure`] from the code splitter degrades
    /// to the prose splitter.
    pub fn split(&self, filename: Option<&str>, text: &str) -> (SplitterKind, Vec<String>) {
        if text.is_empty() {
            return (Self::route(filename), Vec::new());
        }

        match Self::route(filename) {
            SplitterKind::Code(language) => {
                match code::split_code(language, text, self.size, self.overlap) {
                    Ok(pieces) => (SplitterKind::Code(language), pieces),
                    Err(e) => {
                        tracing::warn!(
                            filename = filename.unwrap_or_default(),
                            error = %e,
                            "code splitter failed, splitting as prose"
                        );
                        (
                            SplitterKind::Prose,
                            prose::split_prose(text, self.size, self.overlap),
                        )
                    }
                }
            }
            SplitterKind::Prose => (
                SplitterKind::Prose,
                prose::split_prose(text, self.size, self.overlap),
            ),
        }
    }

    /// Chunk a document. Every chunk gets a fresh `chunk_id` and inherits
    /// the document's identifiers and metadata. Empty text yields no chunks.
    pub fn chunk(&self, doc: &Document) -> Vec<Chunk> {
        let (_, pieces) = self.split(doc.filename.as_deref(), &doc.text);
        pieces
            .into_iter()
            .map(|piece| Chunk::from_document(doc, piece))
            .collect()
    }
}
