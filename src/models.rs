//! Core data types that flow through ingestion and the query pipeline.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source formats the loader understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Docx,
    Html,
    Txt,
}

impl DocumentKind {
    /// Detect the kind from a (case-insensitive) file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "html" | "htm" => Some(Self::Html),
            "txt" => Some(Self::Txt),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Html => "html",
            Self::Txt => "txt",
        }
    }
}

/// A source file about to be loaded.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub kind: DocumentKind,
}

impl Document {
    /// Stable identifier used as the `document_id` of every derived chunk.
    pub fn id(&self) -> String {
        document_id(&self.path)
    }
}

/// Identifier of a document as stored in chunk metadata.
///
/// Existing files are identified by their canonical path, so the same file
/// reached through different spellings (relative, absolute, `./`, `..`)
/// gets one id. Paths that cannot be resolved fall back to lexical
/// normalization.
pub fn document_id(path: &Path) -> String {
    let resolved = std::fs::canonicalize(path).unwrap_or_else(|_| normalize_lexically(path));
    resolved.to_string_lossy().replace('\\', "/")
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Where a piece of text came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub document_id: String,
    pub kind: DocumentKind,
    /// 1-based page number for paginated formats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

/// One logical unit of extracted text (a PDF page, or a whole file).
#[derive(Debug, Clone)]
pub struct TextUnit {
    pub text: String,
    pub source: SourceMetadata,
}

/// A bounded, overlapping slice of a [`TextUnit`], ready to embed.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub chunk_index: usize,
    pub source: SourceMetadata,
}

/// The persisted unit of the vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: SourceMetadata,
}

impl IndexEntry {
    pub fn from_chunk(chunk: Chunk, vector: Vec<f32>) -> Self {
        Self {
            id: chunk.id,
            vector,
            text: chunk.text,
            metadata: chunk.source,
        }
    }
}

/// A retrieved entry with its similarity to the query.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub metadata: SourceMetadata,
    pub score: f32,
}

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "human" | "user" => Ok(Self::Human),
            "assistant" | "ai" => Ok(Self::Assistant),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// One message of a session's chat history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn human(content: impl Into<String>) -> Self {
        Self {
            role: Role::Human,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_extension_is_case_insensitive() {
        assert_eq!(DocumentKind::from_extension("PDF"), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_extension("Htm"), Some(DocumentKind::Html));
        assert_eq!(DocumentKind::from_extension("docx"), Some(DocumentKind::Docx));
        assert_eq!(DocumentKind::from_extension("doc"), None);
        assert_eq!(DocumentKind::from_extension("md"), None);
    }

    #[test]
    fn test_role_parse_accepts_aliases() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::Human);
        assert_eq!("ai".parse::<Role>().unwrap(), Role::Assistant);
        assert!("system".parse::<Role>().is_err());
    }

    #[test]
    fn test_document_id_uses_forward_slashes() {
        assert_eq!(document_id(Path::new("docs\\fees.pdf")), "docs/fees.pdf");
    }

    #[test]
    fn test_document_id_ignores_dot_segments() {
        assert_eq!(
            document_id(Path::new("corpus/./notices/../fees.pdf")),
            "corpus/fees.pdf"
        );
        assert_eq!(document_id(Path::new("../shared/fees.pdf")), "../shared/fees.pdf");
    }

    #[test]
    fn test_document_id_is_absolute_for_existing_files() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("fees.txt");
        std::fs::write(&path, "fees").unwrap();
        let dotted = tmp.path().join(".").join("fees.txt");
        assert_eq!(document_id(&path), document_id(&dotted));
        assert!(Path::new(&document_id(&path)).is_absolute());
    }
}
