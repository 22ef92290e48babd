use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;
use walkdir::WalkDir;

use crate::error::InputError;
use crate::generate_doc_id;

/// A source document record. Records loaded from JSON may omit `content`;
/// the chunker rejects them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

impl Document {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            source: None,
        }
    }
}

pub struct FileReader;

impl FileReader {
    /// Read a `.txt`/`.md` file, a `.json` document map, or a directory of text files.
    pub async fn read_documents(path: &Path) -> Result<BTreeMap<String, Document>, InputError> {
        if path.is_dir() {
            return Self::read_directory(path).await;
        }

        match extension(path) {
            "json" => Self::read_document_map(path).await,
            _ => {
                let content = Self::read_file(path).await?;
                let source = path.to_string_lossy().to_string();
                let mut documents = BTreeMap::new();
                documents.insert(
                    generate_doc_id(&source),
                    Document {
                        content: Some(content),
                        source: Some(source),
                    },
                );
                Ok(documents)
            }
        }
    }

    pub async fn read_file(path: &Path) -> Result<String, InputError> {
        match extension(path) {
            "txt" | "md" => fs::read_to_string(path).await.map_err(|source| InputError::Io {
                path: path.to_path_buf(),
                source,
            }),
            other => Err(InputError::UnsupportedFormat(other.to_string())),
        }
    }

    pub async fn read_document_map(path: &Path) -> Result<BTreeMap<String, Document>, InputError> {
        let raw = fs::read_to_string(path).await.map_err(|source| InputError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_str(&raw).map_err(|source| InputError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub async fn read_directory(dir: &Path) -> Result<BTreeMap<String, Document>, InputError> {
        let mut documents = BTreeMap::new();

        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| InputError::Io {
                path: dir.to_path_buf(),
                source: e.into(),
            })?;
            let path = entry.path();

            if path.is_file() && matches!(extension(path), "txt" | "md") {
                let content = Self::read_file(path).await?;
                let source = path.to_string_lossy().to_string();
                documents.insert(
                    generate_doc_id(&source),
                    Document {
                        content: Some(content),
                        source: Some(source),
                    },
                );
            }
        }

        Ok(documents)
    }
}

fn extension(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_directory_recursive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("a.txt"), "Alpha text").unwrap();
        std::fs::write(dir.path().join("nested/b.md"), "# Beta").unwrap();
        std::fs::write(dir.path().join("ignored.bin"), "skip").unwrap();

        let documents = FileReader::read_documents(dir.path()).await.unwrap();

        assert_eq!(documents.len(), 2);
        let contents: Vec<_> = documents
            .values()
            .filter_map(|d| d.content.clone())
            .collect();
        assert!(contents.contains(&"Alpha text".to_string()));
        assert!(contents.contains(&"# Beta".to_string()));
    }

    #[tokio::test]
    async fn test_read_document_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docs.json");
        std::fs::write(
            &path,
            r#"{"doc-1": {"content": "Hello"}, "doc-2": {"title": "no body"}}"#,
        )
        .unwrap();

        let documents = FileReader::read_documents(&path).await.unwrap();

        assert_eq!(documents["doc-1"].content.as_deref(), Some("Hello"));
        assert!(documents["doc-2"].content.is_none());
    }

    #[tokio::test]
    async fn test_unsupported_format() {
        let err = FileReader::read_file(Path::new("report.pdf")).await.unwrap_err();
        assert!(matches!(err, InputError::UnsupportedFormat(ext) if ext == "pdf"));
    }
}
