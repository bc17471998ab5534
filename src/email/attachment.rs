//! Email attachments: in-memory bytes or files beneath the attachment root.

use serde::Deserialize;
use std::path::{Component, Path, PathBuf};

use crate::email::error::{MailError, MailResult};
use crate::email::transport::ResolvedAttachment;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Attachment {
    Bytes {
        filename: String,
        content: Vec<u8>,
    },
    /// Disk-relative URL such as `/uploads/schedule.pdf`.
    Path {
        path: String,
        #[serde(default)]
        filename: Option<String>,
    },
}

impl Attachment {
    pub fn bytes(filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self::Bytes {
            filename: filename.into(),
            content: content.into(),
        }
    }

    pub fn path(path: impl Into<String>) -> Self {
        Self::Path {
            path: path.into(),
            filename: None,
        }
    }

    pub async fn resolve(self, root: &Path) -> MailResult<ResolvedAttachment> {
        match self {
            Self::Bytes { filename, content } => Ok(ResolvedAttachment { filename, content }),
            Self::Path { path, filename } => {
                let full = confine(root, &path)?;
                let filename = match filename {
                    Some(name) => name,
                    None => full
                        .file_name()
                        .and_then(|n| n.to_str())
                        .ok_or_else(|| MailError::Attachment(format!("invalid file name in '{}'", path)))?
                        .to_string(),
                };
                let content = tokio::fs::read(&full).await?;
                Ok(ResolvedAttachment { filename, content })
            }
        }
    }
}

/// Joins `relative` onto `root`, refusing anything that could leave it.
pub fn confine(root: &Path, relative: &str) -> MailResult<PathBuf> {
    let trimmed = relative.trim().trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(MailError::Attachment("empty attachment path".to_string()));
    }

    let mut full = root.to_path_buf();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => full.push(part),
            Component::CurDir => {}
            _ => {
                return Err(MailError::Attachment(format!(
                    "attachment path '{}' escapes the attachment root",
                    relative
                )))
            }
        }
    }
    Ok(full)
}
