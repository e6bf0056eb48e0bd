use log::info;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::AgentError;

/// The agent's system prompt, kept as a plain text file so it can be edited
/// from the test console.
#[derive(Debug, Clone)]
pub struct PromptStore {
    path: PathBuf,
}

impl PromptStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A prompt that was never saved reads as empty.
    pub async fn load(&self) -> Result<String, AgentError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(AgentError::Storage(format!(
                "{}: {e}",
                self.path.display()
            ))),
        }
    }

    /// Writes to a uniquely named sibling temp file and renames it over the
    /// prompt, so readers never see half a prompt and concurrent saves each
    /// land whole.
    pub async fn save(&self, content: &str) -> Result<(), AgentError> {
        let path = self.path.clone();
        let body = content.to_string();
        tokio::task::spawn_blocking(move || write_replacing(&path, &body))
            .await
            .map_err(|e| AgentError::Storage(format!("prompt save task failed: {e}")))?
            .map_err(|e| AgentError::Storage(format!("{}: {e}", self.path.display())))?;

        info!(
            "Saved agent prompt ({} bytes) to {}",
            content.len(),
            self.path.display()
        );
        Ok(())
    }
}

fn write_replacing(path: &Path, content: &str) -> std::io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(content.as_bytes())?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}
