//! Mapping from project names to deployment scripts on disk.
//!
//! Webhooks resolve with [`Lookup::Prefix`]: a script whose stem equals the
//! project name wins, otherwise the first file (in lexical order) whose name
//! starts with the project name. Projects sharing a prefix (`foo` and
//! `foo-bar`) are therefore only told apart by exact stems, and a warning is
//! logged whenever more than one file matched.
//!
//! Manual runs use [`Lookup::Exact`] and only accept `<project>.sh`.

use std::ffi::OsStr;
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lookup {
    Prefix,
    Exact,
}

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("Script not found for project")]
    NotFound,
    #[error("Error reading scripts folder: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolves the script file name for `project` inside `dir`, creating the
/// directory when it does not exist yet.
pub async fn resolve_script(dir: &Path, project: &str, lookup: Lookup) -> Result<String, ScriptError> {
    if project.is_empty() {
        return Err(ScriptError::NotFound);
    }

    tokio::fs::create_dir_all(dir).await?;

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        // Follows symlinks so linked scripts resolve too.
        match tokio::fs::metadata(entry.path()).await {
            Ok(metadata) if metadata.is_file() => files.push(name),
            _ => continue,
        }
    }
    files.sort();

    match lookup {
        Lookup::Exact => {
            let wanted = format!("{project}.sh");
            files
                .into_iter()
                .find(|name| *name == wanted)
                .ok_or(ScriptError::NotFound)
        }
        Lookup::Prefix => {
            let candidates: Vec<String> = files
                .into_iter()
                .filter(|name| name.starts_with(project))
                .collect();

            if let Some(exact) = candidates
                .iter()
                .find(|name| Path::new(name.as_str()).file_stem() == Some(OsStr::new(project)))
            {
                return Ok(exact.clone());
            }

            if candidates.len() > 1 {
                tracing::warn!(
                    "Several scripts match project {project:?}: {candidates:?}, using {:?}",
                    candidates[0]
                );
            }

            candidates.into_iter().next().ok_or(ScriptError::NotFound)
        }
    }
}
