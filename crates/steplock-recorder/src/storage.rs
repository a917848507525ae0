//! Project storage - pretty JSON documents, one project per file

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use steplock_core::{Error, ErrorCode, Result};

use crate::export;
use crate::project::{Project, FORMAT_VERSION};

/// Serialize a project. Cursor and window handles are not part of it.
pub fn save(project: &Project) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(project)
        .map_err(|e| Error::new(ErrorCode::Io, format!("failed to serialize project: {}", e)))
}

/// Parse a project. Either the whole document loads or nothing does.
pub fn load(bytes: &[u8]) -> Result<Project> {
    let project: Project = serde_json::from_slice(bytes).map_err(|e| {
        let message = if e.line() > 0 {
            format!("{} (line {}, column {})", e, e.line(), e.column())
        } else {
            e.to_string()
        };
        Error::malformed(message)
    })?;
    if project.format > FORMAT_VERSION {
        return Err(Error::malformed(format!(
            "project format {} is newer than the supported format {}",
            project.format, FORMAT_VERSION
        ))
        .with_suggestions(vec!["Update steplock to open this project".into()]));
    }
    Ok(project)
}

/// Spreadsheet listing the variables and steps of a project
pub fn export_template(project: &Project) -> Result<Vec<u8>> {
    export::template(project)
}

pub fn save_file(project: &Project, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, save(project)?)?;
    debug!(path = %path.display(), steps = project.steps.len(), "project saved");
    Ok(())
}

pub fn load_file(path: impl AsRef<Path>) -> Result<Project> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    load(&bytes).map_err(|e| {
        let context = serde_json::json!({ "path": path.display().to_string() });
        e.with_context(context)
    })
}

/// Directory of saved projects
pub struct ProjectStore {
    dir: PathBuf,
}

impl ProjectStore {
    /// `~/.steplock/projects`
    pub fn new() -> Result<Self> {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .map_err(|_| Error::new(ErrorCode::Io, "neither HOME nor USERPROFILE is set"))?;
        Self::with_dir(PathBuf::from(home).join(".steplock").join("projects"))
    }

    pub fn with_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Save under a file name derived from the project name
    pub fn save(&self, project: &Project) -> Result<PathBuf> {
        let path = self.dir.join(format!("{}.json", sanitize(&project.name)));
        save_file(project, &path)?;
        info!(path = %path.display(), "project stored");
        Ok(path)
    }

    pub fn save_to(&self, project: &Project, filename: &str) -> Result<PathBuf> {
        let path = self.dir.join(filename);
        save_file(project, &path)?;
        Ok(path)
    }

    pub fn load_from(&self, filename: &str) -> Result<Project> {
        load_file(self.dir.join(filename))
    }

    /// Project file names, sorted
    pub fn list(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(s) = name.to_str() {
                if s.ends_with(".json") {
                    files.push(s.to_string());
                }
            }
        }
        files.sort();
        Ok(files)
    }

    pub fn delete(&self, filename: &str) -> Result<()> {
        fs::remove_file(self.dir.join(filename))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }
}

fn sanitize(s: &str) -> String {
    let name: String = s
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if name.is_empty() {
        "untitled".to_string()
    } else {
        name
    }
}
