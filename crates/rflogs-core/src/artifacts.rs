use async_trait::async_trait;
use std::io::Read;
use std::path::PathBuf;
use thiserror::Error;

/// Longest object name accepted by [`validate_object_name`].
pub const MAX_OBJECT_NAME: usize = 1024;

/// File names that carry the machine-readable report.
pub const OUTPUT_FILE_NAMES: [&str; 2] = ["output.xml", "output.xml.gz"];

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("invalid artifact path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("artifact I/O error for '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Byte-oriented object storage addressed by opaque path.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Opens the object for streaming. The reader is consumed on a blocking
    /// thread, so it only has to be `Send`.
    async fn fetch(&self, path: &str) -> Result<Box<dyn Read + Send>, ArtifactError>;

    /// Writes the object and returns its stored size in bytes.
    async fn store(&self, path: &str, data: Vec<u8>) -> Result<u64, ArtifactError>;

    /// Removes the object. Missing objects are not an error.
    async fn delete(&self, path: &str) -> Result<bool, ArtifactError>;
}

/// Objects stored as plain files below a root directory.
#[derive(Debug, Clone)]
pub struct FsArtifactSource {
    root: PathBuf,
}

impl FsArtifactSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, ArtifactError> {
        validate_object_name(path)?;
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl ArtifactSource for FsArtifactSource {
    async fn fetch(&self, path: &str) -> Result<Box<dyn Read + Send>, ArtifactError> {
        let full = self.resolve(path)?;
        match tokio::fs::File::open(&full).await {
            Ok(f) => Ok(Box::new(f.into_std().await)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ArtifactError::NotFound(path.to_string()))
            }
            Err(source) => Err(ArtifactError::Io {
                path: path.to_string(),
                source,
            }),
        }
    }

    async fn store(&self, path: &str, data: Vec<u8>) -> Result<u64, ArtifactError> {
        let full = self.resolve(path)?;
        let io = |source| ArtifactError::Io {
            path: path.to_string(),
            source,
        };
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io)?;
        }
        tokio::fs::write(&full, &data).await.map_err(io)?;
        tracing::debug!(event = "artifact_stored", path, size = data.len());
        Ok(data.len() as u64)
    }

    async fn delete(&self, path: &str) -> Result<bool, ArtifactError> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(ArtifactError::Io {
                path: path.to_string(),
                source,
            }),
        }
    }
}

/// Rejects object names that could escape the storage root.
pub fn validate_object_name(name: &str) -> Result<(), ArtifactError> {
    let reason = if name.is_empty() {
        Some("empty")
    } else if name.len() > MAX_OBJECT_NAME {
        Some("too long")
    } else if name.contains("..") {
        Some("contains '..'")
    } else if name.contains('\0') {
        Some("contains NUL")
    } else if name.starts_with('/') || name.starts_with('\\') {
        Some("absolute path")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(ArtifactError::InvalidPath {
            path: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Normalizes a client-supplied relative file path: backslashes become
/// slashes, empty and `.` segments are dropped. Parent references and
/// absolute paths are rejected.
pub fn normalize_file_path(raw: &str) -> Result<String, ArtifactError> {
    let invalid = |reason| ArtifactError::InvalidPath {
        path: raw.to_string(),
        reason,
    };
    let unified = raw.replace('\\', "/");
    if unified.starts_with('/') {
        return Err(invalid("absolute path"));
    }
    let mut parts = Vec::new();
    for seg in unified.split('/') {
        match seg {
            "" | "." => continue,
            ".." => return Err(invalid("contains '..'")),
            s => parts.push(s),
        }
    }
    if parts.is_empty() {
        return Err(invalid("empty"));
    }
    Ok(parts.join("/"))
}

/// Storage key of a run's file.
pub fn object_name(run_id: &str, file_path: &str) -> Result<String, ArtifactError> {
    let name = format!("{}/{}", run_id, normalize_file_path(file_path)?);
    validate_object_name(&name)?;
    Ok(name)
}

pub fn is_output_file(file_path: &str) -> bool {
    let base = file_path.rsplit(['/', '\\']).next().unwrap_or(file_path);
    OUTPUT_FILE_NAMES.contains(&base)
}
