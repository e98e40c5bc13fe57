use std::fs;
use std::path::Path;
use tracing::warn;

/// Best-effort document text for an input. Any string, including empty, is valid.
pub trait TextSource: Send + Sync {
    fn read_text(&self, path: &Path) -> String;
}

/// Reads plain-text documents from disk, lossily decoding non-UTF-8 bytes.
#[derive(Debug, Clone)]
pub struct PlainTextFile {
    extensions: Vec<String>,
}

impl PlainTextFile {
    pub fn new(extensions: &[String]) -> Self {
        Self {
            extensions: extensions.iter().map(|e| e.to_ascii_lowercase()).collect(),
        }
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| self.extensions.contains(&e.to_ascii_lowercase()))
    }
}

impl TextSource for PlainTextFile {
    fn read_text(&self, path: &Path) -> String {
        if !self.accepts(path) {
            warn!(path = %path.display(), "Unsupported document type, treating as empty");
            return String::new();
        }
        match fs::read(path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).replace('\r', ""),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read document");
                String::new()
            }
        }
    }
}

/// Stand-in for deployments with no text backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoText;

impl TextSource for NoText {
    fn read_text(&self, _path: &Path) -> String {
        String::new()
    }
}
