//! Difficult-names glossary for the fantasy prompt.
//! Loads `source → target` name pairs from JSON; rendered into the system prompt
//! in sorted order so the prompt is stable between runs.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

/// On-disk glossary file format.
#[derive(Debug, Deserialize)]
struct GlossaryFile {
    #[serde(default)]
    version: u32,
    names: BTreeMap<String, String>,
}

pub struct NamesGlossary {
    version: u32,
    names: BTreeMap<String, String>,
}

#[derive(Debug)]
pub enum GlossaryError {
    Io(std::io::Error),
    Parse(serde_json::Error),
}

impl std::fmt::Display for GlossaryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GlossaryError::Io(e) => write!(f, "glossary IO error: {e}"),
            GlossaryError::Parse(e) => write!(f, "glossary parse error: {e}"),
        }
    }
}

impl std::error::Error for GlossaryError {}

impl From<std::io::Error> for GlossaryError {
    fn from(e: std::io::Error) -> Self {
        GlossaryError::Io(e)
    }
}

impl From<serde_json::Error> for GlossaryError {
    fn from(e: serde_json::Error) -> Self {
        GlossaryError::Parse(e)
    }
}

impl NamesGlossary {
    pub fn load_from_file(path: &Path) -> Result<Self, GlossaryError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, GlossaryError> {
        let file: GlossaryFile = serde_json::from_str(content)?;
        Ok(Self {
            version: file.version,
            names: file.names,
        })
    }

    /// Fallback when the file is missing or malformed.
    pub fn empty() -> Self {
        Self {
            version: 0,
            names: BTreeMap::new(),
        }
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        Self {
            version: 0,
            names: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// One `source: target` line per name.
    pub fn render_lines(&self) -> String {
        self.names
            .iter()
            .map(|(source, target)| format!("{source}: {target}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
