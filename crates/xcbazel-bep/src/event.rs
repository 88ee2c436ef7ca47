//! A single decoded build event.

use std::path::PathBuf;

use serde::Deserialize;
use serde_json::Value;

use crate::error::EventError;
use crate::FILE_URI_PREFIX;

/// Wire shape of the fields we care about. Everything else is ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    id: Option<Value>,
    #[serde(default)]
    children: Vec<Value>,
    progress: Option<WireProgress>,
    named_set_of_files: Option<WireNamedSet>,
}

#[derive(Debug, Default, Deserialize)]
struct WireProgress {
    stdout: Option<String>,
    stderr: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireNamedSet {
    #[serde(default)]
    files: Vec<WireFile>,
}

#[derive(Debug, Default, Deserialize)]
struct WireFile {
    #[serde(default)]
    uri: String,
}

/// Canonical string form of a build event identifier.
///
/// Identifiers are structured JSON values compared by deep equality, so they
/// are keyed by their RFC 8785 canonical serialization (key order and number
/// formatting never affect the key).
pub fn event_key(id: &Value) -> Result<String, EventError> {
    let jcs_bytes = serde_json_canonicalizer::to_vec(id)
        .map_err(|e| EventError::Canonicalize(e.to_string()))?;
    Ok(String::from_utf8_lossy(&jcs_bytes).into_owned())
}

/// One parsed line of the build event stream.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildEvent {
    raw: Value,
    id: Option<Value>,
    key: Option<String>,
    children: Vec<Value>,
    children_keys: Vec<String>,
    stdout: Option<String>,
    stderr: Option<String>,
    files: Vec<PathBuf>,
}

impl BuildEvent {
    /// Decode one line of the event file.
    pub fn from_line(line: &str) -> Result<Self, EventError> {
        let value: Value = serde_json::from_str(line.trim_end())?;
        Self::from_value(value)
    }

    /// Build an event from an already-decoded JSON object.
    pub fn from_value(raw: Value) -> Result<Self, EventError> {
        if !raw.is_object() {
            return Err(EventError::NotAnObject(raw.to_string()));
        }
        let wire: WireEvent = serde_json::from_value(raw.clone())?;

        let key = wire.id.as_ref().map(event_key).transpose()?;
        let children_keys = wire
            .children
            .iter()
            .map(event_key)
            .collect::<Result<Vec<_>, _>>()?;

        let (stdout, stderr) = match wire.progress {
            Some(progress) => (progress.stdout, progress.stderr),
            None => (None, None),
        };

        let files = wire
            .named_set_of_files
            .map(|set| {
                set.files
                    .iter()
                    .filter_map(|file| file.uri.strip_prefix(FILE_URI_PREFIX))
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            raw,
            id: wire.id,
            key,
            children: wire.children,
            children_keys,
            stdout,
            stderr,
            files,
        })
    }

    /// The event identifier, if the event carried one.
    pub fn id(&self) -> Option<&Value> {
        self.id.as_ref()
    }

    /// Canonical key of [`Self::id`].
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Declared child identifiers, in stream order.
    pub fn children(&self) -> &[Value] {
        &self.children
    }

    /// Canonical keys of the declared children.
    pub fn children_keys(&self) -> &[String] {
        &self.children_keys
    }

    /// Captured standard output forwarded by Bazel.
    pub fn stdout(&self) -> Option<&str> {
        self.stdout.as_deref()
    }

    /// Captured standard error forwarded by Bazel.
    pub fn stderr(&self) -> Option<&str> {
        self.stderr.as_deref()
    }

    /// Local file paths announced by a `namedSetOfFiles` event.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// The full decoded JSON object.
    pub fn raw(&self) -> &Value {
        &self.raw
    }
}
