//! Kustomization `images` editing.

use std::fs::Permissions;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::error::ManifestError;

/// File names tried, in order, when locating the manifest in a directory.
pub const MANIFEST_FILE_NAMES: [&str; 3] =
    ["kustomization.yaml", "kustomization.yml", "Kustomization"];

const IMAGES_KEY: &str = "images";

type Result<T> = std::result::Result<T, ManifestError>;

/// One entry of the `images` list as written for a new image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestImageEntry {
    pub name: String,
    pub new_tag: String,
}

/// What [`Kustomization::set_image_tag`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageChange {
    /// An existing entry was rewritten; carries its previous tag, if any.
    Updated { previous: Option<String> },
    /// No entry matched, so one was appended.
    Appended,
}

/// Finds the kustomization file in `dir`.
pub fn locate(dir: &Path) -> Result<PathBuf> {
    MANIFEST_FILE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| ManifestError::NotFound(dir.to_path_buf()))
}

/// A parsed kustomization document.
///
/// Kept as a generic YAML value so keys this editor does not know about
/// survive a rewrite in their original order.
#[derive(Debug, Clone)]
pub struct Kustomization {
    path: PathBuf,
    document: Value,
    permissions: Option<Permissions>,
}

impl Kustomization {
    /// Reads and parses the manifest at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        let permissions = std::fs::metadata(path).ok().map(|m| m.permissions());

        let mut manifest = Self::parse(&content, path)?;
        manifest.permissions = permissions;
        Ok(manifest)
    }

    /// Parses manifest content; `path` is only used for error reporting.
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let document: Value =
            serde_yaml::from_str(content).map_err(|e| ManifestError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        if !document.is_mapping() {
            return Err(ManifestError::InvalidStructure(
                "top level is not a mapping".to_string(),
            ));
        }

        Ok(Self {
            path: path.to_path_buf(),
            document,
            permissions: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current tag of the first entry named `name`.
    pub fn image_tag(&self, name: &str) -> Option<&str> {
        self.document
            .get(IMAGES_KEY)?
            .as_sequence()?
            .iter()
            .find(|entry| entry_name(entry) == Some(name))?
            .get("newTag")?
            .as_str()
    }

    /// Points the first entry named `name` at `new_tag`, appending an entry
    /// when none exists. Later entries with the same name are left alone.
    pub fn set_image_tag(&mut self, name: &str, new_tag: &str) -> Result<ImageChange> {
        let root = self.document.as_mapping_mut().ok_or_else(|| {
            ManifestError::InvalidStructure("top level is not a mapping".to_string())
        })?;

        let images = images_mut(root)?;

        for entry in images.iter_mut() {
            if entry_name(entry) != Some(name) {
                continue;
            }
            let fields = entry.as_mapping_mut().ok_or_else(|| {
                ManifestError::InvalidStructure(format!("image entry '{}' is not a mapping", name))
            })?;
            let previous = fields
                .get("newTag")
                .and_then(scalar_to_string);
            fields.insert(Value::from("newTag"), Value::from(new_tag));
            debug!(
                "Updated image '{}' from {:?} to '{}'",
                name, previous, new_tag
            );
            return Ok(ImageChange::Updated { previous });
        }

        let entry = ManifestImageEntry {
            name: name.to_string(),
            new_tag: new_tag.to_string(),
        };
        let value =
            serde_yaml::to_value(&entry).map_err(|e| ManifestError::Serialize(e.to_string()))?;
        images.push(value);
        debug!("Appended image '{}' with tag '{}'", name, new_tag);
        Ok(ImageChange::Appended)
    }

    /// Serializes the document.
    pub fn render(&self) -> Result<String> {
        serde_yaml::to_string(&self.document).map_err(|e| ManifestError::Serialize(e.to_string()))
    }

    /// Writes `content` over the manifest file, keeping its original
    /// permission bits.
    pub fn write(&self, content: &str) -> Result<()> {
        let write_err = |source| ManifestError::WriteFile {
            path: self.path.clone(),
            source,
        };
        std::fs::write(&self.path, content).map_err(write_err)?;
        if let Some(permissions) = &self.permissions {
            std::fs::set_permissions(&self.path, permissions.clone()).map_err(write_err)?;
        }
        Ok(())
    }
}

fn images_mut(root: &mut Mapping) -> Result<&mut Vec<Value>> {
    let slot = root
        .entry(Value::from(IMAGES_KEY))
        .or_insert_with(|| Value::Sequence(Vec::new()));
    if slot.is_null() {
        *slot = Value::Sequence(Vec::new());
    }
    slot.as_sequence_mut()
        .ok_or_else(|| ManifestError::InvalidStructure("'images' is not a list".to_string()))
}

fn entry_name(entry: &Value) -> Option<&str> {
    entry.get("name")?.as_str()
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
