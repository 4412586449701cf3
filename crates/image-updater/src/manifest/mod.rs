//! Deployment manifest editing.

pub mod kustomization;

pub use kustomization::{locate, ImageChange, Kustomization, ManifestImageEntry, MANIFEST_FILE_NAMES};
