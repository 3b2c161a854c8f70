//! iknowu-dataset — Dataset curation for the person classifier.
//!
//! Copies raw pictures into a `<root>/<purpose>/<nick>` tree and scans
//! such trees back into labeled samples for training.

pub mod folder;
pub mod obtain;

pub use folder::{FolderError, ImageFolder, Sample};
pub use obtain::{normalize, ObtainError, ObtainInfo, Obtainer, Purpose};
