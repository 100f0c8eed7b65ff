//! Loaded mission templates.
//!
//! The library holds validated missions read from a directory of JSON save
//! files. Sessions receive a clone of the template, so live state never
//! leaks back into the library.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{info, warn};

use super::Mission;
use crate::error::{MissionError, SortieError};

/// Largest mission file accepted, in bytes.
pub const MAX_MISSION_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// Listing entry for a loaded mission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionSummary {
    pub id: String,
    pub name: String,
    pub version_number: u32,
    pub forces: Vec<String>,
}

/// Missions keyed by id, in load order.
#[derive(Debug, Default)]
pub struct MissionLibrary {
    missions: IndexMap<String, Mission>,
}

impl MissionLibrary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads and validates one mission file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read or exceeds
    /// [`MAX_MISSION_FILE_SIZE`], and a [`MissionError`] if it does not
    /// parse or validate.
    pub fn load_file(path: &Path) -> Result<Mission, SortieError> {
        Ok(Mission::from_json(&Self::read_file(path)?)?)
    }

    /// Reads a mission file as text without parsing it.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read or exceeds
    /// [`MAX_MISSION_FILE_SIZE`].
    pub fn read_file(path: &Path) -> Result<String, SortieError> {
        let size = std::fs::metadata(path)?.len();
        if size > MAX_MISSION_FILE_SIZE {
            return Err(SortieError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "{}: {size} bytes exceeds the {MAX_MISSION_FILE_SIZE} byte limit",
                    path.display()
                ),
            )));
        }
        let text = std::fs::read_to_string(path)?;
        Ok(match text.strip_prefix('\u{feff}') {
            Some(stripped) => stripped.to_string(),
            None => text,
        })
    }

    /// Loads every `*.json` file in `dir`.
    ///
    /// Files that fail to load are logged and skipped; they are returned
    /// alongside the library so callers can report them.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be listed.
    pub fn load_dir(dir: &Path) -> Result<(Self, Vec<(PathBuf, SortieError)>), SortieError> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut library = Self::new();
        let mut failures = Vec::new();
        for path in paths {
            match Self::load_file(&path) {
                Ok(mission) => {
                    if let Some(previous) = library.insert(mission) {
                        warn!(path = %path.display(), mission_id = %previous.id, "duplicate mission id, later file wins");
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping mission file");
                    failures.push((path, e));
                }
            }
        }
        info!(dir = %dir.display(), missions = library.len(), failed = failures.len(), "mission library loaded");
        Ok((library, failures))
    }

    /// Adds a mission, returning any mission it replaced.
    pub fn insert(&mut self, mission: Mission) -> Option<Mission> {
        self.missions.insert(mission.id.clone(), mission)
    }

    /// Fresh copy of a mission for a new session.
    ///
    /// # Errors
    ///
    /// Returns [`MissionError::NotFound`] for an unknown id.
    pub fn instantiate(&self, mission_id: &str) -> Result<Mission, MissionError> {
        self.missions
            .get(mission_id)
            .cloned()
            .ok_or_else(|| MissionError::NotFound(mission_id.to_string()))
    }

    /// Listing of every loaded mission.
    #[must_use]
    pub fn summaries(&self) -> Vec<MissionSummary> {
        self.missions
            .values()
            .map(|m| MissionSummary {
                id: m.id.clone(),
                name: m.name.clone(),
                version_number: m.version_number,
                forces: m.forces.keys().cloned().collect(),
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.missions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.missions.is_empty()
    }
}
