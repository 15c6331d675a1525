//! Persisted impulse response settings
//!
//! The record a settings layer stores for a generic IR convolver: which file,
//! which part of it, how loud, plus the user's favorites list. The engine
//! never reads this directly; it is resolved into an
//! [`ImpulseResponseSource`] first.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::engine::impulse::{ImpulseResponseSource, IrOrigin};
use crate::error::{ConvolverError, Result};

/// One point of the gainline envelope
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GainPoint {
    /// Sample index inside the selected window
    pub index: usize,
    /// Gain at that index in dB
    pub gain_db: f32,
}

impl GainPoint {
    pub fn new(index: usize, gain_db: f32) -> Self {
        Self { index, gain_db }
    }
}

/// Impulse response configuration as persisted by the settings layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IrSettings {
    /// File name relative to `ir_dir`
    pub ir_file: String,
    /// Directory holding impulse responses
    pub ir_dir: PathBuf,
    /// Static linear gain
    pub gain: f32,
    /// First sample of the selected window
    pub offset: usize,
    /// Window length in samples, 0 for "to the end"
    pub length: usize,
    /// Silence prepended to the response, in samples
    pub delay: usize,
    /// Normalise the window to unit energy before the static gain
    pub gain_correction: bool,
    /// Envelope over the window, in dB
    pub gainline: Vec<GainPoint>,
    /// Favorite file names, in display order
    pub favorites: Vec<String>,
}

impl Default for IrSettings {
    fn default() -> Self {
        Self {
            ir_file: String::new(),
            ir_dir: PathBuf::new(),
            gain: 1.0,
            offset: 0,
            length: 0,
            delay: 0,
            gain_correction: true,
            gainline: Vec::new(),
            favorites: Vec::new(),
        }
    }
}

impl IrSettings {
    /// Settings selecting the whole of `path`
    pub fn for_file(path: &Path) -> Self {
        let mut settings = Self::default();
        settings.set_full_ir_path(path);
        settings
    }

    /// `ir_dir` joined with `ir_file`
    pub fn full_ir_path(&self) -> PathBuf {
        self.ir_dir.join(&self.ir_file)
    }

    /// Split `path` into directory and file name
    pub fn set_full_ir_path(&mut self, path: &Path) {
        self.ir_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        self.ir_file = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
    }

    /// Is a file selected at all
    pub fn has_file(&self) -> bool {
        !self.ir_file.is_empty()
    }

    /// Resolve into the immutable source handed to a build
    pub fn to_source(&self) -> ImpulseResponseSource {
        ImpulseResponseSource {
            origin: IrOrigin::File(self.full_ir_path()),
            offset: self.offset,
            length: self.length,
            gain: self.gain,
            delay: self.delay,
            gain_correction: self.gain_correction,
            gainline: self.gainline.clone(),
        }
    }

    /// Check the numeric fields
    pub fn validate(&self) -> Result<()> {
        if !self.gain.is_finite() || self.gain < 0.0 {
            return Err(ConvolverError::InvalidParameter {
                param: "gain".to_string(),
                value: self.gain.to_string(),
                expected: "finite, non-negative linear gain".to_string(),
            });
        }
        if let Some(point) = self.gainline.iter().find(|p| !p.gain_db.is_finite()) {
            return Err(ConvolverError::InvalidParameter {
                param: "gainline".to_string(),
                value: format!("{} dB at {}", point.gain_db, point.index),
                expected: "finite gain values".to_string(),
            });
        }
        Ok(())
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let settings: IrSettings = serde_json::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_json_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    // ========================================================================
    // Favorites
    // ========================================================================

    /// Append `name` unless it is already a favorite
    pub fn add_favorite(&mut self, name: &str) -> bool {
        if self.is_favorite(name) {
            return false;
        }
        self.favorites.push(name.to_string());
        true
    }

    pub fn remove_favorite(&mut self, name: &str) -> bool {
        let before = self.favorites.len();
        self.favorites.retain(|f| f != name);
        self.favorites.len() != before
    }

    pub fn is_favorite(&self, name: &str) -> bool {
        self.favorites.iter().any(|f| f == name)
    }

    /// List `.wav` files directly inside `dir`, sorted by name
    pub fn scan_directory(dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Err(ConvolverError::FileUnreadable {
                path: dir.display().to_string(),
                reason: "not a directory".to_string(),
                source: None,
            });
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| ConvolverError::FileUnreadable {
                path: dir.display().to_string(),
                reason: e.to_string(),
                source: Some(Box::new(e)),
            })?;
            let is_wav = entry
                .path()
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("wav"))
                .unwrap_or(false);
            if entry.file_type().is_file() && is_wav {
                files.push(entry.into_path());
            }
        }
        files.sort();
        debug!(dir = %dir.display(), count = files.len(), "scanned impulse response directory");
        Ok(files)
    }
}
