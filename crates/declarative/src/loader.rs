//! Where build units come from.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::error::{BuildError, Result};
use crate::manifest::Manifest;

/// Source of build units, addressed by directory relative to the configs
/// root (`""` is the root unit itself).
pub trait DefinitionLoader {
    fn exists(&self, unit: &str) -> bool;

    fn load(&self, unit: &str) -> Result<Rc<Manifest>>;

    /// Directory that relative file references of `unit` resolve against.
    fn config_dir(&self, unit: &str) -> PathBuf;

    /// Every unit directory this loader knows about.
    fn units(&self) -> Vec<String> {
        Vec::new()
    }
}

fn unit_dir(root: &Path, unit: &str) -> PathBuf {
    if unit.is_empty() {
        root.to_path_buf()
    } else {
        root.join(unit)
    }
}

/// Loads `<root>/<unit>/<file_name>` and keeps each parsed unit for the
/// rest of the invocation.
#[derive(Debug)]
pub struct TomlLoader {
    root: PathBuf,
    file_name: String,
    cache: RefCell<HashMap<String, Rc<Manifest>>>,
}

impl TomlLoader {
    pub fn new(root: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            file_name: file_name.into(),
            cache: RefCell::new(HashMap::new()),
        }
    }

    fn path(&self, unit: &str) -> PathBuf {
        unit_dir(&self.root, unit).join(&self.file_name)
    }
}

impl DefinitionLoader for TomlLoader {
    fn exists(&self, unit: &str) -> bool {
        self.cache.borrow().contains_key(unit) || self.path(unit).is_file()
    }

    fn load(&self, unit: &str) -> Result<Rc<Manifest>> {
        if let Some(manifest) = self.cache.borrow().get(unit) {
            return Ok(Rc::clone(manifest));
        }

        let path = self.path(unit);
        log::debug!("Loading build unit {}", path.display());
        let src = std::fs::read_to_string(&path)
            .map_err(|e| BuildError::io(format!("reading {}", path.display()), e))?;
        let manifest = Rc::new(Manifest::parse(&src, unit)?);
        self.cache
            .borrow_mut()
            .insert(unit.to_string(), Rc::clone(&manifest));
        Ok(manifest)
    }

    fn config_dir(&self, unit: &str) -> PathBuf {
        unit_dir(&self.root, unit)
    }

    fn units(&self) -> Vec<String> {
        let mut units: Vec<String> = walkdir::WalkDir::new(&self.root)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_file() && e.file_name() == self.file_name.as_str())
            .filter_map(|e| {
                let dir = e.path().parent()?.strip_prefix(&self.root).ok()?;
                Some(dir.to_string_lossy().into_owned())
            })
            .collect();
        units.sort();
        units
    }
}

/// Units held in memory; used by embedders and tests.
#[derive(Debug, Default)]
pub struct MemoryLoader {
    root: PathBuf,
    units: HashMap<String, Rc<Manifest>>,
}

impl MemoryLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            units: HashMap::new(),
        }
    }

    pub fn with_unit(mut self, unit: &str, manifest: Manifest) -> Self {
        self.insert(unit, manifest);
        self
    }

    pub fn insert(&mut self, unit: &str, manifest: Manifest) {
        self.units.insert(unit.to_string(), Rc::new(manifest));
    }
}

impl DefinitionLoader for MemoryLoader {
    fn exists(&self, unit: &str) -> bool {
        self.units.contains_key(unit)
    }

    fn load(&self, unit: &str) -> Result<Rc<Manifest>> {
        self.units
            .get(unit)
            .cloned()
            .ok_or_else(|| BuildError::Manifest {
                unit: unit.to_string(),
                message: "no such unit".to_string(),
            })
    }

    fn config_dir(&self, unit: &str) -> PathBuf {
        unit_dir(&self.root, unit)
    }

    fn units(&self) -> Vec<String> {
        let mut units: Vec<String> = self.units.keys().cloned().collect();
        units.sort();
        units
    }
}
