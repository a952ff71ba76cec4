//! Storage policies: factories deciding where regular-file bytes live.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::errors::Result;
use crate::file::{Dir, MemDir, MemRegular, Regular, SpillRegular, Symlink};

/// Produces the concrete file backings of a virtual tree.
pub(crate) trait Storage {
    fn make_regular(&self) -> Result<Rc<dyn Regular>>;
    fn make_dir(&self) -> Rc<dyn Dir>;
    fn make_symlink(&self, target: &Path) -> Rc<Symlink>;
}

/// Keeps regular-file bytes in memory.
pub(crate) struct MemStorage;

impl Storage for MemStorage {
    fn make_regular(&self) -> Result<Rc<dyn Regular>> {
        Ok(Rc::new(MemRegular::new()))
    }

    fn make_dir(&self) -> Rc<dyn Dir> {
        Rc::new(MemDir::new(Rc::new(MemStorage)))
    }

    fn make_symlink(&self, target: &Path) -> Rc<Symlink> {
        Rc::new(Symlink::new(target))
    }
}

/// Spills regular-file bytes into uniquely named files under a host temp
/// directory.
#[derive(Clone)]
pub(crate) struct SpillStorage {
    temp_dir: PathBuf,
}

impl SpillStorage {
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self { temp_dir: temp_dir.into() }
    }
}

impl Storage for SpillStorage {
    fn make_regular(&self) -> Result<Rc<dyn Regular>> {
        Ok(Rc::new(SpillRegular::create(&self.temp_dir)?))
    }

    fn make_dir(&self) -> Rc<dyn Dir> {
        Rc::new(MemDir::new(Rc::new(self.clone())))
    }

    fn make_symlink(&self, target: &Path) -> Rc<Symlink> {
        Rc::new(Symlink::new(target))
    }
}
