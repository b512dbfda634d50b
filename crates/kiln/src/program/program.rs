use std::{
    cell::RefCell,
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    rc::{Rc, Weak},
    time::SystemTime,
};

use super::{DefineList, ProgramDesc, ProgramManager, ProgramVersion, ShaderSource};
use crate::error::{Error, Result};

/// A shader program and its compiled versions, one per set of defines.
///
/// Programs register with their manager for reloading when created and
/// unregister when dropped.
pub struct Program {
    desc: ProgramDesc,
    manager: Weak<ProgramManager>,
    defines: RefCell<DefineList>,
    active_version: RefCell<Option<Rc<ProgramVersion>>>,
    versions: RefCell<HashMap<DefineList, Rc<ProgramVersion>>>,
    source_times: RefCell<Vec<(PathBuf, Option<SystemTime>)>>,
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|metadata| metadata.modified()).ok()
}

impl Program {
    pub fn new(manager: &Rc<ProgramManager>, desc: ProgramDesc, defines: DefineList) -> Rc<Self> {
        let program = Rc::new(Self {
            desc,
            manager: Rc::downgrade(manager),
            defines: RefCell::new(defines),
            active_version: RefCell::new(None),
            versions: RefCell::new(HashMap::new()),
            source_times: RefCell::new(Vec::new()),
        });

        program.update_source_times();
        manager.register_program_for_reload(&program);
        program
    }

    #[must_use]
    pub fn desc(&self) -> &ProgramDesc {
        &self.desc
    }

    #[must_use]
    pub fn defines(&self) -> DefineList {
        self.defines.borrow().clone()
    }

    /// Adds or replaces a define. Returns whether the define set changed.
    pub fn add_define(&self, name: &str, value: &str) -> bool {
        if self.defines.borrow().get(name) == Some(value) {
            return false;
        }

        self.defines.borrow_mut().add(name, value);
        self.invalidate_active_version();
        true
    }

    pub fn remove_define(&self, name: &str) -> bool {
        if !self.defines.borrow().contains(name) {
            return false;
        }

        self.defines.borrow_mut().remove(name);
        self.invalidate_active_version();
        true
    }

    pub fn add_defines(&self, defines: &DefineList) -> bool {
        self.update_defines(|current| {
            current.add_list(defines);
        })
    }

    pub fn remove_defines(&self, defines: &DefineList) -> bool {
        self.update_defines(|current| {
            current.remove_list(defines);
        })
    }

    pub fn set_defines(&self, defines: DefineList) -> bool {
        self.update_defines(|current| *current = defines)
    }

    /// Returns the version for the current defines, compiling it if needed.
    pub fn active_version(&self) -> Result<Rc<ProgramVersion>> {
        if let Some(version) = self.active_version.borrow().as_ref() {
            return Ok(version.clone());
        }

        let defines = self.defines();
        let cached = self.versions.borrow().get(&defines).cloned();
        let version = match cached {
            Some(version) => version,
            None => {
                let manager = self.manager.upgrade().ok_or(Error::DeviceDestroyed)?;
                let mut log = String::new();
                let version = manager
                    .create_program_version(self, &mut log)
                    .ok_or_else(|| Error::ProgramCompilation {
                        name: self.desc.name.clone(),
                        log: log.clone(),
                    })?;

                if !log.is_empty() {
                    tracing::warn!(program = %self.desc.name, "{log}");
                }

                self.versions.borrow_mut().insert(defines, version.clone());
                version
            }
        };

        *self.active_version.borrow_mut() = Some(version.clone());
        Ok(version)
    }

    /// Discards compiled versions if forced or if a source file changed.
    /// Returns whether the program was reloaded.
    pub fn reload(&self, force: bool) -> bool {
        let changed = self
            .source_times
            .borrow()
            .iter()
            .any(|(path, time)| modified_time(path) != *time);

        if !force && !changed {
            return false;
        }

        tracing::info!(program = %self.desc.name, force, "reloading program");
        self.update_source_times();
        self.versions.borrow_mut().clear();
        self.invalidate_active_version();
        true
    }

    #[must_use]
    pub fn cached_version_count(&self) -> usize {
        self.versions.borrow().len()
    }

    fn update_defines(&self, update: impl FnOnce(&mut DefineList)) -> bool {
        let mut defines = self.defines();
        update(&mut defines);

        if defines == *self.defines.borrow() {
            return false;
        }

        *self.defines.borrow_mut() = defines;
        self.invalidate_active_version();
        true
    }

    fn invalidate_active_version(&self) {
        *self.active_version.borrow_mut() = None;
    }

    fn update_source_times(&self) {
        *self.source_times.borrow_mut() = self
            .desc
            .sources
            .iter()
            .filter_map(|source| match source {
                ShaderSource::File(path) => Some((path.clone(), modified_time(path))),
                ShaderSource::String { .. } => None,
            })
            .collect();
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.unregister_program_for_reload(self);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs::File,
        time::{Duration, UNIX_EPOCH},
    };

    use super::*;
    use crate::test_support::gfx_device;

    const SOURCE: &str = "
        @compute @workgroup_size(1)
        fn main() {
        #ifdef DOUBLE
            let scale = 2.0;
        #else
            let scale = 1.0;
        #endif
        }
    ";

    fn program() -> (Rc<Program>, Rc<ProgramManager>) {
        let manager = ProgramManager::new(gfx_device());
        let program = Program::new(
            &manager,
            ProgramDesc::new("defines")
                .add_shader_string("defines.wgsl", SOURCE)
                .cs_entry("main"),
            DefineList::new(),
        );
        (program, manager)
    }

    #[test]
    fn one_version_per_define_set() {
        let (program, manager) = program();

        let plain = program.active_version().unwrap();
        assert!(Rc::ptr_eq(&plain, &program.active_version().unwrap()));

        assert!(program.add_define("DOUBLE", ""));
        assert!(!program.add_define("DOUBLE", ""), "unchanged");
        let doubled = program.active_version().unwrap();
        assert!(!Rc::ptr_eq(&plain, &doubled));
        assert!(doubled.defines().contains("DOUBLE"));

        assert!(program.remove_define("DOUBLE"));
        assert!(!program.remove_define("DOUBLE"));
        assert!(Rc::ptr_eq(&plain, &program.active_version().unwrap()));

        assert_eq!(program.cached_version_count(), 2);
        assert_eq!(manager.compilation_stats().program_version_count, 2);
    }

    #[test]
    fn define_list_operations() {
        let (program, _manager) = program();
        let list: DefineList = [("A", "1"), ("B", "2")].into_iter().collect();

        assert!(program.add_defines(&list));
        assert!(!program.add_defines(&list));
        assert!(program.remove_defines(&list));
        assert!(program.defines().is_empty());

        assert!(program.set_defines(list.clone()));
        assert_eq!(program.defines(), list);
    }

    #[test]
    fn reload_detects_modified_files() {
        let path = std::env::temp_dir().join(format!("kiln-reload-{}.wgsl", std::process::id()));
        std::fs::write(&path, "@compute @workgroup_size(1) fn main() {}").unwrap();
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(UNIX_EPOCH + Duration::from_secs(1_000))
            .unwrap();

        let manager = ProgramManager::new(gfx_device());
        let program = Program::new(
            &manager,
            ProgramDesc::new("file").add_shader_file(&path).cs_entry("main"),
            DefineList::new(),
        );
        let first = program.active_version().unwrap();
        assert!(!program.reload(false));

        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(UNIX_EPOCH + Duration::from_secs(2_000))
            .unwrap();
        assert!(program.reload(false));
        assert!(!program.reload(false), "times were refreshed");

        let second = program.active_version().unwrap();
        assert!(!Rc::ptr_eq(&first, &second));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn dropped_manager_is_reported() {
        let (program, manager) = program();
        drop(manager);

        assert!(matches!(
            program.active_version(),
            Err(Error::DeviceDestroyed)
        ));
    }
}
