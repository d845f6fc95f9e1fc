//! In-memory container host for unit tests

use super::host::{ContainerHost, ContainerSpec, ContainerState, ExecOutput};
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Mutex;

type Responder = Box<dyn Fn(&str) -> ExecOutput + Send + Sync>;

/// Records every call; `exec` answers through a responder that sees the
/// wrapped shell script. `test -d` probes are answered from `dirs`.
pub struct FakeHost {
    responder: Responder,
    states: Mutex<BTreeMap<String, ContainerState>>,
    dirs: Mutex<BTreeSet<String>>,
    created: Mutex<Vec<ContainerSpec>>,
    removed: Mutex<Vec<String>>,
    execs: Mutex<Vec<(String, String)>>,
    copies: Mutex<Vec<(String, String)>>,
    commits: Mutex<Vec<String>>,
    images: Mutex<BTreeSet<String>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::with_responder(|_| ExecOutput::default())
    }

    pub fn with_responder(responder: impl Fn(&str) -> ExecOutput + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            states: Mutex::new(BTreeMap::new()),
            dirs: Mutex::new(BTreeSet::new()),
            created: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            execs: Mutex::new(Vec::new()),
            copies: Mutex::new(Vec::new()),
            commits: Mutex::new(Vec::new()),
            images: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn set_state(&self, name: &str, state: ContainerState) {
        self.states.lock().unwrap().insert(name.to_string(), state);
    }

    pub fn add_dir(&self, dir: &str) {
        self.dirs.lock().unwrap().insert(dir.to_string());
    }

    pub fn add_image(&self, image: &str) {
        self.images.lock().unwrap().insert(image.to_string());
    }

    pub fn created(&self) -> Vec<ContainerSpec> {
        self.created.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    /// All exec'd scripts with their workdirs, excluding `test -d` probes.
    pub fn execs(&self) -> Vec<(String, String)> {
        self.execs.lock().unwrap().clone()
    }

    pub fn last_exec(&self) -> Option<(String, String)> {
        self.execs.lock().unwrap().last().cloned()
    }

    pub fn copies(&self) -> Vec<(String, String)> {
        self.copies.lock().unwrap().clone()
    }

    pub fn commits(&self) -> Vec<String> {
        self.commits.lock().unwrap().clone()
    }
}

impl ContainerHost for FakeHost {
    fn state(&self, name: &str) -> Result<ContainerState> {
        Ok(self
            .states
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or(ContainerState::Missing))
    }

    fn create(&self, spec: &ContainerSpec) -> Result<()> {
        self.created.lock().unwrap().push(spec.clone());
        self.set_state(&spec.name, ContainerState::Running);
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.removed.lock().unwrap().push(name.to_string());
        self.states.lock().unwrap().remove(name);
        Ok(())
    }

    fn exec(&self, _name: &str, argv: &[String], workdir: &str) -> Result<ExecOutput> {
        if argv.first().map(String::as_str) == Some("test") {
            let exists = argv
                .last()
                .is_some_and(|d| self.dirs.lock().unwrap().contains(d));
            return Ok(ExecOutput {
                exit_code: if exists { 0 } else { 1 },
                ..Default::default()
            });
        }
        let script = argv.last().cloned().unwrap_or_default();
        self.execs
            .lock()
            .unwrap()
            .push((script.clone(), workdir.to_string()));
        Ok((self.responder)(&script))
    }

    fn copy_in(&self, _name: &str, host_path: &Path, container_path: &str) -> Result<()> {
        self.copies
            .lock()
            .unwrap()
            .push((host_path.display().to_string(), container_path.to_string()));
        Ok(())
    }

    fn copy_out(&self, _name: &str, container_path: &str, host_path: &Path) -> Result<()> {
        self.copies
            .lock()
            .unwrap()
            .push((container_path.to_string(), host_path.display().to_string()));
        Ok(())
    }

    fn commit(&self, _name: &str, image: &str) -> Result<()> {
        self.commits.lock().unwrap().push(image.to_string());
        self.add_image(image);
        Ok(())
    }

    fn save(&self, _image: &str, _tarball: &Path) -> Result<()> {
        Ok(())
    }

    fn image_exists(&self, image: &str) -> Result<bool> {
        Ok(self.images.lock().unwrap().contains(image))
    }
}
