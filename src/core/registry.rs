//! Process registry - The single record of which scripts are running

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use super::process::ProcessControl;
use super::resource::ResourceSample;
use super::script::RunId;

/// A running script owned by the registry until it is removed
#[derive(Debug, Clone)]
pub struct ManagedProcess {
    /// Script title (registry key)
    pub title: String,
    /// Identifies this particular execution of the title
    pub run_id: RunId,
    /// Operating system process ID (also the process group ID)
    pub pid: u32,
    /// Staged script file, deleted when the process ends
    pub temp_path: PathBuf,
    /// When the process was spawned
    pub started_at: DateTime<Utc>,
    control: ProcessControl,
}

impl ManagedProcess {
    pub(crate) fn new(
        title: impl Into<String>,
        pid: u32,
        temp_path: PathBuf,
        control: ProcessControl,
    ) -> Self {
        Self {
            title: title.into(),
            run_id: RunId::new(),
            pid,
            temp_path,
            started_at: Utc::now(),
            control,
        }
    }

    /// Kill and exit-wait handle for the process
    pub fn control(&self) -> &ProcessControl {
        &self.control
    }

    pub fn has_exited(&self) -> bool {
        self.control.has_exited()
    }

    /// Get uptime duration
    pub fn uptime(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }
}

/// A registry entry: the process plus its last resource sample
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub process: ManagedProcess,
    /// Absent until the first successful sampling tick
    pub sample: Option<ResourceSample>,
}

/// Concurrency-safe map of title to running process.
///
/// Every operation takes the lock once, so callers never observe a half-applied
/// insert or removal. The backing map is never handed out; readers get copies.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    inner: Arc<RwLock<BTreeMap<String, RegistryEntry>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, RegistryEntry>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, RegistryEntry>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or overwrite, returning the process that was replaced
    pub fn put(&self, process: ManagedProcess) -> Option<ManagedProcess> {
        let title = process.title.clone();
        self.write()
            .insert(
                title,
                RegistryEntry {
                    process,
                    sample: None,
                },
            )
            .map(|old| old.process)
    }

    /// Insert only if the title is free; hands the process back otherwise
    pub fn try_insert(&self, process: ManagedProcess) -> Result<(), ManagedProcess> {
        let mut map = self.write();
        if map.contains_key(&process.title) {
            return Err(process);
        }
        map.insert(
            process.title.clone(),
            RegistryEntry {
                process,
                sample: None,
            },
        );
        Ok(())
    }

    pub fn get(&self, title: &str) -> Option<ManagedProcess> {
        self.read().get(title).map(|e| e.process.clone())
    }

    pub fn entry(&self, title: &str) -> Option<RegistryEntry> {
        self.read().get(title).cloned()
    }

    pub fn sample(&self, title: &str) -> Option<ResourceSample> {
        self.read().get(title).and_then(|e| e.sample)
    }

    pub fn contains(&self, title: &str) -> bool {
        self.read().contains_key(title)
    }

    /// Remove a title. Removing an absent title is a no-op.
    pub fn remove(&self, title: &str) -> Option<ManagedProcess> {
        self.write().remove(title).map(|e| e.process)
    }

    /// Remove a title only while it still belongs to `run_id`
    pub fn remove_run(&self, title: &str, run_id: RunId) -> bool {
        self.remove_run_with(title, run_id, || {})
    }

    /// Like `remove_run`, calling `on_removed` before the write lock is
    /// released. Anything it publishes is ordered after every sample update.
    pub fn remove_run_with(&self, title: &str, run_id: RunId, on_removed: impl FnOnce()) -> bool {
        let mut map = self.write();
        if map.get(title).is_some_and(|e| e.process.run_id == run_id) {
            map.remove(title);
            on_removed();
            true
        } else {
            false
        }
    }

    /// Attach a sample to a title only while it still belongs to `run_id`
    pub fn update_sample(&self, title: &str, run_id: RunId, sample: ResourceSample) -> bool {
        self.update_sample_with(title, run_id, sample, |_| {})
    }

    /// Like `update_sample`, calling `on_updated` while the write lock is held,
    /// so it can never run after the run has been removed
    pub fn update_sample_with(
        &self,
        title: &str,
        run_id: RunId,
        sample: ResourceSample,
        on_updated: impl FnOnce(&ResourceSample),
    ) -> bool {
        match self.write().get_mut(title) {
            Some(entry) if entry.process.run_id == run_id => {
                entry.sample = Some(sample);
                on_updated(&sample);
                true
            }
            _ => false,
        }
    }

    /// Copy of all entries, ordered by title
    pub fn snapshot(&self) -> Vec<RegistryEntry> {
        self.read().values().cloned().collect()
    }

    pub fn titles(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Remove every entry, returning what was registered
    pub fn clear(&self) -> Vec<ManagedProcess> {
        std::mem::take(&mut *self.write())
            .into_values()
            .map(|e| e.process)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process(title: &str, pid: u32) -> ManagedProcess {
        let (control, _handle) = ProcessControl::new();
        ManagedProcess::new(title, pid, PathBuf::from(format!("/tmp/{title}.sh")), control)
    }

    #[test]
    fn test_put_get_remove() {
        let registry = ProcessRegistry::new();
        assert!(registry.put(process("build", 10)).is_none());

        assert_eq!(registry.get("build").map(|p| p.pid), Some(10));
        assert_eq!(registry.count(), 1);

        let replaced = registry.put(process("build", 11)).unwrap();
        assert_eq!(replaced.pid, 10);
        assert_eq!(registry.get("build").map(|p| p.pid), Some(11));

        assert!(registry.remove("build").is_some());
        assert!(registry.remove("build").is_none());
        assert!(registry.get("build").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_try_insert_rejects_taken_title() {
        let registry = ProcessRegistry::new();
        registry.try_insert(process("dup", 1)).unwrap();

        let rejected = registry.try_insert(process("dup", 2)).unwrap_err();
        assert_eq!(rejected.pid, 2);
        assert_eq!(registry.get("dup").map(|p| p.pid), Some(1));
    }

    #[test]
    fn test_stale_run_cannot_remove_or_update_newer_run() {
        let registry = ProcessRegistry::new();
        let old = process("svc", 1);
        let old_run = old.run_id;
        registry.put(old);
        registry.remove("svc");

        let new = process("svc", 2);
        let new_run = new.run_id;
        registry.put(new);

        assert!(!registry.update_sample("svc", old_run, ResourceSample::new(1.0, 1)));
        assert!(!registry.remove_run("svc", old_run));
        assert_eq!(registry.get("svc").map(|p| p.pid), Some(2));
        assert!(registry.sample("svc").is_none());

        assert!(registry.update_sample("svc", new_run, ResourceSample::new(2.0, 2048)));
        assert_eq!(registry.sample("svc").map(|s| s.memory_kb), Some(2048));
        assert!(registry.remove_run("svc", new_run));
        assert!(!registry.contains("svc"));
    }

    #[test]
    fn test_no_sample_callback_runs_after_removal_callback() {
        let registry = ProcessRegistry::new();
        let proc = process("busy", 5);
        let run = proc.run_id;
        registry.put(proc);
        let events = Arc::new(std::sync::Mutex::new(Vec::new()));

        let sampler = {
            let registry = registry.clone();
            let events = Arc::clone(&events);
            std::thread::spawn(move || {
                let sample = ResourceSample::new(1.0, 1);
                while registry.update_sample_with("busy", run, sample, |_| {
                    events.lock().unwrap().push("running");
                }) {}
            })
        };

        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(registry.remove_run_with("busy", run, || {
            events.lock().unwrap().push("stopped");
        }));
        sampler.join().unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.last(), Some(&"stopped"));
        assert_eq!(events.iter().filter(|e| **e == "stopped").count(), 1);

        let mut called = false;
        assert!(!registry.update_sample_with("busy", run, ResourceSample::new(2.0, 2), |_| {
            called = true;
        }));
        assert!(!registry.remove_run_with("busy", run, || called = true));
        assert!(!called);
    }

    #[test]
    fn test_snapshot_is_ordered_and_detached() {
        let registry = ProcessRegistry::new();
        registry.put(process("zeta", 3));
        registry.put(process("alpha", 1));
        registry.put(process("mid", 2));

        let snapshot = registry.snapshot();
        registry.remove("alpha");
        registry.put(process("beta", 4));

        let titles: Vec<_> = snapshot.iter().map(|e| e.process.title.as_str()).collect();
        assert_eq!(titles, ["alpha", "mid", "zeta"]);
        assert_eq!(registry.titles(), ["beta", "mid", "zeta"]);
    }

    #[test]
    fn test_clear_empties_registry() {
        let registry = ProcessRegistry::new();
        registry.put(process("a", 1));
        registry.put(process("b", 2));

        let cleared = registry.clear();
        assert_eq!(cleared.len(), 2);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_concurrent_inserts_are_all_visible() {
        let registry = ProcessRegistry::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    registry.put(process(&format!("t{i}"), i));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.count(), 8);
    }
}
