use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::task::Task;

pub const TASKS_FILE: &str = "tasks.json";

/// Where the coordinator sends snapshots.
pub trait SaveTarget: Send + Sync {
    fn save(&self, tasks: &[Task]) -> anyhow::Result<()>;
}

#[derive(Debug)]
pub struct DataStore {
    pub data_dir: PathBuf,
    pub tasks_path: PathBuf,
    // Held for the whole of every read or write of a task file.
    gate: Mutex<()>,
}

impl DataStore {
    pub fn open(data_dir: &Path) -> Self {
        let data_dir = data_dir.to_path_buf();
        let tasks_path = data_dir.join(TASKS_FILE);

        info!(
            data_dir = %data_dir.display(),
            tasks = %tasks_path.display(),
            "opened datastore"
        );

        Self {
            data_dir,
            tasks_path,
            gate: Mutex::new(()),
        }
    }

    /// Never fails: a missing, empty, unreadable or malformed file all mean
    /// "no tasks".
    #[tracing::instrument(skip(self))]
    pub fn load(&self) -> Vec<Task> {
        let _gate = self.gate.lock();
        match read_tasks(&self.tasks_path) {
            Ok(Some(tasks)) => {
                info!(count = tasks.len(), "loaded tasks");
                tasks
            }
            Ok(None) => {
                debug!(file = %self.tasks_path.display(), "no persisted tasks");
                Vec::new()
            }
            Err(err) => {
                warn!(
                    file = %self.tasks_path.display(),
                    error = %format!("{err:#}"),
                    "could not load tasks; starting empty"
                );
                Vec::new()
            }
        }
    }

    /// Reads a file chosen by the user; unlike `load`, failures are reported.
    #[tracing::instrument(skip(self, path), fields(file = %path.display()))]
    pub fn load_strict(&self, path: &Path) -> anyhow::Result<Vec<Task>> {
        let _gate = self.gate.lock();
        match read_tasks(path)? {
            Some(tasks) => Ok(tasks),
            None if path.exists() => Ok(Vec::new()),
            None => Err(anyhow!("{} does not exist", path.display())),
        }
    }

    #[tracing::instrument(skip(self, tasks), fields(count = tasks.len()))]
    pub fn save(&self, tasks: &[Task]) -> anyhow::Result<()> {
        let _gate = self.gate.lock();
        save_json_atomic(&self.tasks_path, tasks)
            .with_context(|| format!("failed to save {}", self.tasks_path.display()))
    }

    #[tracing::instrument(skip(self, path, tasks), fields(file = %path.display(), count = tasks.len()))]
    pub fn export_to(&self, path: &Path, tasks: &[Task]) -> anyhow::Result<()> {
        let _gate = self.gate.lock();
        save_json_atomic(path, tasks).with_context(|| format!("failed to export {}", path.display()))
    }
}

impl SaveTarget for DataStore {
    fn save(&self, tasks: &[Task]) -> anyhow::Result<()> {
        DataStore::save(self, tasks)
    }
}

/// `Ok(None)` when the file is absent or blank.
fn read_tasks(path: &Path) -> anyhow::Result<Option<Vec<Task>>> {
    debug!(file = %path.display(), "reading tasks json");
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed reading {}", path.display()));
        }
    };

    if raw.trim().is_empty() {
        return Ok(None);
    }

    let tasks: Vec<Task> =
        serde_json::from_str(&raw).with_context(|| format!("failed parsing {}", path.display()))?;
    Ok(Some(tasks))
}

fn save_json_atomic(path: &Path, tasks: &[Task]) -> anyhow::Result<()> {
    debug!(file = %path.display(), count = tasks.len(), "saving json atomically");

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let mut temp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut temp, tasks)?;
    writeln!(temp)?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::{Arc, mpsc};
    use std::thread;
    use std::time::Duration;

    use tempfile::tempdir;

    use super::DataStore;
    use crate::task::Task;

    #[test]
    fn missing_directory_is_created_on_save() {
        let temp = tempdir().unwrap();
        let store = DataStore::open(&temp.path().join("nested").join("data"));
        assert!(store.load().is_empty());

        store.save(&[Task::new("a", "", None)]).unwrap();
        assert!(store.tasks_path.exists());
        assert_eq!(store.load().len(), 1);
    }

    #[test]
    fn empty_and_malformed_files_load_as_empty() {
        let temp = tempdir().unwrap();
        let store = DataStore::open(temp.path());

        fs::write(&store.tasks_path, "").unwrap();
        assert!(store.load().is_empty());

        fs::write(&store.tasks_path, "  \n").unwrap();
        assert!(store.load().is_empty());

        fs::write(&store.tasks_path, "[{\"id\": ").unwrap();
        assert!(store.load().is_empty());

        fs::write(&store.tasks_path, "{\"not\": \"an array\"}").unwrap();
        assert!(store.load().is_empty());
    }

    #[test]
    fn strict_load_reports_failures() {
        let temp = tempdir().unwrap();
        let store = DataStore::open(temp.path());
        let path = temp.path().join("import.json");

        assert!(store.load_strict(&path).is_err());

        fs::write(&path, "garbage").unwrap();
        let err = store.load_strict(&path).unwrap_err();
        assert!(format!("{err:#}").contains("failed parsing"));

        fs::write(&path, "").unwrap();
        assert!(store.load_strict(&path).unwrap().is_empty());
    }

    #[test]
    fn saved_file_is_an_indented_array() {
        let temp = tempdir().unwrap();
        let store = DataStore::open(temp.path());
        store.save(&[Task::new("a", "x", None)]).unwrap();

        let raw = fs::read_to_string(&store.tasks_path).unwrap();
        assert!(raw.starts_with("[\n  {"));
        assert!(raw.contains("\"isCompleted\": false"));
        assert!(raw.contains("\"dueDate\": null"));
        assert!(raw.ends_with("]\n"));
    }

    fn titled(prefix: &str, n: usize) -> Vec<Task> {
        (0..n).map(|i| Task::new(format!("{prefix}{i}"), "tag", None)).collect()
    }

    #[test]
    fn every_file_operation_waits_for_the_gate() {
        let temp = tempdir().unwrap();
        let store = Arc::new(DataStore::open(temp.path()));
        store.save(&titled("t", 2)).unwrap();
        let side = temp.path().join("side.json");
        store.export_to(&side, &titled("s", 1)).unwrap();

        let ops: Vec<Box<dyn Fn(&DataStore) + Send>> = vec![
            Box::new(|s: &DataStore| {
                s.load();
            }),
            Box::new(|s: &DataStore| s.save(&titled("t", 3)).unwrap()),
            Box::new({
                let side = side.clone();
                move |s: &DataStore| {
                    s.load_strict(&side).unwrap();
                }
            }),
            Box::new({
                let side = side.clone();
                move |s: &DataStore| s.export_to(&side, &titled("s", 2)).unwrap()
            }),
        ];

        for op in ops {
            let guard = store.gate.lock();
            let (tx, rx) = mpsc::channel();
            let worker = {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    op(&store);
                    tx.send(()).unwrap();
                })
            };

            assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
            drop(guard);
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
            worker.join().unwrap();
        }
    }

    #[test]
    fn loads_during_saves_see_whole_collections() {
        let temp = tempdir().unwrap();
        let store = Arc::new(DataStore::open(temp.path()));
        let small = titled("a", 50);
        let large = titled("b", 400);
        store.save(&small).unwrap();

        let writer = {
            let store = Arc::clone(&store);
            let (small, large) = (small.clone(), large.clone());
            thread::spawn(move || {
                for round in 0..40 {
                    let tasks = if round % 2 == 0 { &large } else { &small };
                    store.save(tasks).unwrap();
                }
            })
        };
        let exporter = {
            let store = Arc::clone(&store);
            let path = temp.path().join("export.json");
            thread::spawn(move || {
                for _ in 0..40 {
                    let tasks = store.load();
                    store.export_to(&path, &tasks).unwrap();
                    let back = store.load_strict(&path).unwrap();
                    assert!(back.len() == 50 || back.len() == 400);
                }
            })
        };

        for _ in 0..80 {
            let seen = store.load();
            assert!(seen == small || seen == large, "partial read of {} tasks", seen.len());
        }

        writer.join().unwrap();
        exporter.join().unwrap();
    }
}
