use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use chrono::NaiveDateTime;
use tokio::runtime::Handle;
use tracing::{debug, info, instrument};

use crate::autosave::{AutoSaver, SaveState, SaveStatus};
use crate::config::Config;
use crate::datastore::{DataStore, SaveTarget};
use crate::datetime;
use crate::filter::{DateFilter, ViewFilter, compute_view};
use crate::store::TaskStore;
use crate::task::Task;

/// Field changes for [`App::edit_task`]; `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub tags: Option<String>,
    pub due: Option<Option<NaiveDateTime>>,
    pub completed: Option<bool>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self == &TaskPatch::default()
    }
}

/// The calls a front end makes: mutations, filter changes, the current
/// view and the save status.
pub struct App {
    store: TaskStore,
    datastore: Arc<DataStore>,
    saver: Arc<AutoSaver>,
    filter: ViewFilter,
}

impl App {
    pub fn start(cfg: &Config, runtime: Handle) -> anyhow::Result<Self> {
        let data_dir = cfg.data_dir();
        let delay = cfg.autosave_delay()?;
        let date = cfg.default_date_filter()?;
        let datastore = Arc::new(DataStore::open(&data_dir));
        Ok(Self::with_datastore(datastore, runtime, delay, ViewFilter::new(date, "")))
    }

    /// Loads persisted tasks with auto-save off, then turns it on.
    #[instrument(skip_all, fields(data_dir = %datastore.data_dir.display()))]
    pub fn with_datastore(
        datastore: Arc<DataStore>,
        runtime: Handle,
        delay: Duration,
        filter: ViewFilter,
    ) -> Self {
        let mut store = TaskStore::new();
        let target: Arc<dyn SaveTarget> = Arc::clone(&datastore) as Arc<dyn SaveTarget>;
        let saver = Arc::new(AutoSaver::new(runtime, target, store.reader(), delay));
        store.subscribe(AutoSaver::listener(&saver));

        let loaded = datastore.load();
        store.replace_all(loaded);
        saver.enable();

        info!(tasks = store.len(), filter = %filter.date, "app started");

        Self {
            store,
            datastore,
            saver,
            filter,
        }
    }

    pub fn view(&self) -> Vec<Task> {
        compute_view(&self.store.snapshot(), &self.filter, datetime::today())
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.store.snapshot()
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.store.get(id)
    }

    pub fn filter(&self) -> &ViewFilter {
        &self.filter
    }

    pub fn status(&self) -> SaveStatus {
        self.saver.status()
    }

    pub fn save_state(&self) -> SaveState {
        self.saver.state()
    }

    pub fn saver(&self) -> &Arc<AutoSaver> {
        &self.saver
    }

    pub fn datastore(&self) -> &DataStore {
        &self.datastore
    }

    #[instrument(skip(self, title, tags))]
    pub fn add_task(
        &mut self,
        title: &str,
        tags: &str,
        due: Option<NaiveDateTime>,
    ) -> anyhow::Result<Task> {
        let title = title.trim();
        if title.is_empty() {
            bail!("task title cannot be blank");
        }
        let task = Task::new(title, tags.trim(), due);
        self.store.add(task.clone())?;
        debug!(id = %task.id, "task added");
        Ok(task)
    }

    /// Unknown ids are a no-op; returns whether anything was removed.
    #[instrument(skip(self))]
    pub fn delete_task(&mut self, id: &str) -> bool {
        self.store.remove(id).is_some()
    }

    #[instrument(skip(self))]
    pub fn edit_task(&mut self, id: &str, patch: TaskPatch) -> anyhow::Result<Task> {
        if let Some(title) = patch.title.as_deref()
            && title.trim().is_empty()
        {
            bail!("task title cannot be blank");
        }

        self.store
            .update(id, |task| apply_patch(task, patch))
            .ok_or_else(|| anyhow!("task not found: {id}"))
    }

    pub fn set_completed(&mut self, id: &str, completed: bool) -> anyhow::Result<Task> {
        self.edit_task(
            id,
            TaskPatch {
                completed: Some(completed),
                ..TaskPatch::default()
            },
        )
    }

    #[instrument(skip(self))]
    pub fn complete_all(&mut self) -> usize {
        self.store.complete_all()
    }

    #[instrument(skip(self))]
    pub fn clear_completed(&mut self) -> usize {
        self.store.remove_completed()
    }

    pub fn set_date_filter(&mut self, date: DateFilter) {
        debug!(date = %date, "date filter set");
        self.filter.date = date;
    }

    pub fn set_tag_filter(&mut self, text: &str) {
        debug!(tag = text, "tag filter set");
        self.filter.tag = text.to_string();
    }

    #[instrument(skip(self, path), fields(file = %path.display()))]
    pub fn export(&self, path: &Path) -> anyhow::Result<usize> {
        let tasks = self.store.snapshot();
        self.datastore.export_to(path, &tasks)?;
        info!(count = tasks.len(), "tasks exported");
        Ok(tasks.len())
    }

    /// Replaces every task with the file's contents. On error the
    /// collection is left untouched.
    #[instrument(skip(self, path), fields(file = %path.display()))]
    pub fn import(&mut self, path: &Path) -> anyhow::Result<usize> {
        let tasks = self
            .datastore
            .load_strict(path)
            .with_context(|| format!("failed to import {}", path.display()))?;
        self.store.replace_all(tasks);
        let count = self.store.len();
        info!(count, "tasks imported");
        Ok(count)
    }

    /// A 1-based position in the current view, or a unique id prefix.
    pub fn resolve(&self, selector: &str) -> anyhow::Result<String> {
        let selector = selector.trim();
        if selector.is_empty() {
            bail!("missing task selector");
        }

        if let Ok(position) = selector.parse::<usize>() {
            let view = self.view();
            return position
                .checked_sub(1)
                .and_then(|idx| view.get(idx))
                .map(|task| task.id.clone())
                .ok_or_else(|| anyhow!("no task at position {position} in the current view"));
        }

        let mut matches = self
            .store
            .snapshot()
            .into_iter()
            .filter(|task| task.id.starts_with(selector));
        let first = matches
            .next()
            .ok_or_else(|| anyhow!("no task with id starting '{selector}'"))?;
        if matches.next().is_some() {
            bail!("id prefix '{selector}' is ambiguous");
        }
        Ok(first.id)
    }

    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.saver.flush().await
    }
}

fn apply_patch(task: &mut Task, patch: TaskPatch) {
    if let Some(title) = patch.title {
        task.title = title.trim().to_string();
    }
    if let Some(tags) = patch.tags {
        task.tags = tags.trim().to_string();
    }
    if let Some(due) = patch.due {
        task.due_date = due;
    }
    if let Some(completed) = patch.completed {
        task.is_completed = completed;
    }

    debug!(id = %task.id, "task patch applied");
}
