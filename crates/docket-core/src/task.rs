use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::datetime::{self, iso_date_serde};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub is_completed: bool,

    /// Raw comma-delimited tag text, stored as typed.
    #[serde(default)]
    pub tags: String,

    #[serde(default, with = "iso_date_serde::option")]
    pub due_date: Option<NaiveDateTime>,
}

impl Task {
    pub fn new(title: impl Into<String>, tags: impl Into<String>, due_date: Option<NaiveDateTime>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            is_completed: false,
            tags: tags.into(),
            due_date,
        }
    }

    /// Trimmed, de-duplicated tags in order of first occurrence.
    pub fn tag_list(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for raw in self.tags.split(',') {
            let tag = raw.trim();
            if tag.is_empty() || out.iter().any(|seen| seen == tag) {
                continue;
            }
            out.push(tag.to_string());
        }
        out
    }

    pub fn due_day(&self) -> Option<NaiveDate> {
        self.due_date.map(|due| due.date())
    }

    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        !self.is_completed && self.due_day().map(|due| due < today).unwrap_or(false)
    }

    pub fn is_overdue_now(&self) -> bool {
        self.is_overdue(datetime::today())
    }

    pub fn due_display(&self) -> String {
        self.due_date.map(datetime::format_due).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::Task;
    use crate::datetime::start_of_day;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn tag_list_trims_dedups_and_keeps_order() {
        let task = Task::new("t", " home ,work,, home,  ,errand,work", None);
        assert_eq!(task.tag_list(), vec!["home", "work", "errand"]);
    }

    #[test]
    fn tag_list_of_blank_text_is_empty() {
        assert!(Task::new("t", "", None).tag_list().is_empty());
        assert!(Task::new("t", " , ,", None).tag_list().is_empty());
    }

    #[test]
    fn overdue_is_strictly_before_today_and_ignores_time() {
        let today = day(2026, 10, 18);
        let mut task = Task::new("t", "", Some(day(2026, 10, 17).and_hms_opt(23, 59, 0).unwrap()));
        assert!(task.is_overdue(today));

        task.due_date = Some(start_of_day(today));
        assert!(!task.is_overdue(today));

        task.due_date = None;
        assert!(!task.is_overdue(today));
    }

    #[test]
    fn completed_task_is_never_overdue() {
        let today = day(2026, 10, 18);
        let mut task = Task::new("t", "", Some(start_of_day(day(2020, 1, 1))));
        task.is_completed = true;
        assert!(!task.is_overdue(today));
    }

    #[test]
    fn new_tasks_get_distinct_ids() {
        let a = Task::new("a", "", None);
        let b = Task::new("a", "", None);
        assert_ne!(a.id, b.id);
        assert!(!a.is_completed);
    }

    #[test]
    fn serializes_with_camel_case_fields() {
        let mut task = Task::new("Buy milk", "shop", Some(start_of_day(day(2026, 10, 20))));
        task.id = "abc".to_string();
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["id"], "abc");
        assert_eq!(json["isCompleted"], false);
        assert_eq!(json["tags"], "shop");
        assert_eq!(json["dueDate"], "2026-10-20T00:00:00");
        assert_eq!(task.due_display(), "2026-10-20");
    }

    #[test]
    fn missing_optional_fields_default() {
        let task: Task = serde_json::from_str(r#"{"id":"x","title":"t","dueDate":null}"#).unwrap();
        assert!(!task.is_completed);
        assert_eq!(task.tags, "");
        assert!(task.due_date.is_none());
    }
}
