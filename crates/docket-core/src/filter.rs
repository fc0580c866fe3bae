use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{
  Days,
  NaiveDate
};
use tracing::trace;

use crate::task::Task;

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
)]
pub enum DateFilter {
  #[default]
  All,
  Today,
  Week,
  Overdue
}

impl DateFilter {
  pub const ALL: [DateFilter; 4] = [
    DateFilter::All,
    DateFilter::Today,
    DateFilter::Week,
    DateFilter::Overdue
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      | DateFilter::All => "all",
      | DateFilter::Today => "today",
      | DateFilter::Week => "week",
      | DateFilter::Overdue => {
        "overdue"
      }
    }
  }
}

impl fmt::Display for DateFilter {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for DateFilter {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "all" => Ok(DateFilter::All),
      | "today" => Ok(DateFilter::Today),
      | "week" => Ok(DateFilter::Week),
      | "overdue" => {
        Ok(DateFilter::Overdue)
      }
      | other => {
        Err(anyhow!(
          "unknown date filter \
           '{other}'; expected all, \
           today, week or overdue"
        ))
      }
    }
  }
}

/// Active view criteria. Both parts
/// apply conjunctively.
#[derive(
  Debug, Clone, Default, PartialEq, Eq,
)]
pub struct ViewFilter {
  pub date: DateFilter,
  pub tag:  String
}

impl ViewFilter {
  pub fn new(
    date: DateFilter,
    tag: impl Into<String>
  ) -> Self {
    Self {
      date,
      tag: tag.into()
    }
  }

  pub fn matches(
    &self,
    task: &Task,
    today: NaiveDate
  ) -> bool {
    let date_ok = matches_date(
      self.date, task, today
    );
    let tag_ok =
      matches_tag(&self.tag, task);
    trace!(
      id = %task.id,
      date = %self.date,
      date_ok,
      tag_ok,
      "view filter evaluation"
    );
    date_ok && tag_ok
  }
}

/// Derives the visible subset. Output
/// keeps input order.
#[tracing::instrument(skip(
  tasks, filter, today
))]
pub fn compute_view(
  tasks: &[Task],
  filter: &ViewFilter,
  today: NaiveDate
) -> Vec<Task> {
  tasks
    .iter()
    .filter(|task| {
      filter.matches(task, today)
    })
    .cloned()
    .collect()
}

fn matches_date(
  date_filter: DateFilter,
  task: &Task,
  today: NaiveDate
) -> bool {
  match date_filter {
    | DateFilter::All => true,
    | DateFilter::Today => {
      task.due_day() == Some(today)
    }
    | DateFilter::Week => {
      let horizon = today
        .checked_add_days(Days::new(7))
        .unwrap_or(NaiveDate::MAX);
      task
        .due_day()
        .map(|due| {
          due >= today && due <= horizon
        })
        .unwrap_or(false)
    }
    | DateFilter::Overdue => {
      task.is_overdue(today)
    }
  }
}

// Raw tag text, not the parsed list.
fn matches_tag(
  needle: &str,
  task: &Task
) -> bool {
  if needle.trim().is_empty() {
    return true;
  }
  task
    .tags
    .to_lowercase()
    .contains(&needle.to_lowercase())
}
