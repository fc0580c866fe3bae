use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::time::Duration;

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::autosave::DEFAULT_DEBOUNCE;
use crate::filter::DateFilter;

pub const DEFAULT_RC_FILE: &str =
  "docketrc";

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    let mut map = HashMap::new();
    map.insert(
      "data.location".to_string(),
      "data".to_string()
    );
    map.insert(
      "autosave.delay".to_string(),
      DEFAULT_DEBOUNCE
        .as_millis()
        .to_string()
    );
    map.insert(
      "color".to_string(),
      "on".to_string()
    );
    map.insert(
      "default.filter.date".to_string(),
      "all".to_string()
    );
    Self {
      map,
      loaded_files: vec![]
    }
  }
}

impl Config {
  /// Defaults, then the rc file: the
  /// explicit one, else `./docketrc`
  /// when it exists.
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let rc = match rc_override {
      | Some(path) => {
        Some(path.to_path_buf())
      }
      | None => {
        let candidate =
          PathBuf::from(DEFAULT_RC_FILE);
        candidate
          .exists()
          .then_some(candidate)
      }
    };

    if let Some(path) = rc {
      info!(rc = %path.display(), "loading rc file");
      cfg.load_file(&path)?;
    } else {
      debug!(
        "no rc file found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  /// `Ok(None)` when unset; an
  /// unrecognized value is an error.
  pub fn get_bool(
    &self,
    key: &str
  ) -> anyhow::Result<Option<bool>> {
    let Some(raw) = self.map.get(key)
    else {
      return Ok(None);
    };
    parse_bool(raw)
      .map(Some)
      .ok_or_else(|| {
        anyhow!(
          "invalid {key} setting: {raw}"
        )
      })
  }

  pub fn data_dir(&self) -> PathBuf {
    let raw = self
      .get("data.location")
      .unwrap_or_else(|| {
        "data".to_string()
      });
    expand_tilde(Path::new(&raw))
  }

  pub fn autosave_delay(
    &self
  ) -> anyhow::Result<Duration> {
    let Some(raw) =
      self.get("autosave.delay")
    else {
      return Ok(DEFAULT_DEBOUNCE);
    };
    let millis = raw
      .trim()
      .parse::<u64>()
      .with_context(|| {
        format!(
          "autosave.delay must be \
           milliseconds, got '{raw}'"
        )
      })?;
    Ok(Duration::from_millis(millis))
  }

  pub fn default_date_filter(
    &self
  ) -> anyhow::Result<DateFilter> {
    match self
      .get("default.filter.date")
    {
      | Some(raw) => {
        raw
          .parse::<DateFilter>()
          .context(
            "invalid \
             default.filter.date"
          )
      }
      | None => Ok(DateFilter::All)
    }
  }

  pub fn time_zone(
    &self
  ) -> Option<String> {
    self
      .get("time.zone")
      .map(|raw| raw.trim().to_string())
      .filter(|raw| !raw.is_empty())
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let mut line = raw_line.trim();
      if line.is_empty()
        || line.starts_with('#')
      {
        continue;
      }

      if let Some((before, _)) =
        line.split_once('#')
      {
        line = before.trim();
      }

      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if self
          .loaded_files
          .contains(&include_path)
        {
          warn!(include = %include_path.display(), "include cycle; skipping");
        } else if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> Option<bool> {
  match s
    .trim()
    .to_ascii_lowercase()
    .as_str()
  {
    | "1" | "y" | "yes" | "on"
    | "true" => Some(true),
    | "0" | "n" | "no" | "off"
    | "false" => Some(false),
    | _ => None
  }
}

#[cfg(test)]
mod tests {
  use std::fs;
  use std::path::PathBuf;
  use std::time::Duration;

  use tempfile::tempdir;

  use super::Config;
  use crate::filter::DateFilter;

  #[test]
  fn defaults_match_documented_values()
  {
    let cfg = Config::default();
    assert_eq!(
      cfg.data_dir(),
      PathBuf::from("data")
    );
    assert_eq!(
      cfg.autosave_delay().unwrap(),
      Duration::from_secs(1)
    );
    assert_eq!(
      cfg.get_bool("color").unwrap(),
      Some(true)
    );
    assert_eq!(
      cfg
        .default_date_filter()
        .unwrap(),
      DateFilter::All
    );
    assert!(cfg.time_zone().is_none());
  }

  #[test]
  fn rc_file_with_include_and_overrides()
  {
    let temp = tempdir().unwrap();
    let extra = temp.path().join("extra");
    fs::write(
      &extra,
      "autosave.delay = 250\n"
    )
    .unwrap();
    let rc = temp.path().join("docketrc");
    fs::write(
      &rc,
      "# docket settings\n\
       data.location = /tmp/docket # trailing\n\
       include extra\n\
       color = off\n"
    )
    .unwrap();

    let mut cfg =
      Config::load(Some(&rc)).unwrap();
    assert_eq!(
      cfg.data_dir(),
      PathBuf::from("/tmp/docket")
    );
    assert_eq!(
      cfg.autosave_delay().unwrap(),
      Duration::from_millis(250)
    );
    assert_eq!(
      cfg.get_bool("color").unwrap(),
      Some(false)
    );
    assert_eq!(cfg.loaded_files.len(), 2);

    cfg.apply_overrides(vec![(
      "rc.default.filter.date"
        .to_string(),
      "overdue".to_string()
    )]);
    assert_eq!(
      cfg
        .default_date_filter()
        .unwrap(),
      DateFilter::Overdue
    );
  }

  #[test]
  fn bad_lines_and_values_are_errors() {
    let temp = tempdir().unwrap();
    let rc = temp.path().join("docketrc");
    fs::write(&rc, "no equals here\n")
      .unwrap();
    assert!(
      Config::load(Some(&rc)).is_err()
    );

    let mut cfg = Config::default();
    cfg.apply_overrides(vec![(
      "autosave.delay".to_string(),
      "soon".to_string()
    )]);
    assert!(
      cfg.autosave_delay().is_err()
    );

    cfg.apply_overrides(vec![(
      "color".to_string(),
      "sometimes".to_string()
    )]);
    assert!(
      cfg.get_bool("color").is_err()
    );
    assert_eq!(
      cfg.get_bool("unset.key").unwrap(),
      None
    );
  }

  #[test]
  fn missing_explicit_rc_is_an_error() {
    let temp = tempdir().unwrap();
    assert!(
      Config::load(Some(
        &temp.path().join("nope")
      ))
      .is_err()
    );
  }
}
