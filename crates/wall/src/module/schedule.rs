use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::def::{LibraryError, ModuleLibrary};

pub const DEFAULT_DURATION_SECS: f64 = 60.0;

fn default_duration() -> f64 {
    DEFAULT_DURATION_SECS
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub module: String,
    #[serde(default)]
    pub config: Option<Value>,
    #[serde(default = "default_duration")]
    pub duration_secs: f64,
}

impl ScheduleEntry {
    pub fn new(module: impl Into<String>, duration_secs: f64) -> Self {
        Self {
            module: module.into(),
            config: None,
            duration_secs,
        }
    }
}

/// The playlist. Walks its entries in order and wraps around.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    entries: Vec<ScheduleEntry>,
    cursor: Option<usize>,
}

impl Schedule {
    pub fn new(entries: Vec<ScheduleEntry>) -> Self {
        Self {
            entries,
            cursor: None,
        }
    }

    pub fn advance(&mut self) -> Option<&ScheduleEntry> {
        if self.entries.is_empty() {
            return None;
        }
        let next = self.cursor.map_or(0, |i| (i + 1) % self.entries.len());
        self.cursor = Some(next);
        self.entries.get(next)
    }

    pub fn current(&self) -> Option<&ScheduleEntry> {
        self.entries.get(self.cursor?)
    }

    pub fn validate(&self, library: &ModuleLibrary) -> Result<(), LibraryError> {
        for entry in &self.entries {
            library.get(&entry.module)?;
        }
        Ok(())
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::def::ModuleDef;

    #[test]
    fn cycles() {
        let mut schedule = Schedule::new(vec![
            ScheduleEntry::new("a", 10.0),
            ScheduleEntry::new("b", 20.0),
        ]);
        assert!(schedule.current().is_none());

        let names: Vec<String> = (0..5)
            .filter_map(|_| schedule.advance().map(|e| e.module.clone()))
            .collect();
        assert_eq!(names, ["a", "b", "a", "b", "a"]);
        assert_eq!(schedule.current().map(|e| e.duration_secs), Some(10.0));
    }

    #[test]
    fn empty_schedule_never_advances() {
        let mut schedule = Schedule::default();
        assert!(schedule.advance().is_none());
    }

    #[test]
    fn validate_reports_unknown_modules() {
        let library = ModuleLibrary::from_defs([ModuleDef::new("a")]).unwrap();
        let schedule = Schedule::new(vec![ScheduleEntry::new("a", 1.0), ScheduleEntry::new("zzz", 1.0)]);
        assert_eq!(
            schedule.validate(&library),
            Err(LibraryError::Unknown("zzz".into()))
        );
    }
}
