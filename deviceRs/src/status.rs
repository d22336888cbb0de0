//! Snapshot of the status commands of a device.

use std::fmt;

use chrono::{DateTime, Local};

/// Format of the timestamp of a status poll.
const TIMESTAMP_FORMAT: &str = "%H:%M:%S %d/%m/%y";

/// The replies of the last status poll of a device.
///
/// The snapshot holds one entry per status command in table order. Each entry is `None` until
/// the first poll. All replies of one poll share a single timestamp. A new poll overwrites the
/// previous one, there is no history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    taken_at: Option<DateTime<Local>>,
    values: Vec<(String, Option<String>)>,
}

impl StatusSnapshot {
    /// Create an empty snapshot for the given status command names.
    pub fn new<'a, I: IntoIterator<Item = &'a str>>(names: I) -> Self {
        StatusSnapshot {
            taken_at: None,
            values: names.into_iter().map(|n| (n.to_string(), None)).collect(),
        }
    }

    /// Time of the last poll, or `None` if the device was never polled.
    pub fn taken_at(&self) -> Option<DateTime<Local>> {
        self.taken_at
    }

    /// Last reply of a status command. `None` if the command is unknown or was never polled.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, value)| value.as_deref())
    }

    /// Iterate over all status commands and their last replies.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.values
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_deref()))
    }

    /// Number of status commands.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the device has no status commands.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn begin_poll(&mut self, taken_at: DateTime<Local>) {
        self.taken_at = Some(taken_at);
    }

    pub(crate) fn record(&mut self, name: &str, reply: String) {
        match self.values.iter_mut().find(|(n, _)| n == name) {
            Some((_, value)) => *value = Some(reply),
            None => self.values.push((name.to_string(), Some(reply))),
        }
    }
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let timestamp = self
            .taken_at
            .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string())
            .unwrap_or_default();
        writeln!(f, " DateTime | {timestamp} |")?;
        for (name, value) in self.iter() {
            writeln!(f, " {name} | {} |", value.unwrap_or_default())?;
        }
        Ok(())
    }
}
