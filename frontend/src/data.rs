use chrono::NaiveDateTime;
use derive_more::derive::{Deref, Display, From, Into};
use itertools::Itertools as _;

/// Device UUID as printed by `nvidia-smi`, e.g. `GPU-1c7a3f0e-…`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deref, Display, From, Into)]
pub struct DeviceId(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deref, Display, From, Into)]
#[display("{_0} MiB")]
pub struct MemoryMib(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub timestamp: NaiveDateTime,
    pub device: DeviceId,
    pub memory_used: MemoryMib,
}

/// A data line of the log that could not be turned into a [`Sample`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowDefect {
    /// 1-based line number in the log file.
    pub line: usize,
    pub reason: String,
}

/// Parsed log, rows in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub rows: Vec<Sample>,
    pub defects: Vec<RowDefect>,
}

impl Table {
    /// Unique devices in order of first appearance.
    pub fn devices(&self) -> Vec<&DeviceId> {
        self.rows.iter().map(|row| &row.device).unique().collect()
    }

    pub fn samples_of<'a>(&'a self, device: &'a DeviceId) -> impl Iterator<Item = &'a Sample> + 'a {
        self.rows.iter().filter(move |row| &row.device == device)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
