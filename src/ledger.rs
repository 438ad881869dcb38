//! Pending upstream revisions for a partial sync.
//!
//! Items download in parallel, so a later revision can be fully captured
//! before an earlier one. The local copy may only claim revision N once
//! every item touched by revisions up to and including N is present, so the
//! ledger tracks each revision's outstanding items separately and only
//! collapses the contiguous run of satisfied revisions starting at the
//! oldest one.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// One upstream changeset that is not yet fully mirrored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Revision {
    pub number: u64,
    pub to_update: BTreeSet<String>,
}

impl Revision {
    #[cfg(test)]
    pub fn new<I, S>(number: u64, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            number,
            to_update: items.into_iter().map(Into::into).collect(),
        }
    }
}

/// How a failed download affects the revisions that need it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// A failed item counts as handled and no longer blocks its revisions.
    #[default]
    Satisfy,
    /// A failed item stays outstanding, so the watermark cannot move past
    /// any revision that needs it.
    Hold,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Failed to read revisions file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid revisions file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid item name {item:?} in revision {number} of {path}")]
    InvalidItem {
        path: PathBuf,
        number: u64,
        item: String,
    },
}

fn normalize_item(item: String, path: &Path, number: u64) -> Result<String, LedgerError> {
    let trimmed = item.trim();
    if trimmed.is_empty() || trimmed.contains(['\n', '\r']) {
        return Err(LedgerError::InvalidItem {
            path: path.to_path_buf(),
            number,
            item,
        });
    }
    Ok(trimmed.to_string())
}

/// Pending revisions in ascending order plus the watermark reached so far.
#[derive(Debug, Default)]
pub struct RevisionLedger {
    pending: VecDeque<Revision>,
    watermark: Option<u64>,
}

impl RevisionLedger {
    /// Build a ledger from revisions in any order. Entries sharing a number
    /// are merged.
    pub fn new(mut revisions: Vec<Revision>) -> Self {
        revisions.sort_by_key(|r| r.number);

        let mut pending: VecDeque<Revision> = VecDeque::with_capacity(revisions.len());
        for revision in revisions {
            match pending.back_mut() {
                Some(last) if last.number == revision.number => {
                    last.to_update.extend(revision.to_update);
                }
                _ => pending.push_back(revision),
            }
        }

        Self {
            pending,
            watermark: None,
        }
    }

    /// Load pending revisions from a JSON array of
    /// `{"number": ..., "to_update": [...]}` objects.
    ///
    /// Item names are trimmed to match how they travel through the work
    /// list. Names that are blank or span lines are rejected.
    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        let contents = std::fs::read_to_string(path).map_err(|source| LedgerError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let revisions: Vec<Revision> =
            serde_json::from_str(&contents).map_err(|source| LedgerError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let revisions = revisions
            .into_iter()
            .map(|revision| -> Result<Revision, LedgerError> {
                let to_update = revision
                    .to_update
                    .into_iter()
                    .map(|item| normalize_item(item, path, revision.number))
                    .collect::<Result<BTreeSet<String>, _>>()?;
                Ok(Revision {
                    number: revision.number,
                    to_update,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(revisions))
    }

    /// Start from an already persisted watermark, dropping revisions the
    /// local copy has already reached.
    pub fn with_watermark(mut self, last_synced: Option<u64>) -> Self {
        if let Some(last) = last_synced {
            let before = self.pending.len();
            self.pending.retain(|r| r.number > last);
            let skipped = before - self.pending.len();
            if skipped > 0 {
                tracing::debug!(skipped, last_synced = last, "Dropped already synced revisions");
            }
        }
        self.watermark = last_synced;
        self
    }

    /// Record that `item` no longer needs downloading for any revision.
    pub fn mark_satisfied(&mut self, item: &str) {
        for revision in &mut self.pending {
            revision.to_update.remove(item);
        }
    }

    /// Collapse satisfied revisions from the oldest end, stopping at the
    /// first revision with items still outstanding.
    ///
    /// Returns the new watermark if it moved.
    pub fn advance_watermark(&mut self) -> Option<u64> {
        let before = self.watermark;
        while self
            .pending
            .front()
            .is_some_and(|revision| revision.to_update.is_empty())
        {
            if let Some(revision) = self.pending.pop_front() {
                self.watermark = Some(revision.number);
            }
        }
        if self.watermark != before {
            self.watermark
        } else {
            None
        }
    }

    pub fn watermark(&self) -> Option<u64> {
        self.watermark
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Highest revision still pending.
    pub fn target(&self) -> Option<u64> {
        self.pending.back().map(|r| r.number)
    }

    /// Every item some pending revision still needs, each listed once, in
    /// revision order.
    pub fn items(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.pending
            .iter()
            .flat_map(|r| r.to_update.iter())
            .filter(|item| seen.insert(*item))
            .cloned()
            .collect()
    }
}
