//! Append-only record of broadcast transactions (`sent.jsonl`).
//!
//! A transaction whose receipt timed out may still be mined. The journal lets an operator see it
//! before deciding to resubmit.

use alloy::primitives::{Address, B256, U256};
use chrono::Utc;
use eyre::Context as _;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentOutcome {
    Submitted,
    Confirmed,
    Failed,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentRecord {
    /// RFC 3339, UTC.
    pub ts: String,
    pub tx_hash: B256,
    pub nonce: u64,
    pub to: Address,
    /// Base units, decimal.
    pub value: String,
    pub outcome: SentOutcome,
}

impl SentRecord {
    pub fn now(tx_hash: B256, nonce: u64, to: Address, value: U256, outcome: SentOutcome) -> Self {
        Self {
            ts: Utc::now().to_rfc3339(),
            tx_hash,
            nonce,
            to,
            value: value.to_string(),
            outcome,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SentJournal {
    path: PathBuf,
}

impl SentJournal {
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, rec: &SentRecord) -> eyre::Result<()> {
        let line = serde_json::to_string(rec).context("serialize sent record")?;
        crate::fsutil::append_private_line(&self.path, &line)
    }

    /// All records in write order. Lines that do not parse (a torn write, say) are skipped.
    pub fn read_all(&self) -> eyre::Result<Vec<SentRecord>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let s = crate::fsutil::read_private_string(&self.path)?;
        Ok(s.lines()
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| match serde_json::from_str::<SentRecord>(l) {
                Ok(r) => Some(r),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable sent.jsonl line");
                    None
                }
            })
            .collect())
    }

    /// Latest outcome per transaction hash, in first-seen order.
    pub fn latest_by_hash(&self) -> eyre::Result<Vec<SentRecord>> {
        let mut out: Vec<SentRecord> = vec![];
        for rec in self.read_all()? {
            if let Some(existing) = out.iter_mut().find(|r| r.tx_hash == rec.tx_hash) {
                *existing = rec;
            } else {
                out.push(rec);
            }
        }
        Ok(out)
    }
}
