//! Append-only, hash-chained journal of committed ledger transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokenbank_common::{Address, LedgerError, Reserve, Result, Units};

use crate::balance::BalanceChange;

/// `prev_hash` of the first entry.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// What a journal entry records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryKind {
    /// Reserve deposited, units credited.
    Purchase {
        buyer: Address,
        reserve_in: Reserve,
        units: Units,
        remainder: Reserve,
    },
    /// Units moved between accounts.
    Transfer {
        sender: Address,
        recipient: Address,
        units: Units,
    },
    /// Units redeemed, reserve paid out.
    Withdraw {
        holder: Address,
        units: Units,
        reserve_out: Reserve,
    },
}

impl EntryKind {
    /// Units this kind of entry must mint and burn, as `(minted, burned)`.
    pub fn expected_supply_change(&self) -> (Units, Units) {
        match self {
            EntryKind::Purchase { units, .. } => (*units, Units::ZERO),
            EntryKind::Transfer { .. } => (Units::ZERO, Units::ZERO),
            EntryKind::Withdraw { units, .. } => (Units::ZERO, *units),
        }
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            EntryKind::Purchase { .. } => "purchase",
            EntryKind::Transfer { .. } => "transfer",
            EntryKind::Withdraw { .. } => "withdraw",
        }
    }
}

/// A single committed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Position in the journal, starting at 1.
    pub sequence: u64,
    /// The transition.
    pub kind: EntryKind,
    /// Balance changes, in application order.
    pub changes: Vec<BalanceChange>,
    /// Backing reserve after this entry.
    pub backing_after: Reserve,
    /// Retained truncation remainder after this entry.
    pub retained_after: Reserve,
    /// When the entry was recorded.
    pub recorded_at: DateTime<Utc>,
    /// Hash of the previous entry.
    pub prev_hash: String,
    /// SHA-256 of this entry's content and `prev_hash`.
    pub hash: String,
}

/// Fields covered by the entry hash.
#[derive(Serialize)]
struct HashedFields<'a> {
    sequence: u64,
    kind: &'a EntryKind,
    changes: &'a [BalanceChange],
    backing_after: Reserve,
    retained_after: Reserve,
    recorded_at: &'a DateTime<Utc>,
    prev_hash: &'a str,
}

impl JournalEntry {
    fn compute_hash(&self) -> Result<String> {
        let fields = HashedFields {
            sequence: self.sequence,
            kind: &self.kind,
            changes: &self.changes,
            backing_after: self.backing_after,
            retained_after: self.retained_after,
            recorded_at: &self.recorded_at,
            prev_hash: &self.prev_hash,
        };
        let bytes = serde_json::to_vec(&fields).map_err(|e| {
            LedgerError::IntegrityViolation(format!("cannot encode entry {}: {e}", self.sequence))
        })?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Sum of credited and debited units, as `(credited, debited)`.
    ///
    /// `None` if either sum overflows.
    pub fn supply_change(&self) -> Option<(Units, Units)> {
        self.changes
            .iter()
            .try_fold((Units::ZERO, Units::ZERO), |(credited, debited), change| {
                if change.is_credit() {
                    Some((credited.checked_add(change.amount)?, debited))
                } else {
                    Some((credited, debited.checked_add(change.amount)?))
                }
            })
    }

    /// Check the balance changes agree with the entry kind.
    ///
    /// Compares `credited + burned` with `debited + minted` so no side is
    /// ever negative.
    pub fn is_balanced(&self) -> bool {
        let Some((credited, debited)) = self.supply_change() else {
            return false;
        };
        let (minted, burned) = self.kind.expected_supply_change();
        match (credited.checked_add(burned), debited.checked_add(minted)) {
            (Some(lhs), Some(rhs)) => lhs == rhs,
            _ => false,
        }
    }

    /// Check if this entry touches `account`.
    pub fn involves(&self, account: &Address) -> bool {
        self.changes.iter().any(|c| &c.account == account)
    }
}

/// The append-only transaction log.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Vec<JournalEntry>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap recorded entries. Callers must verify the chain before trusting it.
    pub(crate) fn from_entries(entries: Vec<JournalEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    /// Entry with the given sequence number.
    pub fn get(&self, sequence: u64) -> Option<&JournalEntry> {
        let index = usize::try_from(sequence.checked_sub(1)?).ok()?;
        self.entries.get(index)
    }

    /// Sequence number of the newest entry (0 when empty).
    pub fn last_sequence(&self) -> u64 {
        self.entries.last().map(|e| e.sequence).unwrap_or(0)
    }

    /// Hash of the newest entry, or the genesis hash.
    pub fn head_hash(&self) -> &str {
        self.entries
            .last()
            .map(|e| e.hash.as_str())
            .unwrap_or(GENESIS_HASH)
    }

    /// Entries touching `account`.
    pub fn entries_for<'a>(
        &'a self,
        account: &'a Address,
    ) -> impl Iterator<Item = &'a JournalEntry> + 'a {
        self.entries.iter().filter(move |e| e.involves(account))
    }

    /// Build the next entry without appending it.
    pub(crate) fn prepare(
        &self,
        kind: EntryKind,
        changes: Vec<BalanceChange>,
        backing_after: Reserve,
        retained_after: Reserve,
    ) -> Result<JournalEntry> {
        let mut entry = JournalEntry {
            sequence: self.last_sequence() + 1,
            kind,
            changes,
            backing_after,
            retained_after,
            recorded_at: Utc::now(),
            prev_hash: self.head_hash().to_string(),
            hash: String::new(),
        };
        entry.hash = entry.compute_hash()?;
        Ok(entry)
    }

    /// Append an entry built by [`Journal::prepare`] against the current head.
    pub(crate) fn push(&mut self, entry: JournalEntry) {
        debug_assert_eq!(entry.sequence, self.last_sequence() + 1);
        debug_assert_eq!(entry.prev_hash, self.head_hash());
        self.entries.push(entry);
    }

    /// Verify sequence numbering, hash links and per-entry balance.
    pub fn verify_chain(&self) -> Result<()> {
        let mut prev_hash = GENESIS_HASH;

        for (index, entry) in self.entries.iter().enumerate() {
            let expected_sequence = index as u64 + 1;
            if entry.sequence != expected_sequence {
                return Err(LedgerError::IntegrityViolation(format!(
                    "entry at position {expected_sequence} has sequence {}",
                    entry.sequence
                )));
            }
            if entry.prev_hash != prev_hash {
                return Err(LedgerError::IntegrityViolation(format!(
                    "entry {} does not link to its predecessor",
                    entry.sequence
                )));
            }
            if entry.compute_hash()? != entry.hash {
                return Err(LedgerError::IntegrityViolation(format!(
                    "entry {} hash mismatch",
                    entry.sequence
                )));
            }
            if !entry.is_balanced() {
                return Err(LedgerError::IntegrityViolation(format!(
                    "entry {} balance changes disagree with its {}",
                    entry.sequence,
                    entry.kind.label()
                )));
            }
            prev_hash = &entry.hash;
        }

        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn entries_mut(&mut self) -> &mut Vec<JournalEntry> {
        &mut self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::BalanceBook;

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    fn purchase_entry(journal: &Journal, book: &BalanceBook, units: u128) -> JournalEntry {
        let change = book.plan_credit(addr(1), Units::new(units)).unwrap();
        journal
            .prepare(
                EntryKind::Purchase {
                    buyer: addr(1),
                    reserve_in: Reserve::new(units * 1000),
                    units: Units::new(units),
                    remainder: Reserve::ZERO,
                },
                vec![change],
                Reserve::new(units * 1000),
                Reserve::ZERO,
            )
            .unwrap()
    }

    #[test]
    fn test_chain_links_entries() {
        let mut journal = Journal::new();
        let book = BalanceBook::new();

        let first = purchase_entry(&journal, &book, 10);
        assert_eq!(first.sequence, 1);
        assert_eq!(first.prev_hash, GENESIS_HASH);
        journal.push(first);

        let second = purchase_entry(&journal, &book, 5);
        assert_eq!(second.sequence, 2);
        assert_eq!(second.prev_hash, journal.entries()[0].hash);
        journal.push(second);

        assert!(journal.verify_chain().is_ok());
        assert_eq!(journal.last_sequence(), 2);
        assert_eq!(journal.get(2).map(|e| e.sequence), Some(2));
        assert!(journal.get(0).is_none());
        assert_eq!(journal.entries_for(&addr(1)).count(), 2);
        assert_eq!(journal.entries_for(&addr(2)).count(), 0);
    }

    #[test]
    fn test_tampered_entry_detected() {
        let mut journal = Journal::new();
        let book = BalanceBook::new();
        let entry = purchase_entry(&journal, &book, 10);
        journal.push(entry);

        journal.entries_mut()[0].backing_after = Reserve::new(1);
        assert!(matches!(
            journal.verify_chain(),
            Err(LedgerError::IntegrityViolation(_))
        ));
    }

    #[test]
    fn test_unbalanced_entry_detected() {
        let mut journal = Journal::new();
        let book = BalanceBook::new();
        let mut entry = purchase_entry(&journal, &book, 10);
        entry.changes.clear();
        entry.hash = entry.compute_hash().unwrap();
        journal.push(entry);

        assert!(!journal.entries()[0].is_balanced());
        assert!(journal.verify_chain().is_err());
    }

    #[test]
    fn test_overflowing_changes_are_unbalanced() {
        let journal = Journal::new();
        let book = BalanceBook::new();
        let mut entry = purchase_entry(&journal, &book, 10);
        let huge = BalanceChange {
            account: addr(2),
            change_type: crate::balance::BalanceChangeType::Credit,
            amount: Units::new(u128::MAX),
            balance_before: Units::ZERO,
            balance_after: Units::new(u128::MAX),
        };
        entry.changes.push(huge);

        assert_eq!(entry.supply_change(), None);
        assert!(!entry.is_balanced());
    }
}
