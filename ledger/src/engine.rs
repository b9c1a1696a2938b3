//! Core ledger state machine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use tokenbank_common::{Address, Conversion, LedgerError, Price, Reserve, Result, Units};

use crate::balance::{BalanceBook, BalanceChange};
use crate::journal::{EntryKind, Journal, JournalEntry};

/// Outcome of a committed purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    /// Units credited to the buyer.
    pub units: Units,
    /// Reserve kept by the ledger without a unit credit.
    pub remainder: Reserve,
    /// Journal sequence of the purchase.
    pub sequence: u64,
}

/// Outcome of a committed withdrawal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    /// Units redeemed.
    pub units: Units,
    /// Reserve owed to the holder.
    pub reserve_out: Reserve,
    /// Journal sequence of the withdrawal.
    pub sequence: u64,
}

/// Serializable point-in-time view of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub price: Price,
    pub balances: BTreeMap<Address, Units>,
    pub total_supply: Units,
    pub backing: Reserve,
    pub retained: Reserve,
    pub reserve: Reserve,
    pub last_sequence: u64,
    pub head_hash: String,
}

/// Fixed-price token ledger.
///
/// Holds unit balances and the reserve currency paid in for them. The reserve
/// is split into `backing` (exactly `total_supply * price`) and `retained`
/// (purchase remainders lost to truncation). Every mutation either commits in
/// full, appending one journal entry, or leaves all state untouched.
#[derive(Debug, Clone)]
pub struct Ledger {
    price: Price,
    balances: BalanceBook,
    backing: Reserve,
    retained: Reserve,
    journal: Journal,
}

impl Ledger {
    /// Create an empty ledger at a fixed price.
    pub fn new(price: Price) -> Self {
        info!(price = %price, "Ledger created");
        Self {
            price,
            balances: BalanceBook::new(),
            backing: Reserve::ZERO,
            retained: Reserve::ZERO,
            journal: Journal::new(),
        }
    }

    /// Create an empty ledger from a raw price, rejecting zero.
    pub fn with_price(price: u128) -> Result<Self> {
        Ok(Self::new(Price::new(price)?))
    }

    /// Rebuild a ledger by replaying a previously recorded journal.
    pub fn restore(price: Price, entries: Vec<JournalEntry>) -> Result<Self> {
        let journal = Journal::from_entries(entries);
        journal.verify_chain()?;

        let mut ledger = Self::new(price);
        for entry in journal.entries() {
            ledger.replay(entry)?;
        }
        ledger.journal = journal;

        info!(
            price = %price,
            entries = ledger.journal.len(),
            "Ledger restored from journal"
        );
        Ok(ledger)
    }

    /// Deposit `amount` of reserve for `buyer`, crediting `floor(amount / price)` units.
    ///
    /// The remainder is kept by the ledger and never refunded. A purchase
    /// below the price credits zero units and still succeeds.
    #[instrument(skip(self), fields(price = %self.price))]
    pub fn purchase(&mut self, buyer: Address, amount: Reserve) -> Result<Purchase> {
        let Conversion { units, remainder } = self.price.units_for(amount);

        let result = self.price_purchase(buyer, units, remainder).and_then(
            |(change, backing_after, retained_after)| {
                self.commit(
                    EntryKind::Purchase {
                        buyer,
                        reserve_in: amount,
                        units,
                        remainder,
                    },
                    vec![change],
                    backing_after,
                    retained_after,
                )
            },
        );

        match result {
            Ok(sequence) => {
                info!(
                    buyer = %buyer,
                    reserve_in = %amount,
                    units = %units,
                    remainder = %remainder,
                    sequence,
                    "Purchase committed"
                );
                Ok(Purchase {
                    units,
                    remainder,
                    sequence,
                })
            }
            Err(e) => {
                warn!(buyer = %buyer, reserve_in = %amount, error = %e, "Purchase rejected");
                Err(e)
            }
        }
    }

    /// Move `units` from `sender` to `recipient`. Returns the journal sequence.
    ///
    /// `sender` must hold at least `units`; self-transfers are allowed.
    #[instrument(skip(self))]
    pub fn transfer(&mut self, sender: Address, recipient: Address, units: Units) -> Result<u64> {
        let result = self
            .balances
            .plan_transfer(sender, recipient, units)
            .and_then(|changes| {
                self.commit(
                    EntryKind::Transfer {
                        sender,
                        recipient,
                        units,
                    },
                    changes.to_vec(),
                    self.backing,
                    self.retained,
                )
            });

        match result {
            Ok(sequence) => {
                info!(
                    sender = %sender,
                    recipient = %recipient,
                    units = %units,
                    sequence,
                    "Transfer committed"
                );
                Ok(sequence)
            }
            Err(e) => {
                warn!(sender = %sender, units = %units, error = %e, "Transfer rejected");
                Err(e)
            }
        }
    }

    /// Redeem `units` held by `holder` for exactly `units * price` of reserve.
    #[instrument(skip(self), fields(price = %self.price))]
    pub fn withdraw(&mut self, holder: Address, units: Units) -> Result<Withdrawal> {
        let result = self.price_withdrawal(holder, units).and_then(
            |(change, reserve_out, backing_after)| {
                self.commit(
                    EntryKind::Withdraw {
                        holder,
                        units,
                        reserve_out,
                    },
                    vec![change],
                    backing_after,
                    self.retained,
                )
                .map(|sequence| Withdrawal {
                    units,
                    reserve_out,
                    sequence,
                })
            },
        );

        match result {
            Ok(withdrawal) => {
                info!(
                    holder = %holder,
                    units = %units,
                    reserve_out = %withdrawal.reserve_out,
                    sequence = withdrawal.sequence,
                    "Withdrawal committed"
                );
                Ok(withdrawal)
            }
            Err(e) => {
                warn!(holder = %holder, units = %units, error = %e, "Withdrawal rejected");
                Err(e)
            }
        }
    }

    /// Unit balance of `account` (zero if never touched).
    pub fn balance_of(&self, account: &Address) -> Units {
        let units = self.balances.get(account);
        debug!(account = %account, units = %units, "Balance query");
        units
    }

    pub fn price(&self) -> Price {
        self.price
    }

    /// Total reserve held: backing plus retained remainder.
    pub fn reserve(&self) -> Reserve {
        // backing + retained is checked on every commit
        Reserve::new(self.backing.value() + self.retained.value())
    }

    /// Reserve that redeems outstanding units (`total_supply * price`).
    pub fn backing_reserve(&self) -> Reserve {
        self.backing
    }

    /// Reserve kept from purchase truncation.
    pub fn retained_remainder(&self) -> Reserve {
        self.retained
    }

    /// Sum of all unit balances.
    pub fn total_supply(&self) -> Units {
        self.balances.total()
    }

    /// Touched accounts and their balances, in no particular order.
    pub fn accounts(&self) -> impl Iterator<Item = (&Address, &Units)> {
        self.balances.iter()
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn last_sequence(&self) -> u64 {
        self.journal.last_sequence()
    }

    /// Take a serializable snapshot.
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            price: self.price,
            balances: self.balances.iter().map(|(a, u)| (*a, *u)).collect(),
            total_supply: self.total_supply(),
            backing: self.backing,
            retained: self.retained,
            reserve: self.reserve(),
            last_sequence: self.last_sequence(),
            head_hash: self.journal.head_hash().to_string(),
        }
    }

    /// Check conservation, the journal chain, and that replaying the journal
    /// reproduces the current state.
    pub fn verify_integrity(&self) -> Result<()> {
        let result = self.check_integrity();
        if let Err(e) = &result {
            error!(error = %e, "Ledger integrity check failed");
        }
        result
    }

    fn check_integrity(&self) -> Result<()> {
        let sum = self
            .balances
            .iter()
            .try_fold(Units::ZERO, |acc, (_, units)| acc.checked_add(*units))
            .ok_or_else(|| LedgerError::IntegrityViolation("balance sum overflows".into()))?;
        if sum != self.total_supply() {
            return Err(LedgerError::IntegrityViolation(format!(
                "total supply {} differs from balance sum {sum}",
                self.total_supply()
            )));
        }

        let expected_backing = self.price.reserve_for(sum).ok_or_else(|| {
            LedgerError::IntegrityViolation("backing value overflows".into())
        })?;
        if expected_backing != self.backing {
            return Err(LedgerError::IntegrityViolation(format!(
                "backing reserve {} differs from supply value {expected_backing}",
                self.backing
            )));
        }

        if self.backing.checked_add(self.retained).is_none() {
            return Err(LedgerError::IntegrityViolation("reserve overflows".into()));
        }

        let replayed = Self::restore(self.price, self.journal.entries().to_vec())?;
        if replayed.backing != self.backing || replayed.retained != self.retained {
            return Err(LedgerError::IntegrityViolation(
                "journal replay reserve differs from ledger".into(),
            ));
        }
        if replayed.balances.len() != self.balances.len()
            || self
                .balances
                .iter()
                .any(|(account, units)| replayed.balance_of(account) != *units)
        {
            return Err(LedgerError::IntegrityViolation(
                "journal replay balances differ from ledger".into(),
            ));
        }

        Ok(())
    }

    fn price_purchase(
        &self,
        buyer: Address,
        units: Units,
        remainder: Reserve,
    ) -> Result<(BalanceChange, Reserve, Reserve)> {
        let value = self
            .price
            .reserve_for(units)
            .ok_or_else(|| LedgerError::ArithmeticOverflow("purchase value".into()))?;
        let backing_after = self
            .backing
            .checked_add(value)
            .ok_or_else(|| LedgerError::ArithmeticOverflow("backing reserve".into()))?;
        let retained_after = self
            .retained
            .checked_add(remainder)
            .ok_or_else(|| LedgerError::ArithmeticOverflow("retained reserve".into()))?;
        let change = self.balances.plan_credit(buyer, units)?;
        Ok((change, backing_after, retained_after))
    }

    fn price_withdrawal(
        &self,
        holder: Address,
        units: Units,
    ) -> Result<(BalanceChange, Reserve, Reserve)> {
        // Balance check first: an oversized request is an overdraft, not an overflow.
        let change = self.balances.plan_debit(holder, units)?;
        let reserve_out = self
            .price
            .reserve_for(units)
            .ok_or_else(|| LedgerError::ArithmeticOverflow("withdrawal value".into()))?;
        let backing_after = self.backing.checked_sub(reserve_out).ok_or_else(|| {
            LedgerError::IntegrityViolation(format!(
                "backing reserve {} below redemption value {reserve_out}",
                self.backing
            ))
        })?;
        Ok((change, reserve_out, backing_after))
    }

    /// Apply planned effects and append the journal entry.
    ///
    /// Everything fallible happens before the first write.
    fn commit(
        &mut self,
        kind: EntryKind,
        changes: Vec<BalanceChange>,
        backing_after: Reserve,
        retained_after: Reserve,
    ) -> Result<u64> {
        let total_after = self
            .balances
            .total_after(&changes)
            .ok_or_else(|| LedgerError::ArithmeticOverflow("total supply".into()))?;
        if backing_after.checked_add(retained_after).is_none() {
            return Err(LedgerError::ArithmeticOverflow("total reserve".into()));
        }
        let entry = self
            .journal
            .prepare(kind, changes, backing_after, retained_after)?;

        self.balances.apply(&entry.changes, total_after);
        self.backing = backing_after;
        self.retained = retained_after;
        let sequence = entry.sequence;
        self.journal.push(entry);
        Ok(sequence)
    }

    /// Re-apply a recorded entry, checking it against the price and state.
    fn replay(&mut self, entry: &JournalEntry) -> Result<()> {
        let mismatch = |what: &str| {
            LedgerError::IntegrityViolation(format!("entry {}: {what}", entry.sequence))
        };

        let (changes, backing_after, retained_after) = match &entry.kind {
            EntryKind::Purchase {
                buyer,
                reserve_in,
                units,
                remainder,
            } => {
                let conversion = self.price.units_for(*reserve_in);
                if conversion.units != *units || conversion.remainder != *remainder {
                    return Err(mismatch("purchase conversion disagrees with price"));
                }
                let (change, backing, retained) =
                    self.price_purchase(*buyer, *units, *remainder)?;
                (vec![change], backing, retained)
            }
            EntryKind::Transfer {
                sender,
                recipient,
                units,
            } => {
                let changes = self.balances.plan_transfer(*sender, *recipient, *units)?;
                (changes.to_vec(), self.backing, self.retained)
            }
            EntryKind::Withdraw {
                holder,
                units,
                reserve_out,
            } => {
                let (change, expected_out, backing) = self.price_withdrawal(*holder, *units)?;
                if expected_out != *reserve_out {
                    return Err(mismatch("withdrawal payout disagrees with price"));
                }
                (vec![change], backing, self.retained)
            }
        };

        if changes != entry.changes {
            return Err(mismatch("recorded balance changes differ from replay"));
        }
        if backing_after != entry.backing_after || retained_after != entry.retained_after {
            return Err(mismatch("recorded reserve differs from replay"));
        }

        let total_after = self
            .balances
            .total_after(&changes)
            .ok_or_else(|| mismatch("total supply overflows"))?;
        self.balances.apply(&changes, total_after);
        self.backing = backing_after;
        self.retained = retained_after;
        Ok(())
    }
}
