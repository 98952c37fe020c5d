//! Offline payment calculation.
//!
//! Run from the CLI between payout cycles: work out what every user is owed
//! beyond what has already been paid, then record the receipts once the
//! external signer has broadcast them.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use oprpool_storage::{PaidRow, Store};

use crate::AccountingError;

/// One pending payment, the difference between lifetime owed and paid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Payment {
    pub user_id: String,
    pub payout_address: String,
    pub total_owed: i64,
    pub total_paid: i64,
    pub payment_amount: i64,
    /// Entry hash of the broadcast payment, filled before writing
    pub entry_hash: String,
}

/// Preps payments for every known user. Does not write anything; users with
/// nothing outstanding are excluded.
pub fn calculate_payments(store: &Arc<Store>) -> Result<Vec<Payment>, AccountingError> {
    let users = store.users()?;
    let mut payments = Vec::new();

    for u in users {
        let total_owed = store.total_owed(&u.uid)?;
        let total_paid = store.total_paid(&u.uid)?;
        let payment_amount = total_owed - total_paid;
        if payment_amount == 0 {
            continue;
        }
        payments.push(Payment {
            user_id: u.uid,
            payout_address: u.payout_address,
            total_owed,
            total_paid,
            payment_amount,
            entry_hash: String::new(),
        });
    }

    Ok(payments)
}

/// Records a broadcast batch. Every payment must carry the entry hash of
/// its on-chain receipt; duplicates are refused and nothing is written.
pub fn write_payments(store: &Arc<Store>, payments: &[Payment]) -> Result<(), AccountingError> {
    let rows: Vec<PaidRow> = payments
        .iter()
        .map(|p| PaidRow {
            id: 0,
            entry_hash: p.entry_hash.clone(),
            user_id: p.user_id.clone(),
            payout_address: p.payout_address.clone(),
            payment_amount: p.payment_amount,
        })
        .collect();
    store.write_payments(&rows)?;
    Ok(())
}
