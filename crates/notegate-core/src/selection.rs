//! Largest-first coin selection and gift partitioning for swap spends.

use crate::config::DEFAULT_UNIT;
use crate::error::GateError;
use crate::notes::ParsedNote;
use crate::validation::{
    validate_name_component, NoteName, ValidatedRecipient, ValidatedSimpleSpendParams,
    ValidatedSwapParams,
};
use serde::{Deserialize, Serialize};

/// What a spend must cover, in whole coins plus the ledger unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionTarget {
    pub amount: u64,
    pub fee: u64,
    pub unit: u64,
}

impl SelectionTarget {
    pub fn new(amount: u64, fee: u64) -> Self {
        Self {
            amount,
            fee,
            unit: DEFAULT_UNIT,
        }
    }

    pub fn with_unit(mut self, unit: u64) -> Self {
        self.unit = unit;
        self
    }

    /// `(amount + fee) * unit`, in the smallest ledger unit.
    pub fn required(&self) -> Result<u64, GateError> {
        self.amount
            .checked_add(self.fee)
            .and_then(|coins| coins.checked_mul(self.unit))
            .ok_or_else(|| GateError::validation("amount plus fee overflows the ledger unit"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub notes: Vec<ParsedNote>,
    pub total: u64,
    pub required: u64,
}

pub fn select_notes(target: &SelectionTarget, notes: &[ParsedNote]) -> Result<Selection, GateError> {
    let required = target.required()?;
    let mut candidates: Vec<&ParsedNote> = notes.iter().collect();
    candidates.sort_by(|a, b| b.assets.cmp(&a.assets));

    let mut selected = Vec::new();
    let mut total = 0u64;
    for note in candidates {
        if total >= required {
            break;
        }
        total = total.saturating_add(note.assets);
        selected.push(note.clone());
    }

    if total < required || required == 0 {
        let available = notes
            .iter()
            .fold(0u64, |acc, note| acc.saturating_add(note.assets));
        return Err(GateError::InsufficientBalance {
            required,
            available,
        });
    }

    Ok(Selection {
        notes: selected,
        total,
        required,
    })
}

/// Split `required` across the selected notes: every note but the last gives its
/// full value (or what is still needed), the last gives the remainder.
pub fn build_gifts_array(selected: &[ParsedNote], target: &SelectionTarget) -> Result<Vec<u64>, GateError> {
    let required = target.required()?;
    let Some((last, leading)) = selected.split_last() else {
        return Err(GateError::validation("no notes selected"));
    };

    let mut remaining = required;
    let mut gifts = Vec::with_capacity(selected.len());
    for note in leading {
        let gift = note.assets.min(remaining);
        gifts.push(gift);
        remaining -= gift;
    }
    if remaining > last.assets {
        return Err(GateError::InsufficientBalance {
            required,
            available: required - remaining + last.assets,
        });
    }
    gifts.push(remaining);

    if gifts.iter().any(|gift| *gift == 0) {
        return Err(GateError::validation(
            "selected notes exceed what the spend needs",
        ));
    }
    Ok(gifts)
}

/// Spend instruction paying a swap out of the selected notes: one `[1 recipient]`
/// entry per note, gifts partitioned by [`build_gifts_array`].
pub fn swap_spend_params(
    swap: &ValidatedSwapParams,
    selected: &[ParsedNote],
    unit: u64,
) -> Result<ValidatedSimpleSpendParams, GateError> {
    let target = SelectionTarget::new(swap.amount, swap.fee).with_unit(unit);
    let gifts = build_gifts_array(selected, &target)?;

    let names = selected
        .iter()
        .map(|note| {
            Ok(NoteName {
                first: wallet_name(&note.first_name)?,
                last: wallet_name(&note.last_name)?,
            })
        })
        .collect::<Result<Vec<_>, GateError>>()?;

    let recipients = selected
        .iter()
        .map(|_| ValidatedRecipient {
            count: 1,
            address: swap.recipient.clone(),
        })
        .collect();

    Ok(ValidatedSimpleSpendParams {
        recipients,
        gifts,
        names,
        fee: swap.fee,
    })
}

/// Names read back from the wallet must survive sanitization untouched.
fn wallet_name(raw: &str) -> Result<String, GateError> {
    let cleaned = validate_name_component(raw)?;
    if cleaned != raw {
        return Err(GateError::validation(format!(
            "wallet reported an unusable note name '{}'",
            cleaned
        )));
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::tests::sample_address;

    fn notes(values: &[u64]) -> Vec<ParsedNote> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| ParsedNote::new(format!("f{i}"), format!("l{i}"), *v))
            .collect()
    }

    #[test]
    fn required_includes_fee_and_unit() {
        assert_eq!(SelectionTarget::new(10, 2).required().unwrap(), 12 * 65_536);
        assert_eq!(SelectionTarget::new(10, 2).with_unit(1).required().unwrap(), 12);
        assert!(SelectionTarget::new(u64::MAX, 1).required().is_err());
    }

    #[test]
    fn selects_largest_first() {
        let target = SelectionTarget::new(5, 1).with_unit(10);
        let selection = select_notes(&target, &notes(&[10, 40, 5, 30])).unwrap();
        let picked: Vec<u64> = selection.notes.iter().map(|n| n.assets).collect();
        assert_eq!(picked, vec![40, 30]);
        assert_eq!(selection.total, 70);
        assert_eq!(selection.required, 60);
    }

    #[test]
    fn reports_insufficient_balance() {
        let target = SelectionTarget::new(10, 1).with_unit(10);
        let err = select_notes(&target, &notes(&[20, 30])).unwrap_err();
        match err {
            GateError::InsufficientBalance {
                required,
                available,
            } => {
                assert_eq!(required, 110);
                assert_eq!(available, 50);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(select_notes(&target, &[]).is_err());
    }

    #[test]
    fn gifts_sum_to_required_with_remainder_on_last() {
        let target = SelectionTarget::new(5, 1).with_unit(10);
        let selected = notes(&[40, 30]);
        let gifts = build_gifts_array(&selected, &target).unwrap();
        assert_eq!(gifts, vec![40, 20]);
        assert_eq!(gifts.iter().sum::<u64>(), 60);

        let gifts = build_gifts_array(&notes(&[100]), &target).unwrap();
        assert_eq!(gifts, vec![60]);
    }

    #[test]
    fn gifts_reject_short_or_surplus_selection() {
        let target = SelectionTarget::new(5, 1).with_unit(10);
        assert!(build_gifts_array(&notes(&[20, 10]), &target).is_err());
        assert!(build_gifts_array(&notes(&[80, 10]), &target).is_err());
        assert!(build_gifts_array(&[], &target).is_err());
    }

    #[test]
    fn swap_spend_pays_recipient_from_each_note() {
        let swap = ValidatedSwapParams {
            swap_id: "s1".into(),
            recipient: sample_address(2),
            amount: 5,
            fee: 1,
        };
        let params = swap_spend_params(&swap, &notes(&[40, 30]), 10).unwrap();
        assert_eq!(params.gifts, vec![40, 20]);
        assert_eq!(params.fee, 1);
        assert_eq!(params.recipients.len(), 2);
        assert!(params.recipients.iter().all(|r| r.count == 1 && r.address == swap.recipient));
        assert_eq!(params.names[1].first, "f1");

        let mut odd = notes(&[60]);
        odd[0].first_name = "bad;name".into();
        assert!(swap_spend_params(&swap, &odd, 10).is_err());
    }
}
