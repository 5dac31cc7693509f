use crate::diagnostics::{Diagnostic, Issue, TotalField, TotalMismatch};
use crate::receipt::Receipt;
use crate::vendor::StatedTotals;

/// Recomputes the receipt's aggregates and compares each against the totals
/// printed in its block. Absent stated totals are not checked. Returns one
/// error-level diagnostic listing every mismatch, or `None` when all agree.
pub fn reconcile(receipt: &Receipt, stated: &StatedTotals) -> Option<Diagnostic> {
    let checks = [
        (TotalField::TotalAmount, receipt.total_amount(), stated.total_amount),
        (TotalField::TotalPayment, receipt.total_payment(), stated.total_payment),
        (
            TotalField::GrantedReward,
            receipt.granted_before_bonus(),
            stated.granted,
        ),
    ];
    let mismatches = checks
        .into_iter()
        .filter_map(|(field, computed, stated)| {
            let stated = stated?;
            (computed != stated).then_some(TotalMismatch {
                field,
                computed,
                stated,
            })
        })
        .collect::<Vec<_>>();
    if mismatches.is_empty() {
        return None;
    }
    Some(Diagnostic::new(Issue::ReconciliationMismatch { mismatches }))
}
