//! Pairing of checkouts with the returns that close them.
//!
//! Returns that name their checkout (`checkoutTimestamp`) are paired first.
//! Remaining returns are paired chronologically: each checkout takes the
//! earliest unused return of the same instance/employee pair whose timestamp is
//! strictly later. Inputs are sorted by key first, so the result never depends
//! on the order records arrive in.

use toolroom_core::{CheckoutRecord, EntityId, MovementHistory, ReturnRecord};

/// A checkout and, if closed, the return that closed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stint<'a> {
    pub checkout: &'a CheckoutRecord,
    pub closed_by: Option<&'a ReturnRecord>,
}

impl<'a> Stint<'a> {
    pub fn is_open(&self) -> bool {
        self.closed_by.is_none()
    }
}

/// Result of pairing one history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pairing<'a> {
    /// Stints in checkout order.
    pub stints: Vec<Stint<'a>>,
    /// Returns that match no checkout.
    pub orphan_returns: Vec<&'a ReturnRecord>,
}

impl<'a> Pairing<'a> {
    pub fn open_checkouts(&self) -> impl Iterator<Item = &'a CheckoutRecord> + '_ {
        self.stints
            .iter()
            .filter(|stint| stint.is_open())
            .map(|stint| stint.checkout)
    }

    /// The most recent open checkout, if any.
    pub fn latest_open(&self) -> Option<&'a CheckoutRecord> {
        self.open_checkouts().last()
    }

    /// The most recent open checkout held by `employee_id`.
    pub fn open_for_employee(&self, employee_id: &EntityId) -> Option<&'a CheckoutRecord> {
        self.open_checkouts()
            .filter(|checkout| &checkout.employee_id == employee_id)
            .last()
    }
}

pub fn pair_movements(history: &MovementHistory) -> Pairing<'_> {
    let mut checkouts: Vec<&CheckoutRecord> = history.checkouts.iter().collect();
    checkouts.sort_by_key(|c| (c.checkout_timestamp, c.key()));
    let mut returns: Vec<&ReturnRecord> = history.returns.iter().collect();
    returns.sort_by_key(|r| (r.return_timestamp, r.key()));

    let mut closed_by: Vec<Option<usize>> = vec![None; checkouts.len()];
    let mut used = vec![false; returns.len()];

    // Explicit references.
    for (ri, ret) in returns.iter().enumerate() {
        let Some(target) = ret.checkout_key() else {
            continue;
        };
        if let Some(ci) = checkouts
            .iter()
            .enumerate()
            .position(|(ci, c)| closed_by[ci].is_none() && c.key() == target)
        {
            closed_by[ci] = Some(ri);
            used[ri] = true;
        }
    }

    // Chronological fallback.
    for (ci, checkout) in checkouts.iter().enumerate() {
        if closed_by[ci].is_some() {
            continue;
        }
        let candidate = returns.iter().enumerate().position(|(ri, ret)| {
            !used[ri]
                && ret.instance_id == checkout.instance_id
                && ret.employee_id == checkout.employee_id
                && ret.return_timestamp > checkout.checkout_timestamp
        });
        if let Some(ri) = candidate {
            closed_by[ci] = Some(ri);
            used[ri] = true;
        }
    }

    let stints = checkouts
        .iter()
        .zip(closed_by.iter())
        .map(|(checkout, ri)| Stint {
            checkout,
            closed_by: ri.map(|ri| returns[ri]),
        })
        .collect();
    let orphan_returns = returns
        .iter()
        .zip(used.iter())
        .filter(|(_, used)| !**used)
        .map(|(ret, _)| *ret)
        .collect();

    Pairing {
        stints,
        orphan_returns,
    }
}
