use serde::{Deserialize, Serialize};

use crate::game::resources::{ResourceBundle, ResourceError};
use crate::types::Resource;

/// Cards of each resource printed for a standard game.
pub const BANK_SUPPLY_PER_RESOURCE: u8 = 19;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("seat {seat} holds {available} {resource}, needs {requested}")]
    InsufficientResources {
        seat: usize,
        resource: Resource,
        available: u8,
        requested: u8,
    },
    #[error("bank holds {available} {resource}, {requested} requested")]
    BankExhausted {
        resource: Resource,
        available: u8,
        requested: u8,
    },
    #[error("unknown seat {0}")]
    UnknownSeat(usize),
    #[error("ledger invariant violated: {0}")]
    InvariantViolation(String),
}

impl LedgerError {
    fn from_holding(seat: usize, err: ResourceError) -> Self {
        let ResourceError::InsufficientResource {
            resource,
            available,
            requested,
        } = err;
        LedgerError::InsufficientResources {
            seat,
            resource,
            available,
            requested,
        }
    }

    fn from_bank(err: ResourceError) -> Self {
        let ResourceError::InsufficientResource {
            resource,
            available,
            requested,
        } = err;
        LedgerError::BankExhausted {
            resource,
            available,
            requested,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductionCredit {
    pub seat: usize,
    pub resource: Resource,
    pub amount: u8,
}

/// Credits owed to players for one dice roll, before the bank is consulted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductionPlan {
    credits: Vec<ProductionCredit>,
}

impl ProductionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, seat: usize, resource: Resource, amount: u8) {
        if amount > 0 {
            self.credits.push(ProductionCredit {
                seat,
                resource,
                amount,
            });
        }
    }

    pub fn credits(&self) -> &[ProductionCredit] {
        &self.credits
    }

    pub fn is_empty(&self) -> bool {
        self.credits.is_empty()
    }

    pub fn demand(&self, resource: Resource) -> u32 {
        self.credits
            .iter()
            .filter(|c| c.resource == resource)
            .map(|c| c.amount as u32)
            .sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionReport {
    /// Per-seat resources received; seats that got nothing are omitted.
    pub deltas: Vec<(usize, ResourceBundle)>,
    /// Resource types the bank could not cover, produced for nobody.
    pub withheld: Vec<Resource>,
}

/// Resource holdings of every seat plus the bank's remaining supply. For each
/// resource type, bank + all holdings always equals what was minted.
#[derive(Debug, Clone)]
pub struct Ledger {
    holdings: Vec<ResourceBundle>,
    bank: ResourceBundle,
    minted: ResourceBundle,
}

impl Ledger {
    pub fn new(num_seats: usize) -> Self {
        Self::with_supply(num_seats, BANK_SUPPLY_PER_RESOURCE)
    }

    pub fn with_supply(num_seats: usize, per_resource: u8) -> Self {
        let minted = ResourceBundle::uniform(per_resource);
        Self {
            holdings: vec![ResourceBundle::zero(); num_seats],
            bank: minted,
            minted,
        }
    }

    pub fn holdings(&self, seat: usize) -> Result<&ResourceBundle, LedgerError> {
        self.holdings.get(seat).ok_or(LedgerError::UnknownSeat(seat))
    }

    fn holdings_mut(&mut self, seat: usize) -> Result<&mut ResourceBundle, LedgerError> {
        self.holdings
            .get_mut(seat)
            .ok_or(LedgerError::UnknownSeat(seat))
    }

    pub fn bank(&self) -> &ResourceBundle {
        &self.bank
    }

    pub fn card_count(&self, seat: usize) -> u32 {
        self.holdings.get(seat).map_or(0, |h| h.total())
    }

    pub fn num_seats(&self) -> usize {
        self.holdings.len()
    }

    /// Moves `amount` from the bank to `seat`.
    pub fn credit(
        &mut self,
        seat: usize,
        resource: Resource,
        amount: u8,
    ) -> Result<(), LedgerError> {
        self.dispense(seat, &ResourceBundle::single(resource, amount))
    }

    /// Moves `amount` from `seat` back to the bank.
    pub fn debit(
        &mut self,
        seat: usize,
        resource: Resource,
        amount: u8,
    ) -> Result<(), LedgerError> {
        self.pay(seat, &ResourceBundle::single(resource, amount))
    }

    pub fn dispense(&mut self, seat: usize, bundle: &ResourceBundle) -> Result<(), LedgerError> {
        self.holdings(seat)?;
        self.bank
            .subtract_bundle(bundle)
            .map_err(LedgerError::from_bank)?;
        self.holdings_mut(seat)?.add_bundle(bundle);
        Ok(())
    }

    pub fn pay(&mut self, seat: usize, bundle: &ResourceBundle) -> Result<(), LedgerError> {
        self.holdings_mut(seat)?
            .subtract_bundle(bundle)
            .map_err(|err| LedgerError::from_holding(seat, err))?;
        self.bank.add_bundle(bundle);
        Ok(())
    }

    pub fn transfer(
        &mut self,
        from: usize,
        to: usize,
        resource: Resource,
        amount: u8,
    ) -> Result<(), LedgerError> {
        self.transfer_bundle(from, to, &ResourceBundle::single(resource, amount))
    }

    /// Player-to-player move; the bank is not involved.
    pub fn transfer_bundle(
        &mut self,
        from: usize,
        to: usize,
        bundle: &ResourceBundle,
    ) -> Result<(), LedgerError> {
        self.holdings(to)?;
        self.holdings_mut(from)?
            .subtract_bundle(bundle)
            .map_err(|err| LedgerError::from_holding(from, err))?;
        self.holdings_mut(to)?.add_bundle(bundle);
        Ok(())
    }

    /// Two-way swap between players, applied entirely or not at all.
    pub fn exchange(
        &mut self,
        a: usize,
        a_gives: &ResourceBundle,
        b: usize,
        b_gives: &ResourceBundle,
    ) -> Result<(), LedgerError> {
        let mut partner = *self.holdings(b)?;
        partner
            .subtract_bundle(b_gives)
            .map_err(|err| LedgerError::from_holding(b, err))?;
        self.transfer_bundle(a, b, a_gives)?;
        self.transfer_bundle(b, a, b_gives)
    }

    /// Credits a whole roll in one pass. A resource type whose total demand
    /// exceeds the bank's supply is withheld from every player.
    pub fn apply_production(
        &mut self,
        plan: &ProductionPlan,
    ) -> Result<ProductionReport, LedgerError> {
        for credit in plan.credits() {
            self.holdings(credit.seat)?;
        }

        let withheld: Vec<Resource> = Resource::ALL
            .into_iter()
            .filter(|resource| {
                let demand = plan.demand(*resource);
                demand > 0 && demand > self.bank.get(*resource) as u32
            })
            .collect();

        let mut deltas = vec![ResourceBundle::zero(); self.holdings.len()];
        for credit in plan.credits() {
            if withheld.contains(&credit.resource) {
                continue;
            }
            deltas[credit.seat].add(credit.resource, credit.amount);
        }
        for (seat, delta) in deltas.iter().enumerate() {
            if !delta.is_empty() {
                self.dispense(seat, delta)?;
            }
        }

        Ok(ProductionReport {
            deltas: deltas
                .into_iter()
                .enumerate()
                .filter(|(_, delta)| !delta.is_empty())
                .collect(),
            withheld,
        })
    }

    /// Checks conservation per resource type.
    pub fn audit(&self) -> Result<(), LedgerError> {
        for resource in Resource::ALL {
            let held: u32 = self.holdings.iter().map(|h| h.get(resource) as u32).sum();
            let total = held + self.bank.get(resource) as u32;
            let minted = self.minted.get(resource) as u32;
            if total != minted {
                return Err(LedgerError::InvariantViolation(format!(
                    "{resource}: {held} held + {} in bank != {minted} minted",
                    self.bank.get(resource)
                )));
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn corrupt_for_test(&mut self, seat: usize, resource: Resource) {
        self.holdings[seat].add(resource, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_debit_insufficient_leaves_ledger_unchanged() {
        let mut ledger = Ledger::new(2);
        ledger.credit(0, Resource::Wood, 2).unwrap();
        let err = ledger.debit(0, Resource::Wood, 3).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientResources {
                seat: 0,
                resource: Resource::Wood,
                available: 2,
                requested: 3,
            }
        );
        assert_eq!(ledger.holdings(0).unwrap().get(Resource::Wood), 2);
        assert_eq!(ledger.bank().get(Resource::Wood), 17);
        ledger.audit().unwrap();
    }

    #[test]
    fn test_credit_beyond_bank_fails() {
        let mut ledger = Ledger::with_supply(1, 3);
        assert!(matches!(
            ledger.credit(0, Resource::Ore, 4),
            Err(LedgerError::BankExhausted { available: 3, .. })
        ));
        assert!(ledger.holdings(0).unwrap().is_empty());
    }

    #[test]
    fn test_transfer_is_atomic() {
        let mut ledger = Ledger::new(2);
        ledger.credit(0, Resource::Sheep, 1).unwrap();
        assert!(ledger.transfer(0, 1, Resource::Sheep, 2).is_err());
        assert!(ledger.transfer(0, 5, Resource::Sheep, 1).is_err());
        assert_eq!(ledger.holdings(0).unwrap().get(Resource::Sheep), 1);
        ledger.transfer(0, 1, Resource::Sheep, 1).unwrap();
        assert_eq!(ledger.holdings(1).unwrap().get(Resource::Sheep), 1);
        assert_eq!(ledger.bank().get(Resource::Sheep), 18);
    }

    #[test]
    fn test_exchange_rolls_back_when_partner_short() {
        let mut ledger = Ledger::new(2);
        ledger.credit(0, Resource::Wood, 2).unwrap();
        let err = ledger.exchange(
            0,
            &ResourceBundle::single(Resource::Wood, 2),
            1,
            &ResourceBundle::single(Resource::Ore, 1),
        );
        assert!(matches!(err, Err(LedgerError::InsufficientResources { seat: 1, .. })));
        assert_eq!(ledger.holdings(0).unwrap().get(Resource::Wood), 2);
        assert!(ledger.holdings(1).unwrap().is_empty());
    }

    #[test]
    fn test_production_withholds_exhausted_type_entirely() {
        let mut ledger = Ledger::with_supply(3, 4);
        let mut plan = ProductionPlan::new();
        plan.push(0, Resource::Wheat, 2);
        plan.push(1, Resource::Wheat, 2);
        plan.push(2, Resource::Wheat, 1);
        plan.push(2, Resource::Brick, 1);

        let report = ledger.apply_production(&plan).unwrap();
        assert_eq!(report.withheld, vec![Resource::Wheat]);
        assert_eq!(report.deltas, vec![(2, ResourceBundle::single(Resource::Brick, 1))]);
        assert_eq!(ledger.bank().get(Resource::Wheat), 4);
        ledger.audit().unwrap();
    }

    #[test]
    fn test_production_applies_when_bank_covers_demand() {
        let mut ledger = Ledger::with_supply(2, 4);
        let mut plan = ProductionPlan::new();
        plan.push(0, Resource::Wheat, 2);
        plan.push(1, Resource::Wheat, 2);
        let report = ledger.apply_production(&plan).unwrap();
        assert!(report.withheld.is_empty());
        assert_eq!(report.deltas.len(), 2);
        assert_eq!(ledger.bank().get(Resource::Wheat), 0);
    }

    #[test]
    fn test_audit_detects_minted_resources() {
        let mut ledger = Ledger::new(2);
        ledger.corrupt_for_test(1, Resource::Brick);
        assert!(matches!(ledger.audit(), Err(LedgerError::InvariantViolation(_))));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Credit(usize, usize, u8),
        Debit(usize, usize, u8),
        Transfer(usize, usize, usize, u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..3, 0usize..5, 0u8..8).prop_map(|(s, r, a)| Op::Credit(s, r, a)),
            (0usize..3, 0usize..5, 0u8..8).prop_map(|(s, r, a)| Op::Debit(s, r, a)),
            (0usize..3, 0usize..3, 0usize..5, 0u8..8)
                .prop_map(|(f, t, r, a)| Op::Transfer(f, t, r, a)),
        ]
    }

    proptest! {
        #[test]
        fn prop_ledger_conserves_resources(
            ops in proptest::collection::vec(op_strategy(), 0..200),
        ) {
            let mut ledger = Ledger::new(3);
            for op in ops {
                let before = ledger.clone();
                let result = match op {
                    Op::Credit(s, r, a) => ledger.credit(s, Resource::ALL[r], a),
                    Op::Debit(s, r, a) => ledger.debit(s, Resource::ALL[r], a),
                    Op::Transfer(f, t, r, a) => ledger.transfer(f, t, Resource::ALL[r], a),
                };
                if result.is_err() {
                    for seat in 0..3 {
                        prop_assert_eq!(
                            ledger.holdings(seat).unwrap(),
                            before.holdings(seat).unwrap()
                        );
                    }
                    prop_assert_eq!(ledger.bank(), before.bank());
                }
                prop_assert!(ledger.audit().is_ok());
            }
        }
    }
}
