use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Resource, StructureKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceBundle {
    counts: [u8; Resource::ALL.len()],
}

impl Default for ResourceBundle {
    fn default() -> Self {
        Self::zero()
    }
}

impl ResourceBundle {
    pub const fn from_counts(counts: [u8; 5]) -> Self {
        Self { counts }
    }

    pub const fn zero() -> Self {
        Self {
            counts: [0; Resource::ALL.len()],
        }
    }

    pub const fn uniform(amount: u8) -> Self {
        Self {
            counts: [amount; Resource::ALL.len()],
        }
    }

    pub fn single(resource: Resource, amount: u8) -> Self {
        let mut bundle = Self::zero();
        bundle.add(resource, amount);
        bundle
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().map(|&v| v as u32).sum()
    }

    pub fn add(&mut self, resource: Resource, amount: u8) {
        let idx = resource_index(resource);
        self.counts[idx] = self.counts[idx].saturating_add(amount);
    }

    pub fn add_bundle(&mut self, other: &ResourceBundle) {
        for (idx, value) in other.counts.iter().enumerate() {
            self.counts[idx] = self.counts[idx].saturating_add(*value);
        }
    }

    pub fn subtract(&mut self, resource: Resource, amount: u8) -> Result<(), ResourceError> {
        let idx = resource_index(resource);
        if self.counts[idx] < amount {
            return Err(ResourceError::InsufficientResource {
                resource,
                available: self.counts[idx],
                requested: amount,
            });
        }
        self.counts[idx] -= amount;
        Ok(())
    }

    /// All-or-nothing: on error the bundle is untouched and the first short
    /// resource is reported.
    pub fn subtract_bundle(&mut self, other: &ResourceBundle) -> Result<(), ResourceError> {
        if let Some((resource, requested)) = self.first_shortfall(other) {
            return Err(ResourceError::InsufficientResource {
                resource,
                available: self.get(resource),
                requested,
            });
        }
        for (idx, value) in other.counts.iter().enumerate() {
            self.counts[idx] -= *value;
        }
        Ok(())
    }

    pub fn can_afford(&self, other: &ResourceBundle) -> bool {
        self.first_shortfall(other).is_none()
    }

    fn first_shortfall(&self, other: &ResourceBundle) -> Option<(Resource, u8)> {
        self.iter()
            .zip(other.iter())
            .find(|((_, have), (_, need))| have < need)
            .map(|(_, (resource, need))| (resource, need))
    }

    pub fn is_empty(&self) -> bool {
        self.counts.iter().all(|&value| value == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Resource, u8)> + '_ {
        Resource::ALL.into_iter().zip(self.counts.iter().copied())
    }

    pub fn counts(&self) -> [u8; Resource::ALL.len()] {
        self.counts
    }

    pub fn get(&self, resource: Resource) -> u8 {
        self.counts[resource_index(resource)]
    }

    /// The only resource with a non-zero count, if exactly one has one.
    pub fn single_kind(&self) -> Option<(Resource, u8)> {
        let mut present = self.iter().filter(|(_, amount)| *amount > 0);
        let first = present.next()?;
        match present.next() {
            Some(_) => None,
            None => Some(first),
        }
    }
}

impl fmt::Display for ResourceBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "nothing");
        }
        let mut parts = vec![];
        for (resource, amount) in self.iter() {
            if amount > 0 {
                parts.push(format!("{amount}x{resource}"));
            }
        }
        write!(f, "{}", parts.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    #[error("insufficient {resource}: have {available}, need {requested}")]
    InsufficientResource {
        resource: Resource,
        available: u8,
        requested: u8,
    },
}

pub const fn resource_index(resource: Resource) -> usize {
    match resource {
        Resource::Wood => 0,
        Resource::Brick => 1,
        Resource::Sheep => 2,
        Resource::Wheat => 3,
        Resource::Ore => 4,
    }
}

pub const COST_ROAD: ResourceBundle = ResourceBundle::from_counts([1, 1, 0, 0, 0]);
pub const COST_SETTLEMENT: ResourceBundle = ResourceBundle::from_counts([1, 1, 1, 1, 0]);
pub const COST_CITY: ResourceBundle = ResourceBundle::from_counts([0, 0, 0, 2, 3]);
pub const COST_DEVELOPMENT: ResourceBundle = ResourceBundle::from_counts([0, 0, 1, 1, 1]);

pub fn build_cost(kind: StructureKind) -> ResourceBundle {
    match kind {
        StructureKind::Road => COST_ROAD,
        StructureKind::Settlement => COST_SETTLEMENT,
        StructureKind::City => COST_CITY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtract_bundle_is_all_or_nothing() {
        let mut bundle = ResourceBundle::from_counts([1, 1, 0, 5, 5]);
        let err = bundle.subtract_bundle(&COST_SETTLEMENT).unwrap_err();
        assert_eq!(
            err,
            ResourceError::InsufficientResource {
                resource: Resource::Sheep,
                available: 0,
                requested: 1,
            }
        );
        assert_eq!(bundle, ResourceBundle::from_counts([1, 1, 0, 5, 5]));

        bundle.subtract_bundle(&COST_CITY).unwrap();
        assert_eq!(bundle, ResourceBundle::from_counts([1, 1, 0, 3, 2]));
    }

    #[test]
    fn test_single_kind() {
        assert_eq!(
            ResourceBundle::single(Resource::Ore, 4).single_kind(),
            Some((Resource::Ore, 4))
        );
        assert_eq!(COST_ROAD.single_kind(), None);
        assert_eq!(ResourceBundle::zero().single_kind(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(COST_ROAD.to_string(), "1xWOOD, 1xBRICK");
        assert_eq!(ResourceBundle::zero().to_string(), "nothing");
    }
}
