//! Validator identity and the per-height validator set.
//!
//! A [`ValidatorSet`] is immutable for the lifetime of a consensus height:
//! membership and voting power change between heights, never within one.
//! Index order is the canonical order used everywhere votes are stored or
//! iterated.

use crate::{Hash, PublicKey};
use std::collections::HashMap;
use std::fmt;

/// A 20-byte validator address derived from the validator's public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 20]);

impl Address {
    /// Derive the address for a public key (leading bytes of its digest).
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        let digest = Hash::digest(public_key.as_bytes());
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest.as_bytes()[..20]);
        Self(bytes)
    }

    /// Wrap raw address bytes.
    pub const fn from_raw(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// The raw address bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..6] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "..")
    }
}

/// A consensus validator: address, verification key, and weight.
#[derive(Debug, Clone)]
pub struct Validator {
    /// Address derived from the public key.
    pub address: Address,
    /// Key that vote signatures are verified against.
    pub public_key: PublicKey,
    /// Weight of this validator's votes. Always positive.
    pub voting_power: u64,
}

impl Validator {
    /// Create a validator. Panics if `voting_power` is zero.
    pub fn new(public_key: PublicKey, voting_power: u64) -> Self {
        assert!(voting_power > 0, "validator voting power must be positive");
        Self {
            address: Address::from_public_key(&public_key),
            public_key,
            voting_power,
        }
    }
}

/// An ordered, immutable set of validators for one height.
#[derive(Debug, Clone)]
pub struct ValidatorSet {
    validators: Vec<Validator>,
    by_address: HashMap<Address, usize>,
    total_voting_power: u64,
}

impl ValidatorSet {
    /// Build a set from validators in canonical index order.
    ///
    /// Panics on an empty set, a duplicate address, or total power
    /// overflowing `u64` — all construction-time programming errors.
    pub fn new(validators: Vec<Validator>) -> Self {
        assert!(!validators.is_empty(), "validator set cannot be empty");
        let mut by_address = HashMap::with_capacity(validators.len());
        let mut total: u64 = 0;
        for (index, validator) in validators.iter().enumerate() {
            let prev = by_address.insert(validator.address, index);
            assert!(
                prev.is_none(),
                "duplicate validator address {}",
                validator.address
            );
            total = total
                .checked_add(validator.voting_power)
                .expect("total voting power overflows u64");
        }
        Self {
            validators,
            by_address,
            total_voting_power: total,
        }
    }

    /// Number of validators.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Whether the set is empty. Always `false` by construction.
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Sum of all voting powers.
    pub fn total_voting_power(&self) -> u64 {
        self.total_voting_power
    }

    /// Validator at the given index, if in range.
    pub fn get_by_index(&self, index: usize) -> Option<&Validator> {
        self.validators.get(index)
    }

    /// Validator with the given address, together with its index.
    pub fn get_by_address(&self, address: &Address) -> Option<(usize, &Validator)> {
        let index = *self.by_address.get(address)?;
        Some((index, &self.validators[index]))
    }

    /// Iterate validators in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Validator> {
        self.validators.iter()
    }
}

/// True when `power` is strictly greater than two thirds of `total`.
///
/// Evaluated as `3·power > 2·total` in 128-bit arithmetic so the comparison
/// is exact for any `u64` voting power.
pub fn supermajority(power: u64, total: u64) -> bool {
    3 * power as u128 > 2 * total as u128
}
