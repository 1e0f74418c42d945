//! Validators and the weighted validator set with deterministic proposer
//! rotation by priority.

use crate::address::{Address, AddressDeserializer, AddressSerializer};
use crate::block_id::BlockId;
use crate::error::ModelsError;
use crate::vote::{BlockIdFlag, Commit};
use crate::Height;
use corten_hash::{merkle, Hash};
use corten_serialization::{
    Deserializer, I64VarIntDeserializer, I64VarIntSerializer, SerializeError, Serializer,
    U64VarIntDeserializer, U64VarIntSerializer,
};
use corten_signature::{PublicKey, PublicKeyDeserializer, PublicKeySerializer};
use nom::{
    error::{context, ContextError, ParseError},
    multi::length_count,
    IResult,
};
use std::ops::Bound::Included;

/// Maximum allowed total voting power. Small enough that priority
/// arithmetic cannot overflow an `i64` even right after a change set close to
/// the limit.
pub const MAX_TOTAL_VOTING_POWER: i64 = i64::MAX / 8;

/// Cap factor on the priority spread: max − min stays within
/// `PRIORITY_WINDOW_SIZE_FACTOR * total_voting_power`.
pub const PRIORITY_WINDOW_SIZE_FACTOR: i64 = 2;

/// One voting participant.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Validator {
    /// Address derived from the public key.
    pub address: Address,
    /// Ed25519 public key.
    pub pub_key: PublicKey,
    /// Voting weight, strictly positive inside a set.
    pub voting_power: i64,
    /// Proposer rotation accumulator.
    pub proposer_priority: i64,
}

impl Validator {
    /// Build a validator with zero starting priority.
    pub fn new(pub_key: PublicKey, voting_power: i64) -> Self {
        Validator {
            address: Address::from_public_key(&pub_key),
            pub_key,
            voting_power,
            proposer_priority: 0,
        }
    }

    /// Of two validators, true when `self` outranks `other`; ties go to the
    /// lexicographically smaller address.
    fn has_priority_over(&self, other: &Validator) -> bool {
        match self.proposer_priority.cmp(&other.proposer_priority) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.address < other.address,
        }
    }

    /// Bytes committed into the validator-set hash.
    fn hash_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(40);
        buffer.extend_from_slice(self.pub_key.to_bytes());
        let serializer = U64VarIntSerializer::new();
        let _ = serializer.serialize(&(self.voting_power as u64), &mut buffer);
        buffer
    }
}

impl std::fmt::Display for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "Validator({} power={} priority={})",
            self.address, self.voting_power, self.proposer_priority
        )
    }
}

/// The weighted validator set at one height.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ValidatorSet {
    /// Validators ordered by (voting power desc, address asc).
    pub validators: Vec<Validator>,
    /// Memoized current proposer.
    pub proposer: Option<Validator>,
    /// Memoized total voting power.
    total_voting_power: i64,
}

impl ValidatorSet {
    /// Build a set from an initial validator list and rotate once so a
    /// proposer is selected.
    pub fn new(initial: Vec<Validator>) -> Result<Self, ModelsError> {
        let mut set = ValidatorSet {
            validators: Vec::new(),
            proposer: None,
            total_voting_power: 0,
        };
        if !initial.is_empty() {
            set.update_with_change_set(initial, false)?;
            set.increment_proposer_priority(1)?;
        }
        Ok(set)
    }

    /// Build an empty set (genesis placeholder).
    pub fn empty() -> Self {
        ValidatorSet {
            validators: Vec::new(),
            proposer: None,
            total_voting_power: 0,
        }
    }

    /// Number of validators.
    pub fn size(&self) -> usize {
        self.validators.len()
    }

    /// True when the set has no members.
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Sum of all voting powers.
    pub fn total_voting_power(&self) -> i64 {
        self.total_voting_power
    }

    /// True when `address` belongs to the set.
    pub fn has_address(&self, address: &Address) -> bool {
        self.validators.iter().any(|val| val.address == *address)
    }

    /// Find a validator by address.
    pub fn get_by_address(&self, address: &Address) -> Option<&Validator> {
        self.validators.iter().find(|val| val.address == *address)
    }

    /// Find a validator's index by address.
    pub fn get_index_by_address(&self, address: &Address) -> Option<usize> {
        self.validators.iter().position(|val| val.address == *address)
    }

    /// Find a validator by index.
    pub fn get_by_index(&self, index: usize) -> Option<&Validator> {
        self.validators.get(index)
    }

    /// The memoized proposer, computing it when unset.
    pub fn get_proposer(&mut self) -> Option<Validator> {
        if self.validators.is_empty() {
            return None;
        }
        if self.proposer.is_none() {
            self.proposer = self.find_proposer();
        }
        self.proposer.clone()
    }

    fn find_proposer(&self) -> Option<Validator> {
        let mut best: Option<&Validator> = None;
        for val in &self.validators {
            best = match best {
                None => Some(val),
                Some(current) => {
                    if val.has_priority_over(current) {
                        Some(val)
                    } else {
                        Some(current)
                    }
                }
            };
        }
        best.cloned()
    }

    /// Digest committed into headers (`validators_hash`, `next_validators_hash`).
    pub fn hash(&self) -> Hash {
        let leaves: Vec<Vec<u8>> = self.validators.iter().map(|val| val.hash_bytes()).collect();
        merkle::hash_from_bytes_list(&leaves)
    }

    /// Clone then rotate the proposer `times` times.
    pub fn copy_increment_proposer_priority(&self, times: u32) -> Result<Self, ModelsError> {
        let mut copy = self.clone();
        copy.increment_proposer_priority(times)?;
        Ok(copy)
    }

    /// Rotate the proposer: each round adds every validator's power to its
    /// priority, then the maximum holder pays `total_voting_power` and
    /// becomes proposer. Priorities are rescaled and re-centered first.
    pub fn increment_proposer_priority(&mut self, times: u32) -> Result<(), ModelsError> {
        if self.validators.is_empty() {
            return Err(ModelsError::InvalidValidatorSet(
                "empty validator set".into(),
            ));
        }
        if times == 0 {
            return Err(ModelsError::InvalidValidatorSet(
                "cannot increment priority zero times".into(),
            ));
        }
        let diff_max = PRIORITY_WINDOW_SIZE_FACTOR.saturating_mul(self.total_voting_power);
        self.rescale_priorities(diff_max);
        self.shift_by_avg_proposer_priority();

        for _ in 0..times {
            for val in self.validators.iter_mut() {
                val.proposer_priority = val
                    .proposer_priority
                    .checked_add(val.voting_power)
                    .ok_or_else(|| {
                        ModelsError::InvalidValidatorSet("proposer priority overflow".into())
                    })?;
            }
            let max_index = self
                .validators
                .iter()
                .enumerate()
                .fold(0usize, |best, (idx, val)| {
                    if self.validators[best].has_priority_over(val) {
                        best
                    } else {
                        idx
                    }
                });
            self.validators[max_index].proposer_priority -= self.total_voting_power;
            self.proposer = Some(self.validators[max_index].clone());
        }
        Ok(())
    }

    /// Rescale priorities so that max − min ≤ `diff_max`.
    fn rescale_priorities(&mut self, diff_max: i64) {
        if diff_max <= 0 {
            return;
        }
        let max = self
            .validators
            .iter()
            .map(|val| val.proposer_priority)
            .max()
            .unwrap_or(0);
        let min = self
            .validators
            .iter()
            .map(|val| val.proposer_priority)
            .min()
            .unwrap_or(0);
        let diff = (max - min).abs();
        if diff > diff_max {
            let ratio = (diff + diff_max - 1) / diff_max;
            for val in self.validators.iter_mut() {
                val.proposer_priority /= ratio;
            }
        }
    }

    /// Center priorities around zero.
    fn shift_by_avg_proposer_priority(&mut self) {
        if self.validators.is_empty() {
            return;
        }
        let sum: i128 = self
            .validators
            .iter()
            .map(|val| val.proposer_priority as i128)
            .sum();
        let avg = (sum / self.validators.len() as i128) as i64;
        for val in self.validators.iter_mut() {
            val.proposer_priority -= avg;
        }
    }

    /// Apply a change set. Power 0 removes (when `allow_deletes`), new
    /// entries start at `-(tvp + tvp >> 3)` so that cycling in and out of
    /// the set cannot farm priority.
    pub fn update_with_change_set(
        &mut self,
        changes: Vec<Validator>,
        allow_deletes: bool,
    ) -> Result<(), ModelsError> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut sorted_changes = changes;
        sorted_changes.sort_by(|a, b| a.address.cmp(&b.address));

        let mut updates: Vec<Validator> = Vec::new();
        let mut deletes: Vec<Validator> = Vec::new();
        let mut prev_addr: Option<Address> = None;
        for change in sorted_changes {
            if prev_addr == Some(change.address) {
                return Err(ModelsError::InvalidValidatorSet(format!(
                    "duplicate entry {} in changes",
                    change.address
                )));
            }
            prev_addr = Some(change.address);
            if change.voting_power < 0 {
                return Err(ModelsError::InvalidValidatorSet(format!(
                    "voting power can't be negative: {}",
                    change.voting_power
                )));
            } else if change.voting_power > MAX_TOTAL_VOTING_POWER {
                return Err(ModelsError::InvalidValidatorSet(format!(
                    "voting power above maximum: {}",
                    change.voting_power
                )));
            } else if change.voting_power == 0 {
                deletes.push(change);
            } else {
                updates.push(change);
            }
        }
        if !allow_deletes && !deletes.is_empty() {
            return Err(ModelsError::InvalidValidatorSet(
                "cannot process validators with voting power 0".into(),
            ));
        }

        // The resulting set must not be empty.
        let num_new = updates
            .iter()
            .filter(|val| !self.has_address(&val.address))
            .count();
        if num_new == 0 && self.validators.len() == deletes.len() {
            return Err(ModelsError::InvalidValidatorSet(
                "applying the validator changes would result in empty set".into(),
            ));
        }

        // Removals must refer to known members.
        let mut removed_voting_power: i64 = 0;
        for delete in &deletes {
            match self.get_by_address(&delete.address) {
                Some(val) => removed_voting_power += val.voting_power,
                None => {
                    return Err(ModelsError::InvalidValidatorSet(format!(
                        "failed to find validator {} to remove",
                        delete.address
                    )))
                }
            }
        }
        if deletes.len() > self.validators.len() {
            return Err(ModelsError::ContainerInconsistency(
                "more deletes than validators".into(),
            ));
        }

        // Check the updated total before applying anything.
        let mut tvp_after_removals = self.total_voting_power - removed_voting_power;
        for update in &updates {
            let delta = match self.get_by_address(&update.address) {
                Some(val) => update.voting_power - val.voting_power,
                None => update.voting_power,
            };
            tvp_after_removals += delta;
            if tvp_after_removals > MAX_TOTAL_VOTING_POWER {
                return Err(ModelsError::InvalidValidatorSet(
                    "total voting power of resulting set exceeds maximum".into(),
                ));
            }
        }
        let tvp_after_updates_before_removals = tvp_after_removals + removed_voting_power;

        // Starter priorities for genuinely new members.
        let mut updates = updates;
        for update in updates.iter_mut() {
            match self.get_by_address(&update.address) {
                Some(val) => update.proposer_priority = val.proposer_priority,
                None => {
                    update.proposer_priority = -(tvp_after_updates_before_removals
                        + (tvp_after_updates_before_removals >> 3))
                }
            }
        }

        self.apply_updates(updates);
        self.apply_removals(&deletes);
        self.update_total_voting_power()?;

        self.rescale_priorities(PRIORITY_WINDOW_SIZE_FACTOR.saturating_mul(self.total_voting_power));
        self.shift_by_avg_proposer_priority();

        self.validators.sort_by(|a, b| {
            b.voting_power
                .cmp(&a.voting_power)
                .then_with(|| a.address.cmp(&b.address))
        });
        self.proposer = None;
        Ok(())
    }

    /// Merge sorted `updates` into the member list, address-keyed.
    fn apply_updates(&mut self, updates: Vec<Validator>) {
        let mut existing = self.validators.clone();
        existing.sort_by(|a, b| a.address.cmp(&b.address));

        let mut merged: Vec<Validator> = Vec::with_capacity(existing.len() + updates.len());
        let mut existing = existing.into_iter().peekable();
        let mut updates = updates.into_iter().peekable();
        loop {
            match (existing.peek(), updates.peek()) {
                (Some(current), Some(update)) => {
                    if current.address < update.address {
                        merged.push(existing.next().unwrap());
                    } else {
                        if current.address == update.address {
                            existing.next();
                        }
                        merged.push(updates.next().unwrap());
                    }
                }
                (Some(_), None) => merged.push(existing.next().unwrap()),
                (None, Some(_)) => merged.push(updates.next().unwrap()),
                (None, None) => break,
            }
        }
        self.validators = merged;
    }

    /// Drop `deletes` from the member list.
    fn apply_removals(&mut self, deletes: &[Validator]) {
        let delete_addresses: Vec<Address> = deletes.iter().map(|val| val.address).collect();
        self.validators
            .retain(|val| !delete_addresses.contains(&val.address));
    }

    fn update_total_voting_power(&mut self) -> Result<(), ModelsError> {
        let mut sum: i64 = 0;
        for val in &self.validators {
            sum = sum.checked_add(val.voting_power).ok_or_else(|| {
                ModelsError::InvalidValidatorSet("total voting power overflow".into())
            })?;
            if sum > MAX_TOTAL_VOTING_POWER {
                return Err(ModelsError::InvalidValidatorSet(
                    "total voting power exceeded maximum".into(),
                ));
            }
        }
        self.total_voting_power = sum;
        Ok(())
    }

    /// Check that a commit carries +2/3 of this set's power in valid
    /// signatures for `block_id`. Stops counting once the quorum is reached.
    pub fn verify_commit_light(
        &self,
        chain_id: &str,
        block_id: &BlockId,
        height: Height,
        commit: &Commit,
    ) -> Result<(), ModelsError> {
        if commit.height != height {
            return Err(ModelsError::InvalidVote(format!(
                "commit height {} != expected {}",
                commit.height, height
            )));
        }
        if commit.block_id != *block_id {
            return Err(ModelsError::InvalidVote(
                "commit is for a different block id".into(),
            ));
        }
        if commit.signatures.len() != self.validators.len() {
            return Err(ModelsError::ContainerInconsistency(format!(
                "commit size {} != validator set size {}",
                commit.signatures.len(),
                self.validators.len()
            )));
        }
        let quorum = self.total_voting_power * 2 / 3;
        let mut tallied: i64 = 0;
        for (index, sig) in commit.signatures.iter().enumerate() {
            if sig.flag != BlockIdFlag::Commit {
                continue;
            }
            let val = &self.validators[index];
            let vote = commit
                .get_vote(index)
                .ok_or_else(|| ModelsError::ContainerInconsistency("missing vote".into()))?;
            vote.verify(chain_id, &val.pub_key)?;
            tallied += val.voting_power;
            if tallied > quorum {
                return Ok(());
            }
        }
        Err(ModelsError::InvalidVote(format!(
            "commit carries {} of {} voting power, quorum not reached",
            tallied, self.total_voting_power
        )))
    }
}

impl std::fmt::Display for ValidatorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "ValidatorSet(size={} total_power={})",
            self.size(),
            self.total_voting_power
        )
    }
}

/// Serializer for [`Validator`].
#[derive(Clone, Default)]
pub struct ValidatorSerializer {
    address_serializer: AddressSerializer,
    pub_key_serializer: PublicKeySerializer,
    i64_serializer: I64VarIntSerializer,
}

impl ValidatorSerializer {
    /// Create a validator serializer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Serializer<Validator> for ValidatorSerializer {
    fn serialize(&self, value: &Validator, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.address_serializer.serialize(&value.address, buffer)?;
        self.pub_key_serializer.serialize(&value.pub_key, buffer)?;
        self.i64_serializer.serialize(&value.voting_power, buffer)?;
        self.i64_serializer
            .serialize(&value.proposer_priority, buffer)
    }
}

/// Deserializer for [`Validator`].
#[derive(Clone, Default)]
pub struct ValidatorDeserializer {
    address_deserializer: AddressDeserializer,
    pub_key_deserializer: PublicKeyDeserializer,
    i64_deserializer: I64VarIntDeserializer,
}

impl ValidatorDeserializer {
    /// Create a validator deserializer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Deserializer<Validator> for ValidatorDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], Validator, E> {
        context("Failed validator deserialization", |input: &'a [u8]| {
            let (rest, address) = self.address_deserializer.deserialize(input)?;
            let (rest, pub_key) = self.pub_key_deserializer.deserialize(rest)?;
            let (rest, voting_power) = self.i64_deserializer.deserialize(rest)?;
            let (rest, proposer_priority) = self.i64_deserializer.deserialize(rest)?;
            Ok((
                rest,
                Validator {
                    address,
                    pub_key,
                    voting_power,
                    proposer_priority,
                },
            ))
        })(buffer)
    }
}

/// Serializer for [`ValidatorSet`].
#[derive(Clone, Default)]
pub struct ValidatorSetSerializer {
    u64_serializer: U64VarIntSerializer,
    validator_serializer: ValidatorSerializer,
}

impl ValidatorSetSerializer {
    /// Create a validator set serializer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Serializer<ValidatorSet> for ValidatorSetSerializer {
    fn serialize(&self, value: &ValidatorSet, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.u64_serializer
            .serialize(&(value.validators.len() as u64), buffer)?;
        for val in &value.validators {
            self.validator_serializer.serialize(val, buffer)?;
        }
        match &value.proposer {
            Some(proposer) => {
                buffer.push(1);
                self.validator_serializer.serialize(proposer, buffer)?;
            }
            None => buffer.push(0),
        }
        Ok(())
    }
}

/// Deserializer for [`ValidatorSet`].
#[derive(Clone)]
pub struct ValidatorSetDeserializer {
    count_deserializer: U64VarIntDeserializer,
    validator_deserializer: ValidatorDeserializer,
}

impl ValidatorSetDeserializer {
    /// Create a validator set deserializer accepting at most `max_validators`
    /// members.
    pub fn new(max_validators: u64) -> Self {
        Self {
            count_deserializer: U64VarIntDeserializer::new(Included(0), Included(max_validators)),
            validator_deserializer: ValidatorDeserializer::new(),
        }
    }
}

impl Deserializer<ValidatorSet> for ValidatorSetDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], ValidatorSet, E> {
        context("Failed validator set deserialization", |input: &'a [u8]| {
            let (rest, validators) = length_count(
                context("Failed validator count deserialization", |input| {
                    self.count_deserializer.deserialize(input)
                }),
                context("Failed validator deserialization", |input| {
                    self.validator_deserializer.deserialize(input)
                }),
            )(input)?;
            let (rest, has_proposer) = nom::number::complete::be_u8(rest)?;
            let (rest, proposer) = match has_proposer {
                0 => (rest, None),
                1 => {
                    let (rest, proposer) = self.validator_deserializer.deserialize(rest)?;
                    (rest, Some(proposer))
                }
                _ => {
                    return Err(nom::Err::Error(ParseError::from_error_kind(
                        input,
                        nom::error::ErrorKind::Tag,
                    )))
                }
            };
            let mut set = ValidatorSet {
                validators,
                proposer,
                total_voting_power: 0,
            };
            set.update_total_voting_power().map_err(|_| {
                nom::Err::Error(ParseError::from_error_kind(
                    input,
                    nom::error::ErrorKind::Verify,
                ))
            })?;
            Ok((rest, set))
        })(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corten_signature::KeyPair;
    use nom::error::VerboseError;

    fn equal_power_set(count: usize, power: i64) -> (Vec<KeyPair>, ValidatorSet) {
        let keypairs: Vec<KeyPair> = (0..count).map(|_| KeyPair::generate()).collect();
        let validators: Vec<Validator> = keypairs
            .iter()
            .map(|kp| Validator::new(kp.get_public_key(), power))
            .collect();
        let set = ValidatorSet::new(validators).unwrap();
        (keypairs, set)
    }

    #[test]
    fn proposer_selection_equal_power() {
        // Four equal validators with zero starting priority: the first
        // proposer is the lexicographically smallest address, one rotation
        // puts it at -3*power while the others gained +power.
        let keypairs: Vec<KeyPair> = (0..4).map(|_| KeyPair::generate()).collect();
        let validators: Vec<Validator> = keypairs
            .iter()
            .map(|kp| Validator::new(kp.get_public_key(), 10))
            .collect();
        let mut addresses: Vec<Address> = validators.iter().map(|val| val.address).collect();
        addresses.sort();

        let mut set = ValidatorSet {
            validators,
            proposer: None,
            total_voting_power: 0,
        };
        set.update_total_voting_power().unwrap();

        set.increment_proposer_priority(1).unwrap();
        let first = set.proposer.clone().unwrap();
        assert_eq!(first.address, addresses[0]);
        assert_eq!(
            set.get_by_address(&first.address).unwrap().proposer_priority,
            -30
        );
        for addr in &addresses[1..] {
            assert_eq!(set.get_by_address(addr).unwrap().proposer_priority, 10);
        }

        set.increment_proposer_priority(1).unwrap();
        let second = set.proposer.clone().unwrap();
        assert_eq!(second.address, addresses[1]);
    }

    #[test]
    fn rotation_is_power_proportional() {
        let keypairs: Vec<KeyPair> = (0..3).map(|_| KeyPair::generate()).collect();
        let powers = [1i64, 1, 8];
        let validators: Vec<Validator> = keypairs
            .iter()
            .zip(powers.iter())
            .map(|(kp, power)| Validator::new(kp.get_public_key(), *power))
            .collect();
        let heavy = validators[2].address;
        let mut set = ValidatorSet::new(validators).unwrap();

        let mut heavy_count = 0;
        for _ in 0..100 {
            set.increment_proposer_priority(1).unwrap();
            if set.proposer.as_ref().unwrap().address == heavy {
                heavy_count += 1;
            }
        }
        assert!((70..=90).contains(&heavy_count), "heavy_count={}", heavy_count);
    }

    #[test]
    fn change_set_add_update_remove() {
        let (_, mut set) = equal_power_set(3, 10);
        let initial_hash = set.hash();

        // update one power, add one, remove one
        let newcomer = KeyPair::generate();
        let removed = set.validators[2].clone();
        let mut changes = vec![
            Validator::new(set.validators[0].pub_key, 25),
            Validator::new(newcomer.get_public_key(), 5),
        ];
        changes.push(Validator {
            voting_power: 0,
            ..removed.clone()
        });
        set.update_with_change_set(changes, true).unwrap();

        assert_eq!(set.size(), 3);
        assert!(!set.has_address(&removed.address));
        assert_eq!(set.total_voting_power(), 25 + 10 + 5);
        assert_ne!(set.hash(), initial_hash);
        // power-desc ordering
        assert_eq!(set.validators[0].voting_power, 25);

        // newcomer starts deep in debt, so it cannot immediately propose
        let newcomer_addr = Address::from_public_key(&newcomer.get_public_key());
        assert!(set.get_by_address(&newcomer_addr).unwrap().proposer_priority < 0);
    }

    #[test]
    fn change_set_rejections() {
        let (_, mut set) = equal_power_set(2, 10);
        let bogus = KeyPair::generate();
        // negative power
        assert!(set
            .update_with_change_set(vec![Validator::new(bogus.get_public_key(), -1)], true)
            .is_err());
        // deletion of unknown validator
        assert!(set
            .update_with_change_set(vec![Validator::new(bogus.get_public_key(), 0)], true)
            .is_err());
        // emptying the set
        let all_zero: Vec<Validator> = set
            .validators
            .iter()
            .map(|val| Validator {
                voting_power: 0,
                ..val.clone()
            })
            .collect();
        assert!(set.update_with_change_set(all_zero, true).is_err());
    }

    #[test]
    fn total_power_cap_enforced() {
        let (_, mut set) = equal_power_set(2, 10);
        let huge = KeyPair::generate();
        assert!(set
            .update_with_change_set(
                vec![Validator::new(huge.get_public_key(), MAX_TOTAL_VOTING_POWER)],
                true
            )
            .is_err());
    }

    #[test]
    fn wire_roundtrip() {
        let (_, set) = equal_power_set(3, 7);
        let mut buffer = Vec::new();
        ValidatorSetSerializer::new()
            .serialize(&set, &mut buffer)
            .unwrap();
        let (rest, decoded) = ValidatorSetDeserializer::new(1024)
            .deserialize::<VerboseError<&[u8]>>(&buffer)
            .unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, set);
    }
}
