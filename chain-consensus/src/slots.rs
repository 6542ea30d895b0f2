//! Fixed-size per-validator slot table

use crate::validators::{ValidatorIndex, MAX_VALIDATORS};
use chain_core::{BinaryReader, BinaryWriter, CoreResult, Decode, Encode};

/// One optional entry per validator, sized to the validator set.
///
/// Every access is bounds-checked against the set size; out-of-range reads
/// yield nothing and out-of-range writes are refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorSlots<T> {
    slots: Vec<Option<T>>,
}

impl<T> ValidatorSlots<T> {
    /// `n` empty slots
    pub fn new(n: usize) -> Self {
        Self {
            slots: (0..n).map(|_| None).collect(),
        }
    }

    /// Number of slots (the validator count)
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: ValidatorIndex) -> Option<&T> {
        self.slots.get(usize::from(index)).and_then(Option::as_ref)
    }

    pub fn is_set(&self, index: ValidatorIndex) -> bool {
        self.get(index).is_some()
    }

    /// Fill `index`; returns false when the index is outside the table
    pub fn set(&mut self, index: ValidatorIndex, value: T) -> bool {
        match self.slots.get_mut(usize::from(index)) {
            Some(slot) => {
                *slot = Some(value);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self, index: ValidatorIndex) -> Option<T> {
        self.slots.get_mut(usize::from(index)).and_then(Option::take)
    }

    /// Empty every slot that fails `keep`
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|v| !keep(v)) {
                *slot = None;
            }
        }
    }

    /// Occupied slots with their validator index, in validator order
    pub fn iter(&self) -> impl Iterator<Item = (ValidatorIndex, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|v| (i as ValidatorIndex, v)))
    }

    /// Number of occupied slots
    pub fn count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn count_where(&self, mut predicate: impl FnMut(&T) -> bool) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.as_ref().is_some_and(&mut predicate))
            .count()
    }
}

impl<T: Clone> ValidatorSlots<T> {
    /// Copy of the table keeping only entries that pass `keep`
    pub fn filtered(&self, mut keep: impl FnMut(&T) -> bool) -> Self {
        Self {
            slots: self
                .slots
                .iter()
                .map(|slot| slot.as_ref().filter(|v| keep(*v)).cloned())
                .collect(),
        }
    }
}

impl<T: Encode> Encode for ValidatorSlots<T> {
    fn encode(&self, writer: &mut BinaryWriter) {
        writer.write_var_int(self.slots.len() as u64);
        for slot in &self.slots {
            match slot {
                Some(value) => {
                    writer.write_bool(true);
                    writer.write(value);
                }
                None => writer.write_bool(false),
            }
        }
    }
}

impl<T: Decode> Decode for ValidatorSlots<T> {
    fn decode(reader: &mut BinaryReader<'_>) -> CoreResult<Self> {
        let len = reader.read_var_int(MAX_VALIDATORS as u64)? as usize;
        let mut slots = Vec::with_capacity(len);
        for _ in 0..len {
            slots.push(if reader.read_bool()? {
                Some(reader.read()?)
            } else {
                None
            });
        }
        Ok(Self { slots })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_core::Hash;

    #[test]
    fn test_bounds_are_checked() {
        let mut slots = ValidatorSlots::new(4);
        assert!(slots.set(3, 30u32));
        assert!(!slots.set(4, 40));
        assert_eq!(slots.get(3), Some(&30));
        assert_eq!(slots.get(9), None);
        assert_eq!(slots.clear(9), None);
        assert_eq!(slots.len(), 4);
        assert_eq!(slots.count(), 1);
    }

    #[test]
    fn test_iter_in_validator_order() {
        let mut slots = ValidatorSlots::new(5);
        slots.set(4, 'd');
        slots.set(1, 'a');
        slots.set(2, 'b');
        let seen: Vec<_> = slots.iter().collect();
        assert_eq!(seen, vec![(1, &'a'), (2, &'b'), (4, &'d')]);
        assert_eq!(slots.count_where(|c| *c != 'b'), 2);
    }

    #[test]
    fn test_retain_and_filtered() {
        let mut slots = ValidatorSlots::new(3);
        slots.set(0, 1u8);
        slots.set(1, 2);
        slots.set(2, 3);

        let odd = slots.filtered(|v| v % 2 == 1);
        assert_eq!(odd.count(), 2);
        assert_eq!(slots.count(), 3);

        slots.retain(|v| *v > 1);
        assert!(!slots.is_set(0));
        assert_eq!(slots.count(), 2);
    }

    #[test]
    fn test_presence_flags_encoding() {
        let mut slots = ValidatorSlots::new(3);
        slots.set(1, Hash::new([7; 32]));
        let bytes = slots.to_bytes();
        assert_eq!(bytes.len(), 1 + 1 + (1 + 32) + 1);
        assert_eq!(&bytes[..3], &[3, 0, 1]);
        assert_eq!(ValidatorSlots::<Hash>::from_bytes(&bytes).unwrap(), slots);
    }
}
