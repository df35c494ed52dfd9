//! Packing owner signatures for `execTransaction`.
//!
//! Safe walks the signature blob in 65-byte steps and requires each recovered
//! owner to be strictly greater than the previous one, so the blob must be
//! ordered by owner address ascending.

use alloy::primitives::Bytes;

use crate::{
    confirmations::{Confirmation, ConfirmationSet},
    error::{CoordinatorError, Result},
};

/// Concatenates one signature per owner in ascending owner order.
pub fn aggregate(confirmations: &ConfirmationSet, threshold: u64) -> Result<Bytes> {
    if (confirmations.len() as u64) < threshold {
        return Err(CoordinatorError::InsufficientConfirmations {
            have: confirmations.len(),
            need: threshold,
        });
    }

    let mut packed = Vec::with_capacity(confirmations.len() * 65);
    for confirmation in confirmations.iter() {
        packed.extend_from_slice(&confirmation.signature);
    }
    Ok(packed.into())
}

/// [`aggregate`] over a raw list; later entries from the same owner win.
pub fn aggregate_all(
    confirmations: impl IntoIterator<Item = Confirmation>,
    threshold: u64,
) -> Result<Bytes> {
    aggregate(&confirmations.into_iter().collect(), threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;
    use proptest::prelude::*;

    fn confirmation(owner: u8, fill: u8) -> Confirmation {
        Confirmation {
            signer: Address::repeat_byte(owner),
            signature: Bytes::from(vec![fill; 65]),
            submitted_at: None,
        }
    }

    #[test]
    fn orders_by_owner_address() {
        let packed =
            aggregate_all([confirmation(0xbb, 2), confirmation(0xaa, 1)], 2).unwrap();
        assert_eq!(packed.len(), 130);
        assert!(packed[..65].iter().all(|b| *b == 1));
        assert!(packed[65..].iter().all(|b| *b == 2));
    }

    #[test]
    fn below_threshold_is_reported() {
        let err = aggregate_all([confirmation(0xaa, 1), confirmation(0xaa, 3)], 2).unwrap_err();
        assert!(matches!(err, CoordinatorError::InsufficientConfirmations { have: 1, need: 2 }));
    }

    proptest! {
        #[test]
        fn output_depends_only_on_the_set(
            owners in proptest::collection::btree_set(1u8..=255, 1..8),
            seed in any::<u64>(),
        ) {
            let confirmations: Vec<_> = owners.iter().map(|o| confirmation(*o, *o)).collect();
            let mut shuffled = confirmations.clone();
            let len = shuffled.len();
            shuffled.rotate_left((seed as usize) % len);
            shuffled.reverse();

            let threshold = owners.len() as u64;
            prop_assert_eq!(
                aggregate_all(confirmations, threshold).unwrap(),
                aggregate_all(shuffled, threshold).unwrap()
            );
        }
    }
}
