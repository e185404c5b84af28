//! BLS-backed implementation of the signature [`Verifier`].

use rondo_core::{Verifier, VerifierError};
use rondo_types::{
    timeout_message, verify_aggregate, verify_aggregate_multi, vote_message, Hash, PublicKey,
    Signature, ValidatorInfo, View,
};

/// Verifies consensus signatures against explicitly resolved signer sets.
///
/// Stateless; the committee resolution happens in the validator before the
/// verifier is invoked.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlsVerifier;

impl BlsVerifier {
    /// Create a verifier.
    pub fn new() -> Self {
        Self
    }
}

impl Verifier for BlsVerifier {
    fn verify_vote(
        &self,
        voter: &ValidatorInfo,
        sig_data: &Signature,
        view: View,
        block_id: &Hash,
    ) -> Result<(), VerifierError> {
        let message = vote_message(view, block_id);
        if voter.public_key.verify(&message, sig_data) {
            Ok(())
        } else {
            Err(VerifierError::InvalidSignature)
        }
    }

    fn verify_qc(
        &self,
        signers: &[ValidatorInfo],
        sig_data: &Signature,
        view: View,
        block_id: &Hash,
    ) -> Result<(), VerifierError> {
        if signers.is_empty() {
            return Err(VerifierError::InvalidFormat("empty signer set".into()));
        }
        let message = vote_message(view, block_id);
        let pks: Vec<PublicKey> = signers.iter().map(|s| s.public_key.clone()).collect();
        if verify_aggregate(&message, sig_data, &pks) {
            Ok(())
        } else {
            Err(VerifierError::InvalidSignature)
        }
    }

    fn verify_tc(
        &self,
        signers: &[ValidatorInfo],
        sig_data: &Signature,
        view: View,
        newest_qc_views: &[View],
    ) -> Result<(), VerifierError> {
        if signers.is_empty() || signers.len() != newest_qc_views.len() {
            return Err(VerifierError::InvalidFormat(
                "signer set and contributed views must align".into(),
            ));
        }
        let messages: Vec<Vec<u8>> = newest_qc_views
            .iter()
            .map(|qc_view| timeout_message(view, *qc_view))
            .collect();
        let pks: Vec<PublicKey> = signers.iter().map(|s| s.public_key.clone()).collect();
        if verify_aggregate_multi(&messages, sig_data, &pks) {
            Ok(())
        } else {
            Err(VerifierError::InvalidSignature)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rondo_types::test_utils::test_validators;
    use rondo_types::Signature as Sig;

    #[test]
    fn test_verify_vote() {
        let (keys, validators) = test_validators(2);
        let verifier = BlsVerifier::new();
        let block_id = Hash::digest(b"b");
        let voter = validators.by_index(0).unwrap();

        let sig = keys[0].sign(&vote_message(View(3), &block_id));
        assert!(verifier.verify_vote(voter, &sig, View(3), &block_id).is_ok());
        assert_eq!(
            verifier.verify_vote(voter, &sig, View(4), &block_id),
            Err(VerifierError::InvalidSignature)
        );
    }

    #[test]
    fn test_verify_qc_aggregate() {
        let (keys, validators) = test_validators(3);
        let verifier = BlsVerifier::new();
        let block_id = Hash::digest(b"b");
        let message = vote_message(View(3), &block_id);

        let sigs: Vec<Sig> = keys.iter().map(|k| k.sign(&message)).collect();
        let aggregated = Sig::aggregate_bls(&sigs).unwrap();
        let signers: Vec<ValidatorInfo> = validators.iter().cloned().collect();

        assert!(verifier
            .verify_qc(&signers, &aggregated, View(3), &block_id)
            .is_ok());
        assert!(verifier
            .verify_qc(&signers, &aggregated, View(4), &block_id)
            .is_err());
        assert!(verifier
            .verify_qc(&[], &aggregated, View(3), &block_id)
            .is_err());
    }

    #[test]
    fn test_verify_tc_multi_message() {
        let (keys, validators) = test_validators(3);
        let verifier = BlsVerifier::new();
        let qc_views = [View(6), View(5), View(6)];

        let sigs: Vec<Sig> = keys
            .iter()
            .zip(qc_views)
            .map(|(k, v)| k.sign(&timeout_message(View(7), v)))
            .collect();
        let aggregated = Sig::aggregate_bls(&sigs).unwrap();
        let signers: Vec<ValidatorInfo> = validators.iter().cloned().collect();

        assert!(verifier
            .verify_tc(&signers, &aggregated, View(7), &qc_views)
            .is_ok());

        // Mismatched contributed views fail.
        assert!(verifier
            .verify_tc(&signers, &aggregated, View(7), &[View(6), View(6), View(6)])
            .is_err());
        // Misaligned lengths are malformed.
        assert!(matches!(
            verifier.verify_tc(&signers, &aggregated, View(7), &qc_views[..2]),
            Err(VerifierError::InvalidFormat(_))
        ));
    }
}
