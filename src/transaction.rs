//! Proposed Transaction
//!
//! Unsigned transaction data plus one signature slot per cosigner. Coin
//! specific serialization happens outside this crate: the wallet supplies
//! the sighash of every input and the public key each cosigner is expected
//! to sign it with.
//!
//! A keystore attaches all of its signatures in one validated step, so a
//! failed call never leaves a half-filled slot behind.

use bitcoin::secp256k1::{ecdsa, Message, PublicKey, Secp256k1};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::KeystoreSettings;
use crate::cosigner::SigningConfiguration;
use crate::error::{KeystoreError, KeystoreResult};
use crate::keypath::AbsoluteKeypath;
use crate::transport::{SignInput, SignRequest};

/// One input to be signed by every cosigner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    #[serde(with = "crate::serde_bytes::hex32")]
    pub sighash: [u8; 32],
    /// Address keypath, identical for every cosigner
    pub keypath: AbsoluteKeypath,
    /// Expected signing key per cosigner index
    pub cosigner_pubkeys: Vec<PublicKey>,
}

/// A signature contributed by one cosigner for one input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialSignature {
    pub input_index: usize,
    pub public_key: PublicKey,
    pub signature: ecdsa::Signature,
}

#[derive(Debug)]
pub struct ProposedTransaction {
    id: String,
    coin_code: String,
    threshold: usize,
    inputs: Vec<TxInput>,
    slots: Vec<Option<Vec<PartialSignature>>>,
    verify_signatures: bool,
}

impl ProposedTransaction {
    pub fn new(
        coin_code: impl Into<String>,
        configuration: &SigningConfiguration,
        inputs: Vec<TxInput>,
    ) -> KeystoreResult<Self> {
        let cosigner_count = configuration.cosigner_count();

        if inputs.is_empty() {
            return Err(KeystoreError::invalid_transaction("Transaction has no inputs"));
        }

        for (i, input) in inputs.iter().enumerate() {
            if input.cosigner_pubkeys.len() != cosigner_count {
                return Err(KeystoreError::invalid_transaction(format!(
                    "Input {} lists {} signing keys, configuration has {} cosigners",
                    i,
                    input.cosigner_pubkeys.len(),
                    cosigner_count
                )));
            }
            if !configuration.account_keypath().is_prefix_of(&input.keypath) {
                return Err(KeystoreError::invalid_transaction(format!(
                    "Input {} keypath {} is outside account {}",
                    i,
                    input.keypath,
                    configuration.account_keypath()
                )));
            }
        }

        Ok(Self {
            id: new_transaction_id(),
            coin_code: coin_code.into(),
            threshold: configuration.threshold(),
            inputs,
            slots: vec![None; cosigner_count],
            verify_signatures: true,
        })
    }

    /// Apply the signature verification setting
    pub fn with_settings(mut self, settings: &KeystoreSettings) -> Self {
        self.verify_signatures = settings.verify_attached_signatures;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn coin_code(&self) -> &str {
        &self.coin_code
    }

    pub fn inputs(&self) -> &[TxInput] {
        &self.inputs
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn cosigner_count(&self) -> usize {
        self.slots.len()
    }

    pub fn signatures_of(&self, cosigner_index: usize) -> Option<&[PartialSignature]> {
        self.slots.get(cosigner_index)?.as_deref()
    }

    /// Number of cosigners that have contributed
    pub fn signer_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_fully_signed(&self) -> bool {
        self.signer_count() >= self.threshold
    }

    /// Key cosigner `cosigner_index` must sign input `input_index` with
    pub fn expected_pubkey(&self, input_index: usize, cosigner_index: usize) -> KeystoreResult<PublicKey> {
        self.inputs
            .get(input_index)
            .and_then(|input| input.cosigner_pubkeys.get(cosigner_index))
            .copied()
            .ok_or_else(|| {
                KeystoreError::invalid_transaction(format!(
                    "No signing key for input {} at cosigner index {}",
                    input_index, cosigner_index
                ))
            })
    }

    /// Request a backend receives for this transaction
    pub fn sign_request(&self) -> SignRequest {
        SignRequest {
            transaction_id: self.id.clone(),
            coin_code: self.coin_code.clone(),
            inputs: self
                .inputs
                .iter()
                .map(|input| SignInput {
                    keypath: input.keypath.clone(),
                    sighash: input.sighash,
                })
                .collect(),
        }
    }

    /// Attach every signature of one cosigner, or none of them.
    ///
    /// Re-attaching an identical set is accepted so a retried call after a
    /// lost response does not fail.
    pub fn attach_signatures(
        &mut self,
        cosigner_index: usize,
        signatures: Vec<PartialSignature>,
    ) -> KeystoreResult<()> {
        if cosigner_index >= self.slots.len() {
            return Err(KeystoreError::invalid_transaction(format!(
                "Cosigner index {} out of range ({} cosigners)",
                cosigner_index,
                self.slots.len()
            )));
        }

        if signatures.len() != self.inputs.len() {
            return Err(KeystoreError::invalid_transaction(format!(
                "Expected {} signatures, got {}",
                self.inputs.len(),
                signatures.len()
            )));
        }

        let secp = Secp256k1::verification_only();
        for (i, sig) in signatures.iter().enumerate() {
            if sig.input_index != i {
                return Err(KeystoreError::invalid_transaction(format!(
                    "Signature {} is for input {}",
                    i, sig.input_index
                )));
            }
            let expected = self.expected_pubkey(i, cosigner_index)?;
            if sig.public_key != expected {
                return Err(KeystoreError::invalid_transaction(format!(
                    "Signature for input {} uses a key not assigned to cosigner {}",
                    i, cosigner_index
                )));
            }
            if self.verify_signatures {
                let message = Message::from_digest(self.inputs[i].sighash);
                secp.verify_ecdsa(&message, &sig.signature, &sig.public_key)
                    .map_err(|_| {
                        KeystoreError::invalid_transaction(format!(
                            "Signature for input {} does not verify",
                            i
                        ))
                    })?;
            }
        }

        match &self.slots[cosigner_index] {
            Some(existing) if *existing == signatures => Ok(()),
            Some(_) => Err(KeystoreError::invalid_transaction(format!(
                "Cosigner {} already attached different signatures",
                cosigner_index
            ))),
            None => {
                self.slots[cosigner_index] = Some(signatures);
                Ok(())
            }
        }
    }

    /// Consume the proposal once enough cosigners have signed
    pub fn finalize(self) -> KeystoreResult<SignedProposal> {
        if !self.is_fully_signed() {
            return Err(KeystoreError::invalid_transaction(format!(
                "Only {} of {} required cosigners signed",
                self.signer_count(),
                self.threshold
            )));
        }

        let signatures = self
            .slots
            .into_iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.map(|sigs| (index, sigs)))
            .collect();

        Ok(SignedProposal {
            id: self.id,
            coin_code: self.coin_code,
            inputs: self.inputs,
            signatures,
        })
    }
}

/// Fully signed proposal handed back to the wallet for serialization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedProposal {
    pub id: String,
    pub coin_code: String,
    pub inputs: Vec<TxInput>,
    /// Signatures keyed by cosigner index
    pub signatures: BTreeMap<usize, Vec<PartialSignature>>,
}

fn new_transaction_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
