//! Signing Coordinator
//!
//! Drives one signing round for one proposed transaction:
//! 1. resolve the keystores the configuration requires, ordered by index
//! 2. call `sign_transaction` on each in increasing cosigner index
//! 3. stop at the first failure and report which cosigner failed
//!
//! The coordinator never serializes or broadcasts. It also never retries;
//! a failed round is terminal and the caller decides what happens next.

use serde::Serialize;
use std::collections::HashSet;

use crate::cosigner::SigningConfiguration;
use crate::error::{ErrorCode, KeystoreError, KeystoreResult};
use crate::keypath::AbsoluteKeypath;
use crate::keystore::{CancellationToken, Keystore};
use crate::transaction::ProposedTransaction;
use crate::types::{Coin, ScriptType, SigningMode};

/// Progress of a signing round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundState {
    Pending,
    /// Waiting on the keystore at this cosigner index
    Signing(usize),
    Complete,
    Failed { at: usize, cause: KeystoreError },
}

impl RoundState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RoundState::Complete | RoundState::Failed { .. })
    }
}

/// Outcome of one keystore call within a round
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CosignerOutcome {
    pub cosigner: usize,
    pub error: Option<ErrorCode>,
}

/// Summary of a completed round
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundReport {
    pub transaction_id: String,
    /// Cosigner indices in the order they signed
    pub signed_by: Vec<usize>,
    pub fully_signed: bool,
}

pub struct SigningCoordinator {
    configuration: SigningConfiguration,
    cancel: CancellationToken,
    state: RoundState,
    history: Vec<CosignerOutcome>,
}

impl SigningCoordinator {
    pub fn new(configuration: &SigningConfiguration) -> Self {
        Self {
            configuration: configuration.clone(),
            cancel: CancellationToken::new(),
            state: RoundState::Pending,
            history: Vec::new(),
        }
    }

    /// Share a cancellation token with every keystore call of the round
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> &RoundState {
        &self.state
    }

    pub fn history(&self) -> &[CosignerOutcome] {
        &self.history
    }

    pub fn configuration(&self) -> &SigningConfiguration {
        &self.configuration
    }

    /// Order `keystores` by cosigner index and check they can sign under
    /// this configuration. Makes no backend calls.
    pub fn resolve<'a>(&self, keystores: &[&'a dyn Keystore]) -> KeystoreResult<Vec<&'a dyn Keystore>> {
        match self.configuration.signing_mode() {
            SigningMode::SingleSig => {
                let mut single = keystores
                    .iter()
                    .copied()
                    .filter(|k| k.signing_mode() == SigningMode::SingleSig);
                match (single.next(), single.next()) {
                    (Some(keystore), None) => Ok(vec![keystore]),
                    (None, _) => Err(KeystoreError::configuration(
                        "No single-sig keystore supplied for a single-sig transaction",
                    )),
                    (Some(_), Some(_)) => Err(KeystoreError::configuration(
                        "More than one single-sig keystore supplied",
                    )),
                }
            }
            SigningMode::Multisig => {
                let count = self.configuration.cosigner_count();
                let mut seen = HashSet::new();
                let mut ordered = Vec::with_capacity(keystores.len());

                for keystore in keystores.iter().copied() {
                    if keystore.signing_mode() != SigningMode::Multisig {
                        return Err(KeystoreError::configuration(format!(
                            "A single-sig {} keystore cannot sign a multisig transaction",
                            keystore.kind()
                        )));
                    }
                    let index = keystore.bound_cosigner_index().ok_or_else(|| {
                        KeystoreError::configuration(format!(
                            "{} keystore has no cosigner index bound",
                            keystore.kind()
                        ))
                    })?;
                    if index >= count {
                        return Err(KeystoreError::configuration(format!(
                            "Cosigner index {} out of range for {} cosigners",
                            index, count
                        )));
                    }
                    if !seen.insert(index) {
                        return Err(KeystoreError::configuration(format!(
                            "Two keystores claim cosigner index {}",
                            index
                        )));
                    }
                    ordered.push((index, keystore));
                }

                let threshold = self.configuration.threshold();
                if ordered.len() < threshold {
                    return Err(KeystoreError::configuration(format!(
                        "{} keystores supplied, {} required",
                        ordered.len(),
                        threshold
                    )));
                }

                ordered.sort_by_key(|(index, _)| *index);
                Ok(ordered.into_iter().map(|(_, keystore)| keystore).collect())
            }
        }
    }

    /// Run the round. Fails fast; the error carries the failing cosigner.
    pub fn sign(
        &mut self,
        tx: &mut ProposedTransaction,
        keystores: &[&dyn Keystore],
    ) -> KeystoreResult<RoundReport> {
        if self.state != RoundState::Pending {
            return Err(KeystoreError::configuration(
                "Signing round already ran; start a new round with a fresh transaction",
            ));
        }
        if tx.cosigner_count() != self.configuration.cosigner_count()
            || tx.threshold() != self.configuration.threshold()
        {
            return Err(KeystoreError::invalid_transaction(
                "Transaction was proposed under a different signing configuration",
            ));
        }

        let ordered = self.resolve(keystores)?;

        crate::log_info!(
            "coordinator",
            "Signing round started",
            transaction_id = tx.id(),
            keystores = ordered.len(),
            threshold = self.configuration.threshold()
        );

        let mut signed_by = Vec::with_capacity(ordered.len());
        for keystore in ordered {
            let index = keystore.cosigner_index();
            self.state = RoundState::Signing(index);

            let result = self
                .cancel
                .check()
                .and_then(|_| keystore.sign_transaction_with(tx, &self.cancel));

            match result {
                Ok(()) => {
                    self.history.push(CosignerOutcome {
                        cosigner: index,
                        error: None,
                    });
                    signed_by.push(index);
                }
                Err(err) => {
                    let err = err.at_cosigner(index);
                    crate::log_warn!(
                        "coordinator",
                        "Signing round failed",
                        transaction_id = tx.id(),
                        cosigner = index,
                        error = err
                    );
                    self.history.push(CosignerOutcome {
                        cosigner: index,
                        error: Some(err.code),
                    });
                    self.state = RoundState::Failed {
                        at: index,
                        cause: err.clone(),
                    };
                    return Err(err);
                }
            }
        }

        let fully_signed = tx.is_fully_signed();
        if !fully_signed {
            let err = KeystoreError::internal(format!(
                "Round finished with {} of {} signatures",
                tx.signer_count(),
                tx.threshold()
            ));
            let at = signed_by.last().copied().unwrap_or(0);
            self.state = RoundState::Failed {
                at,
                cause: err.clone(),
            };
            return Err(err);
        }

        self.state = RoundState::Complete;
        crate::log_info!(
            "coordinator",
            "Signing round complete",
            transaction_id = tx.id(),
            signers = signed_by.len()
        );

        Ok(RoundReport {
            transaction_id: tx.id().to_string(),
            signed_by,
            fully_signed,
        })
    }

    /// Confirm an address on the first keystore with a trusted display.
    /// Returns the cosigner index that showed it.
    pub fn verify_address(
        &self,
        keystores: &[&dyn Keystore],
        path: &AbsoluteKeypath,
        script_type: ScriptType,
        coin: &dyn Coin,
    ) -> KeystoreResult<usize> {
        let ordered = self.resolve(keystores)?;
        let keystore = ordered
            .into_iter()
            .find(|k| k.has_secure_output())
            .ok_or_else(|| {
                KeystoreError::unsupported("No keystore in this configuration has a trusted display")
            })?;

        let index = keystore.cosigner_index();
        keystore
            .output_address_with(path, script_type, coin, &self.cancel)
            .map_err(|e| e.at_cosigner(index))?;

        crate::log_info!("coordinator", "Address confirmed on device", keypath = path, cosigner = index);
        Ok(index)
    }
}
