//! Seed-backed device emulator
//!
//! Behaves like a hardware signer: derives keys from an internal seed,
//! asks a scripted "user" to confirm displays and signatures, and counts
//! every interaction.

use bitcoin::bip32::{Xpriv, Xpub};
use bitcoin::secp256k1::{Message, Secp256k1};
use bitcoin::NetworkKind;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;
use zeroize::Zeroizing;

use super::{DerivedKey, DeviceTransport, SignRequest, TransportError, TransportResult};
use crate::keypath::AbsoluteKeypath;
use crate::keystore::CancellationToken;
use crate::types::ScriptType;

/// Scripted answer to the next confirmation prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserResponse {
    Approve,
    Reject,
    Disconnect,
}

pub struct EmulatedDevice {
    seed: Zeroizing<Vec<u8>>,
    network: NetworkKind,
    display: bool,
    responses: Mutex<VecDeque<UserResponse>>,
    interactions: AtomicUsize,
    prompts: AtomicUsize,
    held: Mutex<bool>,
    released: Condvar,
}

impl EmulatedDevice {
    /// Device with a display that approves everything
    pub fn new(seed: &[u8]) -> Self {
        Self {
            seed: Zeroizing::new(seed.to_vec()),
            network: NetworkKind::Main,
            display: true,
            responses: Mutex::new(VecDeque::new()),
            interactions: AtomicUsize::new(0),
            prompts: AtomicUsize::new(0),
            held: Mutex::new(false),
            released: Condvar::new(),
        }
    }

    pub fn without_display(mut self) -> Self {
        self.display = false;
        self
    }

    pub fn with_network(mut self, network: NetworkKind) -> Self {
        self.network = network;
        self
    }

    /// Queue answers for upcoming prompts. An empty queue approves.
    pub fn script(&self, responses: impl IntoIterator<Item = UserResponse>) {
        let mut queue = self.responses.lock().unwrap_or_else(|p| p.into_inner());
        queue.extend(responses);
    }

    /// Total transport calls (derivations, displays, signatures)
    pub fn interactions(&self) -> usize {
        self.interactions.load(Ordering::SeqCst)
    }

    /// Prompts shown to the user so far
    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    /// Keep the next prompts open until [`EmulatedDevice::release`]
    pub fn hold(&self) {
        *self.held.lock().unwrap_or_else(|p| p.into_inner()) = true;
    }

    pub fn release(&self) {
        *self.held.lock().unwrap_or_else(|p| p.into_inner()) = false;
        self.released.notify_all();
    }

    fn master(&self) -> TransportResult<Xpriv> {
        Xpriv::new_master(self.network, &self.seed)
            .map_err(|e| TransportError::Malformed(e.to_string()))
    }

    fn derive_priv(&self, keypath: &AbsoluteKeypath) -> TransportResult<Xpriv> {
        let secp = Secp256k1::signing_only();
        self.master()?
            .derive_priv(&secp, &keypath.to_derivation_path())
            .map_err(|e| TransportError::Refused(e.to_string()))
    }

    /// Wait for the user. Blocks while held, returns early on cancellation.
    fn prompt(&self, cancel: &CancellationToken) -> TransportResult<()> {
        self.prompts.fetch_add(1, Ordering::SeqCst);

        let mut held = self.held.lock().unwrap_or_else(|p| p.into_inner());
        while *held {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            held = match self.released.wait_timeout(held, Duration::from_millis(10)) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        drop(held);

        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        let response = self
            .responses
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
            .unwrap_or(UserResponse::Approve);

        match response {
            UserResponse::Approve => Ok(()),
            UserResponse::Reject => Err(TransportError::Rejected),
            UserResponse::Disconnect => Err(TransportError::Disconnected(
                "emulated device unplugged".to_string(),
            )),
        }
    }
}

impl DeviceTransport for EmulatedDevice {
    fn derive_key(&self, keypath: &AbsoluteKeypath) -> TransportResult<DerivedKey> {
        self.interactions.fetch_add(1, Ordering::SeqCst);
        let secp = Secp256k1::new();
        let xprv = self.derive_priv(keypath)?;
        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&xprv.chain_code[..]);
        Ok(DerivedKey {
            public_key: xprv.private_key.public_key(&secp).serialize().to_vec(),
            chain_code,
        })
    }

    fn root_fingerprint(&self) -> TransportResult<[u8; 4]> {
        self.interactions.fetch_add(1, Ordering::SeqCst);
        let secp = Secp256k1::new();
        let fingerprint = Xpub::from_priv(&secp, &self.master()?).fingerprint();
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&fingerprint[..]);
        Ok(bytes)
    }

    fn has_display(&self) -> bool {
        self.display
    }

    fn display_address(
        &self,
        keypath: &AbsoluteKeypath,
        _script_type: ScriptType,
        _coin_code: &str,
        cancel: &CancellationToken,
    ) -> TransportResult<()> {
        self.interactions.fetch_add(1, Ordering::SeqCst);
        if !self.display {
            return Err(TransportError::Refused("device has no display".to_string()));
        }
        self.derive_priv(keypath)?;
        self.prompt(cancel)
    }

    fn sign(&self, request: &SignRequest, cancel: &CancellationToken) -> TransportResult<Vec<[u8; 64]>> {
        self.interactions.fetch_add(1, Ordering::SeqCst);
        self.prompt(cancel)?;

        let secp = Secp256k1::signing_only();
        request
            .inputs
            .iter()
            .map(|input| {
                let xprv = self.derive_priv(&input.keypath)?;
                let message = Message::from_digest(input.sighash);
                Ok(secp.sign_ecdsa(&message, &xprv.private_key).serialize_compact())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SignInput;

    fn request() -> SignRequest {
        SignRequest {
            transaction_id: "00".repeat(16),
            coin_code: "btc".to_string(),
            inputs: vec![SignInput {
                keypath: "m/84'/0'/0'/0/0".parse().unwrap(),
                sighash: [0x42; 32],
            }],
        }
    }

    #[test]
    fn test_scripted_responses_in_order() {
        let device = EmulatedDevice::new(&[5u8; 32]);
        device.script([UserResponse::Reject, UserResponse::Disconnect]);
        let cancel = CancellationToken::new();

        assert_eq!(device.sign(&request(), &cancel), Err(TransportError::Rejected));
        assert!(matches!(
            device.sign(&request(), &cancel),
            Err(TransportError::Disconnected(_))
        ));
        assert_eq!(device.sign(&request(), &cancel).unwrap().len(), 1);
        assert_eq!(device.prompts(), 3);
    }

    #[test]
    fn test_cancelled_before_prompt() {
        let device = EmulatedDevice::new(&[5u8; 32]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(device.sign(&request(), &cancel), Err(TransportError::Cancelled));
    }

    #[test]
    fn test_derive_key_matches_software_derivation() {
        let device = EmulatedDevice::new(&[5u8; 32]);
        let key = device.derive_key(&"m/84'/0'/0'".parse().unwrap()).unwrap();
        assert_eq!(key.public_key.len(), 33);
        assert_eq!(device.interactions(), 1);
        assert_eq!(device.prompts(), 0);
    }
}
