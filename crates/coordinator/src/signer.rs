//! The agent's signing key.

use alloy::{
    primitives::{Address, B256, Bytes},
    signers::{SignerSync, local::PrivateKeySigner},
};
use jiff::Timestamp;

use crate::{
    config::ConfigError,
    confirmations::Confirmation,
    error::{CoordinatorError, Result},
};

/// Local ECDSA key of the co-signer. Signs Safe transaction hashes directly
/// (`v` = 27/28), which Safe verifies with plain `ecrecover`.
#[derive(Debug, Clone)]
pub struct AgentSigner {
    signer: PrivateKeySigner,
}

impl AgentSigner {
    pub fn new(signer: PrivateKeySigner) -> Self {
        Self { signer }
    }

    /// Reads a hex private key from the environment variable `var`.
    pub fn from_env(var: &str) -> Result<Self, ConfigError> {
        let key = std::env::var(var)
            .map_err(|_| ConfigError::Invalid(format!("environment variable {var} is not set")))?;
        let signer = key
            .trim()
            .parse::<PrivateKeySigner>()
            .map_err(|e| ConfigError::Invalid(format!("{var} does not hold a private key: {e}")))?;
        Ok(Self::new(signer))
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn signer(&self) -> &PrivateKeySigner {
        &self.signer
    }

    pub fn sign(&self, safe_tx_hash: B256) -> Result<Confirmation> {
        let signature = self
            .signer
            .sign_hash_sync(&safe_tx_hash)
            .map_err(|e| CoordinatorError::Configuration(format!("agent signer: {e}")))?;

        Ok(Confirmation {
            signer: self.address(),
            signature: Bytes::copy_from_slice(&signature.as_bytes()),
            submitted_at: Some(Timestamp::now()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirmations::recover_signer;
    use alloy::primitives::keccak256;

    #[test]
    fn signatures_recover_to_the_agent() {
        let agent = AgentSigner::new(PrivateKeySigner::random());
        let hash = keccak256(b"safe tx");
        let confirmation = agent.sign(hash).unwrap();

        assert_eq!(confirmation.signer, agent.address());
        assert_eq!(confirmation.signature.len(), 65);
        assert!(matches!(confirmation.signature[64], 27 | 28));
        assert_eq!(recover_signer(hash, &confirmation.signature), Some(agent.address()));
    }

    #[test]
    fn missing_key_variable() {
        let err = AgentSigner::from_env("COSIGN_TEST_KEY_THAT_IS_NOT_SET").unwrap_err();
        assert!(err.to_string().contains("COSIGN_TEST_KEY_THAT_IS_NOT_SET"));
    }
}
