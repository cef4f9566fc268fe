//! Unsigned transaction construction.
//!
//! Amounts are taken in the chain's smallest units exactly as given. The
//! recent blockhash is fetched last so the transaction gets the longest
//! possible validity window.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chain_sol::{
    build_create_associated_token_account, build_spl_transfer, build_system_transfer,
    compile_message, derive_associated_token_address, serialize_message, Message, Pubkey,
    SolInstruction,
};

use crate::error::{CustodyError, Failure, Stage};
use crate::network::SolanaNetwork;
use crate::rpc::{RecentBlockhash, RpcError, SolanaRpc};
use crate::types::{Lamports, TokenBaseUnits};

/// A compiled, unsigned transaction tied to the network its blockhash came
/// from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    network: SolanaNetwork,
    fee_payer: Pubkey,
    message: Message,
    last_valid_block_height: u64,
}

impl UnsignedTransaction {
    pub fn network(&self) -> SolanaNetwork {
        self.network
    }

    pub fn fee_payer(&self) -> &Pubkey {
        &self.fee_payer
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn recent_blockhash(&self) -> &[u8; 32] {
        &self.message.recent_blockhash
    }

    pub fn last_valid_block_height(&self) -> u64 {
        self.last_valid_block_height
    }

    /// The exact bytes that get signed.
    pub fn message_bytes(&self) -> Vec<u8> {
        serialize_message(&self.message)
    }

    #[cfg(test)]
    pub(crate) fn for_tests(network: SolanaNetwork, fee_payer: Pubkey, message: Message) -> Self {
        Self {
            network,
            fee_payer,
            message,
            last_valid_block_height: 0,
        }
    }
}

pub struct TransactionBuilder {
    rpc: Arc<dyn SolanaRpc>,
    timeout: Duration,
}

impl TransactionBuilder {
    pub fn new(rpc: Arc<dyn SolanaRpc>, timeout: Duration) -> Self {
        Self { rpc, timeout }
    }

    /// A single System `Transfer` of `amount` from `from` to `to`.
    pub async fn build_native_transfer(
        &self,
        from: &Pubkey,
        to: &str,
        amount: Lamports,
        network: SolanaNetwork,
    ) -> Result<UnsignedTransaction, CustodyError> {
        let stage = Stage::BuildNativeTransfer;

        if amount.0 == 0 {
            return Err(Failure::InvalidAmount.at(stage));
        }
        let to = parse_address(to, stage)?;

        let instruction = build_system_transfer(from, &to, amount.0);
        let anchor = self.anchor(network, stage).await?;

        tracing::debug!(%from, %to, %amount, %network, "native transfer built");
        assemble(vec![instruction], from, anchor, stage)
    }

    /// An SPL `Transfer` between the associated token accounts of `from` and
    /// `to`, preceded by account creation for whichever of them is missing.
    pub async fn build_token_transfer(
        &self,
        from: &Pubkey,
        to: &str,
        mint: &str,
        amount: TokenBaseUnits,
        network: SolanaNetwork,
    ) -> Result<UnsignedTransaction, CustodyError> {
        let stage = Stage::BuildTokenTransfer;

        if amount.0 == 0 {
            return Err(Failure::InvalidAmount.at(stage));
        }
        let to = parse_address(to, stage)?;
        let mint: Pubkey = mint
            .parse()
            .map_err(|e| Failure::UnknownMint(format!("{mint}: {e}")).at(stage))?;

        if !self.exists(&mint, network, stage).await? {
            return Err(Failure::UnknownMint(format!("{mint} has no account on {network}")).at(stage));
        }

        let derive = |owner: &Pubkey| {
            derive_associated_token_address(owner, &mint)
                .map_err(|e| Failure::InvalidAddress(e.to_string()).at(stage))
        };
        let source = derive(from)?;
        let destination = derive(&to)?;

        let mut instructions: Vec<SolInstruction> = Vec::with_capacity(3);
        for (owner, account) in [(from, &source), (&to, &destination)] {
            if instructions.iter().any(|ix| ix.accounts.get(1).map(|m| &m.pubkey) == Some(account)) {
                continue;
            }
            if !self.exists(account, network, stage).await? {
                tracing::debug!(%owner, %account, %mint, "associated token account missing; creating");
                instructions.push(
                    build_create_associated_token_account(from, owner, &mint)
                        .map_err(|e| Failure::InvalidAddress(e.to_string()).at(stage))?,
                );
            }
        }

        instructions.push(
            build_spl_transfer(&source, &destination, from, amount.0)
                .map_err(|_| Failure::InvalidAmount.at(stage))?,
        );

        let anchor = self.anchor(network, stage).await?;

        tracing::debug!(
            %from, %to, %mint, %amount, %network,
            instructions = instructions.len(),
            "token transfer built"
        );
        assemble(instructions, from, anchor, stage)
    }

    async fn anchor(&self, network: SolanaNetwork, stage: Stage) -> Result<RecentBlockhash, CustodyError> {
        let anchor = self
            .with_deadline(self.rpc.latest_blockhash(network), network, stage)
            .await?;

        if anchor.network != network {
            return Err(Failure::NetworkMismatch {
                expected: network.to_string(),
                actual: anchor.network.to_string(),
            }
            .at(stage));
        }
        tracing::debug!(
            %network,
            blockhash = %Pubkey::new(anchor.blockhash),
            last_valid_block_height = anchor.last_valid_block_height,
            "fetched recent blockhash"
        );
        Ok(anchor)
    }

    async fn exists(
        &self,
        address: &Pubkey,
        network: SolanaNetwork,
        stage: Stage,
    ) -> Result<bool, CustodyError> {
        self.with_deadline(self.rpc.account_exists(address, network), network, stage)
            .await
    }

    async fn with_deadline<T>(
        &self,
        call: impl Future<Output = Result<T, RpcError>>,
        network: SolanaNetwork,
        stage: Stage,
    ) -> Result<T, CustodyError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::warn!(%network, error = %e, "rpc call failed");
                Err(Failure::NetworkUnavailable(format!("{network}: {e}")).at(stage))
            }
            Err(_) => {
                tracing::warn!(%network, timeout = ?self.timeout, "rpc call timed out");
                Err(Failure::NetworkUnavailable(format!(
                    "{network}: no response within {:?}",
                    self.timeout
                ))
                .at(stage))
            }
        }
    }
}

fn parse_address(address: &str, stage: Stage) -> Result<Pubkey, CustodyError> {
    address
        .parse()
        .map_err(|e| Failure::InvalidAddress(format!("{address}: {e}")).at(stage))
}

fn assemble(
    instructions: Vec<SolInstruction>,
    fee_payer: &Pubkey,
    anchor: RecentBlockhash,
    stage: Stage,
) -> Result<UnsignedTransaction, CustodyError> {
    let message = compile_message(&instructions, fee_payer, &anchor.blockhash)
        .map_err(|e| Failure::InvalidAddress(e.to_string()).at(stage))?;

    Ok(UnsignedTransaction {
        network: anchor.network,
        fee_payer: *fee_payer,
        message,
        last_valid_block_height: anchor.last_valid_block_height,
    })
}
