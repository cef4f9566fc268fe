//! System program instructions.

use crate::address::Pubkey;
use crate::transaction::{SolAccountMeta, SolInstruction};

/// System Program ID: `11111111111111111111111111111111`
pub const SYSTEM_PROGRAM_ID: Pubkey = Pubkey::new([0u8; 32]);

/// `SystemInstruction::Transfer` discriminant (u32 LE).
const TRANSFER_INDEX: u32 = 2;

/// Build a System Program `Transfer` of `lamports` from `from` to `to`.
///
/// Data layout: u32 LE instruction index (2) followed by u64 LE lamports.
/// Accounts: `from` (signer, writable), `to` (writable).
pub fn build_system_transfer(from: &Pubkey, to: &Pubkey, lamports: u64) -> SolInstruction {
    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(&TRANSFER_INDEX.to_le_bytes());
    data.extend_from_slice(&lamports.to_le_bytes());

    SolInstruction {
        program_id: SYSTEM_PROGRAM_ID,
        accounts: vec![
            SolAccountMeta::writable(*from, true),
            SolAccountMeta::writable(*to, false),
        ],
        data,
    }
}

/// Reads the lamport amount back out of System `Transfer` instruction data.
pub fn parse_system_transfer(data: &[u8]) -> Option<u64> {
    if data.len() != 12 || data[..4] != TRANSFER_INDEX.to_le_bytes() {
        return None;
    }
    let amount: [u8; 8] = data[4..].try_into().ok()?;
    Some(u64::from_le_bytes(amount))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_data_layout() {
        let ix = build_system_transfer(&Pubkey::new([1; 32]), &Pubkey::new([2; 32]), 2_200_000);

        assert_eq!(ix.data.len(), 12);
        assert_eq!(&ix.data[..4], &[2, 0, 0, 0]);
        assert_eq!(parse_system_transfer(&ix.data), Some(2_200_000));
    }

    #[test]
    fn transfer_account_roles() {
        let from = Pubkey::new([1; 32]);
        let to = Pubkey::new([2; 32]);
        let ix = build_system_transfer(&from, &to, 1);

        assert_eq!(ix.program_id, SYSTEM_PROGRAM_ID);
        assert_eq!(ix.accounts[0], SolAccountMeta::writable(from, true));
        assert_eq!(ix.accounts[1], SolAccountMeta::writable(to, false));
    }

    #[test]
    fn parse_rejects_other_instructions() {
        assert_eq!(parse_system_transfer(&[0u8; 12]), None);
        assert_eq!(parse_system_transfer(&[2, 0, 0, 0]), None);
    }
}
