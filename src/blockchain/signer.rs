//! Signer collaborator contract.

use crate::blockchain::transaction::UnsignedTransaction;
use crate::blockchain::types::ChainResult;
use crate::blockchain::wallet::KeyMaterial;

/// Key handling and transaction signing for one UTXO chain.
///
/// Address derivation and signature algorithms live behind this trait.
pub trait Signer: Send + Sync {
    /// Address owned by `key` on this chain.
    fn address(&self, key: &KeyMaterial) -> ChainResult<String>;

    /// Fill in the unlocking data of input `input_index`.
    fn sign(
        &self,
        tx: &mut UnsignedTransaction,
        input_index: usize,
        key: &KeyMaterial,
    ) -> ChainResult<()>;

    /// Network serialization of `tx` as hex.
    fn serialize_to_hex(&self, tx: &UnsignedTransaction) -> ChainResult<String>;

    /// Size used for fee computation. Defaults to the serialized length.
    fn vsize(&self, tx: &UnsignedTransaction) -> ChainResult<u64> {
        Ok((self.serialize_to_hex(tx)?.len() / 2) as u64)
    }
}
