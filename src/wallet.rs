//! Deterministic wallet derivation.
//!
//! The node root sits at `m/44'/60'/0'` of the node mnemonic. Its extended
//! public key is enough to compute any sponsor wallet address, so sponsors
//! can learn (and fund) their wallet without the node's private key. Only
//! the signing side needs the master key.

use std::fmt;
use std::str::FromStr;

use coins_bip32::prelude::{
    MainnetEncoder, Parent, SigningKey, VerifyingKey, XKeyEncoder, XPriv, XPub,
};
use coins_bip32::Bip32Error;
use ethers::signers::coins_bip39::{English, Mnemonic, MnemonicError};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, U256};
use ethers::utils::public_key_to_address;
use thiserror::Error;

/// Root of every key the node uses.
pub const NODE_ROOT_PATH: &str = "m/44'/60'/0'";
/// Protocol segment for request-response sponsor wallets.
pub const RRP_PROTOCOL_ID: u32 = 1;

const SEGMENT_BITS: usize = 31;
const SEGMENT_COUNT: usize = 6;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("invalid address {0:?}")]
    InvalidAddress(String),
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(#[from] MnemonicError),
    #[error("key derivation failed: {0}")]
    Derivation(#[from] Bip32Error),
}

/// Path of a sponsor wallet below the node root: the protocol id followed by
/// the sponsor address split into 31-bit segments, least significant first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SponsorWalletPath {
    protocol_id: u32,
    segments: [u32; SEGMENT_COUNT],
}

impl SponsorWalletPath {
    pub fn segments(&self) -> &[u32; SEGMENT_COUNT] {
        &self.segments
    }

    /// Indices relative to the node root, in derivation order.
    pub fn relative_indices(&self) -> impl Iterator<Item = u32> + '_ {
        std::iter::once(self.protocol_id).chain(self.segments.iter().copied())
    }

    /// `1/s0/s1/...`, relative to the node root.
    pub fn relative(&self) -> String {
        self.relative_indices()
            .map(|index| index.to_string())
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl fmt::Display for SponsorWalletPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{NODE_ROOT_PATH}/{}", self.relative())
    }
}

/// A derived sponsor wallet. Never stored, always recomputed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SponsorWallet {
    /// Compressed SEC1 public key, hex encoded.
    pub public_key: String,
    pub address: Address,
    pub path: SponsorWalletPath,
}

/// Derives the wallet path for a sponsor address given as text.
pub fn derive_path(sponsor_address: &str) -> Result<SponsorWalletPath, WalletError> {
    let trimmed = sponsor_address.trim();
    let hex_body = trimmed
        .strip_prefix("0x")
        .ok_or_else(|| WalletError::InvalidAddress(sponsor_address.to_string()))?;
    if hex_body.len() != 40 {
        return Err(WalletError::InvalidAddress(sponsor_address.to_string()));
    }
    let address = Address::from_str(hex_body)
        .map_err(|_| WalletError::InvalidAddress(sponsor_address.to_string()))?;
    Ok(sponsor_wallet_path(address))
}

/// Derives the wallet path for a sponsor address.
pub fn sponsor_wallet_path(sponsor: Address) -> SponsorWalletPath {
    let value = U256::from_big_endian(sponsor.as_bytes());
    let mask = (U256::one() << SEGMENT_BITS) - U256::one();
    let mut segments = [0u32; SEGMENT_COUNT];
    for (i, segment) in segments.iter_mut().enumerate() {
        *segment = ((value >> (SEGMENT_BITS * i)) & mask).as_u32();
    }
    SponsorWalletPath {
        protocol_id: RRP_PROTOCOL_ID,
        segments,
    }
}

/// Public derivation from the node extended public key.
pub fn derive_address(xpub: &XPub, path: &SponsorWalletPath) -> Result<Address, WalletError> {
    let child = derive_public(xpub, path)?;
    let key: &VerifyingKey = child.as_ref();
    Ok(public_key_to_address(key))
}

/// Private derivation of the signing key for a path.
pub fn derive_signing_key(
    master: &MasterKey,
    path: &SponsorWalletPath,
) -> Result<LocalWallet, WalletError> {
    let mut key = master.root.clone();
    for index in path.relative_indices() {
        key = key.derive_child(index)?;
    }
    Ok(wallet_from_xpriv(&key))
}

pub fn parse_xpub(encoded: &str) -> Result<XPub, WalletError> {
    Ok(MainnetEncoder::xpub_from_base58(encoded.trim())?)
}

fn derive_public(xpub: &XPub, path: &SponsorWalletPath) -> Result<XPub, WalletError> {
    let mut key = xpub.clone();
    for index in path.relative_indices() {
        key = key.derive_child(index)?;
    }
    Ok(key)
}

fn wallet_from_xpriv(key: &XPriv) -> LocalWallet {
    let signing_key: &SigningKey = key.as_ref();
    LocalWallet::from(signing_key.clone())
}

/// The node root private key.
#[derive(Clone)]
pub struct MasterKey {
    root: XPriv,
}

impl MasterKey {
    pub fn from_mnemonic(phrase: &str) -> Result<Self, WalletError> {
        let mnemonic = Mnemonic::<English>::new_from_phrase(phrase.trim())?;
        let root = mnemonic.derive_key(NODE_ROOT_PATH, None)?;
        Ok(Self { root })
    }

    pub fn xpub(&self) -> XPub {
        self.root.verify_key()
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

/// Derives every wallet the coordinator needs from one master key.
#[derive(Debug, Clone)]
pub struct WalletDeriver {
    master: MasterKey,
    xpub: XPub,
    node_wallet: LocalWallet,
}

impl WalletDeriver {
    pub fn from_mnemonic(phrase: &str) -> Result<Self, WalletError> {
        Self::new(MasterKey::from_mnemonic(phrase)?)
    }

    pub fn new(master: MasterKey) -> Result<Self, WalletError> {
        let xpub = master.xpub();
        // m/44'/60'/0'/0/0
        let node_key = master.root.derive_child(0)?.derive_child(0)?;
        let node_wallet = wallet_from_xpriv(&node_key);
        Ok(Self {
            master,
            xpub,
            node_wallet,
        })
    }

    /// Address that identifies the node on-chain.
    pub fn node_address(&self) -> Address {
        self.node_wallet.address()
    }

    /// Wallet that signs fulfillment payloads.
    pub fn node_wallet(&self) -> &LocalWallet {
        &self.node_wallet
    }

    pub fn xpub(&self) -> &XPub {
        &self.xpub
    }

    pub fn xpub_base58(&self) -> Result<String, WalletError> {
        Ok(MainnetEncoder::xpub_to_base58(&self.xpub)?)
    }

    pub fn sponsor_wallet(&self, sponsor: Address) -> Result<SponsorWallet, WalletError> {
        let path = sponsor_wallet_path(sponsor);
        let child = derive_public(&self.xpub, &path)?;
        let key: &VerifyingKey = child.as_ref();
        Ok(SponsorWallet {
            public_key: format!("0x{}", hex::encode(key.to_encoded_point(true).as_bytes())),
            address: public_key_to_address(key),
            path,
        })
    }

    pub fn sponsor_signer(&self, sponsor: Address, chain_id: u64) -> Result<LocalWallet, WalletError> {
        let path = sponsor_wallet_path(sponsor);
        Ok(derive_signing_key(&self.master, &path)?.with_chain_id(chain_id))
    }
}
