//! Mailbox tokens: the opaque local part that routes mail to a user.

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;

use crate::error::{NoteDropError, Result};
use crate::model::identity::UserIdentity;
use crate::store::TokenStore;

/// Random bytes per token; the hex form is twice as long.
pub const TOKEN_BYTES: usize = 12;

/// Maps tokens to identities and mints new tokens on first use.
pub struct AddressResolver<'a> {
    store: &'a dyn TokenStore,
}

impl<'a> AddressResolver<'a> {
    pub fn new(store: &'a dyn TokenStore) -> Self {
        Self { store }
    }

    /// Owner of `token`, or `None` when the token was never issued.
    pub fn resolve(&self, token: &str) -> Result<Option<UserIdentity>> {
        self.store.identity_for(token)
    }

    /// The identity's token, minting one if it has none yet.
    ///
    /// Concurrent first calls for the same identity all return whichever
    /// token the store accepted first.
    pub fn token_for(&self, identity: &UserIdentity) -> Result<String> {
        if let Some(existing) = self.store.token_of(identity)? {
            return Ok(existing);
        }
        let candidate = mint_token()?;
        let token = self.store.insert_if_absent(identity, &candidate)?;
        if token != candidate {
            debug!(identity = %identity, "Token minted concurrently, using the stored one");
        }
        Ok(token)
    }
}

/// A fresh token: [`TOKEN_BYTES`] from the OS random source, hex-encoded.
pub fn mint_token() -> Result<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| NoteDropError::Entropy(e.to_string()))?;
    Ok(hex::encode(bytes))
}

/// Local part of a recipient address.
///
/// Anything from the first `@` (or its percent-encoded form `%40`, as some
/// relays deliver it) onward is ignored.
pub fn token_from_recipient(address: &str) -> Option<&str> {
    let address = address.trim().trim_start_matches('<');
    let end = [address.find('@'), address.find("%40")]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(address.len());
    let local = address[..end].trim();
    (!local.is_empty()).then_some(local)
}
