//! User admission over the store.

use std::sync::Arc;

use log::{debug, warn};

use oprpool_storage::Store;
use oprpool_stratum::Authority;
use oprpool_util::validate_coinbase_address;

/// Invite-gated registration backed by the user registry. Credential
/// handling beyond admission (passwords, web sessions) belongs to the
/// external account surface; the pool only decides who may mine.
pub struct StoreAuthority {
    store: Arc<Store>,
}

impl StoreAuthority {
    pub fn new(store: Arc<Store>) -> Self {
        StoreAuthority { store }
    }
}

impl Authority for StoreAuthority {
    fn exists(&self, uid: &str) -> bool {
        self.store.user_exists(uid).unwrap_or(false)
    }

    fn register(&self, uid: &str, _password: &str, invite: &str, payout_address: &str) -> bool {
        if validate_coinbase_address(payout_address).is_err() {
            debug!("auth: rejected registration, bad payout address user={}", uid);
            return false;
        }
        match self.store.claim_code(invite, uid) {
            Ok(true) => {}
            Ok(false) => {
                debug!("auth: rejected registration, invite invalid user={}", uid);
                return false;
            }
            Err(e) => {
                warn!("auth: invite lookup failed user={}: {}", uid, e);
                return false;
            }
        }
        if let Err(e) = self.store.create_user(uid, payout_address) {
            warn!("auth: failed to create user {}: {}", uid, e);
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oprpool_util::address::encode_coinbase_address;

    fn authority() -> (StoreAuthority, Arc<Store>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        (StoreAuthority::new(store.clone()), store)
    }

    #[test]
    fn test_register_claims_invite_once() {
        let (auth, store) = authority();
        store.new_invite_code("ticket").unwrap();
        let addr = encode_coinbase_address(&[1u8; 32]);

        assert!(auth.register("alice", "pw", "ticket", &addr));
        assert!(auth.exists("alice"));

        // The code is spent
        assert!(!auth.register("bob", "pw", "ticket", &addr));
        assert!(!auth.exists("bob"));
    }

    #[test]
    fn test_register_requires_valid_address() {
        let (auth, store) = authority();
        store.new_invite_code("ticket").unwrap();

        assert!(!auth.register("alice", "pw", "ticket", "not-an-address"));
        // Address failure must not burn the invite
        assert!(store.code_unclaimed("ticket").unwrap());
    }
}
