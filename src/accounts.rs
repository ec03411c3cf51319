//! Signing accounts loaded once at startup

use crate::config::AccountConfig;
use crate::error::{DispatchError, DispatchResult};

use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use std::collections::HashMap;
use tracing::info;

/// A configured account. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Account {
    id: String,
    label: String,
    wallet: LocalWallet,
}

impl Account {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }
}

/// Fixed pool of accounts, keyed by id
#[derive(Debug, Default)]
pub struct AccountRegistry {
    accounts: Vec<Account>,
    by_id: HashMap<String, usize>,
}

impl AccountRegistry {
    /// Parse every configured key into a wallet bound to `chain_id`
    pub fn from_config(configs: &[AccountConfig], chain_id: u64) -> DispatchResult<Self> {
        let mut registry = Self::default();

        for config in configs {
            let wallet = config
                .private_key
                .parse::<LocalWallet>()
                .map_err(|e| {
                    DispatchError::Wallet(format!("Invalid private key for {}: {}", config.id, e))
                })?
                .with_chain_id(chain_id);

            registry.insert(Account {
                id: config.id.clone(),
                label: config.label.clone(),
                wallet,
            })?;
        }

        Ok(registry)
    }

    fn insert(&mut self, account: Account) -> DispatchResult<()> {
        if self.by_id.contains_key(&account.id) {
            return Err(DispatchError::Config(format!(
                "Duplicate account id {}",
                account.id
            )));
        }

        info!("Loaded account {} ({:?})", account.id, account.address());
        self.by_id.insert(account.id.clone(), self.accounts.len());
        self.accounts.push(account);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Account> {
        self.by_id.get(id).map(|&idx| &self.accounts[idx])
    }

    /// Resolve an id or fail with `UnknownAccount`
    pub fn resolve(&self, id: &str) -> DispatchResult<&Account> {
        self.get(id).ok_or_else(|| DispatchError::UnknownAccount {
            account_id: id.to_string(),
        })
    }

    /// Accounts in configuration order
    pub fn iter(&self) -> impl Iterator<Item = &Account> {
        self.accounts.iter()
    }

    pub fn wallets(&self) -> Vec<LocalWallet> {
        self.accounts.iter().map(|a| a.wallet.clone()).collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const KEY_A: &str =
        "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    pub(crate) const KEY_B: &str =
        "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

    pub(crate) fn account_config(id: &str, key: &str) -> AccountConfig {
        AccountConfig {
            id: id.to_string(),
            label: format!("{} - Performance", id),
            private_key: key.to_string(),
        }
    }

    pub(crate) fn registry() -> AccountRegistry {
        AccountRegistry::from_config(
            &[account_config("testUser1", KEY_A), account_config("testUser2", KEY_B)],
            31337,
        )
        .unwrap()
    }

    #[test]
    fn resolves_configured_accounts() {
        let registry = registry();
        assert_eq!(registry.iter().count(), 2);

        let account = registry.resolve("testUser1").unwrap();
        assert_eq!(account.label(), "testUser1 - Performance");
        assert!(registry.wallets().iter().all(|w| w.chain_id() == 31337));
        assert_ne!(account.address(), registry.resolve("testUser2").unwrap().address());
    }

    #[test]
    fn unknown_account_is_reported() {
        let err = registry().resolve("nobody").unwrap_err();
        assert!(matches!(err, DispatchError::UnknownAccount { account_id } if account_id == "nobody"));
    }

    #[test]
    fn rejects_bad_keys_and_duplicates() {
        let err = AccountRegistry::from_config(&[account_config("a", "not-a-key")], 1).unwrap_err();
        assert!(matches!(err, DispatchError::Wallet(_)));

        let err = AccountRegistry::from_config(
            &[account_config("a", KEY_A), account_config("a", KEY_B)],
            1,
        )
        .unwrap_err();
        assert!(matches!(err, DispatchError::Config(_)));
    }
}
