//! Wallet management

use pbftchain_core::{PbftError, PbftResult, Timestamp};
use pbftchain_crypto::keys::{KeyFile, KeyPair};
use pbftchain_ledger::Transaction;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Wallet file format
#[derive(Serialize, Deserialize)]
pub struct WalletFile {
    pub version: u32,
    pub name: String,
    #[serde(flatten)]
    pub key: KeyFile,
    pub created_at: u64,
}

/// Local signing wallet
pub struct Wallet {
    name: String,
    keypair: KeyPair,
}

impl Wallet {
    /// Create a new wallet
    pub fn new(name: &str) -> Self {
        Self::from_keypair(name, KeyPair::generate())
    }

    pub fn from_keypair(name: &str, keypair: KeyPair) -> Self {
        Self {
            name: name.to_string(),
            keypair,
        }
    }

    pub fn load(path: &Path) -> PbftResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let wallet_file: WalletFile = serde_json::from_str(&content)?;
        let keypair = wallet_file.key.to_keypair()?;

        Ok(Self {
            name: wallet_file.name,
            keypair,
        })
    }

    pub fn save(&self, path: &Path) -> PbftResult<()> {
        let wallet_file = WalletFile {
            version: 1,
            name: self.name.clone(),
            key: KeyFile::from(&self.keypair),
            created_at: Timestamp::now().as_millis(),
        };

        std::fs::write(path, serde_json::to_string_pretty(&wallet_file)?)?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn public_key_hex(&self) -> String {
        self.keypair.public_key().to_hex()
    }

    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    /// Create and sign a transaction
    pub fn sign_transaction(&self, id: &str, from: &str, to: &str, amount: u64) -> Transaction {
        Transaction::new(id, from, to, amount, &self.keypair)
    }
}

/// Wallets stored as `<name>.json` in one directory
pub struct WalletManager {
    wallets_dir: PathBuf,
}

impl WalletManager {
    pub fn new(wallets_dir: PathBuf) -> Self {
        Self { wallets_dir }
    }

    /// `<data dir>/pbftchain/wallets`, or `./wallets` when the platform has none
    pub fn default_dir() -> PathBuf {
        dirs::data_dir()
            .map(|dir| dir.join("pbftchain").join("wallets"))
            .unwrap_or_else(|| PathBuf::from("./wallets"))
    }

    /// Create wallets directory if it doesn't exist
    pub fn init(&self) -> PbftResult<()> {
        std::fs::create_dir_all(&self.wallets_dir)?;
        Ok(())
    }

    /// All readable wallets, ordered by name
    pub fn list(&self) -> PbftResult<Vec<WalletInfo>> {
        self.init()?;

        let mut wallets = Vec::new();
        for entry in std::fs::read_dir(&self.wallets_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                if let Ok(wallet) = Wallet::load(&path) {
                    wallets.push(WalletInfo {
                        name: wallet.name().to_string(),
                        public_key: wallet.public_key_hex(),
                        path,
                    });
                }
            }
        }

        wallets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(wallets)
    }

    pub fn create(&self, name: &str) -> PbftResult<Wallet> {
        self.store(Wallet::new(name))
    }

    pub fn get(&self, name: &str) -> PbftResult<Wallet> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Err(PbftError::ConfigError(format!("Wallet '{}' not found", name)));
        }
        Wallet::load(&path)
    }

    /// Import wallet from a hex secret key
    pub fn import(&self, name: &str, secret_hex: &str) -> PbftResult<Wallet> {
        let keypair = KeyPair::from_secret_hex(secret_hex)?;
        self.store(Wallet::from_keypair(name, keypair))
    }

    fn store(&self, wallet: Wallet) -> PbftResult<Wallet> {
        self.init()?;

        let path = self.path_for(wallet.name())?;
        if path.exists() {
            return Err(PbftError::ConfigError(format!(
                "Wallet '{}' already exists",
                wallet.name()
            )));
        }

        wallet.save(&path)?;
        Ok(wallet)
    }

    fn path_for(&self, name: &str) -> PbftResult<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(PbftError::ConfigError(format!("Invalid wallet name '{}'", name)));
        }
        Ok(self.wallets_dir.join(format!("{}.json", name)))
    }
}

/// Wallet info for listing
#[derive(Debug)]
pub struct WalletInfo {
    pub name: String,
    pub public_key: String,
    pub path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_and_reload() {
        let dir = TempDir::new().unwrap();
        let manager = WalletManager::new(dir.path().to_path_buf());

        let created = manager.create("alice").unwrap();
        let loaded = manager.get("alice").unwrap();
        assert_eq!(created.public_key_hex(), loaded.public_key_hex());

        assert!(manager.create("alice").is_err());
        assert!(manager.get("bob").is_err());
    }

    #[test]
    fn test_import_and_list() {
        let dir = TempDir::new().unwrap();
        let manager = WalletManager::new(dir.path().to_path_buf());
        let keypair = KeyPair::generate();

        manager
            .import("zed", &hex::encode(keypair.secret_bytes()))
            .unwrap();
        manager.create("amy").unwrap();

        let names: Vec<String> = manager.list().unwrap().into_iter().map(|w| w.name).collect();
        assert_eq!(names, vec!["amy".to_string(), "zed".to_string()]);
        assert_eq!(
            manager.get("zed").unwrap().public_key_hex(),
            keypair.public_key().to_hex()
        );
    }

    #[test]
    fn test_rejects_path_like_names() {
        let dir = TempDir::new().unwrap();
        let manager = WalletManager::new(dir.path().to_path_buf());
        assert!(manager.create("../escape").is_err());
        assert!(manager.create("").is_err());
    }

    #[test]
    fn test_signed_transaction_validates() {
        let wallet = Wallet::new("alice");
        let tx = wallet.sign_transaction("tx-1", "Alice", "Bob", 3);
        assert!(tx.validate().is_ok());
        assert_eq!(tx.public_key, wallet.keypair().public_key());
    }
}
