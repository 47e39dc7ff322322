use rand::RngCore;
use serde::{Deserialize, Serialize};

pub fn new_uuid() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    // set version 4 and variant bits
    bytes[6] = (bytes[6] & 0x0F) | 0x40;
    bytes[8] = (bytes[8] & 0x3F) | 0x80;
    let hex: Vec<String> = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!(
        "{}{}{}{}-{}{}-{}{}-{}{}-{}{}{}{}{}{}",
        hex[0], hex[1], hex[2], hex[3], hex[4], hex[5], hex[6], hex[7], hex[8], hex[9], hex[10],
        hex[11], hex[12], hex[13], hex[14], hex[15]
    )
}

/// A single TOTP account: display name plus the Base32-encoded shared secret.
/// The secret is validated once when the account is added, not on every read.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Account {
    #[serde(default = "new_uuid")]
    pub id: String,
    pub name: String,
    pub secret: String,
}

/// On-disk envelope: base64-armored nonce and ciphertext.
#[derive(Serialize, Deserialize)]
pub struct EncryptedStore {
    pub nonce: String,
    pub data: String,
}

#[derive(Serialize, Deserialize, Default)]
pub struct Store {
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub accounts: Vec<Account>,
}
