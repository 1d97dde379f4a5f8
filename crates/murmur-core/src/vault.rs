//! Secret vault seam.
//!
//! The vault itself is an external store; the core depends on this trait
//! for placeholder resolution (`{{secret:name}}`), ciphertext detection
//! (`enc:v1:…` tokens), and the command surface. [`MemoryVault`] is the
//! in-process implementation used for wiring and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

/// Prefix of vault ciphertext tokens.
pub const CIPHERTEXT_PREFIX: &str = "enc:v1:";

/// Outcome of scanning a text for vault material.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretScan {
    /// Placeholder names that could not be resolved.
    pub missing: Vec<String>,
    /// Ciphertext tokens that failed to decrypt.
    pub invalid_ciphertexts: Vec<String>,
}

impl SecretScan {
    /// Whether the scan found nothing blocking.
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.invalid_ciphertexts.is_empty()
    }

    /// Fixed user-facing notice enumerating what blocked execution.
    pub fn notice(&self) -> String {
        let mut lines = vec!["🔐 시크릿을 해석할 수 없어 실행을 중단했습니다.".to_string()];
        if !self.missing.is_empty() {
            lines.push(format!("- 누락된 키: {}", self.missing.join(", ")));
        }
        if !self.invalid_ciphertexts.is_empty() {
            lines.push(format!(
                "- 해석 불가 암호문: {}개",
                self.invalid_ciphertexts.len()
            ));
        }
        lines.join("\n")
    }
}

/// Key/value secret store with symmetric token encryption.
#[async_trait]
pub trait SecretVault: Send + Sync {
    /// Stored secret names.
    async fn list(&self) -> Vec<String>;

    /// Fetch a secret value.
    async fn get(&self, name: &str) -> Option<String>;

    /// Store a secret value.
    async fn set(&self, name: &str, value: &str);

    /// Remove a secret. Returns whether it existed.
    async fn remove(&self, name: &str) -> bool;

    /// Encrypt plaintext into an `enc:v1:…` token.
    async fn encrypt(&self, plaintext: &str) -> String;

    /// Decrypt an `enc:v1:…` token. `None` when the token is invalid.
    async fn decrypt(&self, token: &str) -> Option<String>;
}

/// Replace `{{secret:name}}` placeholders and decrypt inline ciphertexts.
///
/// Returns the resolved text and a scan of anything that blocked. Callers
/// must not proceed when the scan is not clean.
pub async fn resolve_text(vault: &dyn SecretVault, text: &str) -> (String, SecretScan) {
    let mut scan = SecretScan::default();
    let mut resolved = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("{{secret:") {
        resolved.push_str(&rest[..start]);
        let after = &rest[start + "{{secret:".len()..];
        match after.find("}}") {
            Some(end) => {
                let name = after[..end].trim().to_string();
                match vault.get(&name).await {
                    Some(value) => resolved.push_str(&value),
                    None => {
                        scan.missing.push(name.clone());
                        resolved.push_str(&format!("{{{{secret:{name}}}}}"));
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                resolved.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    resolved.push_str(rest);

    // Inline ciphertext tokens: decrypt each whitespace-delimited token.
    let mut out = String::with_capacity(resolved.len());
    let mut first = true;
    for token in resolved.split(' ') {
        if !first {
            out.push(' ');
        }
        first = false;
        if token.starts_with(CIPHERTEXT_PREFIX) {
            let trimmed = token.trim_end_matches(['.', ',', '!', '?']);
            let suffix = &token[trimmed.len()..];
            match vault.decrypt(trimmed).await {
                Some(plain) => {
                    out.push_str(&plain);
                    out.push_str(suffix);
                }
                None => {
                    scan.invalid_ciphertexts.push(token.to_string());
                    out.push_str(token);
                }
            }
        } else {
            out.push_str(token);
        }
    }

    (out, scan)
}

/// In-process vault. Encryption is a keyed byte rotation over base64 --
/// enough for the wiring contract (`decrypt(encrypt(t)) == t`); production
/// deployments plug a real store behind the trait.
pub struct MemoryVault {
    entries: RwLock<HashMap<String, String>>,
    key: u8,
}

impl MemoryVault {
    /// Create an empty vault.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            key: 0x5f,
        }
    }
}

impl Default for MemoryVault {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretVault for MemoryVault {
    async fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    async fn get(&self, name: &str) -> Option<String> {
        self.entries.read().await.get(name).cloned()
    }

    async fn set(&self, name: &str, value: &str) {
        self.entries
            .write()
            .await
            .insert(name.to_owned(), value.to_owned());
    }

    async fn remove(&self, name: &str) -> bool {
        self.entries.write().await.remove(name).is_some()
    }

    async fn encrypt(&self, plaintext: &str) -> String {
        let rotated: Vec<u8> = plaintext
            .as_bytes()
            .iter()
            .map(|b| b.wrapping_add(self.key))
            .collect();
        format!("{CIPHERTEXT_PREFIX}{}", hex_encode(&rotated))
    }

    async fn decrypt(&self, token: &str) -> Option<String> {
        let payload = token.strip_prefix(CIPHERTEXT_PREFIX)?;
        let bytes = hex_decode(payload)?;
        let original: Vec<u8> = bytes.iter().map(|b| b.wrapping_sub(self.key)).collect();
        String::from_utf8(original).ok()
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}
