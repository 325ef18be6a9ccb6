// src/keys/helper.rs
//! Per-format rules for turning password text and key-file bytes into
//! combined key material

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::aliases::SecretBytes;
use crate::crypto::sha256;
use crate::progress::Progress;
use crate::xml::XmlElement;

pub trait KeyHelper {
    fn password_data(&self, password: &str) -> SecretBytes;

    fn process_key_file(&self, data: &[u8]) -> SecretBytes;

    /// Combines processed components into the material fed to derivation
    fn combine_components(
        &self,
        password_data: &SecretBytes,
        key_file_data: Option<&SecretBytes>,
    ) -> SecretBytes;
}

/// 32 raw bytes or 64 hex characters are used directly, anything else is hashed
fn raw_key_file(data: &[u8]) -> SecretBytes {
    if data.len() == 32 {
        return SecretBytes::new(data.to_vec());
    }
    if data.len() == 64 {
        if let Ok(decoded) = hex::decode(data) {
            return SecretBytes::new(decoded);
        }
    }
    SecretBytes::new(sha256(data).to_vec())
}

pub struct LegacyKeyHelper;

impl KeyHelper for LegacyKeyHelper {
    /// ISO-8859-1, lossy: characters outside Latin-1 become `?`
    fn password_data(&self, password: &str) -> SecretBytes {
        let bytes: Vec<u8> = password
            .chars()
            .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
            .collect();
        SecretBytes::new(bytes)
    }

    fn process_key_file(&self, data: &[u8]) -> SecretBytes {
        raw_key_file(data)
    }

    fn combine_components(
        &self,
        password_data: &SecretBytes,
        key_file_data: Option<&SecretBytes>,
    ) -> SecretBytes {
        let password = password_data.expose_secret();
        match key_file_data {
            Some(key_file) if !password.is_empty() => {
                let mut joined = Zeroizing::new(sha256(password).to_vec());
                joined.extend_from_slice(key_file.expose_secret());
                SecretBytes::new(sha256(&joined).to_vec())
            }
            Some(key_file) => SecretBytes::new(sha256(key_file.expose_secret()).to_vec()),
            None => SecretBytes::new(sha256(password).to_vec()),
        }
    }
}

pub struct ModernKeyHelper;

impl ModernKeyHelper {
    /// Extracts key data from an XML key file (format 1.0 or 2.0)
    fn parse_xml_key_file(data: &[u8]) -> Option<SecretBytes> {
        let root = XmlElement::parse(data, &Progress::new()).ok()?;
        if root.name != "KeyFile" {
            return None;
        }
        let version = root
            .child("Meta")
            .and_then(|meta| meta.child_text("Version"))
            .unwrap_or("1.0")
            .trim()
            .to_owned();
        let data_element = root.child("Key")?.child("Data")?;

        if version.starts_with("2.") {
            let cleaned: String = data_element
                .text()
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect();
            let key = Zeroizing::new(hex::decode(cleaned).ok()?);
            if let Some(expected) = data_element.attr("Hash") {
                let expected = hex::decode(expected.trim()).ok()?;
                if sha256(&key)[..4] != expected[..] {
                    warn!("XML key file hash mismatch");
                    return None;
                }
            }
            Some(SecretBytes::new(key.to_vec()))
        } else {
            let key = STANDARD.decode(data_element.text().trim()).ok()?;
            Some(SecretBytes::new(key))
        }
    }
}

impl KeyHelper for ModernKeyHelper {
    fn password_data(&self, password: &str) -> SecretBytes {
        SecretBytes::new(password.as_bytes().to_vec())
    }

    fn process_key_file(&self, data: &[u8]) -> SecretBytes {
        match Self::parse_xml_key_file(data) {
            Some(key) => {
                debug!("using XML key file");
                key
            }
            None => raw_key_file(data),
        }
    }

    fn combine_components(
        &self,
        password_data: &SecretBytes,
        key_file_data: Option<&SecretBytes>,
    ) -> SecretBytes {
        let password = password_data.expose_secret();
        let mut combined = Vec::with_capacity(64);
        if !password.is_empty() || key_file_data.is_none() {
            combined.extend_from_slice(&sha256(password));
        }
        if let Some(key_file) = key_file_data {
            combined.extend_from_slice(key_file.expose_secret());
        }
        SecretBytes::new(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_password_is_latin1_lossy() {
        let data = LegacyKeyHelper.password_data("café€");
        assert_eq!(data.expose_secret().as_slice(), b"caf\xe9?");
    }

    #[test]
    fn legacy_combination_always_hashes() {
        let password = SecretBytes::new(b"pw".to_vec());
        let key_file = SecretBytes::new(vec![9u8; 32]);

        let only_password = LegacyKeyHelper.combine_components(&password, None);
        assert_eq!(only_password.expose_secret().as_slice(), sha256(b"pw").as_slice());

        let only_key_file =
            LegacyKeyHelper.combine_components(&SecretBytes::new(Vec::new()), Some(&key_file));
        assert_eq!(
            only_key_file.expose_secret().as_slice(),
            sha256(&[9u8; 32]).as_slice()
        );

        let both = LegacyKeyHelper.combine_components(&password, Some(&key_file));
        let mut expected = sha256(b"pw").to_vec();
        expected.extend_from_slice(&[9u8; 32]);
        assert_eq!(both.expose_secret().as_slice(), sha256(&expected).as_slice());
    }

    #[test]
    fn modern_combination_concatenates_without_hashing() {
        let password = SecretBytes::new(b"pw".to_vec());
        let key_file = SecretBytes::new(vec![9u8; 32]);
        let combined = ModernKeyHelper.combine_components(&password, Some(&key_file));
        let mut expected = sha256(b"pw").to_vec();
        expected.extend_from_slice(&[9u8; 32]);
        assert_eq!(combined.expose_secret(), &expected);

        let key_file_only =
            ModernKeyHelper.combine_components(&SecretBytes::new(Vec::new()), Some(&key_file));
        assert_eq!(key_file_only.expose_secret().as_slice(), &[9u8; 32]);
    }

    #[test]
    fn key_file_formats() {
        let raw = [3u8; 32];
        assert_eq!(ModernKeyHelper.process_key_file(&raw).expose_secret().as_slice(), &raw);

        let hex_text = hex::encode([4u8; 32]);
        assert_eq!(
            ModernKeyHelper
                .process_key_file(hex_text.as_bytes())
                .expose_secret()
                .as_slice(),
            &[4u8; 32]
        );

        let xml_v1 = format!(
            "<?xml version=\"1.0\"?><KeyFile><Meta><Version>1.00</Version></Meta><Key><Data>{}</Data></Key></KeyFile>",
            STANDARD.encode([5u8; 32])
        );
        assert_eq!(
            ModernKeyHelper.process_key_file(xml_v1.as_bytes()).expose_secret().as_slice(),
            &[5u8; 32]
        );
        // Legacy helper does not understand XML
        assert_eq!(
            LegacyKeyHelper.process_key_file(xml_v1.as_bytes()).expose_secret().as_slice(),
            &sha256(xml_v1.as_bytes())
        );

        let key = [6u8; 32];
        let hash = hex::encode(&sha256(&key)[..4]);
        let xml_v2 = format!(
            "<KeyFile><Meta><Version>2.0</Version></Meta><Key><Data Hash=\"{hash}\">\n  {} {}\n</Data></Key></KeyFile>",
            hex::encode(&key[..16]),
            hex::encode(&key[16..])
        );
        assert_eq!(
            ModernKeyHelper.process_key_file(xml_v2.as_bytes()).expose_secret().as_slice(),
            &key
        );

        let arbitrary = b"just some file";
        assert_eq!(
            ModernKeyHelper.process_key_file(arbitrary).expose_secret().as_slice(),
            &sha256(arbitrary)
        );
    }
}
