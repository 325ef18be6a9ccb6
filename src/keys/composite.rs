// src/keys/composite.rs
//! Composite master key
//!
//! States only move forward: raw components (password text, key-file
//! reference) → processed bytes → combined bytes → final cipher/HMAC keys.
//! Every transition drops what the next stage no longer needs; the
//! secure-gate containers zero themselves on drop. `erase` is the only way
//! back to `Empty`.

use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::challenge::{ChallengeHandler, ResponseSender};
use super::helper::KeyHelper;
use crate::aliases::{duplicate, PasswordText, SecretBytes};
use crate::error::{ChallengeResponseError, FormatResult, KeyError};
use crate::progress::Progress;

const RESPONSE_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum KeyState {
    Empty,
    RawComponents,
    ProcessedComponents,
    CombinedComponents,
    Final,
}

/// Where the key file comes from; resolving bookmarks is the caller's job
pub enum KeyFileSource {
    Path(PathBuf),
    Bytes(SecretBytes),
}

impl KeyFileSource {
    fn read(&self) -> FormatResult<SecretBytes> {
        match self {
            KeyFileSource::Path(path) => Ok(SecretBytes::new(std::fs::read(path)?)),
            KeyFileSource::Bytes(bytes) => Ok(duplicate(bytes)),
        }
    }
}

pub struct CompositeKey {
    state: KeyState,
    password: Option<PasswordText>,
    key_file: Option<KeyFileSource>,
    challenge_handler: Option<Arc<dyn ChallengeHandler>>,
    challenge_timeout: Duration,
    password_data: Option<SecretBytes>,
    key_file_data: Option<SecretBytes>,
    combined: Option<SecretBytes>,
    cipher_key: Option<SecretBytes>,
    hmac_key: Option<SecretBytes>,
}

impl std::fmt::Debug for CompositeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeKey")
            .field("state", &self.state)
            .field("has_key_file", &self.key_file.is_some())
            .field("has_challenge_handler", &self.challenge_handler.is_some())
            .finish_non_exhaustive()
    }
}

impl CompositeKey {
    pub fn empty() -> Self {
        CompositeKey {
            state: KeyState::Empty,
            password: None,
            key_file: None,
            challenge_handler: None,
            challenge_timeout: crate::config::load().challenge.timeout(),
            password_data: None,
            key_file_data: None,
            combined: None,
            cipher_key: None,
            hmac_key: None,
        }
    }

    pub fn new(
        password: &str,
        key_file: Option<KeyFileSource>,
        challenge_handler: Option<Arc<dyn ChallengeHandler>>,
    ) -> Self {
        CompositeKey {
            state: KeyState::RawComponents,
            password: Some(PasswordText::new(password.to_owned())),
            key_file,
            challenge_handler,
            ..Self::empty()
        }
    }

    pub fn from_password(password: &str) -> Self {
        Self::new(password, None, None)
    }

    pub fn with_challenge_timeout(mut self, timeout: Duration) -> Self {
        self.challenge_timeout = timeout;
        self
    }

    pub fn state(&self) -> KeyState {
        self.state
    }

    pub fn has_challenge_handler(&self) -> bool {
        self.challenge_handler.is_some()
    }

    fn expect_state(&self, expected: KeyState) -> Result<(), KeyError> {
        if self.state != expected {
            return Err(KeyError::InvalidState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    /// Raw → processed; erases password text and key-file reference
    pub fn set_processed_components(
        &mut self,
        password_data: SecretBytes,
        key_file_data: Option<SecretBytes>,
    ) -> Result<(), KeyError> {
        self.expect_state(KeyState::RawComponents)?;
        self.password = None;
        self.key_file = None;
        self.password_data = Some(password_data);
        self.key_file_data = key_file_data;
        self.state = KeyState::ProcessedComponents;
        Ok(())
    }

    /// Reads the key file and converts the password per the helper's format
    pub fn process_components(&mut self, helper: &dyn KeyHelper) -> FormatResult<()> {
        self.expect_state(KeyState::RawComponents)?;
        let password_data = match &self.password {
            Some(password) => helper.password_data(password.expose_secret()),
            None => SecretBytes::new(Vec::new()),
        };
        let key_file_data = match &self.key_file {
            Some(source) => {
                let raw = source.read()?;
                Some(helper.process_key_file(raw.expose_secret()))
            }
            None => None,
        };
        self.set_processed_components(password_data, key_file_data)?;
        Ok(())
    }

    /// Processed → combined; erases the processed components
    pub fn set_combined_components(&mut self, combined: SecretBytes) -> Result<(), KeyError> {
        self.expect_state(KeyState::ProcessedComponents)?;
        self.password_data = None;
        self.key_file_data = None;
        self.combined = Some(combined);
        self.state = KeyState::CombinedComponents;
        Ok(())
    }

    pub fn combine(&mut self, helper: &dyn KeyHelper) -> FormatResult<()> {
        self.expect_state(KeyState::ProcessedComponents)?;
        let password_data = self
            .password_data
            .as_ref()
            .map(duplicate)
            .unwrap_or_else(|| SecretBytes::new(Vec::new()));
        let combined = helper.combine_components(&password_data, self.key_file_data.as_ref());
        self.set_combined_components(combined)?;
        Ok(())
    }

    /// Drives the key forward to `CombinedComponents` if it is not there yet
    pub fn prepare(&mut self, helper: &dyn KeyHelper) -> FormatResult<()> {
        if self.state == KeyState::RawComponents {
            self.process_components(helper)?;
        }
        if self.state == KeyState::ProcessedComponents {
            self.combine(helper)?;
        }
        if self.state < KeyState::CombinedComponents {
            return Err(KeyError::InvalidState {
                expected: KeyState::CombinedComponents,
                actual: self.state,
            }
            .into());
        }
        Ok(())
    }

    pub fn combined_components(&self) -> Option<&SecretBytes> {
        self.combined.as_ref()
    }

    /// Combined components, as needed for every (re-)derivation
    pub fn require_combined(&self) -> Result<&SecretBytes, KeyError> {
        self.combined.as_ref().ok_or(KeyError::InvalidState {
            expected: KeyState::CombinedComponents,
            actual: self.state,
        })
    }

    /// Combined → final. Re-deriving on save keeps the key in `Final`
    pub fn set_final_keys(
        &mut self,
        cipher_key: SecretBytes,
        hmac_key: Option<SecretBytes>,
    ) -> Result<(), KeyError> {
        if self.state < KeyState::CombinedComponents {
            return Err(KeyError::InvalidState {
                expected: KeyState::CombinedComponents,
                actual: self.state,
            });
        }
        self.cipher_key = Some(cipher_key);
        self.hmac_key = hmac_key;
        self.state = KeyState::Final;
        Ok(())
    }

    pub fn cipher_key(&self) -> Option<&SecretBytes> {
        self.cipher_key.as_ref()
    }

    pub fn hmac_key(&self) -> Option<&SecretBytes> {
        self.hmac_key.as_ref()
    }

    /// Asks the challenge handler for a response and blocks until it
    /// answers, the timeout passes, or `progress` is cancelled.
    /// Returns `None` when no handler is configured.
    pub fn get_response(
        &self,
        challenge: &[u8],
        progress: &Progress,
    ) -> FormatResult<Option<SecretBytes>> {
        let Some(handler) = &self.challenge_handler else {
            return Ok(None);
        };
        debug!("requesting challenge-response");
        let (tx, rx) = mpsc::sync_channel(1);
        handler.perform(challenge, ResponseSender(tx));

        let deadline = Instant::now() + self.challenge_timeout;
        loop {
            progress.check()?;
            let now = Instant::now();
            if now >= deadline {
                warn!("challenge-response timed out");
                return Err(ChallengeResponseError::Timeout.into());
            }
            match rx.recv_timeout(RESPONSE_POLL_INTERVAL.min(deadline - now)) {
                Ok(Ok(response)) => return Ok(Some(response)),
                Ok(Err(err)) => return Err(err.into()),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ChallengeResponseError::Cancelled.into())
                }
            }
        }
    }

    /// Copies the combined components into a new key, for re-keying a
    /// database with the same credentials
    pub fn clone_combined(&self) -> Option<CompositeKey> {
        let combined = self.combined.as_ref()?;
        Some(CompositeKey {
            state: KeyState::CombinedComponents,
            challenge_handler: self.challenge_handler.clone(),
            challenge_timeout: self.challenge_timeout,
            combined: Some(duplicate(combined)),
            ..Self::empty()
        })
    }

    /// Wipes everything and returns to `Empty`
    pub fn erase(&mut self) {
        self.password = None;
        self.key_file = None;
        self.challenge_handler = None;
        self.password_data = None;
        self.key_file_data = None;
        self.combined = None;
        self.cipher_key = None;
        self.hmac_key = None;
        self.state = KeyState::Empty;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FormatError;
    use crate::keys::ModernKeyHelper;

    #[test]
    fn challenge_timeout_follows_config() {
        let key = CompositeKey::from_password("secret");
        assert_eq!(key.challenge_timeout, crate::config::load().challenge.timeout());
        let key = key.with_challenge_timeout(Duration::from_millis(5));
        assert_eq!(key.challenge_timeout, Duration::from_millis(5));
    }

    #[test]
    fn states_move_forward_and_erase_inputs() {
        let mut key = CompositeKey::from_password("secret");
        assert_eq!(key.state(), KeyState::RawComponents);
        key.process_components(&ModernKeyHelper).unwrap();
        assert_eq!(key.state(), KeyState::ProcessedComponents);
        assert!(key.password.is_none());
        key.combine(&ModernKeyHelper).unwrap();
        assert_eq!(key.state(), KeyState::CombinedComponents);
        assert!(key.password_data.is_none());
        assert!(key.process_components(&ModernKeyHelper).is_err());
        key.set_final_keys(SecretBytes::new(vec![1; 32]), None).unwrap();
        assert_eq!(key.state(), KeyState::Final);
        key.erase();
        assert_eq!(key.state(), KeyState::Empty);
        assert!(key.combined_components().is_none());
    }

    #[test]
    fn processed_state_cannot_be_skipped() {
        let mut key = CompositeKey::from_password("secret");
        let err = key
            .set_combined_components(SecretBytes::new(vec![0; 32]))
            .unwrap_err();
        assert_eq!(
            err,
            KeyError::InvalidState {
                expected: KeyState::ProcessedComponents,
                actual: KeyState::RawComponents
            }
        );
    }

    #[test]
    fn response_may_arrive_from_another_thread() {
        let handler = |challenge: &[u8], responder: ResponseSender| {
            let echoed = challenge.to_vec();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                responder.send(Ok(SecretBytes::new(echoed)));
            });
        };
        let key = CompositeKey::new("pw", None, Some(Arc::new(handler)));
        let response = key.get_response(b"abc", &Progress::new()).unwrap().unwrap();
        assert_eq!(response.expose_secret().as_slice(), b"abc");
    }

    #[test]
    fn silent_handler_times_out() {
        let handler = |_: &[u8], responder: ResponseSender| std::mem::forget(responder);
        let key = CompositeKey::new("pw", None, Some(Arc::new(handler)))
            .with_challenge_timeout(Duration::from_millis(60));
        let err = key.get_response(b"abc", &Progress::new()).unwrap_err();
        assert!(matches!(
            err,
            FormatError::ChallengeResponse(ChallengeResponseError::Timeout)
        ));
    }

    #[test]
    fn handler_errors_are_propagated() {
        let handler = |_: &[u8], responder: ResponseSender| {
            responder.send(Err(ChallengeResponseError::NotAvailable))
        };
        let key = CompositeKey::new("pw", None, Some(Arc::new(handler)));
        assert!(matches!(
            key.get_response(b"abc", &Progress::new()),
            Err(FormatError::ChallengeResponse(
                ChallengeResponseError::NotAvailable
            ))
        ));
    }

    #[test]
    fn no_handler_means_no_response() {
        let key = CompositeKey::from_password("pw");
        assert!(key.get_response(b"abc", &Progress::new()).unwrap().is_none());
    }
}
