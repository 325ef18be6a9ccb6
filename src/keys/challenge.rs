// src/keys/challenge.rs
//! Challenge-response capability (hardware keys and the like)
//!
//! The handler may answer synchronously, from another thread, or after a UI
//! round trip; the codec blocks its own worker thread until the answer or a
//! timeout arrives.

use std::sync::mpsc::SyncSender;

use crate::aliases::SecretBytes;
use crate::error::ChallengeResponseError;

pub type ChallengeResult = Result<SecretBytes, ChallengeResponseError>;

/// Completion handle passed to a [`ChallengeHandler`]; single use
pub struct ResponseSender(pub(crate) SyncSender<ChallengeResult>);

impl ResponseSender {
    pub fn send(self, result: ChallengeResult) {
        // The waiting side may have timed out already.
        let _ = self.0.send(result);
    }
}

pub trait ChallengeHandler: Send + Sync {
    fn perform(&self, challenge: &[u8], responder: ResponseSender);
}

impl<F> ChallengeHandler for F
where
    F: Fn(&[u8], ResponseSender) + Send + Sync,
{
    fn perform(&self, challenge: &[u8], responder: ResponseSender) {
        self(challenge, responder)
    }
}
