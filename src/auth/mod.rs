//! Challenge/secret authentication for the hook callback channel.
//!
//! Every launch of an external VCS process gets its own
//! [`HookEnvironment`]: a fresh challenge and a fresh bearer secret,
//! both placed in the child's environment. The challenge is honored
//! exactly once, and only a fully successful authentication consumes
//! it; decode failures and wrong credentials leave it valid.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::Mutex;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use crate::protocol::{HookRequest, HookType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("hook challenge does not match")]
    Challenge,
    #[error("hook authentication failed")]
    Credentials,
}

/// Server-held state for one hook-capable invocation of the external
/// process. Created by [`HookAuthenticator::prepare`], discarded after
/// the process exits.
pub struct HookEnvironment {
    challenge: String,
    secret: SecretString,
    secret_digest: blake3::Hash,
    consumed: AtomicBool,
    pending: AtomicBool,
}

impl HookEnvironment {
    fn new() -> Arc<Self> {
        let challenge = random_token();
        let secret = random_token();
        let secret_digest = blake3::hash(secret.as_bytes());
        Arc::new(Self {
            challenge,
            secret: SecretString::from(secret),
            secret_digest,
            consumed: AtomicBool::new(false),
            pending: AtomicBool::new(false),
        })
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    /// The credential handed to the external process and echoed back
    /// in its request.
    pub fn bearer(&self) -> &str {
        self.secret.expose_secret()
    }

    /// True only while a pre-receive dispatch for this invocation is
    /// executing.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Arms the pending flag for pre-receive events. The returned
    /// guard resets it on drop, on every exit path.
    pub fn begin_pending(self: &Arc<Self>, hook_type: HookType) -> PendingGuard {
        let armed = hook_type == HookType::PreReceive;
        if armed {
            self.pending.store(true, Ordering::SeqCst);
        }
        PendingGuard {
            environment: Arc::clone(self),
            armed,
        }
    }

    fn verify_secret(&self, presented: &str) -> bool {
        // blake3::Hash equality is constant-time.
        blake3::hash(presented.as_bytes()) == self.secret_digest
    }

    fn is_consumed(&self) -> bool {
        self.consumed.load(Ordering::SeqCst)
    }

    fn consume_challenge(&self) -> bool {
        self.consumed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

pub struct PendingGuard {
    environment: Arc<HookEnvironment>,
    armed: bool,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.armed {
            self.environment.pending.store(false, Ordering::SeqCst);
        }
    }
}

/// Process-wide table of outstanding invocations, keyed by challenge.
/// Independent invocations never share state beyond this table.
#[derive(Default)]
pub struct HookAuthenticator {
    invocations: Mutex<HashMap<String, Arc<HookEnvironment>>>,
}

impl HookAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints the environment for one upcoming invocation of the
    /// external process.
    pub fn prepare(&self) -> Arc<HookEnvironment> {
        let environment = HookEnvironment::new();
        self.invocations
            .lock()
            .insert(environment.challenge.clone(), Arc::clone(&environment));
        environment
    }

    /// Forgets an invocation once its external process has exited,
    /// whether or not it ever called back.
    pub fn discard(&self, environment: &HookEnvironment) {
        self.invocations.lock().remove(&environment.challenge);
    }

    /// Validates a request against the outstanding invocations. The
    /// challenge is checked before the credential and is consumed
    /// atomically only when both checks pass.
    pub fn authenticate(&self, request: &HookRequest) -> Result<Arc<HookEnvironment>, AuthFailure> {
        let environment = self
            .invocations
            .lock()
            .get(&request.challenge)
            .cloned()
            .ok_or(AuthFailure::Challenge)?;
        if environment.is_consumed() {
            return Err(AuthFailure::Challenge);
        }
        if !environment.verify_secret(&request.secret) {
            return Err(AuthFailure::Credentials);
        }
        if !environment.consume_challenge() {
            return Err(AuthFailure::Challenge);
        }
        Ok(environment)
    }
}

fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(secret: &str, challenge: &str) -> HookRequest {
        HookRequest {
            secret: secret.to_string(),
            hook_type: HookType::PostReceive,
            transaction_id: "ti21".to_string(),
            repository_id: "42".to_string(),
            challenge: challenge.to_string(),
            node: None,
        }
    }

    fn valid_request(environment: &HookEnvironment) -> HookRequest {
        request(environment.bearer(), environment.challenge())
    }

    #[test]
    fn prepared_invocations_get_distinct_random_material() {
        let authenticator = HookAuthenticator::new();
        let first = authenticator.prepare();
        let second = authenticator.prepare();
        assert_ne!(first.challenge(), second.challenge());
        assert_ne!(first.bearer(), second.bearer());
        assert_eq!(first.challenge().len(), 64);
    }

    #[test]
    fn challenge_is_consumed_by_a_successful_authentication() {
        let authenticator = HookAuthenticator::new();
        let environment = authenticator.prepare();

        assert!(authenticator.authenticate(&valid_request(&environment)).is_ok());
        assert!(matches!(
            authenticator.authenticate(&valid_request(&environment)),
            Err(AuthFailure::Challenge)
        ));
    }

    #[test]
    fn wrong_secret_fails_and_leaves_the_challenge_valid() {
        let authenticator = HookAuthenticator::new();
        let environment = authenticator.prepare();

        let wrong = request("not-the-bearer", environment.challenge());
        assert!(matches!(
            authenticator.authenticate(&wrong),
            Err(AuthFailure::Credentials)
        ));
        assert!(authenticator.authenticate(&valid_request(&environment)).is_ok());
    }

    #[test]
    fn unknown_challenges_are_rejected() {
        let authenticator = HookAuthenticator::new();
        let environment = authenticator.prepare();

        let stranger = request(environment.bearer(), "something-different");
        assert!(matches!(
            authenticator.authenticate(&stranger),
            Err(AuthFailure::Challenge)
        ));
    }

    #[test]
    fn discarded_invocations_no_longer_authenticate() {
        let authenticator = HookAuthenticator::new();
        let environment = authenticator.prepare();

        authenticator.discard(&environment);
        assert!(matches!(
            authenticator.authenticate(&valid_request(&environment)),
            Err(AuthFailure::Challenge)
        ));
    }

    #[test]
    fn pending_guard_covers_pre_receive_only() {
        let authenticator = HookAuthenticator::new();
        let environment = authenticator.prepare();

        {
            let _guard = environment.begin_pending(HookType::PreReceive);
            assert!(environment.is_pending());
        }
        assert!(!environment.is_pending());

        {
            let _guard = environment.begin_pending(HookType::PostReceive);
            assert!(!environment.is_pending());
        }
        assert!(!environment.is_pending());
    }
}
