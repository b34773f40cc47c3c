use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::crypto::{EncryptionKey, MasterKey};
use crate::errors::{WalletError, WalletResult};
use crate::storage::RecordSecrets;

/// Default duration before an unlocked wallet automatically locks.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Key material held in memory only while the session is unlocked. Every
/// field zeroizes on drop.
#[derive(Debug)]
pub struct SessionKeys {
    /// Master seed driving address derivation and signing.
    pub master: MasterKey,
    /// Decrypted record secrets (seed bytes, recovery phrase).
    pub secrets: RecordSecrets,
    /// Password-derived key used to re-encrypt the record on persist.
    pub encryption_key: EncryptionKey,
}

#[derive(Debug)]
struct UnlockedSession {
    keys: SessionKeys,
    expires_at: Instant,
}

impl UnlockedSession {
    fn new(keys: SessionKeys, timeout: Duration) -> Self {
        Self {
            keys,
            expires_at: Instant::now() + timeout,
        }
    }

    fn touch(&mut self, timeout: Duration) {
        self.expires_at = Instant::now() + timeout;
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

#[derive(Debug, Default)]
struct SessionState {
    unlocked: Option<UnlockedSession>,
    failed_attempts: u32,
    next_allowed_attempt: Option<Instant>,
    backoff_exponent: u32,
}

/// Locked/Unlocked state machine guarding the wallet's key material.
///
/// Expiry is evaluated lazily on access rather than by a timer thread, so
/// resetting the deadline can never race an in-flight unlock.
#[derive(Debug, Clone)]
pub struct SessionManager {
    state: Arc<RwLock<SessionState>>,
    timeout: Duration,
    max_failed_attempts: u32,
    backoff_base: Duration,
    backoff_cap: Duration,
    max_backoff_exponent: u32,
}

impl SessionManager {
    pub fn new(timeout: Duration, max_failed_attempts: u32) -> Self {
        Self::with_backoff(
            timeout,
            max_failed_attempts,
            Duration::from_secs(1),
            Duration::from_secs(32),
        )
    }

    pub fn with_backoff(
        timeout: Duration,
        max_failed_attempts: u32,
        backoff_base: Duration,
        backoff_cap: Duration,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(SessionState::default())),
            timeout,
            max_failed_attempts,
            backoff_base,
            backoff_cap,
            max_backoff_exponent: 8,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_SESSION_TIMEOUT, 5)
    }

    pub fn is_locked(&self) -> bool {
        let state = self.state.read();
        state.unlocked.is_none()
    }

    /// Check the backoff window before attempting a decrypt.
    pub fn ensure_unlock_permitted(&self) -> WalletResult<()> {
        let state = self.state.read();
        if let Some(until) = state.next_allowed_attempt {
            let now = Instant::now();
            if now < until {
                let remaining = until.saturating_duration_since(now);
                return Err(WalletError::UnlockThrottled(format!(
                    "retry in {}.{:03} seconds",
                    remaining.as_secs(),
                    remaining.subsec_millis()
                )));
            }
        }
        Ok(())
    }

    /// Transition to `Unlocked` with freshly decrypted key material.
    pub fn unlock(&self, keys: SessionKeys) {
        let mut state = self.state.write();
        state.failed_attempts = 0;
        state.unlocked = Some(UnlockedSession::new(keys, self.timeout));
        state.next_allowed_attempt = None;
        state.backoff_exponent = 0;
        log::info!("wallet session unlocked");
    }

    /// Record a failed unlock attempt and return remaining attempts.
    pub fn register_failed_attempt(&self) -> WalletResult<u32> {
        let mut state = self.state.write();
        let now = Instant::now();

        if let Some(until) = state.next_allowed_attempt {
            if now < until {
                let remaining = until.saturating_duration_since(now);
                return Err(WalletError::UnlockThrottled(format!(
                    "retry in {}.{:03} seconds",
                    remaining.as_secs(),
                    remaining.subsec_millis()
                )));
            }
        }

        state.failed_attempts += 1;
        if state.failed_attempts >= self.max_failed_attempts {
            state.unlocked = None;
            state.next_allowed_attempt = None;
            state.backoff_exponent = 0;
            log::warn!("maximum unlock attempts exceeded, session cleared");
            return Err(WalletError::UnlockThrottled(
                "maximum unlock attempts exceeded".to_string(),
            ));
        }
        state.backoff_exponent = (state.backoff_exponent + 1).min(self.max_backoff_exponent);
        let multiplier = 1_u32 << state.backoff_exponent.saturating_sub(1);
        let mut delay = if multiplier <= 1 {
            self.backoff_base
        } else {
            self.backoff_base
                .checked_mul(multiplier)
                .unwrap_or(self.backoff_cap)
        };
        if delay > self.backoff_cap {
            delay = self.backoff_cap;
        }
        state.next_allowed_attempt = Some(now + delay);

        Ok(self.max_failed_attempts - state.failed_attempts)
    }

    /// Transition to `Locked`, dropping (and thereby zeroizing) key material
    /// immediately.
    pub fn lock(&self) {
        let mut state = self.state.write();
        state.unlocked = None;
        state.next_allowed_attempt = None;
        state.backoff_exponent = 0;
        log::info!("wallet session locked");
    }

    /// Run a key-using operation, refreshing the inactivity deadline.
    /// Fails with `SessionLocked` when locked or expired; never blocks or
    /// prompts.
    pub fn with_unlocked<F, T>(&self, operation: F) -> WalletResult<T>
    where
        F: FnOnce(&SessionKeys) -> WalletResult<T>,
    {
        let mut state = self.state.write();
        let session = state.unlocked.as_mut().ok_or(WalletError::SessionLocked)?;

        if session.is_expired() {
            state.unlocked = None;
            log::info!("wallet session expired");
            return Err(WalletError::SessionLocked);
        }

        session.touch(self.timeout);
        operation(&session.keys)
    }

    /// Read key material without extending the deadline (observers only).
    pub fn peek_unlocked<F, T>(&self, operation: F) -> WalletResult<T>
    where
        F: FnOnce(&SessionKeys) -> WalletResult<T>,
    {
        let state = self.state.read();
        let session = state.unlocked.as_ref().ok_or(WalletError::SessionLocked)?;

        if session.is_expired() {
            drop(state);
            self.lock();
            return Err(WalletError::SessionLocked);
        }

        operation(&session.keys)
    }

    pub fn remaining_attempts(&self) -> u32 {
        let state = self.state.read();
        self.max_failed_attempts
            .saturating_sub(state.failed_attempts)
    }
}
