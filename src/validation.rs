use crate::errors::{WalletError, WalletResult};
use regex::Regex;

const MAX_LABEL_LENGTH: usize = 64;

/// Input validation applied at the facade boundary.
#[derive(Debug)]
pub struct InputValidator {
    // Compiled regex patterns for performance
    address_pattern: Regex,
    password_pattern: Regex,

    // Blacklisted patterns for security
    malicious_patterns: Vec<Regex>,
}

impl InputValidator {
    pub fn new() -> WalletResult<Self> {
        // bech32m: "pc" prefix, separator, then the bech32 charset only.
        let address_pattern = Regex::new(r"^pc1[qpzry9x8gf2tvdw0s3jn54khce6mua7l]{38,90}$")
            .map_err(|e| WalletError::ValidationError(format!("Invalid address regex: {}", e)))?;

        let password_pattern = Regex::new(r"^.{8,}$")
            .map_err(|e| WalletError::ValidationError(format!("Invalid password regex: {}", e)))?;

        // Common injection patterns to block in free-text fields.
        let malicious_patterns = vec![
            Regex::new(r"<script")
                .map_err(|e| WalletError::ValidationError(e.to_string()))?,
            Regex::new(r"javascript:")
                .map_err(|e| WalletError::ValidationError(e.to_string()))?,
            Regex::new(r"data:text/html")
                .map_err(|e| WalletError::ValidationError(e.to_string()))?,
        ];

        Ok(InputValidator {
            address_pattern,
            password_pattern,
            malicious_patterns,
        })
    }

    /// Validate a chain address string.
    pub fn validate_address(&self, address: &str) -> WalletResult<()> {
        if address.is_empty() {
            return Err(WalletError::InvalidAddress(
                "Address cannot be empty".to_string(),
            ));
        }

        if !self.address_pattern.is_match(address) {
            return Err(WalletError::InvalidAddress(address.to_string()));
        }

        Ok(())
    }

    /// Validate a human-readable account label.
    pub fn validate_label(&self, label: &str) -> WalletResult<()> {
        self.check_basic_security(label)?;

        if label.trim().is_empty() {
            return Err(WalletError::ValidationError(
                "Label cannot be empty".to_string(),
            ));
        }

        if label.len() > MAX_LABEL_LENGTH {
            return Err(WalletError::ValidationError(format!(
                "Label exceeds {} characters",
                MAX_LABEL_LENGTH
            )));
        }

        if label.chars().any(|c| c.is_control()) {
            return Err(WalletError::ValidationError(
                "Label contains control characters".to_string(),
            ));
        }

        Ok(())
    }

    /// Minimum password strength for the UI boundary. Not enforced by the
    /// core itself so recovery flows stay usable.
    pub fn validate_password(&self, password: &str) -> WalletResult<()> {
        if !self.password_pattern.is_match(password) {
            return Err(WalletError::ValidationError(
                "Password must be at least 8 characters".to_string(),
            ));
        }
        Ok(())
    }

    fn check_basic_security(&self, input: &str) -> WalletResult<()> {
        for pattern in &self.malicious_patterns {
            if pattern.is_match(&input.to_lowercase()) {
                return Err(WalletError::ValidationError(
                    "Input contains disallowed content".to_string(),
                ));
            }
        }
        Ok(())
    }
}
