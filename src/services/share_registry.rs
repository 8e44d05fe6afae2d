use crate::error::{SupervisorError, SupervisorResult};
use crate::models::{ProjectKey, ShareToken};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

const CODE_LEN: usize = 6;
const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Expiring share codes onto a project's console.
pub struct ShareRegistry {
    ttl: Duration,
    tokens: Mutex<HashMap<String, ShareToken>>,
}

impl ShareRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn issue(&self, key: &ProjectKey) -> String {
        self.issue_at(key, Utc::now())
    }

    pub fn issue_at(&self, key: &ProjectKey, now: DateTime<Utc>) -> String {
        let mut tokens = self.tokens.lock();

        // A clash with a live code only costs one more draw.
        let mut code = generate_code();
        for _ in 0..8 {
            match tokens.get(&code) {
                Some(existing) if !self.is_expired(existing, now) => code = generate_code(),
                _ => break,
            }
        }

        tokens.insert(
            code.clone(),
            ShareToken {
                code: code.clone(),
                key: key.clone(),
                issued_at: now,
            },
        );
        debug!(project = %key, code = %code, "share code issued");
        code
    }

    pub fn resolve(&self, code: &str) -> SupervisorResult<ProjectKey> {
        self.resolve_at(code, Utc::now())
    }

    /// Case-insensitive lookup; an expired code is deleted on the way out.
    pub fn resolve_at(&self, code: &str, now: DateTime<Utc>) -> SupervisorResult<ProjectKey> {
        let code = code.trim().to_ascii_uppercase();
        let mut tokens = self.tokens.lock();

        let token = tokens
            .get(&code)
            .ok_or_else(|| SupervisorError::ShareCodeNotFound(code.clone()))?;

        if self.is_expired(token, now) {
            tokens.remove(&code);
            return Err(SupervisorError::ShareCodeExpired(code));
        }
        Ok(token.key.clone())
    }

    /// Drop every code pointing at `key`.
    pub fn revoke_project(&self, key: &ProjectKey) {
        self.tokens.lock().retain(|_, token| token.key != *key);
    }

    fn is_expired(&self, token: &ShareToken, now: DateTime<Utc>) -> bool {
        now - token.issued_at >= self.ttl
    }
}

fn generate_code() -> String {
    let mut n = Uuid::new_v4().as_u128();
    let mut code = String::with_capacity(CODE_LEN);
    for _ in 0..CODE_LEN {
        code.push(ALPHABET[(n % ALPHABET.len() as u128) as usize] as char);
        n /= ALPHABET.len() as u128;
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ShareRegistry {
        ShareRegistry::new(Duration::hours(24))
    }

    #[test]
    fn test_code_shape() {
        let code = generate_code();
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_resolve_within_ttl_and_case_insensitive() {
        let shares = registry();
        let key = ProjectKey::new("7", "bot");
        let t = Utc::now();
        let code = shares.issue_at(&key, t);

        let later = t + Duration::hours(23) + Duration::minutes(59);
        assert_eq!(shares.resolve_at(&code.to_lowercase(), later).unwrap(), key);
    }

    #[test]
    fn test_expired_code_is_deleted() {
        let shares = registry();
        let key = ProjectKey::new("7", "bot");
        let t = Utc::now();
        let code = shares.issue_at(&key, t);

        let expired = shares.resolve_at(&code, t + Duration::hours(24));
        assert!(matches!(expired, Err(SupervisorError::ShareCodeExpired(_))));

        let gone = shares.resolve_at(&code, t);
        assert!(matches!(gone, Err(SupervisorError::ShareCodeNotFound(_))));
    }

    #[test]
    fn test_revoke_project() {
        let shares = registry();
        let key = ProjectKey::new("7", "bot");
        let other = ProjectKey::new("7", "other");
        let code = shares.issue(&key);
        let kept = shares.issue(&other);

        shares.revoke_project(&key);
        assert!(shares.resolve(&code).is_err());
        assert_eq!(shares.resolve(&kept).unwrap(), other);
    }
}
