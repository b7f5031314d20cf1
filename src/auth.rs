// src/auth.rs
use crate::error::Error;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::{debug, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub const SESSION_COOKIE: &str = "session";

#[derive(Serialize, Deserialize)]
struct Claims {
    sub: String,
    ver: i64,
    exp: usize,
}

/// What a verified token vouches for. `version` must still match the user's
/// stored `session_version`; changing the password bumps it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub user_id: i64,
    pub version: i64,
}

/// Issues and checks the signed tokens kept in the session cookie.
pub struct Sessions {
    secret: Vec<u8>,
    ttl: Duration,
}

impl Sessions {
    pub fn new(secret: impl Into<Vec<u8>>, ttl: Duration) -> Self {
        Sessions {
            secret: secret.into(),
            ttl,
        }
    }

    /// Sessions signed with a fresh random key; they do not survive a restart.
    pub fn ephemeral(ttl: Duration) -> Self {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill(&mut secret);
        Sessions::new(secret.to_vec(), ttl)
    }

    pub fn create_token(&self, user_id: i64, version: i64) -> Result<String, Error> {
        let claims = Claims {
            sub: user_id.to_string(),
            ver: version,
            exp: (Utc::now() + self.ttl).timestamp().max(0) as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(&self.secret),
        )?;
        Ok(token)
    }

    /// The session carried by `token`, if it is authentic and unexpired.
    pub fn verify(&self, token: &str) -> Option<Session> {
        match decode::<Claims>(
            token,
            &DecodingKey::from_secret(&self.secret),
            &Validation::default(),
        ) {
            Ok(data) => Some(Session {
                user_id: data.claims.sub.parse().ok()?,
                version: data.claims.ver,
            }),
            Err(e) => {
                debug!("Rejected session token: {}", e);
                None
            }
        }
    }
}

pub fn session_cookie(token: &str) -> String {
    format!(
        "{}={}; HttpOnly; Path=/; SameSite=Lax",
        SESSION_COOKIE, token
    )
}

pub fn clear_cookie() -> String {
    format!(
        "{}=; HttpOnly; Path=/; SameSite=Lax; Max-Age=0",
        SESSION_COOKIE
    )
}

/// Argon2id password hashing in PHC string format.
#[derive(Clone)]
pub struct Passwords {
    params: Params,
    dummy: OnceLock<String>,
}

impl Passwords {
    pub fn new(params: Params) -> Self {
        Passwords {
            params,
            dummy: OnceLock::new(),
        }
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    pub fn hash(&self, password: &str) -> Result<String, Error> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| Error::Hash(e.to_string()))
    }

    pub fn verify(&self, password: &str, hash: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => self
                .argon2()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                warn!("Stored password hash is unreadable: {}", e);
                false
            }
        }
    }

    /// Like `verify`, but an account without a hash is checked against a
    /// throwaway hash so it takes as long as a wrong password.
    pub fn check(&self, password: &str, hash: Option<&str>) -> bool {
        match hash {
            Some(hash) => self.verify(password, hash),
            None => {
                let dummy = self
                    .dummy
                    .get_or_init(|| self.hash("unused").unwrap_or_default());
                self.verify(password, dummy);
                false
            }
        }
    }
}

impl Default for Passwords {
    fn default() -> Self {
        Passwords::new(Params::default())
    }
}

#[cfg(test)]
pub(crate) fn fast_passwords() -> Passwords {
    Passwords::new(Params::new(1024, 1, 1, None).expect("valid argon2 params"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_never_stores_plaintext_and_verifies() {
        let passwords = fast_passwords();
        let hash = passwords.hash("hunter2").unwrap();
        assert!(!hash.contains("hunter2"));
        assert!(hash.starts_with("$argon2id$"));
        assert!(passwords.verify("hunter2", &hash));
        assert!(!passwords.verify("hunter3", &hash));
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        let passwords = fast_passwords();
        let a = passwords.hash("secret").unwrap();
        let b = passwords.hash("secret").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn garbage_hash_fails_verification() {
        assert!(!fast_passwords().verify("anything", "not-a-phc-string"));
    }

    #[test]
    fn missing_account_still_pays_for_a_hash() {
        let passwords = fast_passwords();
        assert!(!passwords.check("unused", None));
        let dummy = passwords.dummy.get().expect("dummy hash built");
        assert!(dummy.starts_with("$argon2id$"));
        assert!(dummy.contains("m=1024,t=1,p=1"));

        let hash = passwords.hash("pw").unwrap();
        assert!(passwords.check("pw", Some(&hash)));
        assert!(!passwords.check("px", Some(&hash)));
    }

    #[test]
    fn token_round_trips_user_id() {
        let sessions = Sessions::new(b"test-secret".to_vec(), Duration::hours(1));
        let token = sessions.create_token(42, 3).unwrap();
        assert_eq!(
            sessions.verify(&token),
            Some(Session {
                user_id: 42,
                version: 3
            })
        );
    }

    #[test]
    fn token_signed_with_other_key_is_rejected() {
        let ours = Sessions::new(b"ours".to_vec(), Duration::hours(1));
        let theirs = Sessions::new(b"theirs".to_vec(), Duration::hours(1));
        let token = theirs.create_token(7, 0).unwrap();
        assert_eq!(ours.verify(&token), None);
        assert_eq!(ours.verify("not.a.token"), None);
    }

    #[test]
    fn expired_token_is_rejected() {
        let sessions = Sessions::new(b"test-secret".to_vec(), Duration::hours(-1));
        let token = sessions.create_token(42, 0).unwrap();
        assert_eq!(sessions.verify(&token), None);
    }

    #[test]
    fn ephemeral_keys_differ() {
        let a = Sessions::ephemeral(Duration::hours(1));
        let b = Sessions::ephemeral(Duration::hours(1));
        let token = a.create_token(1, 0).unwrap();
        assert_eq!(a.verify(&token).map(|s| s.user_id), Some(1));
        assert_eq!(b.verify(&token), None);
    }

    #[test]
    fn cookies_are_http_only() {
        assert_eq!(
            session_cookie("abc"),
            "session=abc; HttpOnly; Path=/; SameSite=Lax"
        );
        assert!(clear_cookie().contains("Max-Age=0"));
    }
}
