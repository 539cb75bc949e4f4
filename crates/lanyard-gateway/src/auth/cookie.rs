//! Signed session cookies.
//!
//! Cookie value is `<sid>.<tag>` where `tag` is a keyed BLAKE2b MAC over the
//! session id. A cookie whose tag does not verify is treated as absent.

use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue, header::COOKIE};
use blake2::digest::Mac;
use blake2::{Blake2b512, Blake2bMac512, Digest};
use secrecy::{ExposeSecret, SecretBox};

use lanyard_core::Secret;
use lanyard_core::types::SessionId;

type SessionMac = Blake2bMac512;

/// Signs and verifies session cookies.
pub struct CookieSigner {
    key: SecretBox<[u8; 64]>,
    name: String,
    secure: bool,
    max_age: Duration,
}

impl CookieSigner {
    /// Create a signer keyed from the session secret.
    #[must_use]
    pub fn new(secret: &Secret, name: impl Into<String>, secure: bool, max_age: Duration) -> Self {
        // Any secret length maps onto a full-size MAC key.
        let digest = Blake2b512::digest(secret.expose().as_bytes());
        let mut key = [0u8; 64];
        key.copy_from_slice(&digest);

        Self {
            key: SecretBox::new(Box::new(key)),
            name: name.into(),
            secure,
            max_age,
        }
    }

    /// Cookie name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lifetime given to the cookie, equal to the session TTL.
    #[must_use]
    pub const fn max_age(&self) -> Duration {
        self.max_age
    }

    fn mac(&self) -> Option<SessionMac> {
        SessionMac::new_from_slice(self.key.expose_secret()).ok()
    }

    /// Produce the signed cookie value for a session id.
    #[must_use]
    pub fn sign(&self, sid: &SessionId) -> Option<String> {
        let mut mac = self.mac()?;
        mac.update(sid.as_str().as_bytes());
        let tag = mac.finalize().into_bytes();
        Some(format!("{}.{}", sid.as_str(), hex::encode(tag)))
    }

    /// Recover the session id from a signed value.
    #[must_use]
    pub fn verify(&self, value: &str) -> Option<SessionId> {
        let (sid, tag) = value.split_once('.')?;
        let sid = SessionId::parse(sid)?;
        let tag = hex::decode(tag).ok()?;

        let mut mac = self.mac()?;
        mac.update(sid.as_str().as_bytes());
        mac.verify_slice(&tag).ok()?;
        Some(sid)
    }

    /// Find and verify the session cookie among request headers.
    #[must_use]
    pub fn from_headers(&self, headers: &HeaderMap) -> Option<SessionId> {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|h| h.to_str().ok())
            .flat_map(|h| h.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .filter(|(name, _)| *name == self.name)
            .find_map(|(_, value)| self.verify(value))
    }

    /// `Set-Cookie` value establishing the session.
    #[must_use]
    pub fn set_cookie(&self, sid: &SessionId) -> Option<HeaderValue> {
        let value = self.sign(sid)?;
        let secure = if self.secure { "; Secure" } else { "" };
        HeaderValue::from_str(&format!(
            "{}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{secure}",
            self.name,
            self.max_age.as_secs()
        ))
        .ok()
    }

    /// `Set-Cookie` value removing the session cookie.
    #[must_use]
    pub fn clear_cookie(&self) -> Option<HeaderValue> {
        let secure = if self.secure { "; Secure" } else { "" };
        HeaderValue::from_str(&format!(
            "{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0{secure}",
            self.name
        ))
        .ok()
    }
}

impl std::fmt::Debug for CookieSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieSigner")
            .field("name", &self.name)
            .field("secure", &self.secure)
            .field("max_age", &self.max_age)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> CookieSigner {
        CookieSigner::new(
            &Secret::new("test-secret"),
            "lanyard.sid",
            false,
            Duration::from_secs(60),
        )
    }

    #[test]
    fn test_sign_and_verify() {
        let signer = signer();
        let sid = SessionId::generate();
        let value = signer.sign(&sid).unwrap();

        assert_eq!(signer.verify(&value), Some(sid));
    }

    #[test]
    fn test_rejects_tampered_id() {
        let signer = signer();
        let value = signer.sign(&SessionId::generate()).unwrap();
        let (_, tag) = value.split_once('.').unwrap();
        let forged = format!("{}.{tag}", SessionId::generate().as_str());

        assert_eq!(signer.verify(&forged), None);
        assert_eq!(signer.verify("garbage"), None);
        assert_eq!(signer.verify(""), None);
    }

    #[test]
    fn test_rejects_other_key() {
        let sid = SessionId::generate();
        let value = signer().sign(&sid).unwrap();
        let other = CookieSigner::new(
            &Secret::new("another-secret"),
            "lanyard.sid",
            false,
            Duration::from_secs(60),
        );

        assert_eq!(other.verify(&value), None);
    }

    #[test]
    fn test_from_headers() {
        let signer = signer();
        let sid = SessionId::generate();
        let mut headers = HeaderMap::new();
        let cookie = format!("theme=dark; lanyard.sid={}", signer.sign(&sid).unwrap());
        headers.insert(COOKIE, HeaderValue::from_str(&cookie).unwrap());

        assert_eq!(signer.from_headers(&headers), Some(sid));
    }

    #[test]
    fn test_cookie_attributes() {
        let sid = SessionId::generate();
        let plain = signer().set_cookie(&sid).unwrap();
        let plain = plain.to_str().unwrap();
        assert!(plain.contains("HttpOnly"));
        assert!(plain.contains("SameSite=Lax"));
        assert!(plain.contains("Path=/"));
        assert!(!plain.contains("Secure"));

        let secure = CookieSigner::new(
            &Secret::new("s"),
            "lanyard.sid",
            true,
            Duration::from_secs(60),
        );
        assert!(secure.set_cookie(&sid).unwrap().to_str().unwrap().ends_with("; Secure"));
    }
}
