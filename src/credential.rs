//! Credential value and change notification.
//!
//! The credential is an opaque bearer token supplied by the surrounding
//! application. Components never read it from ambient state: they are given
//! a [`watch::Receiver`] from a [`CredentialHandle`] and see the value current
//! at the moment they act. Setting or clearing the key through the handle is
//! the only way subscribers learn about a change.

use std::fmt;
use tokio::sync::watch;

/// Opaque bearer token. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Returns `None` for an empty or whitespace-only token.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Owner side of the credential channel.
#[derive(Debug)]
pub struct CredentialHandle {
    tx: watch::Sender<Option<Credential>>,
}

impl CredentialHandle {
    pub fn new(initial: Option<Credential>) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn set(&self, credential: Credential) {
        self.tx.send_replace(Some(credential));
    }

    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    pub fn current(&self) -> Option<Credential> {
        self.tx.borrow().clone()
    }

    /// Whether credential-gated features (job submission, querying) are
    /// available right now.
    pub fn is_available(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Credential>> {
        self.tx.subscribe()
    }
}

impl Default for CredentialHandle {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_token() {
        let cred = Credential::new("sk-secret").unwrap();
        assert_eq!(format!("{:?}", cred), "Credential(***)");
        assert_eq!(cred.expose(), "sk-secret");
    }

    #[test]
    fn blank_token_is_absent() {
        assert!(Credential::new("").is_none());
        assert!(Credential::new(" \t ").is_none());
        assert_eq!(Credential::new("  sk-x ").unwrap().expose(), "sk-x");
    }

    #[tokio::test]
    async fn subscribers_observe_set_and_clear() {
        let handle = CredentialHandle::default();
        let mut rx = handle.subscribe();
        assert!(!handle.is_available());

        handle.set(Credential::new("sk-1").unwrap());
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_ref().map(Credential::expose), Some("sk-1"));

        handle.clear();
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_none());
        assert!(handle.current().is_none());
    }
}
