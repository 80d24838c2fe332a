//! Wise-Authority identity and the authorization surface.
//!
//! WA certificates form a hierarchy rooted at a self-signed root: every
//! non-root certificate carries a parent signature verifiable under the
//! parent's Ed25519 key. Runtime-control endpoints resolve bearer tokens
//! to an [`AuthorizationContext`] and check scopes; a failed check reveals
//! nothing beyond "forbidden".
//!
//! This is the single authoritative auth module; there is no parallel
//! legacy schema.

use std::collections::HashMap;
use std::sync::LazyLock;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use miette::Diagnostic;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::instrument;
use uuid::Uuid;

use crate::types::ErrorClass;

// ============================================================================
// Scopes
// ============================================================================

/// Scope required for shutdown and other runtime control.
pub const SCOPE_SYSTEM_CONTROL: &str = "system:control";
/// Scope required to mint WA certificates.
pub const SCOPE_WA_MINT: &str = "wa:mint";
/// Scope required to submit tasks.
pub const SCOPE_WRITE_TASK: &str = "write:task";
/// Scope required for read paths.
pub const SCOPE_READ_ANY: &str = "read:any";
/// Scope carried by channel observers to post messages.
pub const SCOPE_WRITE_MESSAGE: &str = "write:message";
/// Wildcard scope; exclusive to root certificates.
pub const SCOPE_WILDCARD: &str = "*";

static WA_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^wa-\d{4}-\d{2}-\d{2}-[A-Z0-9]{6}$")
        .unwrap_or_else(|_| unreachable!("static WA id pattern is valid"))
});

// ============================================================================
// Model
// ============================================================================

/// WA role levels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaRole {
    /// The self-signed root of the trust hierarchy.
    Root,
    /// A minted authority able to approve sensitive operations.
    Authority,
    /// A read-mostly observer (typically channel-bound).
    Observer,
}

/// Token type classifications.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// A standard long-lived WA token.
    Standard,
    /// A channel-bound observer token issued per transport adapter.
    Channel,
    /// An OAuth-linked token.
    Oauth,
}

/// A Wise-Authority certificate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WaCertificate {
    /// Identifier matching `wa-YYYY-MM-DD-XXXXXX`.
    pub wa_id: String,
    /// Display name.
    pub name: String,
    /// Role level.
    pub role: WaRole,
    /// Base64url Ed25519 public key.
    pub pubkey: String,
    /// JWT key identifier.
    pub jwt_kid: String,
    /// Granted scopes.
    pub scopes: Vec<String>,
    /// Parent certificate, absent only for root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_wa_id: Option<String>,
    /// Base64 parent signature over the canonical certificate content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_signature: Option<String>,
    /// OAuth provider linkage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_provider: Option<String>,
    /// OAuth external subject linkage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_external_id: Option<String>,
    /// Channel binding for observer tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    /// Token classification.
    pub token_type: TokenType,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Whether the certificate is active.
    pub active: bool,
}

impl WaCertificate {
    /// Whether the certificate grants `scope` (wildcard included).
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == SCOPE_WILDCARD || s == scope)
    }

    /// Canonical bytes covered by the parent signature.
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        format!(
            "{}|{}|{:?}|{}",
            self.wa_id, self.name, self.role, self.pubkey
        )
        .into_bytes()
    }
}

/// What a resolved bearer token carries into request handling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationContext {
    /// WA identity.
    pub wa_id: String,
    /// Role level.
    pub role: WaRole,
    /// Granted scopes.
    pub scopes: Vec<String>,
}

impl AuthorizationContext {
    /// Whether the context grants `scope` (wildcard included).
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == SCOPE_WILDCARD || s == scope)
    }
}

/// A signed runtime-control command (emergency shutdown).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignedCommand {
    /// The command verb (e.g. `"emergency_shutdown"`).
    pub verb: String,
    /// Issuing WA.
    pub wa_id: String,
    /// When the command was issued.
    pub issued_at: DateTime<Utc>,
    /// Base64 Ed25519 signature over the canonical command bytes.
    pub signature: String,
}

impl SignedCommand {
    /// Canonical bytes covered by the signature.
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        format!("{}|{}|{}", self.verb, self.wa_id, self.issued_at.to_rfc3339()).into_bytes()
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors from the authorization surface.
#[derive(Debug, Error, Diagnostic)]
pub enum AuthError {
    /// The request lacks a required scope or a valid credential. The
    /// message is deliberately uninformative.
    #[error("forbidden")]
    #[diagnostic(code(praxis::auth::forbidden))]
    Forbidden,

    /// A certificate failed structural validation.
    #[error("invalid certificate: {detail}")]
    #[diagnostic(code(praxis::auth::invalid_certificate))]
    InvalidCertificate {
        /// What was wrong.
        detail: String,
    },

    /// Key or signature material was malformed.
    #[error("signature material malformed: {detail}")]
    #[diagnostic(code(praxis::auth::signature))]
    Signature {
        /// What was wrong.
        detail: String,
    },
}

impl AuthError {
    /// Propagation class per the engine error taxonomy.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Forbidden => ErrorClass::Authorization,
            Self::InvalidCertificate { .. } | Self::Signature { .. } => ErrorClass::Validation,
        }
    }
}

// ============================================================================
// Verification helpers
// ============================================================================

fn decode_pubkey(pubkey_b64url: &str) -> Result<VerifyingKey, AuthError> {
    let bytes = BASE64_URL
        .decode(pubkey_b64url)
        .or_else(|_| BASE64.decode(pubkey_b64url))
        .map_err(|_| AuthError::Signature {
            detail: "public key is not valid base64".into(),
        })?;
    let array: [u8; 32] = bytes.try_into().map_err(|_| AuthError::Signature {
        detail: "public key has wrong length".into(),
    })?;
    VerifyingKey::from_bytes(&array).map_err(|_| AuthError::Signature {
        detail: "public key is not a valid Ed25519 point".into(),
    })
}

fn verify_detached(pubkey_b64url: &str, message: &[u8], signature_b64: &str) -> Result<bool, AuthError> {
    let key = decode_pubkey(pubkey_b64url)?;
    let sig_bytes = BASE64
        .decode(signature_b64)
        .map_err(|_| AuthError::Signature {
            detail: "signature is not valid base64".into(),
        })?;
    let sig_array: [u8; 64] = sig_bytes.try_into().map_err(|_| AuthError::Signature {
        detail: "signature has wrong length".into(),
    })?;
    Ok(key.verify(message, &Signature::from_bytes(&sig_array)).is_ok())
}

/// Generate a WA id for today with a random suffix.
#[must_use]
pub fn generate_wa_id(now: DateTime<Utc>) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::rng();
    let suffix: String = (0..6)
        .map(|_| {
            let index = (rng.next_u32() as usize) % ALPHABET.len();
            ALPHABET[index] as char
        })
        .collect();
    format!("wa-{}-{}", now.format("%Y-%m-%d"), suffix)
}

// ============================================================================
// Service
// ============================================================================

/// Certificate registry and token resolution.
///
/// Token issuance lives with the external auth collaborator; the core
/// keeps the registry needed to check scopes, verify trust-chain
/// signatures, and authenticate emergency commands.
#[derive(Debug, Default)]
pub struct AuthService {
    certificates: RwLock<HashMap<String, WaCertificate>>,
    /// Bearer token -> WA id.
    tokens: RwLock<HashMap<String, String>>,
}

impl AuthService {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a certificate after structural validation:
    /// id format, wildcard-is-root-only, and a verifying parent signature
    /// for non-root certificates.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCertificate`] on any violation.
    #[instrument(skip(self, certificate), fields(wa_id = %certificate.wa_id))]
    pub async fn register_certificate(&self, certificate: WaCertificate) -> Result<(), AuthError> {
        if !WA_ID_PATTERN.is_match(&certificate.wa_id) {
            return Err(AuthError::InvalidCertificate {
                detail: "wa_id does not match wa-YYYY-MM-DD-XXXXXX".into(),
            });
        }
        if certificate.scopes.iter().any(|s| s == SCOPE_WILDCARD)
            && certificate.role != WaRole::Root
        {
            return Err(AuthError::InvalidCertificate {
                detail: "wildcard scope is exclusive to root".into(),
            });
        }

        if certificate.role != WaRole::Root {
            let (Some(parent_id), Some(parent_signature)) =
                (&certificate.parent_wa_id, &certificate.parent_signature)
            else {
                return Err(AuthError::InvalidCertificate {
                    detail: "non-root certificate lacks a parent signature".into(),
                });
            };
            let certificates = self.certificates.read().await;
            let Some(parent) = certificates.get(parent_id) else {
                return Err(AuthError::InvalidCertificate {
                    detail: format!("parent {parent_id} is not registered"),
                });
            };
            let verified = verify_detached(
                &parent.pubkey,
                &certificate.canonical_bytes(),
                parent_signature,
            )?;
            if !verified {
                return Err(AuthError::InvalidCertificate {
                    detail: "parent signature does not verify".into(),
                });
            }
        }

        self.certificates
            .write()
            .await
            .insert(certificate.wa_id.clone(), certificate);
        Ok(())
    }

    /// Mint a new WA certificate on behalf of `authorization`, which must
    /// carry `wa:mint`. The certificate still undergoes full structural
    /// validation, including its parent signature.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Forbidden`] without the scope and
    /// [`AuthError::InvalidCertificate`] for a bad certificate.
    pub async fn mint_certificate(
        &self,
        authorization: &AuthorizationContext,
        certificate: WaCertificate,
    ) -> Result<(), AuthError> {
        if !authorization.has_scope(SCOPE_WA_MINT) {
            return Err(AuthError::Forbidden);
        }
        self.register_certificate(certificate).await
    }

    /// Associate a bearer token with a registered WA.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Forbidden`] for unknown or inactive WAs.
    pub async fn bind_token(&self, token: &str, wa_id: &str) -> Result<(), AuthError> {
        let certificates = self.certificates.read().await;
        match certificates.get(wa_id) {
            Some(cert) if cert.active => {
                drop(certificates);
                self.tokens
                    .write()
                    .await
                    .insert(token.to_string(), wa_id.to_string());
                Ok(())
            }
            _ => Err(AuthError::Forbidden),
        }
    }

    /// Resolve a bearer token to an authorization context.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Forbidden`] for unknown tokens or inactive
    /// certificates.
    pub async fn resolve_bearer(&self, token: &str) -> Result<AuthorizationContext, AuthError> {
        let tokens = self.tokens.read().await;
        let Some(wa_id) = tokens.get(token) else {
            return Err(AuthError::Forbidden);
        };
        let wa_id = wa_id.clone();
        drop(tokens);

        let certificates = self.certificates.read().await;
        match certificates.get(&wa_id) {
            Some(cert) if cert.active => Ok(AuthorizationContext {
                wa_id: cert.wa_id.clone(),
                role: cert.role,
                scopes: cert.scopes.clone(),
            }),
            _ => Err(AuthError::Forbidden),
        }
    }

    /// Require `scope` on a context.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Forbidden`] — and nothing more specific — when
    /// the scope is missing.
    pub fn require_scope(
        &self,
        context: &AuthorizationContext,
        scope: &str,
    ) -> Result<(), AuthError> {
        if context.has_scope(scope) {
            Ok(())
        } else {
            Err(AuthError::Forbidden)
        }
    }

    /// Issue a channel-bound observer identity for a transport adapter:
    /// a fresh keypair, a certificate carrying only `read:any` and
    /// `write:message`, and a bearer token bound to it.
    ///
    /// The private half of the observer key is returned to the adapter and
    /// not retained.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when registration fails.
    pub async fn issue_channel_observer(
        &self,
        adapter_name: &str,
        channel_id: &str,
    ) -> Result<(WaCertificate, String), AuthError> {
        let mut seed = [0u8; 32];
        rand::rng().fill_bytes(&mut seed);
        let key = SigningKey::from_bytes(&seed);

        let now = Utc::now();
        let certificate = WaCertificate {
            wa_id: generate_wa_id(now),
            name: format!("{adapter_name} observer"),
            role: WaRole::Observer,
            pubkey: BASE64_URL.encode(key.verifying_key().as_bytes()),
            jwt_kid: format!("obs-{}", Uuid::new_v4()),
            scopes: vec![SCOPE_READ_ANY.to_string(), SCOPE_WRITE_MESSAGE.to_string()],
            parent_wa_id: None,
            parent_signature: None,
            oauth_provider: None,
            oauth_external_id: None,
            channel_id: Some(channel_id.to_string()),
            token_type: TokenType::Channel,
            created: now,
            active: true,
        };

        // Channel observers sit outside the signed hierarchy; they carry
        // no approval authority.
        self.certificates
            .write()
            .await
            .insert(certificate.wa_id.clone(), certificate.clone());

        let token = format!("chan-{}", Uuid::new_v4());
        self.tokens
            .write()
            .await
            .insert(token.clone(), certificate.wa_id.clone());

        Ok((certificate, token))
    }

    /// Verify a signed emergency command against an active root or
    /// authority certificate.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Forbidden`] for unknown/inactive/under-ranked
    /// issuers or a non-verifying signature.
    #[instrument(skip(self, command), fields(wa_id = %command.wa_id, verb = %command.verb))]
    pub async fn verify_emergency_command(&self, command: &SignedCommand) -> Result<(), AuthError> {
        let certificates = self.certificates.read().await;
        let Some(cert) = certificates.get(&command.wa_id) else {
            return Err(AuthError::Forbidden);
        };
        if !cert.active || !matches!(cert.role, WaRole::Root | WaRole::Authority) {
            return Err(AuthError::Forbidden);
        }
        let verified = verify_detached(&cert.pubkey, &command.canonical_bytes(), &command.signature)
            .map_err(|_| AuthError::Forbidden)?;
        if verified {
            Ok(())
        } else {
            Err(AuthError::Forbidden)
        }
    }
}

// ============================================================================
// Test support
// ============================================================================

/// Build a self-signed root certificate plus its signing key. Used at
/// bootstrap and extensively in tests.
#[must_use]
pub fn bootstrap_root(name: &str) -> (WaCertificate, SigningKey) {
    let mut seed = [0u8; 32];
    rand::rng().fill_bytes(&mut seed);
    let key = SigningKey::from_bytes(&seed);
    let now = Utc::now();
    let certificate = WaCertificate {
        wa_id: generate_wa_id(now),
        name: name.to_string(),
        role: WaRole::Root,
        pubkey: BASE64_URL.encode(key.verifying_key().as_bytes()),
        jwt_kid: format!("root-{}", Uuid::new_v4()),
        scopes: vec![SCOPE_WILDCARD.to_string()],
        parent_wa_id: None,
        parent_signature: None,
        oauth_provider: None,
        oauth_external_id: None,
        channel_id: None,
        token_type: TokenType::Standard,
        created: now,
        active: true,
    };
    (certificate, key)
}

/// Sign a child certificate's canonical bytes with a parent key.
#[must_use]
pub fn sign_certificate(child: &WaCertificate, parent_key: &SigningKey) -> String {
    BASE64.encode(parent_key.sign(&child.canonical_bytes()).to_bytes())
}

/// Sign an emergency command with an issuer key.
#[must_use]
pub fn sign_command(command: &SignedCommand, issuer_key: &SigningKey) -> String {
    BASE64.encode(issuer_key.sign(&command.canonical_bytes()).to_bytes())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn authority_under(parent: &WaCertificate, parent_key: &SigningKey) -> WaCertificate {
        let mut seed = [0u8; 32];
        rand::rng().fill_bytes(&mut seed);
        let key = SigningKey::from_bytes(&seed);
        let mut cert = WaCertificate {
            wa_id: generate_wa_id(Utc::now()),
            name: "deputy".into(),
            role: WaRole::Authority,
            pubkey: BASE64_URL.encode(key.verifying_key().as_bytes()),
            jwt_kid: format!("auth-{}", Uuid::new_v4()),
            scopes: vec![SCOPE_SYSTEM_CONTROL.into(), SCOPE_READ_ANY.into()],
            parent_wa_id: Some(parent.wa_id.clone()),
            parent_signature: None,
            oauth_provider: None,
            oauth_external_id: None,
            channel_id: None,
            token_type: TokenType::Standard,
            created: Utc::now(),
            active: true,
        };
        cert.parent_signature = Some(sign_certificate(&cert, parent_key));
        cert
    }

    #[test]
    fn wa_id_format_is_enforced() {
        assert!(WA_ID_PATTERN.is_match("wa-2025-06-01-AB12CD"));
        assert!(!WA_ID_PATTERN.is_match("wa-2025-6-1-AB12CD"));
        assert!(!WA_ID_PATTERN.is_match("wa-2025-06-01-ab12cd"));
    }

    #[tokio::test]
    async fn root_registers_and_grants_all_scopes() {
        let service = AuthService::new();
        let (root, _key) = bootstrap_root("root");
        service.register_certificate(root.clone()).await.unwrap();
        service.bind_token("tok-root", &root.wa_id).await.unwrap();

        let context = service.resolve_bearer("tok-root").await.unwrap();
        assert!(context.has_scope(SCOPE_SYSTEM_CONTROL));
        assert!(context.has_scope(SCOPE_WA_MINT));
    }

    #[tokio::test]
    async fn non_root_requires_verifying_parent_signature() {
        let service = AuthService::new();
        let (root, root_key) = bootstrap_root("root");
        service.register_certificate(root.clone()).await.unwrap();

        let child = authority_under(&root, &root_key);
        service.register_certificate(child).await.unwrap();

        // A forged signature is rejected.
        let mut forged = authority_under(&root, &root_key);
        forged.name = "tampered".into();
        let err = service.register_certificate(forged).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCertificate { .. }));
    }

    #[tokio::test]
    async fn wildcard_is_root_only() {
        let service = AuthService::new();
        let (root, root_key) = bootstrap_root("root");
        service.register_certificate(root.clone()).await.unwrap();

        let mut child = authority_under(&root, &root_key);
        child.scopes.push(SCOPE_WILDCARD.into());
        child.parent_signature = Some(sign_certificate(&child, &root_key));
        let err = service.register_certificate(child).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCertificate { .. }));
    }

    #[tokio::test]
    async fn missing_scope_is_just_forbidden() {
        let service = AuthService::new();
        let (certificate, _token) = service
            .issue_channel_observer("cli", "cli:term0")
            .await
            .unwrap();
        let context = AuthorizationContext {
            wa_id: certificate.wa_id,
            role: WaRole::Observer,
            scopes: certificate.scopes,
        };
        let err = service
            .require_scope(&context, SCOPE_SYSTEM_CONTROL)
            .unwrap_err();
        assert_eq!(err.to_string(), "forbidden");
    }

    #[tokio::test]
    async fn emergency_command_requires_authority_signature() {
        let service = AuthService::new();
        let (root, root_key) = bootstrap_root("root");
        service.register_certificate(root.clone()).await.unwrap();

        let mut command = SignedCommand {
            verb: "emergency_shutdown".into(),
            wa_id: root.wa_id.clone(),
            issued_at: Utc::now(),
            signature: String::new(),
        };
        command.signature = sign_command(&command, &root_key);
        service.verify_emergency_command(&command).await.unwrap();

        // Observers cannot issue emergency commands.
        let (observer, _token) = service
            .issue_channel_observer("cli", "cli:term0")
            .await
            .unwrap();
        let mut rogue = SignedCommand {
            verb: "emergency_shutdown".into(),
            wa_id: observer.wa_id,
            issued_at: Utc::now(),
            signature: String::new(),
        };
        rogue.signature = sign_command(&rogue, &root_key);
        assert!(service.verify_emergency_command(&rogue).await.is_err());
    }
}
