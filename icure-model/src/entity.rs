//! Entities carrying encryption metadata.

use crate::security::SecurityMetadata;
use serde::{Deserialize, Serialize};

/// A versioned entity whose access is governed by [`SecurityMetadata`].
pub trait EncryptableEntity: Clone + Send + Sync + 'static {
    /// Document type name, used to partition storage.
    const ENTITY_TYPE: &'static str;

    fn id(&self) -> &str;

    /// Optimistic-concurrency token. `None` for entities never saved.
    fn rev(&self) -> Option<&str>;

    fn security_metadata(&self) -> Option<&SecurityMetadata>;

    fn with_security_metadata(self, metadata: SecurityMetadata) -> Self;

    fn with_rev(self, rev: Option<String>) -> Self;
}

macro_rules! encryptable_entity {
    ($ty:ident, $name:literal) => {
        impl EncryptableEntity for $ty {
            const ENTITY_TYPE: &'static str = $name;

            fn id(&self) -> &str {
                &self.id
            }

            fn rev(&self) -> Option<&str> {
                self.rev.as_deref()
            }

            fn security_metadata(&self) -> Option<&SecurityMetadata> {
                self.security_metadata.as_ref()
            }

            fn with_security_metadata(self, metadata: SecurityMetadata) -> Self {
                Self {
                    security_metadata: Some(metadata),
                    ..self
                }
            }

            fn with_rev(self, rev: Option<String>) -> Self {
                Self { rev, ..self }
            }
        }
    };
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    /// YYYYMMDD
    #[serde(default)]
    pub date_of_birth: Option<i32>,
    /// Encrypted content, opaque to the server.
    #[serde(default)]
    pub encrypted_self: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_metadata: Option<SecurityMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(default)]
    pub descr: Option<String>,
    #[serde(default)]
    pub opening_date: Option<i64>,
    #[serde(default)]
    pub encrypted_self: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_metadata: Option<SecurityMetadata>,
}

encryptable_entity!(Patient, "Patient");
encryptable_entity!(Contact, "Contact");

impl Patient {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

impl Contact {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}
