//! Lazily created per-installation state: the master key envelope and the pack bucket.

use secrecy::SecretString;
use tracing::info;
use uuid::Uuid;

use zori_core::ZoriResult;
use zori_crypto::{generate_master_keys, EncryptionEnvelope, KeyVault, MasterKeyPair, ENVELOPE_DOC_ID};
use zori_store::generate_bucket_name;

use crate::model::{ids, Installation};
use crate::store::{fetch_doc, upsert_doc, DocumentStore};

/// Open the stored envelope, or generate and seal a new key pair on first use.
///
/// A wrong password fails with `Authentication`; the envelope is never
/// replaced once it exists.
pub fn load_or_create_master_keys(
    docs: &dyn DocumentStore,
    vault: &KeyVault,
    password: &SecretString,
) -> ZoriResult<MasterKeyPair> {
    if let Some(envelope) = fetch_doc::<EncryptionEnvelope>(docs, ENVELOPE_DOC_ID)? {
        return vault.open(password, &envelope);
    }

    let keys = generate_master_keys();
    let envelope = vault.seal(password, &keys)?;
    upsert_doc(docs, ENVELOPE_DOC_ID, &envelope)?;
    info!("created master keys");
    Ok(keys)
}

/// The installation record, created with a fresh bucket name on first use.
///
/// `configured_bucket` overrides the stored bucket without rewriting it.
pub fn load_or_create_installation(
    docs: &dyn DocumentStore,
    installation_id: &Uuid,
    configured_bucket: Option<&str>,
) -> ZoriResult<Installation> {
    let mut installation = match fetch_doc::<Installation>(docs, ids::INSTALLATION)? {
        Some(existing) => existing,
        None => {
            let created = Installation {
                id: installation_id.to_string(),
                bucket: generate_bucket_name(installation_id),
            };
            upsert_doc(docs, ids::INSTALLATION, &created)?;
            info!(installation = %created.id, bucket = %created.bucket, "registered installation");
            created
        }
    };
    if let Some(bucket) = configured_bucket {
        installation.bucket = bucket.to_string();
    }
    Ok(installation)
}
