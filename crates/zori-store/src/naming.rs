//! Installation identity and bucket names

use uuid::Uuid;

/// Namespace for installation ids (v5 UUIDs are stable per user@host).
const INSTALLATION_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a9e_5d34_4b8f_a7e0_93c1_d2b4_58e6);

/// Hex digits of the time-ordered prefix taken from a v7 UUID.
const BUCKET_PREFIX_LEN: usize = 26;

/// Deterministic id for a user on a host.
pub fn installation_id(username: &str, hostname: &str) -> Uuid {
    Uuid::new_v5(
        &INSTALLATION_NAMESPACE,
        format!("{username}@{hostname}").as_bytes(),
    )
}

/// Installation id of the current user and machine.
pub fn local_installation_id() -> Uuid {
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".into());
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".into());
    installation_id(&username, &host)
}

/// A new bucket name: a time-sortable v7 prefix followed by the installation id.
///
/// 58 lowercase hex digits, which fits every common bucket naming rule
/// (3..=63 chars, lowercase, no dots).
pub fn generate_bucket_name(installation_id: &Uuid) -> String {
    let now = Uuid::now_v7().simple().to_string();
    format!(
        "{}{}",
        &now[..BUCKET_PREFIX_LEN],
        installation_id.simple()
    )
}
