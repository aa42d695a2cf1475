use std::collections::HashMap;

use wallet_runtime_adapters::{RuntimeConfig, SealedToken, TokenVault};
use wallet_runtime_core::WalletError;

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn config_reads_overrides_and_keeps_defaults_on_bad_values() {
    let config = RuntimeConfig::from_lookup(lookup(&[
        ("WALLET_RUNTIME_RPC_URL", " https://polygon-rpc.example "),
        ("WALLET_RUNTIME_MAX_BLOCKS_WAIT_TIME", "12"),
        ("WALLET_RUNTIME_RPC_TIMEOUT_MS", "soon"),
        ("WALLET_RUNTIME_OTP_MAX_ATTEMPTS", "0"),
    ]));

    assert_eq!(config.rpc_url, "https://polygon-rpc.example");
    assert_eq!(config.max_blocks_wait_time, 12);
    assert_eq!(config.wait_options().max_blocks_wait_time, 12);
    assert_eq!(config.rpc_timeout_ms, RuntimeConfig::default().rpc_timeout_ms);
    assert_eq!(config.otp_max_attempts, 1);
    assert_eq!(config.client_id, "wallet-runtime");
}

#[test]
fn config_defaults_match_documented_values() {
    let config = RuntimeConfig::from_lookup(|_| None);

    assert_eq!(config.max_blocks_wait_time, 30);
    assert_eq!(config.rpc_batch_max_size, 100);
    assert_eq!(config.auth_settings().max_attempts, 5);
}

fn vault() -> TokenVault {
    TokenVault::with_cost(1024, 1)
}

#[test]
fn sealed_token_opens_with_the_same_key_only() {
    let sealed = vault().seal(b"device-key", "tok-123").expect("seal");
    assert_ne!(sealed.ciphertext, "tok-123");

    assert_eq!(vault().open(b"device-key", &sealed).expect("open"), "tok-123");

    let err = vault()
        .open(b"other-key", &sealed)
        .expect_err("wrong key must fail");
    assert!(matches!(err, WalletError::Auth(_)));
}

#[test]
fn sealing_twice_uses_fresh_salt_and_nonce() {
    let a = vault().seal(b"device-key", "tok-123").expect("seal a");
    let b = vault().seal(b"device-key", "tok-123").expect("seal b");

    assert_ne!(a.salt, b.salt);
    assert_ne!(a.nonce, b.nonce);
}

#[test]
fn malformed_sealed_fields_are_validation_errors() {
    let sealed = vault().seal(b"device-key", "tok-123").expect("seal");
    let truncated = SealedToken {
        nonce: "AAAA".to_owned(),
        ..sealed
    };

    let err = vault()
        .open(b"device-key", &truncated)
        .expect_err("short nonce");
    assert!(matches!(err, WalletError::Validation(_)));
}
