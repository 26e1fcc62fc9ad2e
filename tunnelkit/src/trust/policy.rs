use crate::error::PolicyError;

use super::{ServerPubKeyRecord, TrustStore};

/// Result of classifying a presented host key against the trust store (§3).
///
/// Terminal: consumed once per handshake. `KnownOK` is the only outcome that permits the
/// handshake to proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostState {
    Unknown,
    Banned,
    KnownOK,
    KnownRecordMismatch,
    AddedNew,
}

/// A non-fatal advisory surfaced alongside a `KnownOK`/`AddedNew` outcome (e.g. the
/// `-new` flag was unnecessary).
pub type Advisory = Option<String>;

const LOCALHOST_PREFIXES: [&str; 2] = ["localhost", "127.0.0.1"];

/// Pure decision function over the trust store (§4.B). Performs at most one `upsert`.
///
/// Returns the classification, the record as it stands after the decision (if any), and
/// an optional advisory message. A non-`KnownOK` state is a [`PolicyError`] the caller
/// must treat as a handshake failure; `classify` itself never fails — the `Result` it
/// hands back to the session establisher is constructed by the caller from the returned
/// `HostState`, per §4.D ("any non-`KnownOK` outcome aborts with a descriptive error").
pub async fn classify(
    store: &mut TrustStore,
    hostname: &str,
    remote_addr: &str,
    human_key: &str,
    add_if_not_known: bool,
    allow_oneshot: bool,
) -> Result<(HostState, Option<ServerPubKeyRecord>, Advisory), PolicyError> {
    if let Some(existing) = store.lookup(human_key).cloned() {
        if existing.banned {
            return Ok((HostState::Banned, Some(existing), None));
        }

        let is_localhost = LOCALHOST_PREFIXES
            .iter()
            .any(|prefix| hostname.starts_with(prefix));

        if is_localhost {
            let advisory = add_if_not_known
                .then(|| "error: flag -new given but not needed; re-run without -new".to_owned());
            return Ok((HostState::KnownOK, Some(existing), advisory));
        }

        if existing.hostname != hostname {
            return Ok((HostState::KnownRecordMismatch, Some(existing), None));
        }

        let advisory = add_if_not_known
            .then(|| "error: flag -new given but not needed; re-run without -new".to_owned());
        return Ok((HostState::KnownOK, Some(existing), advisory));
    }

    if add_if_not_known {
        let record = ServerPubKeyRecord {
            hostname: hostname.to_owned(),
            remote_addr: remote_addr.to_owned(),
            human_key: human_key.to_owned(),
            banned: false,
        };
        store
            .upsert(record.clone())
            .await
            .map_err(|_| PolicyError::AddedNew {
                hostname: hostname.to_owned(),
            })?;

        if allow_oneshot {
            return Ok((HostState::KnownOK, Some(record), None));
        }

        return Ok((
            HostState::AddedNew,
            Some(record),
            Some("re-run without -new now that the host is known".to_owned()),
        ));
    }

    Ok((HostState::Unknown, None, None))
}

/// Turns a [`HostState`] (plus the hostname it was computed for) into the fatal
/// [`PolicyError`] the session establisher must surface, or `Ok(())` for `KnownOK`.
pub fn require_known_ok(state: &HostState, hostname: &str) -> Result<(), PolicyError> {
    match state {
        HostState::KnownOK => Ok(()),
        HostState::Banned => Err(PolicyError::Banned),
        HostState::KnownRecordMismatch => Err(PolicyError::KnownRecordMismatch {
            hostname: hostname.to_owned(),
        }),
        HostState::AddedNew => Err(PolicyError::AddedNew {
            hostname: hostname.to_owned(),
        }),
        HostState::Unknown => Err(PolicyError::Unknown),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> TrustStore {
        let dir = std::env::temp_dir().join(format!("tunnelkit-policy-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        TrustStore::open(dir.join("trust.json")).await.unwrap()
    }

    #[tokio::test]
    async fn first_contact_requires_rerun_without_oneshot() {
        let mut store = store().await;
        let (state, record, _) =
            classify(&mut store, "a.example", "1.2.3.4:22", "key-a", true, false)
                .await
                .unwrap();
        assert_eq!(state, HostState::AddedNew);
        assert!(record.is_some());
        assert_eq!(store.lookup("key-a").unwrap().hostname, "a.example");

        let (state, _, advisory) =
            classify(&mut store, "a.example", "1.2.3.4:22", "key-a", false, false)
                .await
                .unwrap();
        assert_eq!(state, HostState::KnownOK);
        assert!(advisory.is_none());
    }

    #[tokio::test]
    async fn oneshot_proceeds_immediately() {
        let mut store = store().await;
        let (state, _, _) = classify(&mut store, "a.example", "1.2.3.4:22", "key-a", true, true)
            .await
            .unwrap();
        assert_eq!(state, HostState::KnownOK);
    }

    #[tokio::test]
    async fn mismatch_is_flagged_as_possible_mitm() {
        let mut store = store().await;
        classify(&mut store, "a.example", "1.2.3.4:22", "key-a", true, true)
            .await
            .unwrap();

        let (state, _, _) = classify(&mut store, "b.example", "5.6.7.8:22", "key-a", false, false)
            .await
            .unwrap();
        assert_eq!(state, HostState::KnownRecordMismatch);
    }

    #[tokio::test]
    async fn localhost_prefixed_hostname_always_ok() {
        let mut store = store().await;
        classify(&mut store, "a.example", "1.2.3.4:22", "key-a", true, true)
            .await
            .unwrap();

        let (state, _, _) = classify(
            &mut store,
            "localhost",
            "127.0.0.1:2222",
            "key-a",
            false,
            false,
        )
        .await
        .unwrap();
        assert_eq!(state, HostState::KnownOK);
    }

    #[tokio::test]
    async fn banned_vetoes_regardless_of_flags() {
        let mut store = store().await;
        store
            .upsert(ServerPubKeyRecord {
                hostname: "a.example".to_owned(),
                remote_addr: "1.2.3.4:22".to_owned(),
                human_key: "key-a".to_owned(),
                banned: true,
            })
            .await
            .unwrap();

        let (state, _, _) = classify(&mut store, "a.example", "1.2.3.4:22", "key-a", true, true)
            .await
            .unwrap();
        assert_eq!(state, HostState::Banned);
    }

    #[tokio::test]
    async fn unknown_key_without_flag_is_unknown() {
        let mut store = store().await;
        let (state, record, _) =
            classify(&mut store, "a.example", "1.2.3.4:22", "key-a", false, false)
                .await
                .unwrap();
        assert_eq!(state, HostState::Unknown);
        assert!(record.is_none());
    }

    #[tokio::test]
    async fn is_deterministic_given_same_store_state_and_inputs() {
        let mut store = store().await;
        store
            .upsert(ServerPubKeyRecord {
                hostname: "a.example".to_owned(),
                remote_addr: "1.2.3.4:22".to_owned(),
                human_key: "key-a".to_owned(),
                banned: false,
            })
            .await
            .unwrap();

        let first = classify(&mut store, "a.example", "1.2.3.4:22", "key-a", false, false)
            .await
            .unwrap();
        let second = classify(&mut store, "a.example", "1.2.3.4:22", "key-a", false, false)
            .await
            .unwrap();
        assert_eq!(first.0, second.0);
    }
}
