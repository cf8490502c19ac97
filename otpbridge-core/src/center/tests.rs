use super::*;
use crate::credential::Endpoint;
use crate::store::{MemoryMetadataStore, MemorySecretStore, SqliteStore};
use crate::uri::parse_otpauth_uri;

const EPIC_URI: &str = "otpauth://totp/Epic:lstomber?secret=JBSWY3DPEHPK3PXP&issuer=Epic&digits=8&period=60&algorithm=SHA512&ack=https://epic.example.com/ack";

struct Fixture {
    secrets: Arc<MemorySecretStore>,
    metadata: Arc<MemoryMetadataStore>,
    center: CredentialCenter,
}

fn fixture() -> Fixture {
    let secrets = Arc::new(MemorySecretStore::new());
    let metadata = Arc::new(MemoryMetadataStore::new());
    let center = CredentialCenter::new(secrets.clone(), metadata.clone());
    Fixture {
        secrets,
        metadata,
        center,
    }
}

fn epic() -> CredentialDescriptor {
    parse_otpauth_uri(EPIC_URI).unwrap()
}

#[test]
fn test_add_and_list() {
    let f = fixture();

    let added = f.center.add_credential(&epic()).unwrap();
    assert_eq!(added.local_name, "Epic");
    assert!(added.endpoint(Endpoint::Acknowledge).is_some());
    assert!(Uuid::parse_str(&added.identifier).is_ok());

    let listed = f.center.list_credentials().unwrap();
    assert_eq!(listed, vec![added.clone()]);
    assert_eq!(f.center.get(&added.identifier).unwrap(), Some(added));
}

#[test]
fn test_add_uses_guid_as_identifier() {
    let f = fixture();
    let descriptor = epic().with_guid("ENV-42");

    let added = f.center.add_credential(&descriptor).unwrap();
    assert_eq!(added.identifier, "ENV-42");

    let err = f.center.add_credential(&descriptor).unwrap_err();
    assert!(matches!(err, OtpBridgeError::StoreWriteFailure(_)));
    assert_eq!(f.center.list_credentials().unwrap().len(), 1);
}

#[test]
fn test_descriptor_and_codes_roundtrip() {
    let f = fixture();
    let added = f.center.add_credential(&epic()).unwrap();

    let descriptor = f.center.descriptor(&added.identifier).unwrap();
    assert_eq!(descriptor.account_name(), "lstomber");
    assert_eq!(descriptor.issuer(), "Epic");
    assert_eq!(descriptor.digits(), 8);
    assert_eq!(descriptor.period(), Some(60));
    assert_eq!(descriptor.local_name(), Some("Epic"));

    let code = f.center.code_at(&added.identifier, 1_111_111_111).unwrap();
    let expected = epic().generator().code_at(1_111_111_111).unwrap();
    assert_eq!(code, expected);
    assert_eq!(code.current.len(), 8);

    let uri = f.center.credential_uri(&added.identifier).unwrap();
    assert_eq!(parse_otpauth_uri(&uri).unwrap().generator(), epic().generator());
}

#[test]
fn test_metadata_failure_leaves_orphaned_secret() {
    let f = fixture();
    f.metadata.set_fail_writes(true);

    let err = f.center.add_credential(&epic()).unwrap_err();
    assert!(matches!(err, OtpBridgeError::StoreWriteFailure(_)));

    assert!(f.center.list_credentials().unwrap().is_empty());
    let orphans = f.center.orphaned().unwrap();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].kind, OrphanKind::Secret);
    assert_eq!(f.secrets.list().unwrap().len(), 1);
}

#[test]
fn test_secret_failure_writes_nothing() {
    let f = fixture();
    f.secrets.set_fail_writes(true);

    assert!(matches!(
        f.center.add_credential(&epic()),
        Err(OtpBridgeError::StoreWriteFailure(_))
    ));
    assert!(f.metadata.keys("").unwrap().is_empty());
    assert!(f.center.orphaned().unwrap().is_empty());
}

#[test]
fn test_list_hides_orphaned_metadata() {
    let f = fixture();
    let kept = f.center.add_credential(&epic()).unwrap();
    let dropped = f.center.add_credential(&epic()).unwrap();

    // Secret vanishes behind the center's back.
    let handle = f.secrets.find(&dropped.identifier).unwrap().unwrap();
    f.secrets.delete(&handle).unwrap();

    assert_eq!(f.center.list_credentials().unwrap(), vec![kept]);
    assert_eq!(f.center.get(&dropped.identifier).unwrap(), None);
    assert!(matches!(
        f.center.descriptor(&dropped.identifier),
        Err(OtpBridgeError::OrphanedReference { .. })
    ));

    // Hidden, not deleted.
    assert!(f.metadata.get(&crate::store::metadata_key(&dropped.identifier)).unwrap().is_some());
    assert_eq!(
        f.center.orphaned().unwrap(),
        vec![Orphan {
            identifier: dropped.identifier,
            kind: OrphanKind::Metadata,
        }]
    );
}

#[test]
fn test_update_touches_metadata_only() {
    let f = fixture();
    let mut added = f.center.add_credential(&epic()).unwrap();
    let before = f.center.descriptor(&added.identifier).unwrap();

    added.local_name = "Work".to_string();
    added.endpoints.clear();
    f.center.update_credential(&added).unwrap();

    assert_eq!(f.center.get(&added.identifier).unwrap(), Some(added.clone()));
    let after = f.center.descriptor(&added.identifier).unwrap();
    assert_eq!(after.generator(), before.generator());
    assert!(after.endpoints().is_empty());

    let ghost = ExtendedCredential::new("missing", "Ghost");
    assert!(matches!(
        f.center.update_credential(&ghost),
        Err(OtpBridgeError::NotFound(_))
    ));
}

#[test]
fn test_rename() {
    let f = fixture();
    let added = f.center.add_credential(&epic()).unwrap();

    let renamed = f.center.rename_credential(&added.identifier, "  Personal ").unwrap();
    assert_eq!(renamed.local_name, "Personal");
    assert!(f.center.rename_credential(&added.identifier, " ").is_err());
    assert!(f.center.rename_credential("missing", "x").is_err());
}

#[test]
fn test_remove_deletes_from_both_stores() {
    let f = fixture();
    let added = f.center.add_credential(&epic()).unwrap();

    f.center.remove_credential(&added.identifier).unwrap();

    assert!(f.center.list_credentials().unwrap().is_empty());
    assert!(f.secrets.list().unwrap().is_empty());
    assert!(f.metadata.keys("").unwrap().is_empty());
}

#[test]
fn test_remove_with_failed_secret_delete_still_drops_metadata() {
    let f = fixture();
    let added = f.center.add_credential(&epic()).unwrap();
    f.secrets.set_fail_writes(true);

    let err = f.center.remove_credential(&added.identifier).unwrap_err();
    assert!(matches!(err, OtpBridgeError::StoreWriteFailure(_)));

    assert!(f.metadata.keys("").unwrap().is_empty());
    assert_eq!(f.secrets.list().unwrap().len(), 1);
    assert!(f.center.list_credentials().unwrap().is_empty());
}

#[test]
fn test_remove_unknown_identifier_is_not_found() {
    let f = fixture();
    let added = f.center.add_credential(&epic()).unwrap();
    let mut events = f.center.subscribe();

    assert!(matches!(
        f.center.remove_credential("missing"),
        Err(OtpBridgeError::NotFound(_))
    ));
    assert!(matches!(
        events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
    assert_eq!(f.center.list_credentials().unwrap(), vec![added.clone()]);

    f.center.remove_credential(&added.identifier).unwrap();
    assert!(matches!(
        f.center.remove_credential(&added.identifier),
        Err(OtpBridgeError::NotFound(_))
    ));
}

#[test]
fn test_remove_clears_orphaned_metadata() {
    let f = fixture();
    let added = f.center.add_credential(&epic()).unwrap();
    let handle = f.secrets.find(&added.identifier).unwrap().unwrap();
    f.secrets.delete(&handle).unwrap();

    f.center.remove_credential(&added.identifier).unwrap();
    assert!(f.metadata.keys("").unwrap().is_empty());
    assert!(f.center.orphaned().unwrap().is_empty());
}

#[tokio::test]
async fn test_mutations_emit_events() {
    let f = fixture();
    let mut events = f.center.subscribe();

    let mut added = f.center.add_credential(&epic()).unwrap();
    added.local_name = "Renamed".to_string();
    f.center.update_credential(&added).unwrap();
    f.center.remove_credential(&added.identifier).unwrap();

    match events.recv().await.unwrap() {
        CredentialEvent::Added(extended) => assert_eq!(extended.local_name, "Epic"),
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(
        events.recv().await.unwrap(),
        CredentialEvent::Updated(added.clone())
    );
    let removed = events.recv().await.unwrap();
    assert_eq!(
        removed,
        CredentialEvent::Removed {
            identifier: added.identifier.clone()
        }
    );
    assert!(removed.is_local());
}

#[test]
fn test_failed_add_emits_nothing() {
    let f = fixture();
    let mut events = f.center.subscribe();
    f.secrets.set_fail_writes(true);

    let _ = f.center.add_credential(&epic());
    assert!(matches!(
        events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
}

#[test]
fn test_center_over_sqlite() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    let center = CredentialCenter::new(store.clone(), store);

    let added = center.add_credential(&epic()).unwrap();
    assert_eq!(center.list_credentials().unwrap(), vec![added.clone()]);
    assert_eq!(
        center.descriptor(&added.identifier).unwrap().generator(),
        epic().generator()
    );

    center.remove_credential(&added.identifier).unwrap();
    assert!(center.list_credentials().unwrap().is_empty());
    assert!(center.orphaned().unwrap().is_empty());
}
