mod support;

use icure_logic::{BulkShareConfig, EntityWithEncryptionMetadataLogic, LogicError};
use icure_model::{
    AccessLevel, BulkShareOrUpdateMetadataParams, EncryptableEntity,
    EntitySharedMetadataUpdateRequest, EntryUpdateType, Patient, RequestedPermission,
    ShareEntityRequestDetails,
};
use pretty_assertions::assert_eq;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use support::*;

fn params(items: Vec<(&str, ShareEntityRequestDetails)>) -> BulkShareOrUpdateMetadataParams {
    BulkShareOrUpdateMetadataParams {
        requests_by_entity_id: items
            .into_iter()
            .map(|(id, details)| (id.to_string(), details))
            .collect(),
    }
}

// ── End-to-end scenarios ────────────────────────────────────────

#[tokio::test]
async fn root_share_on_entity_without_metadata() {
    let h = harness(StaticSession::new(HCP));
    let created = h.store.create(Patient::new("p1")).unwrap();
    let root_key = key("root");

    let results = h
        .logic
        .do_bulk_share_or_update_metadata(params(vec![(
            "p1",
            ShareEntityRequestDetails::new(requests(vec![("req1", root_share(&root_key).into())])),
        )]))
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.entity_id, "p1");
    assert_eq!(result.entity_rev.as_deref(), created.rev());
    assert!(result.rejected_requests.is_empty());

    let updated = result.updated_entity.as_ref().unwrap();
    let metadata = updated.security_metadata().unwrap();
    assert_eq!(metadata.secure_delegations.len(), 1);
    let root = &metadata.secure_delegations[&key_hash(&root_key)];
    assert_eq!(root.permissions, AccessLevel::Write);
    assert!(root.parent_delegations.is_empty());
    assert_eq!(root.delegator.as_deref(), Some(HCP));
    assert_eq!(root.delegate.as_deref(), Some(HCP));

    let stored = h.store.get("p1").unwrap().unwrap();
    assert_eq!(&stored, updated);
    assert!(stored.rev().unwrap().starts_with("2-"));
}

#[tokio::test]
async fn full_write_share_under_existing_root() {
    let root_key = key("root");
    let h = harness(StaticSession::new(HCP));
    h.store.create(patient_with_root("p1", &root_key)).unwrap();
    let child_key = key("child");

    let results = h
        .logic
        .do_bulk_share_or_update_metadata(params(vec![(
            "p1",
            ShareEntityRequestDetails::new(requests(vec![(
                "req2",
                share(&child_key, PATIENT, RequestedPermission::FullWrite).into(),
            )]))
            .with_potential_parents([key_hash(&root_key)]),
        )]))
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert!(results[0].rejected_requests.is_empty());
    let metadata = results[0]
        .updated_entity
        .as_ref()
        .unwrap()
        .security_metadata()
        .unwrap()
        .clone();
    let child = &metadata.secure_delegations[&key_hash(&child_key)];
    assert_eq!(child.parent_delegations, BTreeSet::from([key_hash(&root_key)]));
    assert_eq!(child.permissions, AccessLevel::Write);
    assert_eq!(child.delegate.as_deref(), Some(PATIENT));
    assert_eq!(child.secret_ids, BTreeSet::from([format!("secret-for-{PATIENT}")]));
    assert_eq!(metadata.access_identifiers(), BTreeSet::from([HCP, PATIENT]));
}

#[tokio::test]
async fn full_write_under_read_only_parent_is_forbidden() {
    let root_key = key("root");
    let h = harness(StaticSession::new(HCP));
    let created = h
        .store
        .create(patient_with_root_granting("p1", &root_key, AccessLevel::Read))
        .unwrap();

    let results = h
        .logic
        .do_bulk_share_or_update_metadata(params(vec![(
            "p1",
            ShareEntityRequestDetails::new(requests(vec![(
                "w",
                share(&key("child"), PATIENT, RequestedPermission::FullWrite).into(),
            )]))
            .with_potential_parents([key_hash(&root_key)]),
        )]))
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].updated_entity, None);
    assert_eq!(results[0].rejected_requests["w"].code, 403);
    assert!(!results[0].rejected_requests["w"].retryable);
    assert!(h.dao.saved_batches().is_empty());
    assert_eq!(h.store.get("p1").unwrap().unwrap(), created);
}

#[tokio::test]
async fn missing_entity_gets_not_found_per_request() {
    let h = harness(StaticSession::new(HCP));

    let results = h
        .logic
        .do_bulk_share_or_update_metadata(params(vec![(
            "missing-1",
            ShareEntityRequestDetails::new(requests(vec![(
                "req",
                root_share(&key("root")).into(),
            )])),
        )]))
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.updated_entity, None);
    assert_eq!(result.entity_id, "missing-1");
    assert_eq!(result.entity_rev, None);
    assert_eq!(result.rejected_requests.len(), 1);
    assert_eq!(result.rejected_requests["req"].code, 404);
    assert!(!result.rejected_requests["req"].retryable);
    assert!(h.dao.saved_batches().is_empty());
}

#[tokio::test]
async fn update_of_unknown_delegation_is_not_saved() {
    let root_key = key("root");
    let h = harness(StaticSession::new(HCP));
    let created = h.store.create(patient_with_root("p1", &root_key)).unwrap();

    let mut update = EntitySharedMetadataUpdateRequest::new(key_hash(&key("unknown")));
    update.secret_ids.insert("s".into(), EntryUpdateType::Create);
    let results = h
        .logic
        .do_bulk_share_or_update_metadata(params(vec![(
            "p1",
            ShareEntityRequestDetails::new(requests(vec![("upd", update.into())])),
        )]))
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].updated_entity, None);
    assert_eq!(results[0].entity_rev.as_deref(), created.rev());
    assert_eq!(results[0].rejected_requests["upd"].code, 404);
    assert!(h.dao.saved_batches().is_empty());
    assert_eq!(h.store.get("p1").unwrap().unwrap(), created);
}

// ── Pipeline behavior through the engine ───────────────────────

#[tokio::test]
async fn root_and_child_in_same_batch() {
    let h = harness(StaticSession::new(HCP));
    h.store.create(Patient::new("p1")).unwrap();
    let root_key = key("root");
    let child_key = key("child");

    let results = h
        .logic
        .do_bulk_share_or_update_metadata(params(vec![(
            "p1",
            ShareEntityRequestDetails::new(requests(vec![
                ("root", root_share(&root_key).into()),
                (
                    "child",
                    share(&child_key, PATIENT, RequestedPermission::MaxWrite).into(),
                ),
            ])),
        )]))
        .await
        .unwrap();

    assert!(results[0].rejected_requests.is_empty());
    let metadata = results[0]
        .updated_entity
        .as_ref()
        .unwrap()
        .security_metadata()
        .unwrap()
        .clone();
    let child = &metadata.secure_delegations[&key_hash(&child_key)];
    assert_eq!(child.parent_delegations, BTreeSet::from([key_hash(&root_key)]));
    assert_eq!(child.permissions, AccessLevel::Write);
    assert_eq!(h.dao.saved_batches(), vec![vec!["p1".to_string()]]);
}

#[tokio::test]
async fn second_root_request_aborts_the_call() {
    let h = harness(StaticSession::new(HCP));
    h.store.create(Patient::new("p1")).unwrap();

    let err = h
        .logic
        .do_bulk_share_or_update_metadata(params(vec![(
            "p1",
            ShareEntityRequestDetails::new(requests(vec![
                ("a", root_share(&key("a")).into()),
                ("b", root_share(&key("b")).into()),
            ])),
        )]))
        .await
        .unwrap_err();

    assert!(matches!(err, LogicError::IllegalState(_)), "got {err:?}");
    assert!(h.dao.saved_batches().is_empty());
}

#[tokio::test]
async fn share_over_existing_delegation_is_rejected() {
    let root_key = key("root");
    let h = harness(StaticSession::new(HCP));
    h.store.create(patient_with_root("p1", &root_key)).unwrap();

    let results = h
        .logic
        .do_bulk_share_or_update_metadata(params(vec![(
            "p1",
            ShareEntityRequestDetails::new(requests(vec![(
                "dup",
                share(&root_key, PATIENT, RequestedPermission::FullRead).into(),
            )]))
            .with_potential_parents([key_hash(&root_key)]),
        )]))
        .await
        .unwrap();

    assert_eq!(results[0].updated_entity, None);
    assert_eq!(results[0].rejected_requests["dup"].code, 400);
    assert!(h.dao.saved_batches().is_empty());
}

#[tokio::test]
async fn inaccessible_parents_are_ignored() {
    let root_key = key("root");
    let h = harness(StaticSession::new("someone-else"));
    h.store.create(patient_with_root("p1", &root_key)).unwrap();

    let results = h
        .logic
        .do_bulk_share_or_update_metadata(params(vec![(
            "p1",
            ShareEntityRequestDetails::new(requests(vec![(
                "req",
                share(&key("child"), PATIENT, RequestedPermission::FullRead).into(),
            )]))
            .with_potential_parents([key_hash(&root_key)]),
        )]))
        .await
        .unwrap();

    assert_eq!(results[0].updated_entity, None);
    assert_eq!(results[0].rejected_requests["req"].code, 400);
}

#[tokio::test]
async fn anonymous_holder_of_key_can_use_delegation_as_parent() {
    let root_key = key("root");
    let h = harness(StaticSession::new("anonymous").with_access_keys(&[root_key.as_str()]));
    h.store.create(patient_with_root("p1", &root_key)).unwrap();

    let results = h
        .logic
        .do_bulk_share_or_update_metadata(params(vec![(
            "p1",
            ShareEntityRequestDetails::new(requests(vec![(
                "req",
                share(&key("child"), PATIENT, RequestedPermission::FullRead).into(),
            )]))
            .with_potential_parents([key_hash(&root_key)]),
        )]))
        .await
        .unwrap();

    assert!(results[0].rejected_requests.is_empty());
    assert!(results[0].updated_entity.is_some());
}

#[tokio::test]
async fn updates_compose_and_can_address_equivalent_hash() {
    let h = harness(StaticSession::new(HCP));
    h.store.create(Patient::new("p1")).unwrap();
    let (first, second) = (key("first"), key("second"));
    let root = icure_model::EntityShareRequest::builder([first.clone(), second.clone()])
        .explicit_delegator(HCP)
        .explicit_delegate(HCP)
        .requested_permissions(RequestedPermission::Root)
        .build()
        .unwrap();
    let canonical = root.canonical_hash().to_string();
    let alternative = root.equivalent_hashes().next().unwrap().clone();

    h.logic
        .do_bulk_share_or_update_metadata(params(vec![(
            "p1",
            ShareEntityRequestDetails::new(requests(vec![("root", root.into())])),
        )]))
        .await
        .unwrap();

    let mut create = EntitySharedMetadataUpdateRequest::new(alternative);
    create.secret_ids.insert("s1".into(), EntryUpdateType::Create);
    let results = h
        .logic
        .do_bulk_share_or_update_metadata(params(vec![(
            "p1",
            ShareEntityRequestDetails::new(requests(vec![("create", create.into())])),
        )]))
        .await
        .unwrap();
    assert!(results[0].rejected_requests.is_empty());
    let metadata = h.store.get("p1").unwrap().unwrap().security_metadata.unwrap();
    assert_eq!(
        metadata.secure_delegations[&canonical].secret_ids,
        BTreeSet::from(["s1".to_string()])
    );

    let mut delete = EntitySharedMetadataUpdateRequest::new(canonical.clone());
    delete.secret_ids.insert("s1".into(), EntryUpdateType::Delete);
    let mut delete_absent = EntitySharedMetadataUpdateRequest::new(canonical.clone());
    delete_absent.encryption_keys.insert("k".into(), EntryUpdateType::Delete);
    let results = h
        .logic
        .do_bulk_share_or_update_metadata(params(vec![(
            "p1",
            ShareEntityRequestDetails::new(requests(vec![
                ("delete", delete.into()),
                ("invalid", delete_absent.into()),
            ])),
        )]))
        .await
        .unwrap();

    assert_eq!(results[0].rejected_requests.len(), 1);
    assert_eq!(results[0].rejected_requests["invalid"].code, 400);
    let metadata = h.store.get("p1").unwrap().unwrap().security_metadata.unwrap();
    assert!(metadata.secure_delegations[&canonical].secret_ids.is_empty());
}

// ── Saves ───────────────────────────────────────────────────────

#[tokio::test]
async fn save_conflict_is_retryable_for_every_applied_request() {
    let store = support::harness(StaticSession::new(HCP)).store;
    let created = store.create(Patient::new("p1")).unwrap();
    let logic = EntityWithEncryptionMetadataLogic::new(
        Arc::new(RacingDao {
            inner: store.clone(),
        }),
        Arc::new(store.exchange_data_maps()),
        Arc::new(StaticSession::new(HCP)),
    );

    let mut missing = EntitySharedMetadataUpdateRequest::new("ff".repeat(32));
    missing.secret_ids.insert("s".into(), EntryUpdateType::Create);
    let results = logic
        .do_bulk_share_or_update_metadata(params(vec![(
            "p1",
            ShareEntityRequestDetails::new(requests(vec![
                ("root", root_share(&key("root")).into()),
                ("child", share(&key("child"), PATIENT, RequestedPermission::FullRead).into()),
                ("missing", missing.into()),
            ])),
        )]))
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.updated_entity, None);
    assert_eq!(result.entity_rev.as_deref(), created.rev());
    assert_eq!(
        result.rejected_requests.keys().cloned().collect::<Vec<_>>(),
        vec!["child".to_string(), "root".to_string()]
    );
    for rejection in result.rejected_requests.values() {
        assert_eq!(rejection.code, 409);
        assert!(rejection.retryable);
    }
    assert!(store.get("p1").unwrap().unwrap().security_metadata.is_none());
}

#[tokio::test]
async fn exchange_data_map_is_published_when_save_conflicts() {
    let store = support::harness(StaticSession::new(HCP)).store;
    store.create(Patient::new("p1")).unwrap();
    let exchange_maps = store.exchange_data_maps();
    let logic = EntityWithEncryptionMetadataLogic::new(
        Arc::new(RacingDao {
            inner: store.clone(),
        }),
        Arc::new(exchange_maps.clone()),
        Arc::new(StaticSession::new(HCP)),
    );
    let shared_key = key("raced");

    let results = logic
        .do_bulk_share_or_update_metadata(params(vec![(
            "p1",
            ShareEntityRequestDetails::new(requests(vec![(
                "r",
                share_with_exchange_data(&shared_key, "fp").into(),
            )])),
        )]))
        .await
        .unwrap();

    assert_eq!(results[0].updated_entity, None);
    assert_eq!(results[0].rejected_requests["r"].code, 409);
    assert!(results[0].rejected_requests["r"].retryable);
    let map = exchange_maps.get(&key_hash(&shared_key)).unwrap().unwrap();
    assert_eq!(
        map.encrypted_exchange_data_ids,
        BTreeMap::from([("fp".to_string(), "enc-fp".to_string())])
    );
}

#[tokio::test]
async fn result_groups_are_ordered() {
    let root_key = key("root");
    let h = harness(StaticSession::new(HCP));
    h.store.create(Patient::new("saved")).unwrap();
    h.store.create(patient_with_root("rejected", &root_key)).unwrap();

    let results = h
        .logic
        .do_bulk_share_or_update_metadata(params(vec![
            (
                "a-missing",
                ShareEntityRequestDetails::new(requests(vec![("m", root_share(&key("m")).into())])),
            ),
            (
                "rejected",
                ShareEntityRequestDetails::new(requests(vec![(
                    "r",
                    share(&key("orphan"), PATIENT, RequestedPermission::FullRead).into(),
                )])),
            ),
            (
                "saved",
                ShareEntityRequestDetails::new(requests(vec![("s", root_share(&key("s")).into())])),
            ),
        ]))
        .await
        .unwrap();

    let ids: Vec<&str> = results.iter().map(|r| r.entity_id.as_str()).collect();
    assert_eq!(ids, vec!["saved", "rejected", "a-missing"]);
    assert!(results[0].updated_entity.is_some());
    assert_eq!(results[1].rejected_requests["r"].code, 400);
    assert_eq!(results[2].rejected_requests["m"].code, 404);
}

// ── Exchange data maps ──────────────────────────────────────────

fn share_with_exchange_data(key: &str, fingerprint: &str) -> icure_model::EntityShareRequest {
    icure_model::EntityShareRequest::builder([key])
        .explicit_delegator(HCP)
        .explicit_delegate(HCP)
        .encrypted_exchange_data_id([(fingerprint.to_string(), format!("enc-{fingerprint}"))])
        .requested_permissions(RequestedPermission::Root)
        .build()
        .unwrap()
}

#[tokio::test]
async fn applied_shares_publish_exchange_data_maps() {
    let h = harness(StaticSession::new(HCP));
    h.store.create(Patient::new("p1")).unwrap();
    h.store.create(Patient::new("p2")).unwrap();
    let shared_key = key("shared");

    h.logic
        .do_bulk_share_or_update_metadata(params(vec![
            (
                "p1",
                ShareEntityRequestDetails::new(requests(vec![(
                    "r",
                    share_with_exchange_data(&shared_key, "fp1").into(),
                )])),
            ),
            (
                "p2",
                ShareEntityRequestDetails::new(requests(vec![(
                    "r",
                    share_with_exchange_data(&shared_key, "fp2").into(),
                )])),
            ),
        ]))
        .await
        .unwrap();

    let map = h.exchange_maps.get(&key_hash(&shared_key)).unwrap().unwrap();
    assert_eq!(
        map.encrypted_exchange_data_ids,
        BTreeMap::from([("fp2".to_string(), "enc-fp2".to_string())])
    );
}

#[tokio::test]
async fn rejected_shares_publish_nothing() {
    let h = harness(StaticSession::new(HCP));
    h.store.create(Patient::new("p1")).unwrap();
    let orphan_key = key("orphan");
    let mut orphan = share_with_exchange_data(&orphan_key, "fp");
    orphan.requested_permissions = RequestedPermission::FullRead;

    h.logic
        .do_bulk_share_or_update_metadata(params(vec![(
            "p1",
            ShareEntityRequestDetails::new(requests(vec![("r", orphan.into())])),
        )]))
        .await
        .unwrap();

    assert!(h.exchange_maps.get(&key_hash(&orphan_key)).unwrap().is_none());
}

#[tokio::test]
async fn publication_runs_once_even_with_nothing_to_publish() {
    let root_key = key("root");
    let store = support::harness(StaticSession::new(HCP)).store;
    store.create(patient_with_root("p1", &root_key)).unwrap();
    store.create(Patient::new("p2")).unwrap();
    let publisher = Arc::new(RecordingPublisher::default());
    let logic = EntityWithEncryptionMetadataLogic::new(
        Arc::new(store.clone()),
        publisher.clone(),
        Arc::new(StaticSession::new(HCP)),
    );

    let mut update = EntitySharedMetadataUpdateRequest::new(key_hash(&root_key));
    update.secret_ids.insert("extra-secret".into(), EntryUpdateType::Create);
    let results = logic
        .do_bulk_share_or_update_metadata(params(vec![
            (
                "p1",
                ShareEntityRequestDetails::new(requests(vec![("upd", update.into())])),
            ),
            (
                "p2",
                ShareEntityRequestDetails::new(requests(vec![(
                    "orphan",
                    share(&key("orphan"), PATIENT, RequestedPermission::FullRead).into(),
                )])),
            ),
        ]))
        .await
        .unwrap();

    assert!(results.iter().any(|r| r.updated_entity.is_some()));
    assert_eq!(publisher.batches(), vec![BTreeMap::new()]);
}

#[tokio::test]
async fn publication_failure_does_not_fail_the_batch() {
    let store = support::harness(StaticSession::new(HCP)).store;
    store.create(Patient::new("p1")).unwrap();
    let logic = EntityWithEncryptionMetadataLogic::new(
        Arc::new(store.clone()),
        Arc::new(FailingPublisher),
        Arc::new(StaticSession::new(HCP)),
    );

    let results = logic
        .do_bulk_share_or_update_metadata(params(vec![(
            "p1",
            ShareEntityRequestDetails::new(requests(vec![(
                "r",
                share_with_exchange_data(&key("k"), "fp").into(),
            )])),
        )]))
        .await
        .unwrap();

    assert!(results[0].updated_entity.is_some());
}

#[tokio::test]
async fn publication_can_be_disabled() {
    let h = harness(StaticSession::new(HCP));
    h.store.create(Patient::new("p1")).unwrap();
    let logic = h.logic.with_config(BulkShareConfig {
        publish_exchange_data_maps: false,
        ..BulkShareConfig::default()
    });
    let shared_key = key("k");

    logic
        .do_bulk_share_or_update_metadata(params(vec![(
            "p1",
            ShareEntityRequestDetails::new(requests(vec![(
                "r",
                share_with_exchange_data(&shared_key, "fp").into(),
            )])),
        )]))
        .await
        .unwrap();

    assert!(h.exchange_maps.get(&key_hash(&shared_key)).unwrap().is_none());
}

// ── Configuration ───────────────────────────────────────────────

#[tokio::test]
async fn entities_over_request_limit_are_rejected_without_loading() {
    let h = harness(StaticSession::new(HCP));
    h.store.create(Patient::new("p1")).unwrap();
    let logic = h.logic.with_config(BulkShareConfig {
        max_requests_per_entity: 1,
        ..BulkShareConfig::default()
    });

    let results = logic
        .do_bulk_share_or_update_metadata(params(vec![(
            "p1",
            ShareEntityRequestDetails::new(requests(vec![
                ("root", root_share(&key("root")).into()),
                ("child", share(&key("child"), PATIENT, RequestedPermission::FullRead).into()),
            ])),
        )]))
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].entity_rev, None);
    assert_eq!(results[0].rejected_requests.len(), 2);
    assert!(results[0].rejected_requests.values().all(|r| r.code == 400));
    assert!(h.dao.saved_batches().is_empty());
}

#[test]
fn config_deserializes_with_defaults() {
    let config: BulkShareConfig =
        serde_json::from_str(r#"{ "max_requests_per_entity": 50 }"#).unwrap();
    assert_eq!(config.max_requests_per_entity, 50);
    assert!(config.publish_exchange_data_maps);
    assert_eq!(
        serde_json::from_str::<BulkShareConfig>("{}").unwrap(),
        BulkShareConfig::default()
    );
}
