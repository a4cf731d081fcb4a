//! Integration tests for the ingestion state machine.

mod common;

use assert_matches::assert_matches;
use common::{digest, TestHarness};

use imagevault::ingest::{Content, ReserveRequest, UpdateRequest};
use imagevault::policy::Principal;
use imagevault_common::{ContainerFormat, DiskFormat, Error, ImageStatus};
use imagevault_db::MetadataStore;
use std::collections::HashMap;

fn basic_request(name: &str) -> ReserveRequest {
    ReserveRequest {
        name: Some(name.to_string()),
        disk_format: Some(DiskFormat::Raw),
        container_format: Some(ContainerFormat::Bare),
        ..Default::default()
    }
}

#[tokio::test]
async fn reserve_upload_activate_roundtrip() {
    let h = TestHarness::new();
    let anon = Principal::anonymous();

    let record = h
        .service
        .create(&anon, basic_request("x"), None)
        .await
        .unwrap();
    assert_eq!(record.status, ImageStatus::Queued);
    assert_eq!(record.size, None);
    assert_eq!(record.location, None);

    let data = vec![42u8; 1024];
    let updated = h
        .service
        .update(
            &anon,
            record.id,
            UpdateRequest::default(),
            Some(Content::from_bytes(data.clone())),
            None,
        )
        .await
        .unwrap();

    assert_eq!(updated.status, ImageStatus::Active);
    assert_eq!(updated.size, Some(1024));
    assert_eq!(updated.checksum.as_deref(), Some(digest(&data).as_str()));

    // Active records are bound to a location.
    let stored = h.meta.get(record.id).unwrap();
    assert!(stored.location.is_some());

    // And the content reads back intact.
    let (_, stream) = h.service.download(&anon, record.id).await.unwrap();
    let (mut reader, size) = stream.unwrap();
    assert_eq!(size, 1024);
    let mut out = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut out)
        .await
        .unwrap();
    assert_eq!(out, data);
}

#[tokio::test]
async fn second_upload_conflicts() {
    let h = TestHarness::new();
    let anon = Principal::anonymous();

    let record = h
        .service
        .create(&anon, basic_request("x"), None)
        .await
        .unwrap();
    h.service
        .update(
            &anon,
            record.id,
            UpdateRequest::default(),
            Some(Content::from_bytes(vec![1u8; 16])),
            None,
        )
        .await
        .unwrap();

    let err = h
        .service
        .update(
            &anon,
            record.id,
            UpdateRequest::default(),
            Some(Content::from_bytes(vec![2u8; 16])),
            None,
        )
        .await
        .unwrap_err();
    assert_matches!(err, Error::Conflict(_));
}

#[tokio::test]
async fn zero_declared_size_activates_without_upload() {
    let h = TestHarness::new();
    let req = ReserveRequest {
        size: Some(0),
        ..basic_request("empty")
    };
    let record = h
        .service
        .create(&Principal::anonymous(), req, None)
        .await
        .unwrap();
    assert_eq!(record.status, ImageStatus::Active);

    // Downloading yields no stream and no backend round-trip.
    let (_, stream) = h
        .service
        .download(&Principal::anonymous(), record.id)
        .await
        .unwrap();
    assert!(stream.is_none());
}

#[tokio::test]
async fn checksum_mismatch_kills_record_and_deletes_bytes() {
    let h = TestHarness::new();
    let req = ReserveRequest {
        checksum: Some("0000000000000000".to_string()),
        ..basic_request("x")
    };
    let record = h
        .service
        .create(&Principal::anonymous(), req, None)
        .await
        .unwrap();

    let err = h
        .service
        .update(
            &Principal::anonymous(),
            record.id,
            UpdateRequest::default(),
            Some(Content::from_bytes(vec![9u8; 64])),
            None,
        )
        .await
        .unwrap_err();

    assert_matches!(err, Error::Invalid(_));
    assert_eq!(h.meta.get(record.id).unwrap().status, ImageStatus::Killed);
    // The just-written bytes must not survive.
    assert!(h.backend.is_empty());
}

#[tokio::test]
async fn size_mismatch_kills_record() {
    let h = TestHarness::new();
    let req = ReserveRequest {
        size: Some(4096),
        ..basic_request("x")
    };
    let record = h
        .service
        .create(&Principal::anonymous(), req, None)
        .await
        .unwrap();

    let err = h
        .service
        .update(
            &Principal::anonymous(),
            record.id,
            UpdateRequest::default(),
            Some(Content::from_bytes(vec![9u8; 64])),
            None,
        )
        .await
        .unwrap_err();

    assert_matches!(err, Error::Invalid(_));
    assert_eq!(h.meta.get(record.id).unwrap().status, ImageStatus::Killed);
    assert!(h.backend.is_empty());
}

#[tokio::test]
async fn oversized_upload_is_rejected_and_killed() {
    let h = TestHarness::with_options(
        imagevault::ingest::DeletionMode::Immediate,
        128,
    );
    let anon = Principal::anonymous();
    let record = h
        .service
        .create(&anon, basic_request("big"), None)
        .await
        .unwrap();

    // Declared length: rejected eagerly, before streaming starts.
    let err = h
        .service
        .update(
            &anon,
            record.id,
            UpdateRequest::default(),
            Some(Content::from_bytes(vec![0u8; 256])),
            None,
        )
        .await
        .unwrap_err();
    assert_matches!(err, Error::SizeLimitExceeded);
    assert_eq!(h.meta.get(record.id).unwrap().status, ImageStatus::Killed);

    // Unknown length: counted read-by-read, same failure.
    let record = h
        .service
        .create(&anon, basic_request("chunked"), None)
        .await
        .unwrap();
    let content = Content::new(
        Box::new(std::io::Cursor::new(vec![0u8; 256])),
        None,
    );
    let err = h
        .service
        .update(&anon, record.id, UpdateRequest::default(), Some(content), None)
        .await
        .unwrap_err();
    assert_matches!(err, Error::SizeLimitExceeded);
    assert_eq!(h.meta.get(record.id).unwrap().status, ImageStatus::Killed);
    assert!(h.backend.is_empty());
}

#[tokio::test]
async fn protected_record_cannot_be_deleted() {
    let h = TestHarness::new();
    let req = ReserveRequest {
        protected: true,
        ..basic_request("keep")
    };
    let record = h
        .service
        .create(&Principal::anonymous(), req, None)
        .await
        .unwrap();

    let err = h
        .service
        .delete(&Principal::anonymous(), record.id)
        .await
        .unwrap_err();
    assert_matches!(err, Error::Forbidden(_));
    // Status unchanged.
    assert_eq!(h.meta.get(record.id).unwrap().status, ImageStatus::Queued);
}

#[tokio::test]
async fn delete_removes_metadata_then_bytes() {
    let h = TestHarness::new();
    let anon = Principal::anonymous();
    let record = h
        .service
        .create(&anon, basic_request("x"), None)
        .await
        .unwrap();
    h.service
        .update(
            &anon,
            record.id,
            UpdateRequest::default(),
            Some(Content::from_bytes(vec![1u8; 32])),
            None,
        )
        .await
        .unwrap();
    assert_eq!(h.backend.len(), 1);

    h.service.delete(&anon, record.id).await.unwrap();

    let stored = h.meta.get(record.id).unwrap();
    assert_eq!(stored.status, ImageStatus::Deleted);
    assert!(stored.deleted);
    assert!(h.backend.is_empty());

    // Deleted records are gone from the caller's point of view.
    assert_matches!(h.service.metadata(&anon, record.id), Err(Error::NotFound(_)));
    // A second delete reports NotFound, not success.
    assert_matches!(
        h.service.delete(&anon, record.id).await,
        Err(Error::NotFound(_))
    );
}

#[tokio::test]
async fn delete_of_never_uploaded_record_skips_backend() {
    let h = TestHarness::new();
    let record = h
        .service
        .create(&Principal::anonymous(), basic_request("x"), None)
        .await
        .unwrap();

    h.service
        .delete(&Principal::anonymous(), record.id)
        .await
        .unwrap();
    assert_eq!(h.meta.get(record.id).unwrap().status, ImageStatus::Deleted);
}

#[tokio::test]
async fn delayed_delete_parks_record_in_pending_delete() {
    let h = TestHarness::delayed_delete();
    let anon = Principal::anonymous();
    let record = h
        .service
        .create(&anon, basic_request("x"), None)
        .await
        .unwrap();
    h.service
        .update(
            &anon,
            record.id,
            UpdateRequest::default(),
            Some(Content::from_bytes(vec![1u8; 32])),
            None,
        )
        .await
        .unwrap();

    h.service.delete(&anon, record.id).await.unwrap();
    assert_eq!(
        h.meta.get(record.id).unwrap().status,
        ImageStatus::PendingDelete
    );

    // Deleting a pending_delete record is forbidden.
    let err = h.service.delete(&anon, record.id).await.unwrap_err();
    assert_matches!(err, Error::Forbidden(_));
}

#[tokio::test]
async fn delayed_delete_without_location_is_direct() {
    // A never-uploaded record has no bytes to defer; it goes straight to
    // deleted even under the delayed policy.
    let h = TestHarness::delayed_delete();
    let record = h
        .service
        .create(&Principal::anonymous(), basic_request("x"), None)
        .await
        .unwrap();
    h.service
        .delete(&Principal::anonymous(), record.id)
        .await
        .unwrap();
    assert_eq!(h.meta.get(record.id).unwrap().status, ImageStatus::Deleted);
}

#[tokio::test]
async fn update_on_deleted_record_is_forbidden() {
    let h = TestHarness::new();
    let anon = Principal::anonymous();
    let record = h
        .service
        .create(&anon, basic_request("x"), None)
        .await
        .unwrap();
    h.service.delete(&anon, record.id).await.unwrap();

    let err = h
        .service
        .update(
            &anon,
            record.id,
            UpdateRequest {
                name: Some("renamed".to_string()),
                ..Default::default()
            },
            None,
            None,
        )
        .await
        .unwrap_err();
    assert_matches!(err, Error::Forbidden(_));
}

#[tokio::test]
async fn location_update_rejected_once_unqueued() {
    let h = TestHarness::new();
    let anon = Principal::anonymous();
    let record = h
        .service
        .create(&anon, basic_request("x"), None)
        .await
        .unwrap();
    h.service
        .update(
            &anon,
            record.id,
            UpdateRequest::default(),
            Some(Content::from_bytes(vec![1u8; 8])),
            None,
        )
        .await
        .unwrap();

    let source = h.seed_object(b"elsewhere").await;
    let err = h
        .service
        .update(
            &anon,
            record.id,
            UpdateRequest {
                location: Some(source),
                ..Default::default()
            },
            None,
            None,
        )
        .await
        .unwrap_err();
    assert_matches!(err, Error::Invalid(_));
    // Status unchanged.
    assert_eq!(h.meta.get(record.id).unwrap().status, ImageStatus::Active);
}

#[tokio::test]
async fn properties_purged_by_default_and_merged_on_request() {
    let h = TestHarness::new();
    let anon = Principal::anonymous();
    let req = ReserveRequest {
        properties: HashMap::from([("distro".to_string(), "ubuntu".to_string())]),
        ..basic_request("x")
    };
    let record = h.service.create(&anon, req, None).await.unwrap();

    // Default: supplied properties replace the existing map.
    let updated = h
        .service
        .update(
            &anon,
            record.id,
            UpdateRequest {
                properties: Some(HashMap::from([(
                    "arch".to_string(),
                    "x86_64".to_string(),
                )])),
                ..Default::default()
            },
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(updated.properties.len(), 1);
    assert!(updated.properties.contains_key("arch"));

    // With the do-not-purge directive the maps merge.
    let updated = h
        .service
        .update(
            &anon,
            record.id,
            UpdateRequest {
                properties: Some(HashMap::from([(
                    "kernel".to_string(),
                    "6.1".to_string(),
                )])),
                ..Default::default()
            },
            None,
            Some(false),
        )
        .await
        .unwrap();
    assert_eq!(updated.properties.len(), 2);
    assert!(updated.properties.contains_key("arch"));
    assert!(updated.properties.contains_key("kernel"));
}

#[tokio::test]
async fn external_location_activates_without_transfer() {
    let h = TestHarness::new();
    let data = b"hosted elsewhere".to_vec();
    let source = h.seed_object(&data).await;
    let backend_objects = h.backend.len();

    let req = ReserveRequest {
        location: Some(source.clone()),
        ..basic_request("ref")
    };
    let record = h
        .service
        .create(&Principal::anonymous(), req, None)
        .await
        .unwrap();

    assert_eq!(record.status, ImageStatus::Active);
    // Size was learned from the source store.
    assert_eq!(record.size, Some(data.len() as u64));
    assert_eq!(
        h.meta.get(record.id).unwrap().location.as_deref(),
        Some(source.as_str())
    );
    // No content was copied.
    assert_eq!(h.backend.len(), backend_objects);
}

#[tokio::test]
async fn copy_from_ingests_asynchronously() {
    let h = TestHarness::new();
    let data = b"copy me over".to_vec();
    let source = h.seed_object(&data).await;

    let req = ReserveRequest {
        copy_from: Some(source),
        ..basic_request("copied")
    };
    let record = h
        .service
        .create(&Principal::anonymous(), req, None)
        .await
        .unwrap();

    // The request returns before the transfer completes.
    assert!(matches!(
        record.status,
        ImageStatus::Queued | ImageStatus::Saving
    ));

    h.wait_for_status(record.id, ImageStatus::Active).await;
    let stored = h.meta.get(record.id).unwrap();
    assert_eq!(stored.size, Some(data.len() as u64));
    assert_eq!(stored.checksum.as_deref(), Some(digest(&data).as_str()));
}

#[tokio::test]
async fn copy_from_failure_surfaces_only_as_killed() {
    let h = TestHarness::new();
    let req = ReserveRequest {
        copy_from: Some("mem://does-not-exist".to_string()),
        ..basic_request("doomed")
    };
    let record = h
        .service
        .create(&Principal::anonymous(), req, None)
        .await
        .unwrap();

    h.wait_for_status(record.id, ImageStatus::Killed).await;
}

#[tokio::test]
async fn external_source_with_unknown_scheme_is_rejected() {
    let h = TestHarness::new();
    let req = ReserveRequest {
        copy_from: Some("swift://cluster/container/obj".to_string()),
        ..basic_request("x")
    };
    let err = h
        .service
        .create(&Principal::anonymous(), req, None)
        .await
        .unwrap_err();
    assert_matches!(err, Error::UnknownScheme(_));
}

#[tokio::test]
async fn external_source_over_local_scheme_is_rejected() {
    let h = TestHarness::new();
    let req = ReserveRequest {
        location: Some("file:///etc/passwd".to_string()),
        ..basic_request("sneaky")
    };
    let err = h
        .service
        .create(&Principal::anonymous(), req, None)
        .await
        .unwrap_err();
    assert_matches!(err, Error::Invalid(_));
}

#[tokio::test]
async fn duplicate_id_is_rejected() {
    let h = TestHarness::new();
    let record = h
        .service
        .create(&Principal::anonymous(), basic_request("one"), None)
        .await
        .unwrap();

    let req = ReserveRequest {
        id: Some(record.id),
        ..basic_request("two")
    };
    let err = h
        .service
        .create(&Principal::anonymous(), req, None)
        .await
        .unwrap_err();
    assert_matches!(err, Error::Duplicate(_));
}

#[tokio::test]
async fn kernel_format_autofills_container() {
    let h = TestHarness::new();
    let req = ReserveRequest {
        name: Some("kernel".to_string()),
        disk_format: Some(DiskFormat::Aki),
        ..Default::default()
    };
    let record = h
        .service
        .create(&Principal::anonymous(), req, None)
        .await
        .unwrap();
    assert_eq!(record.container_format, Some(ContainerFormat::Aki));
}

#[tokio::test]
async fn mismatched_legacy_formats_are_rejected() {
    let h = TestHarness::new();
    let req = ReserveRequest {
        name: Some("bad".to_string()),
        disk_format: Some(DiskFormat::Aki),
        container_format: Some(ContainerFormat::Ari),
        ..Default::default()
    };
    let err = h
        .service
        .create(&Principal::anonymous(), req, None)
        .await
        .unwrap_err();
    assert_matches!(err, Error::Invalid(_));
}

#[tokio::test]
async fn lifecycle_events_are_emitted_in_order() {
    use imagevault::events::{EventKind, ImageEvent};

    let h = TestHarness::new();
    let anon = Principal::anonymous();
    let mut rx = h.service.notifier().subscribe();

    let record = h
        .service
        .create(&anon, basic_request("observed"), None)
        .await
        .unwrap();
    h.service
        .update(
            &anon,
            record.id,
            UpdateRequest::default(),
            Some(Content::from_bytes(vec![5u8; 16])),
            None,
        )
        .await
        .unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ImageEvent::Info { kind, image } = event {
            assert_eq!(image.id, record.id);
            kinds.push(kind);
        }
    }

    assert_eq!(kinds[0], EventKind::Create);
    assert!(kinds.contains(&EventKind::Prepare));
    assert!(kinds.contains(&EventKind::Upload));
    assert!(kinds.contains(&EventKind::Activate));
}
