//! Content Lifecycle Tests
//!
//! Create, read, update and delete through the staged engine:
//! - Committed content reads back byte-for-byte
//! - Rolled back content never becomes readable
//! - Renditions of one id are independent
//! - Deletes match ids exactly, never by prefix
//! - Deletes are invisible until commit

use std::fs;
use std::sync::Arc;

use content_store::content::{BasicMetacard, Metacard};
use content_store::{
    ContentItem, ContentStorage, CreateRequest, DeleteRequest, DeleteTarget, MimeType,
    StorageConfig, StorageError, UpdateRequest,
};
use tempfile::TempDir;

// =============================================================================
// Test Utilities
// =============================================================================

fn open_store() -> (TempDir, ContentStorage) {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let config = StorageConfig::new(temp.path())
        .with_fsync(false)
        .with_mime_mapping("image/nitf", &["nitf", "ntf"]);
    let store = ContentStorage::open(config).expect("Failed to open store");
    (temp, store)
}

fn metacard(id: &str) -> Arc<dyn Metacard> {
    Arc::new(BasicMetacard::new(id))
}

fn create_committed(store: &ContentStorage, item: ContentItem) -> ContentItem {
    let tx = store.create(CreateRequest::new(vec![item])).unwrap();
    store.commit(tx).unwrap().remove(0)
}

fn assert_not_found<T: std::fmt::Debug>(result: Result<T, StorageError>) {
    match result {
        Err(StorageError::NotFound(_)) => {}
        other => panic!("expected NotFound, got {:?}", other),
    }
}

// =============================================================================
// Round Trip
// =============================================================================

#[test]
fn test_hello_world_scenario() {
    let (_temp, store) = open_store();

    let tx = store
        .create(CreateRequest::new(vec![ContentItem::new(
            b"Hello World".to_vec(),
            "image/nitf",
            "test.nitf",
        )]))
        .unwrap();

    let created = &tx.items()[0];
    assert_eq!(created.id.len(), 32);
    assert_eq!(created.uri(), format!("content:{}", created.id));
    assert_eq!(created.size, 11);
    let uri = created.uri();

    store.commit(tx).unwrap();

    let read = store.read(&uri).unwrap();
    assert_eq!(read.read_bytes().unwrap(), b"Hello World");
    assert_eq!(read.mime_type, "image/nitf");
    assert_eq!(read.size, 11);
    assert_eq!(read.filename, "test.nitf");
}

#[test]
fn test_round_trip_preserves_bytes_and_mime() {
    let (_temp, store) = open_store();
    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();

    let committed = create_committed(
        &store,
        ContentItem::new(payload.clone(), "application/pdf", "report.pdf"),
    );
    assert!(committed.checksum.is_some());

    let read = store.read(&committed.uri()).unwrap();
    assert_eq!(read.read_bytes().unwrap(), payload);
    assert_eq!(read.size, payload.len() as u64);
    assert_eq!(read.mime_type, "application/pdf");
}

#[test]
fn test_durable_layout_is_sharded() {
    let (temp, store) = open_store();
    let committed = create_committed(
        &store,
        ContentItem::new(b"abc".to_vec(), "text/plain", "a.txt").with_id("abcdef123456"),
    );

    let expected = temp
        .path()
        .join("content-store-root/content-store/abc/def/abcdef123456/a.txt");
    assert!(expected.is_file());
    assert_eq!(committed.uri(), "content:abcdef123456");
}

#[test]
fn test_staged_content_is_not_readable() {
    let (temp, store) = open_store();
    let tx = store
        .create(CreateRequest::new(vec![ContentItem::new(
            b"pending".to_vec(),
            "text/plain",
            "p.txt",
        )]))
        .unwrap();

    assert_not_found(store.read(&tx.items()[0].uri()));
    assert!(temp.path().join("tmp").join(tx.request_id()).is_dir());
    store.rollback(tx).unwrap();
}

// =============================================================================
// Rollback
// =============================================================================

#[test]
fn test_rollback_erases() {
    let (temp, store) = open_store();
    let tx = store
        .create(CreateRequest::new(vec![ContentItem::new(
            b"gone".to_vec(),
            "text/plain",
            "g.txt",
        )]))
        .unwrap();
    let uri = tx.items()[0].uri();
    let request_id = tx.request_id().to_string();

    store.rollback(tx).unwrap();

    assert_not_found(store.read(&uri));
    assert!(!temp.path().join("tmp").join(&request_id).exists());
}

#[test]
fn test_rolled_back_update_keeps_previous_content() {
    let (_temp, store) = open_store();
    let original = create_committed(
        &store,
        ContentItem::new(b"v1".to_vec(), "text/plain", "doc.txt"),
    );

    let tx = store
        .update(UpdateRequest::new(vec![ContentItem::new(
            b"v2".to_vec(),
            "text/plain",
            "doc.txt",
        )
        .with_id(original.id.clone())]))
        .unwrap();
    store.rollback(tx).unwrap();

    let read = store.read(&original.uri()).unwrap();
    assert_eq!(read.read_bytes().unwrap(), b"v1");
}

// =============================================================================
// Update
// =============================================================================

#[test]
fn test_update_replaces_content_and_filename() {
    let (temp, store) = open_store();
    let original = create_committed(
        &store,
        ContentItem::new(b"first".to_vec(), "text/plain", "first.txt").with_id("updatable01"),
    );

    let tx = store
        .update(UpdateRequest::new(vec![ContentItem::new(
            b"second version".to_vec(),
            "text/plain",
            "second.txt",
        )
        .with_id("updatable01")]))
        .unwrap();
    store.commit(tx).unwrap();

    let read = store.read(&original.uri()).unwrap();
    assert_eq!(read.read_bytes().unwrap(), b"second version");
    assert_eq!(read.filename, "second.txt");

    let dir = temp
        .path()
        .join("content-store-root/content-store/upd/ata/updatable01");
    let mut names: Vec<String> = fs::read_dir(&dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec![".rendition.json".to_string(), "second.txt".to_string()]);
}

#[test]
fn test_update_without_id_rejected() {
    let (_temp, store) = open_store();
    let result = store.update(UpdateRequest::new(vec![ContentItem::new(
        b"x".to_vec(),
        "text/plain",
        "x.txt",
    )]));
    assert!(matches!(result, Err(StorageError::InvalidRequest(_))));
}

#[test]
fn test_update_of_unstored_id_is_permitted_by_default() {
    let (_temp, store) = open_store();
    let tx = store
        .update(UpdateRequest::new(vec![ContentItem::new(
            b"fresh".to_vec(),
            "text/plain",
            "f.txt",
        )
        .with_id("neverstored1")]))
        .unwrap();
    store.commit(tx).unwrap();
    assert!(store.read("content:neverstored1").is_ok());
}

// =============================================================================
// Qualifier Independence
// =============================================================================

#[test]
fn test_qualifier_independence() {
    let (_temp, store) = open_store();
    let id = "renditions01";

    let tx = store
        .create(CreateRequest::new(vec![
            ContentItem::new(b"primary".to_vec(), "text/plain", "main.txt").with_id(id),
            ContentItem::new(b"thumbnail".to_vec(), "image/png", "thumb.png")
                .with_id(id)
                .with_qualifier("q1"),
        ]))
        .unwrap();
    let uris: Vec<String> = tx.items().iter().map(ContentItem::uri).collect();
    assert_eq!(uris, vec![format!("content:{}", id), format!("content:{}#q1", id)]);
    store.commit(tx).unwrap();

    let primary = store.read(&uris[0]).unwrap();
    let thumb = store.read(&uris[1]).unwrap();
    assert_eq!(primary.read_bytes().unwrap(), b"primary");
    assert_eq!(thumb.read_bytes().unwrap(), b"thumbnail");
    assert_eq!(thumb.qualifier, "q1");
    assert_eq!(thumb.mime_type, "image/png");

    // Removing the rendition leaves the primary alone
    let tx = store
        .delete(DeleteRequest::new(vec![DeleteTarget::rendition(metacard(id), "q1")]))
        .unwrap();
    assert_eq!(tx.items().len(), 1);
    assert_eq!(tx.items()[0].qualifier, "q1");
    store.commit(tx).unwrap();

    assert_not_found(store.read(&uris[1]));
    assert_eq!(store.read(&uris[0]).unwrap().read_bytes().unwrap(), b"primary");
}

#[test]
fn test_primary_delete_leaves_rendition() {
    let (_temp, store) = open_store();
    let id = "renditions02";
    let tx = store
        .create(CreateRequest::new(vec![
            ContentItem::new(b"primary".to_vec(), "text/plain", "main.txt").with_id(id),
            ContentItem::new(b"alt".to_vec(), "text/plain", "alt.txt")
                .with_id(id)
                .with_qualifier("alt"),
        ]))
        .unwrap();
    store.commit(tx).unwrap();

    let tx = store
        .delete(DeleteRequest::new(vec![DeleteTarget::rendition(metacard(id), "")]))
        .unwrap();
    store.commit(tx).unwrap();

    assert_not_found(store.read(&format!("content:{}", id)));
    assert!(store.read(&format!("content:{}#alt", id)).is_ok());
}

#[test]
fn test_filename_colliding_with_qualifier_in_batch_rejected() {
    let (temp, store) = open_store();
    let id = "collide0001";
    let result = store.create(
        CreateRequest::new(vec![
            ContentItem::new(b"primary".to_vec(), "", "thumb").with_id(id),
            ContentItem::new(b"alt".to_vec(), "text/plain", "alt.txt")
                .with_id(id)
                .with_qualifier("thumb"),
        ])
        .with_request_id("collide-request"),
    );
    assert!(matches!(result, Err(StorageError::InvalidRequest(_))));
    assert!(!temp.path().join("tmp/collide-request").exists());
}

#[test]
fn test_filename_colliding_with_stored_qualifier_rejected() {
    let (_temp, store) = open_store();
    let id = "collide0002";
    create_committed(
        &store,
        ContentItem::new(b"alt".to_vec(), "text/plain", "alt.txt")
            .with_id(id)
            .with_qualifier("thumb"),
    );

    let result = store.create(CreateRequest::new(vec![
        ContentItem::new(b"primary".to_vec(), "", "thumb").with_id(id),
    ]));
    assert!(matches!(result, Err(StorageError::InvalidRequest(_))));
    assert_eq!(
        store.read(&format!("content:{}#thumb", id)).unwrap().read_bytes().unwrap(),
        b"alt"
    );
}

#[test]
fn test_qualifier_colliding_with_stored_filename_rejected() {
    let (_temp, store) = open_store();
    let id = "collide0003";
    create_committed(
        &store,
        ContentItem::new(b"primary".to_vec(), "", "thumb").with_id(id),
    );

    let result = store.update(UpdateRequest::new(vec![
        ContentItem::new(b"alt".to_vec(), "text/plain", "alt.txt")
            .with_id(id)
            .with_qualifier("thumb"),
    ]));
    assert!(matches!(result, Err(StorageError::InvalidRequest(_))));
    assert_eq!(
        store.read(&format!("content:{}", id)).unwrap().read_bytes().unwrap(),
        b"primary"
    );
}

#[test]
fn test_duplicate_uri_in_batch_rejected() {
    let (temp, store) = open_store();
    let result = store.create(
        CreateRequest::new(vec![
            ContentItem::new(b"a".to_vec(), "text/plain", "a.txt").with_id("dupdupdup1"),
            ContentItem::new(b"b".to_vec(), "text/plain", "b.txt").with_id("dupdupdup1"),
        ])
        .with_request_id("dup-request"),
    );
    assert!(matches!(result, Err(StorageError::InvalidRequest(_))));
    assert!(!temp.path().join("tmp/dup-request").exists());
}

// =============================================================================
// Exact-Id Matching
// =============================================================================

#[test]
fn test_delete_matches_exact_id_only() {
    let (_temp, store) = open_store();
    let first = "AAAAAA111111111111111111111111";
    let second = "AAAAAA222222222222222222222222";

    create_committed(
        &store,
        ContentItem::new(b"first".to_vec(), "text/plain", "first.txt").with_id(first),
    );
    create_committed(
        &store,
        ContentItem::new(b"second".to_vec(), "text/plain", "second.txt").with_id(second),
    );

    let tx = store
        .delete(DeleteRequest::for_metacards([metacard(first)]))
        .unwrap();
    assert_eq!(tx.items().len(), 1);
    assert_eq!(tx.items()[0].id, first);
    store.commit(tx).unwrap();

    assert_not_found(store.read(&format!("content:{}", first)));
    let survivor = store.read(&format!("content:{}", second)).unwrap();
    assert_eq!(survivor.read_bytes().unwrap(), b"second");
}

#[test]
fn test_delete_by_prefix_is_not_found() {
    let (_temp, store) = open_store();
    create_committed(
        &store,
        ContentItem::new(b"x".to_vec(), "text/plain", "x.txt")
            .with_id("AAAAAA111111111111111111111111"),
    );

    assert_not_found(store.delete(DeleteRequest::for_metacards([metacard("AAAAAA111111")])));
    assert!(store.read("content:AAAAAA111111111111111111111111").is_ok());
}

// =============================================================================
// Delete Marks, Commit Removes
// =============================================================================

#[test]
fn test_delete_marks_commit_removes() {
    let (temp, store) = open_store();
    let committed = create_committed(
        &store,
        ContentItem::new(b"to delete".to_vec(), "text/plain", "d.txt").with_id("deleteme01"),
    );

    let tx = store
        .delete(DeleteRequest::for_metacards([metacard("deleteme01")]))
        .unwrap();
    let deleted = &tx.items()[0];
    assert_eq!(deleted.filename, "");
    assert_eq!(deleted.id, "deleteme01");
    assert!(deleted.metacard.is_some());

    // Still readable before commit
    assert!(store.read(&committed.uri()).is_ok());

    store.commit(tx).unwrap();
    assert_not_found(store.read(&committed.uri()));
    assert!(!temp
        .path()
        .join("content-store-root/content-store/del/ete/deleteme01")
        .exists());
}

#[test]
fn test_delete_all_reports_every_rendition() {
    let (_temp, store) = open_store();
    let id = "renditions03";
    let tx = store
        .create(CreateRequest::new(vec![
            ContentItem::new(b"p".to_vec(), "text/plain", "p.txt").with_id(id),
            ContentItem::new(b"a".to_vec(), "text/plain", "a.txt")
                .with_id(id)
                .with_qualifier("a"),
            ContentItem::new(b"b".to_vec(), "text/plain", "b.txt")
                .with_id(id)
                .with_qualifier("b"),
        ]))
        .unwrap();
    store.commit(tx).unwrap();

    let tx = store.delete(DeleteRequest::for_metacards([metacard(id)])).unwrap();
    let qualifiers: Vec<&str> = tx.items().iter().map(|i| i.qualifier.as_str()).collect();
    assert_eq!(qualifiers, vec!["", "a", "b"]);
    assert!(tx.items().iter().all(|i| i.filename.is_empty()));
    store.commit(tx).unwrap();

    for uri in ["content:renditions03", "content:renditions03#a", "content:renditions03#b"] {
        assert_not_found(store.read(uri));
    }
}

#[test]
fn test_rolled_back_delete_keeps_content() {
    let (_temp, store) = open_store();
    let committed = create_committed(
        &store,
        ContentItem::new(b"keep".to_vec(), "text/plain", "k.txt").with_id("keepme0001"),
    );

    let tx = store
        .delete(DeleteRequest::for_metacards([metacard("keepme0001")]))
        .unwrap();
    store.rollback(tx).unwrap();

    assert_eq!(store.read(&committed.uri()).unwrap().read_bytes().unwrap(), b"keep");
}

#[test]
fn test_delete_of_unstored_id_is_not_found() {
    let (_temp, store) = open_store();
    assert_not_found(store.delete(DeleteRequest::for_metacards([metacard("missing001")])));
}

// =============================================================================
// MIME Normalization
// =============================================================================

#[test]
fn test_mime_parameters_do_not_change_base() {
    let plain = MimeType::parse("image/nitf").unwrap();
    let with_charset = MimeType::parse("image/nitf; charset=UTF-8").unwrap();
    assert!(plain.same_base(&with_charset));

    let a = MimeType::parse("text/xml; charset=UTF-8; id=xml").unwrap();
    let b = MimeType::parse("text/xml; id=xml; charset=UTF-8").unwrap();
    assert_eq!(a, b);
    assert_eq!(a.params().collect::<Vec<_>>(), vec!["charset=UTF-8", "id=xml"]);
}

#[test]
fn test_parameterized_mime_stored_under_base_extension() {
    let (_temp, store) = open_store();
    let tx = store
        .create(CreateRequest::new(vec![ContentItem::new(
            b"nitf bytes".to_vec(),
            "image/nitf; charset=UTF-8",
            "scene",
        )]))
        .unwrap();
    assert_eq!(tx.items()[0].filename, "scene.nitf");
    assert_eq!(tx.items()[0].mime_type, "image/nitf; charset=UTF-8");

    let items = store.commit(tx).unwrap();
    let read = store.read(&items[0].uri()).unwrap();
    assert_eq!(read.mime_type, "image/nitf; charset=UTF-8");
    assert_eq!(read.filename, "scene.nitf");
    assert_eq!(read.checksum, items[0].checksum);
}

#[test]
fn test_malformed_uri_rejected() {
    let (_temp, store) = open_store();
    assert!(matches!(
        store.read("http://example.com/x"),
        Err(StorageError::InvalidRequest(_)) | Err(StorageError::InvalidIdentifier(_))
    ));
    assert!(matches!(
        store.read("content:ab"),
        Err(StorageError::InvalidIdentifier(_))
    ));
}

#[test]
fn test_reserved_reference_suffix_rejected() {
    let (_temp, store) = open_store();
    let result = store.create(CreateRequest::new(vec![ContentItem::new(
        b"x".to_vec(),
        "",
        "sneaky.ref",
    )]));
    assert!(matches!(result, Err(StorageError::InvalidRequest(_))));
}

// =============================================================================
// Default MIME Resolver
// =============================================================================

fn open_default_store() -> (TempDir, ContentStorage) {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let store = ContentStorage::open(StorageConfig::new(temp.path()).with_fsync(false))
        .expect("Failed to open store");
    (temp, store)
}

#[test]
fn test_default_resolver_hello_world() {
    let (_temp, store) = open_default_store();
    let committed = create_committed(
        &store,
        ContentItem::new(b"Hello World".to_vec(), "image/nitf", "test.nitf"),
    );
    assert_eq!(committed.filename, "test.nitf");

    let read = store.read(&committed.uri()).unwrap();
    assert_eq!(read.read_bytes().unwrap(), b"Hello World");
    assert_eq!(read.mime_type, "image/nitf");
    assert_eq!(read.filename, "test.nitf");
    assert_eq!(read.size, 11);
}

#[test]
fn test_default_resolver_keeps_unknown_type() {
    let (_temp, store) = open_default_store();
    let committed = create_committed(
        &store,
        ContentItem::new(b"\x00\x01".to_vec(), "application/x-ddf-custom", "data.bin"),
    );
    assert_eq!(committed.filename, "data.bin");

    let read = store.read(&committed.uri()).unwrap();
    assert_eq!(read.mime_type, "application/x-ddf-custom");
    assert_eq!(read.filename, "data.bin");
}

#[test]
fn test_default_resolver_uses_usual_extensions() {
    let (_temp, store) = open_default_store();
    let notes = create_committed(
        &store,
        ContentItem::new(b"plain".to_vec(), "text/plain", "notes"),
    );
    assert_eq!(notes.filename, "notes.txt");

    let doc = create_committed(
        &store,
        ContentItem::new(b"<doc/>".to_vec(), "application/xml", "doc.xml"),
    );
    assert_eq!(doc.filename, "doc.xml");

    let read = store.read(&doc.uri()).unwrap();
    assert_eq!(read.filename, "doc.xml");
    assert_eq!(read.mime_type, "application/xml");
    assert_eq!(store.read(&notes.uri()).unwrap().mime_type, "text/plain");
}

#[test]
fn test_stored_type_follows_update() {
    let (_temp, store) = open_default_store();
    let id = "storedtype1";
    create_committed(
        &store,
        ContentItem::new(b"<a/>".to_vec(), "application/xml", "a.xml").with_id(id),
    );
    let tx = store
        .update(UpdateRequest::new(vec![
            ContentItem::new(b"<b/>".to_vec(), "text/xml; charset=UTF-8", "b.xml").with_id(id),
        ]))
        .unwrap();
    store.commit(tx).unwrap();

    let read = store.read(&format!("content:{}", id)).unwrap();
    assert_eq!(read.filename, "b.xml");
    assert_eq!(read.mime_type, "text/xml; charset=UTF-8");
}
