//! Integration tests for the local filesystem engine.

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use fsdb_core::{CancellationToken, Error, Fsdb, Key};
use fsdb_local::{
    ignore_all, stop_on_error, LocalConfig, LocalStore, DATA_FILENAME, GZIP_DATA_FILENAME,
};

const LOREM: &str = "Lorem ipsum dolor sit amet,\n\
consectetur adipiscing elit,\n\
sed do eiusmod tempor incididunt ut labore et dolore magna aliqua.\n\
\n\
Ut enim ad minim veniam,\n\
quis nostrud exercitation ullamco laboris nisi ut aliquip ex ea commodo consequat.\n\
\n\
Duis aute irure dolor in reprehenderit in voluptate velit esse cillum dolore eu fugiat nulla pariatur.\n\
\n\
Excepteur sint occaecat cupidatat non proident,\n\
sunt in culpa qui officia deserunt mollit anim id est laborum.";

fn open_store(root: &Path, gzip: bool) -> LocalStore {
    LocalStore::open(LocalConfig::new(root).with_gzip(gzip))
}

async fn write(store: &LocalStore, key: &Key, content: &str) {
    let token = CancellationToken::new();
    store
        .write(&token, key, content.as_bytes())
        .await
        .unwrap_or_else(|e| panic!("write {key} failed: {e}"));
}

async fn read_expect(store: &LocalStore, key: &Key, expect: &str) {
    let token = CancellationToken::new();
    let reader = store
        .read(&token, key)
        .await
        .unwrap_or_else(|e| panic!("read {key} failed: {e}"));
    let bytes = reader.into_bytes().await.expect("reading content failed");
    assert_eq!(bytes, expect.as_bytes(), "content mismatch for {key}");
}

async fn expect_no_such_key_on_read(store: &LocalStore, key: &Key) {
    let token = CancellationToken::new();
    match store.read(&token, key).await {
        Err(err) if err.is_no_such_key() => {}
        Err(err) => panic!("expected NoSuchKey, got {err}"),
        Ok(_) => panic!("expected NoSuchKey, got a value"),
    }
}

async fn expect_no_such_key_on_delete(store: &LocalStore, key: &Key) {
    let token = CancellationToken::new();
    match store.delete(&token, key).await {
        Err(err) if err.is_no_such_key() => {}
        Err(err) => panic!("expected NoSuchKey, got {err}"),
        Ok(()) => panic!("expected NoSuchKey, delete succeeded"),
    }
}

async fn collect_keys(store: &LocalStore) -> Vec<Key> {
    let token = CancellationToken::new();
    let mut keys = Vec::new();
    store
        .scan_keys(
            &token,
            |key| {
                keys.push(key);
                async { true }
            },
            ignore_all,
        )
        .await
        .expect("scan failed");
    keys
}

async fn round_trip_suite(store: &LocalStore) {
    let token = CancellationToken::new();
    let key = Key::from("foo");

    expect_no_such_key_on_delete(store, &key).await;
    expect_no_such_key_on_read(store, &key).await;

    write(store, &key, LOREM).await;
    read_expect(store, &key, LOREM).await;
    // A second read must see the same committed value.
    read_expect(store, &key, LOREM).await;

    // Overwrite with an empty value.
    write(store, &key, "").await;
    read_expect(store, &key, "").await;

    store.delete(&token, &key).await.expect("delete failed");
    expect_no_such_key_on_read(store, &key).await;
}

#[tokio::test]
async fn read_write_delete() {
    let root = TempDir::new().unwrap();
    let store = open_store(root.path(), false);
    round_trip_suite(&store).await;
}

#[tokio::test]
async fn read_write_delete_gzip() {
    let root = TempDir::new().unwrap();
    let store = open_store(root.path(), true);
    round_trip_suite(&store).await;
}

#[tokio::test]
async fn gzip_writes_smaller_data_gz_file() {
    let root = TempDir::new().unwrap();
    let store = open_store(root.path(), true);
    let key = Key::from("foo");

    write(&store, &key, LOREM).await;

    let dir = store.config().entry_dir(&key);
    assert!(
        !dir.join(DATA_FILENAME).exists(),
        "plain data file should not exist for a gzip write"
    );
    let compressed = std::fs::metadata(dir.join(GZIP_DATA_FILENAME)).unwrap();
    assert!(
        (compressed.len() as usize) < LOREM.len(),
        "compressed file ({} bytes) should be smaller than the input ({} bytes)",
        compressed.len(),
        LOREM.len(),
    );

    read_expect(&store, &key, LOREM).await;
}

#[tokio::test]
async fn changing_compression_keeps_entries_readable() {
    let root = TempDir::new().unwrap();
    let gzip_store = open_store(root.path(), true);
    let plain_store = open_store(root.path(), false);
    let token = CancellationToken::new();
    let key = Key::from("foo");

    write(&gzip_store, &key, LOREM).await;
    read_expect(&gzip_store, &key, LOREM).await;
    // The plain-configured store falls back to the gzip variant.
    read_expect(&plain_store, &key, LOREM).await;

    // Overwriting through the plain store replaces the variant on disk.
    write(&plain_store, &key, "").await;
    read_expect(&plain_store, &key, "").await;
    read_expect(&gzip_store, &key, "").await;

    let dir = gzip_store.config().entry_dir(&key);
    assert!(dir.join(DATA_FILENAME).exists());
    assert!(!dir.join(GZIP_DATA_FILENAME).exists());

    gzip_store.delete(&token, &key).await.expect("delete failed");
    expect_no_such_key_on_read(&gzip_store, &key).await;
}

#[tokio::test]
async fn scan_enumerates_and_stops() {
    let root = TempDir::new().unwrap();
    let store = open_store(root.path(), false);
    let token = CancellationToken::new();

    assert!(collect_keys(&store).await.is_empty());

    let expected = ["foo", "bar", "foobar"];
    for name in expected {
        write(&store, &Key::from(name), "").await;
    }

    let mut keys: Vec<String> = collect_keys(&store)
        .await
        .into_iter()
        .map(|k| k.to_string())
        .collect();
    keys.sort();
    let mut want: Vec<String> = expected.iter().map(|s| s.to_string()).collect();
    want.sort();
    assert_eq!(keys, want);

    // A callback returning false stops the walk after the first key.
    let mut seen = 0;
    store
        .scan_keys(
            &token,
            |_| {
                seen += 1;
                async { false }
            },
            stop_on_error,
        )
        .await
        .expect("scan failed");
    assert_eq!(seen, 1);
}

#[tokio::test]
async fn scan_reaps_empty_directories() {
    let root = TempDir::new().unwrap();
    let store = open_store(root.path(), false);
    let token = CancellationToken::new();
    let key = Key::from("foo");

    write(&store, &key, "value").await;
    store.delete(&token, &key).await.expect("delete failed");

    // Deleting removes the entry directory; each scan then collects one
    // level of newly empty ancestors (a directory emptied during a walk is
    // only observed empty by the next one).
    for _ in 0..4 {
        store
            .scan_keys(&token, |_| async { true }, ignore_all)
            .await
            .expect("scan failed");
    }
    assert!(
        !store.config().data_root().exists(),
        "empty directory chain should be fully reaped"
    );
}

#[tokio::test]
async fn hash_collisions_are_detected() {
    let root = TempDir::new().unwrap();
    // A constant hash forces every key into the same entry directory.
    let config = LocalConfig::new(root.path()).with_hash_fn(Arc::new(|_| vec![0xaa, 0xbb, 0xcc]));
    let store = LocalStore::open(config);
    let token = CancellationToken::new();
    let first = Key::from("foo");
    let second = Key::from("bar");

    write(&store, &first, "value").await;

    match store.write(&token, &second, &b"other"[..]).await {
        Err(Error::KeyCollision { requested, stored }) => {
            assert_eq!(requested, second);
            assert_eq!(stored, first);
        }
        other => panic!("expected KeyCollision, got {other:?}"),
    }
    assert!(matches!(
        store.read(&token, &second).await,
        Err(Error::KeyCollision { .. })
    ));
    assert!(matches!(
        store.delete(&token, &second).await,
        Err(Error::KeyCollision { .. })
    ));

    // The colliding attempts left the original entry untouched.
    read_expect(&store, &first, "value").await;
}

#[tokio::test]
async fn key_file_without_data_reads_as_missing() {
    let root = TempDir::new().unwrap();
    let store = open_store(root.path(), false);
    let key = Key::from("foo");

    write(&store, &key, "value").await;
    std::fs::remove_file(store.config().entry_dir(&key).join(DATA_FILENAME)).unwrap();

    expect_no_such_key_on_read(&store, &key).await;
}

#[tokio::test]
async fn orphan_data_file_is_repaired_by_next_write() {
    let root = TempDir::new().unwrap();
    let store = open_store(root.path(), false);
    let key = Key::from("foo");

    // Simulate a crash between the data-file rename and the key-file
    // rename: a data file with no key file.
    let dir = store.config().entry_dir(&key);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(DATA_FILENAME), b"orphan").unwrap();

    // Invisible to readers and to the scan.
    expect_no_such_key_on_read(&store, &key).await;
    assert!(collect_keys(&store).await.is_empty());

    // The next write of the same key replaces the orphan in place.
    write(&store, &key, "repaired").await;
    read_expect(&store, &key, "repaired").await;
}

#[tokio::test]
async fn cancelled_token_stops_every_operation() {
    let root = TempDir::new().unwrap();
    let store = open_store(root.path(), false);
    let key = Key::from("foo");

    let token = CancellationToken::new();
    token.cancel();

    assert!(matches!(
        store.read(&token, &key).await,
        Err(Error::Cancelled)
    ));
    assert!(matches!(
        store.write(&token, &key, &b"v"[..]).await,
        Err(Error::Cancelled)
    ));
    assert!(matches!(
        store.delete(&token, &key).await,
        Err(Error::Cancelled)
    ));
    assert!(matches!(
        store
            .scan_keys(&token, |_| async { true }, ignore_all)
            .await,
        Err(Error::Cancelled)
    ));
}

#[tokio::test]
async fn staging_area_is_clean_after_writes() {
    let root = TempDir::new().unwrap();
    let store = open_store(root.path(), false);

    for i in 0..8 {
        write(&store, &Key::from(format!("key{i}")), "content").await;
    }

    let entries: Vec<_> = std::fs::read_dir(store.config().temp_root())
        .unwrap()
        .collect();
    assert!(
        entries.is_empty(),
        "staging directories should be removed after each write: {entries:?}"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_writes_to_distinct_keys_do_not_interfere() {
    let root = TempDir::new().unwrap();
    let store = Arc::new(open_store(root.path(), false));

    let mut tasks = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            let token = CancellationToken::new();
            let key = Key::from(format!("key{i}"));
            let content = format!("content for {i}");
            store
                .write(&token, &key, content.as_bytes())
                .await
                .expect("write failed");
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    for i in 0..8 {
        read_expect(&store, &Key::from(format!("key{i}")), &format!("content for {i}")).await;
    }
    assert_eq!(collect_keys(&store).await.len(), 8);
}

#[tokio::test(flavor = "multi_thread")]
async fn racing_writes_to_one_key_leave_one_intact_value() {
    let root = TempDir::new().unwrap();
    let store = Arc::new(open_store(root.path(), false));
    let key = Key::from("contended");

    // Rename ordering decides the winner; either complete value is
    // acceptable, a mix of the two is not.
    for _ in 0..20 {
        let first = {
            let store = store.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let token = CancellationToken::new();
                store.write(&token, &key, &b"first value"[..]).await
            })
        };
        let second = {
            let store = store.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let token = CancellationToken::new();
                store.write(&token, &key, &b"second value"[..]).await
            })
        };
        first.await.unwrap().expect("first write failed");
        second.await.unwrap().expect("second write failed");

        let token = CancellationToken::new();
        let bytes = store
            .read(&token, &key)
            .await
            .expect("read failed")
            .into_bytes()
            .await
            .unwrap();
        assert!(
            bytes == "first value" || bytes == "second value",
            "torn value after racing writes: {bytes:?}"
        );
    }
}

#[tokio::test]
async fn shallow_fan_out_depth_works() {
    let root = TempDir::new().unwrap();
    let store = LocalStore::open(LocalConfig::new(root.path()).with_dir_levels(1));
    let key = Key::from("foo");

    write(&store, &key, "bar").await;
    read_expect(&store, &key, "bar").await;

    // One two-hex-char level plus the digest tail.
    let dir = store.config().entry_dir(&key);
    let relative: Vec<_> = dir
        .strip_prefix(store.config().data_root())
        .unwrap()
        .components()
        .collect();
    assert_eq!(relative.len(), 2);
    assert_eq!(collect_keys(&store).await.len(), 1);
}

#[tokio::test]
async fn usable_as_a_trait_object() {
    use tokio::io::AsyncReadExt;

    let root = TempDir::new().unwrap();
    let store: Arc<dyn Fsdb> = Arc::new(open_store(root.path(), false));
    let token = CancellationToken::new();
    let key = Key::from("foo");

    store
        .write(&token, &key, Box::new(&b"bar"[..]))
        .await
        .expect("write failed");
    let mut stream = store.read(&token, &key).await.expect("read failed");
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    assert_eq!(buf, b"bar");
    store.delete(&token, &key).await.expect("delete failed");
}

#[tokio::test]
async fn partial_reads_resume_correctly() {
    use tokio::io::AsyncReadExt;

    let root = TempDir::new().unwrap();
    for gzip in [false, true] {
        let store = open_store(root.path(), gzip);
        let token = CancellationToken::new();
        let key = Key::from("partial");
        write(&store, &key, "hello, world").await;

        let mut reader = store.read(&token, &key).await.expect("read failed");
        let mut prefix = [0u8; 5];
        reader.read_exact(&mut prefix).await.unwrap();
        assert_eq!(&prefix, b"hello");
        // The rest of the stream, whichever variant backs it.
        assert_eq!(reader.into_bytes().await.unwrap(), ", world");
    }
}

#[tokio::test]
async fn binary_keys_round_trip() {
    let root = TempDir::new().unwrap();
    let store = open_store(root.path(), false);
    let token = CancellationToken::new();
    let key = Key::from(vec![0x00, 0xff, 0x80, 0x7f]);

    store
        .write(&token, &key, &b"blob"[..])
        .await
        .expect("write failed");
    let reader = store.read(&token, &key).await.expect("read failed");
    assert_eq!(reader.into_bytes().await.unwrap(), "blob");

    let keys = collect_keys(&store).await;
    assert_eq!(keys, vec![key.clone()]);

    store.delete(&token, &key).await.expect("delete failed");
}
