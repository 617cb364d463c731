use super::*;
use crate::error::BoxedErrorResult;

const NOW: u64 = 1_700_000_000;

fn hash(n: u32) -> ArticleHash {
    ArticleHash::of(&format!("title {n}"), &format!("https://example.com/{n}"))
}

// ── JsonFileStore ──────────────────────────────────────────────────

#[test_log::test(tokio::test)]
async fn missing_file_is_an_empty_set() -> BoxedErrorResult<()> {
    let dir = tempfile::tempdir()?;
    let store = JsonFileStore::new(dir.path().join("posted.json"));

    assert!(!store.contains(&hash(1)).await?);
    assert!(store.load()?.is_empty());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn added_hashes_survive_a_new_instance() -> BoxedErrorResult<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("posted.json");

    let store = JsonFileStore::new(&path);
    store.add(hash(1)).await?;
    store.add(hash(2)).await?;
    store.add(hash(1)).await?;

    let reopened = JsonFileStore::new(&path);
    assert!(reopened.contains(&hash(1)).await?);
    assert!(reopened.contains(&hash(2)).await?);
    assert!(!reopened.contains(&hash(3)).await?);

    let on_disk: Vec<String> = serde_json::from_slice(&fs::read(&path)?)?;
    assert_eq!(on_disk, vec![hash(1).to_hex(), hash(2).to_hex()]);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn foreign_records_are_preserved() -> BoxedErrorResult<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("posted.json");
    fs::write(&path, r#"["5d41402abc4b2a76b9719d911017c592"]"#)?;

    let store = JsonFileStore::new(&path);
    store.add(hash(1)).await?;

    assert_eq!(
        store.load()?,
        vec![
            "5d41402abc4b2a76b9719d911017c592".to_string(),
            hash(1).to_hex()
        ]
    );
    Ok(())
}

#[test_log::test(tokio::test)]
async fn malformed_file_is_an_error_not_an_empty_set() -> BoxedErrorResult<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("posted.json");
    fs::write(&path, "[\"abc\", ")?;

    let store = JsonFileStore::new(&path);

    assert!(matches!(
        store.contains(&hash(1)).await,
        Err(StoreError::Malformed { .. })
    ));
    assert!(matches!(
        store.add(hash(1)).await,
        Err(StoreError::Malformed { .. })
    ));
    assert_eq!(fs::read_to_string(&path)?, "[\"abc\", ");
    Ok(())
}

#[test_log::test(tokio::test)]
async fn retention_drops_oldest_first() -> BoxedErrorResult<()> {
    let dir = tempfile::tempdir()?;
    let store = JsonFileStore::new(dir.path().join("posted.json")).with_max_entries(Some(2));

    for n in 1..=4 {
        store.add(hash(n)).await?;
    }

    assert_eq!(store.load()?, vec![hash(3).to_hex(), hash(4).to_hex()]);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn no_temporary_files_are_left_behind() -> BoxedErrorResult<()> {
    let dir = tempfile::tempdir()?;
    let store = JsonFileStore::new(dir.path().join("posted.json"));

    store.add(hash(1)).await?;
    store.add(hash(2)).await?;

    let names: Vec<_> = fs::read_dir(dir.path())?
        .map(|e| e.map(|e| e.file_name()))
        .collect::<Result<_, _>>()?;
    assert_eq!(names, vec![std::ffi::OsString::from("posted.json")]);
    Ok(())
}

// ── MemoryStore ────────────────────────────────────────────────────

#[test_log::test(tokio::test)]
async fn memory_store_tracks_membership() -> BoxedErrorResult<()> {
    let store = MemoryStore::with_hashes([hash(1)]);

    assert!(store.contains(&hash(1)).await?);
    assert!(!store.contains(&hash(2)).await?);
    store.add(hash(2)).await?;
    assert_eq!(store.len(), 2);
    Ok(())
}

// ── StoreLock ──────────────────────────────────────────────────────

#[test_log::test]
fn second_lock_on_same_file_is_refused() -> BoxedErrorResult<()> {
    let dir = tempfile::tempdir()?;
    let state = dir.path().join("posted.json");

    let lock = StoreLock::acquire(&state, Timestamp::from(NOW), DEFAULT_STALE_LOCK_AGE)?;
    assert!(matches!(
        StoreLock::acquire(&state, Timestamp::from(NOW + 60), DEFAULT_STALE_LOCK_AGE),
        Err(StoreError::Locked { .. })
    ));

    drop(lock);
    assert!(!StoreLock::lock_path_for(&state).exists());
    let _relocked = StoreLock::acquire(&state, Timestamp::from(NOW + 120), DEFAULT_STALE_LOCK_AGE)?;
    Ok(())
}

#[test_log::test(tokio::test)]
async fn lock_can_be_acquired_from_async_code() -> BoxedErrorResult<()> {
    let dir = tempfile::tempdir()?;
    let state = dir.path().join("posted.json");
    let now = Timestamp::from(1_700_000_000);

    let lock = StoreLock::acquire_async(state.clone(), now, DEFAULT_STALE_LOCK_AGE).await?;
    assert!(StoreLock::lock_path_for(&state).exists());
    assert!(matches!(
        StoreLock::acquire_async(state.clone(), now, DEFAULT_STALE_LOCK_AGE).await,
        Err(StoreError::Locked { .. })
    ));

    drop(lock);
    assert!(!StoreLock::lock_path_for(&state).exists());
    Ok(())
}

#[test_log::test]
fn stale_lock_is_taken_over() -> BoxedErrorResult<()> {
    let dir = tempfile::tempdir()?;
    let state = dir.path().join("posted.json");
    let lock_path = StoreLock::lock_path_for(&state);
    fs::write(&lock_path, NOW.to_string())?;

    let later = Timestamp::from(NOW + DEFAULT_STALE_LOCK_AGE.as_secs() + 1);
    let _lock = StoreLock::acquire(&state, later, DEFAULT_STALE_LOCK_AGE)?;

    assert_eq!(fs::read_to_string(&lock_path)?, later.as_secs().to_string());
    Ok(())
}

#[test_log::test]
fn lock_path_is_a_sibling_of_the_state_file() {
    assert_eq!(
        StoreLock::lock_path_for(Path::new("data/posted_articles.json")),
        PathBuf::from("data/posted_articles.json.lock")
    );
}
