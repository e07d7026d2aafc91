use cache_janitor::{CacheJanitor, RetentionPolicy, layout};
use std::path::Path;
use std::time::{Duration, SystemTime};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

fn write_cache_set(root: &Path, key: &str, age: Duration) -> std::io::Result<()> {
    let chunk_dir = layout::chunk_dir_path(root, key);
    std::fs::create_dir_all(&chunk_dir)?;
    std::fs::write(
        chunk_dir.join(layout::chunk_file_name("channels", 0)),
        br#"{"data":[{"id":"a","displayName":"A"}]}"#,
    )?;
    std::fs::write(
        chunk_dir.join(layout::chunk_file_name("programMap", 0)),
        br#"{"data":[]}"#,
    )?;

    let index = layout::index_path(root, key);
    std::fs::write(&index, br#"{"sourceKey":"k","chunks":[]}"#)?;
    std::fs::File::options()
        .write(true)
        .open(&index)?
        .set_modified(SystemTime::now() - age)?;
    Ok(())
}

#[tokio::test]
async fn test_expired_set_removed_fresh_set_kept() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = tempfile::tempdir()?;
    write_cache_set(temp_dir.path(), "stale", 10 * DAY)?;
    write_cache_set(temp_dir.path(), "fresh", DAY)?;

    let janitor = CacheJanitor::builder()
        .cache_dir(temp_dir.path())
        .policy(RetentionPolicy::days(7))
        .build()
        .await?;

    let report = janitor.cleanup_expired().await?;

    assert_eq!(report.dirs_removed, 1);
    assert_eq!(report.files_removed, 3);
    assert!(report.bytes_removed > 0);
    assert!(report.size_after < report.size_before);
    assert_eq!(report.size_before - report.size_after, report.bytes_removed);
    assert!(report.failures.is_empty());

    assert!(!layout::index_path(temp_dir.path(), "stale").exists());
    assert!(!layout::chunk_dir_path(temp_dir.path(), "stale").exists());
    assert!(layout::index_path(temp_dir.path(), "fresh").exists());
    assert!(layout::chunk_dir_path(temp_dir.path(), "fresh").exists());

    // A second pass has nothing left to do.
    let again = janitor.cleanup_expired().await?;
    assert_eq!(again.dirs_removed, 0);
    assert_eq!(again.files_removed, 0);
    Ok(())
}

#[tokio::test]
async fn test_cleanup_expired_days_overrides_policy() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = tempfile::tempdir()?;
    write_cache_set(temp_dir.path(), "two-days", 2 * DAY)?;

    let janitor = CacheJanitor::builder()
        .cache_dir(temp_dir.path())
        .policy(RetentionPolicy::days(7))
        .build()
        .await?;

    assert_eq!(janitor.cleanup_expired().await?.dirs_removed, 0);
    assert_eq!(janitor.cleanup_expired_days(1).await?.dirs_removed, 1);
    Ok(())
}

#[tokio::test]
async fn test_stale_staging_dir_swept() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = tempfile::tempdir()?;
    let staging = temp_dir
        .path()
        .join(layout::staging_dir_name("abc", "deadbeef"));
    std::fs::create_dir_all(&staging)?;
    std::fs::write(staging.join("channels_0.json"), b"{}")?;

    let janitor = CacheJanitor::builder()
        .cache_dir(temp_dir.path())
        .policy(RetentionPolicy::new().max_age(Duration::ZERO))
        .build()
        .await?;

    // Directory mtimes have at least some resolution; make sure the cutoff is past it.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let report = janitor.cleanup_expired().await?;
    assert_eq!(report.dirs_removed, 1);
    assert!(!staging.exists());
    Ok(())
}

#[tokio::test]
async fn test_report_serializes_camel_case() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = tempfile::tempdir()?;
    let janitor = CacheJanitor::builder()
        .cache_dir(temp_dir.path())
        .build()
        .await?;

    let report = janitor.cleanup_expired().await?;
    let value = serde_json::to_value(&report)?;

    for field in [
        "filesRemoved",
        "dirsRemoved",
        "bytesRemoved",
        "cacheSizeBefore",
        "cacheSizeAfter",
    ] {
        assert!(value.get(field).is_some(), "missing {field}");
    }
    Ok(())
}
