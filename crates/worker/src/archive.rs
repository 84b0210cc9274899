//! Post-success disposition: archive or delete.
//!
//! Archived files land under
//! `${work}/archive/<host-alias>/<job-id-hex>/<expiry-bucket-hex>/<name>`,
//! where the bucket is the expiry time rounded down to the archive
//! granularity, so a sweeper can drop whole directories as they age out.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use afd_core::ids::JobId;
use afd_core::WorkDir;

/// Bucket width in seconds; one directory per expiry window.
pub const ARCHIVE_STEP_TIME: i64 = 3600;

/// Moves a delivered file into the archive.
///
/// Returns the archive path relative to the archive root, the form the
/// output log records.
pub fn archive_file(
    work: &WorkDir,
    host_alias: &str,
    job_id: JobId,
    archive_time: u32,
    source: &Path,
    file_name: &str,
    now: i64,
) -> io::Result<String> {
    let expiry = now + i64::from(archive_time);
    let bucket = expiry - expiry.rem_euclid(ARCHIVE_STEP_TIME) + ARCHIVE_STEP_TIME;
    let relative = format!("{host_alias}/{}/{bucket:x}/{file_name}", job_id.as_hex());
    let target = work.archive_dir().join(&relative);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    move_file(source, &target)?;
    Ok(relative)
}

/// Renames, falling back to copy+unlink across filesystems.
pub fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
        Err(e) => Err(e),
    }
}

/// Removes a whole per-message spool directory, best effort.
pub fn remove_msg_dir(dir: &Path) {
    let _ = fs::remove_dir_all(dir);
}

/// The spool files of one message, sorted by name for a stable send order.
pub fn spool_files(dir: &Path) -> io::Result<Vec<(PathBuf, u64)>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_file() {
            out.push((entry.path(), meta.len()));
        }
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_moves_into_an_expiry_bucket() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let work = WorkDir::new(tmp.path());
        work.create_all().expect("creates");
        let src = tmp.path().join("payload");
        fs::write(&src, b"data").expect("writes");

        let rel = archive_file(&work, "alpha", JobId(0xfe), 600, &src, "payload", 10_000)
            .expect("archives");
        assert!(rel.starts_with("alpha/fe/"), "{rel}");
        assert!(rel.ends_with("/payload"), "{rel}");
        assert!(!src.exists());
        assert_eq!(
            fs::read(work.archive_dir().join(&rel)).expect("reads"),
            b"data"
        );
    }

    #[test]
    fn bucket_is_stable_within_the_window() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let work = WorkDir::new(tmp.path());
        work.create_all().expect("creates");
        for (i, now) in [10_000, 10_100].iter().enumerate() {
            let src = tmp.path().join(format!("f{i}"));
            fs::write(&src, b"x").expect("writes");
            let rel = archive_file(&work, "h", JobId(1), 60, &src, &format!("f{i}"), *now)
                .expect("archives");
            let bucket = rel.split('/').nth(2).map(ToOwned::to_owned);
            assert_eq!(bucket.as_deref(), Some("2a30"), "now={now}");
        }
    }

    #[test]
    fn spool_files_sorted_and_sized() {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::write(tmp.path().join("b"), b"22").expect("writes");
        fs::write(tmp.path().join("a"), b"4444").expect("writes");
        fs::create_dir(tmp.path().join("sub")).expect("mkdir");

        let files = spool_files(tmp.path()).expect("lists");
        assert_eq!(files.len(), 2);
        assert!(files[0].0.ends_with("a"));
        assert_eq!(files[0].1, 4);
        assert_eq!(files[1].1, 2);
    }

    #[test]
    fn move_file_plain_rename() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let from = tmp.path().join("from");
        let to = tmp.path().join("to");
        fs::write(&from, b"x").expect("writes");
        move_file(&from, &to).expect("moves");
        assert!(!from.exists());
        assert!(to.exists());
    }
}
