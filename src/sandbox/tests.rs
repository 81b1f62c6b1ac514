use crate::sandbox::{FsError, Sandbox, SandboxBuilder, DEFAULT_MAX_FILE_SIZE};
use std::fs;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn sandbox() -> (TempDir, Sandbox) {
    let dir = TempDir::new().unwrap();
    let sandbox = SandboxBuilder::new(dir.path()).build().unwrap();
    (dir, sandbox)
}

#[test]
fn test_builder_creates_missing_root() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("not/yet/there");

    let sandbox = SandboxBuilder::new(&root).build().unwrap();

    assert!(root.is_dir());
    assert_eq!(sandbox.root(), fs::canonicalize(&root).unwrap());
    assert_eq!(sandbox.max_file_size(), DEFAULT_MAX_FILE_SIZE);
}

#[test]
fn test_write_then_read() {
    let (_dir, sandbox) = sandbox();
    let path = sandbox.resolve("hello.txt").unwrap();

    sandbox.write(&path, b"hello world").unwrap();

    assert_eq!(sandbox.read(&path).unwrap(), b"hello world");
    assert_eq!(sandbox.read_to_string(&path).unwrap(), "hello world");
}

#[test]
fn test_write_truncates_existing_file() {
    let (_dir, sandbox) = sandbox();
    let path = sandbox.resolve("notes.txt").unwrap();

    sandbox.write(&path, b"a much longer first version").unwrap();
    sandbox.write(&path, b"short").unwrap();

    assert_eq!(sandbox.read(&path).unwrap(), b"short");
}

#[test]
fn test_read_missing_file_is_not_found() {
    let (_dir, sandbox) = sandbox();
    let path = sandbox.resolve("missing.txt").unwrap();

    assert!(matches!(sandbox.read(&path), Err(FsError::NotFound(_))));
}

#[test]
fn test_read_to_string_rejects_binary() {
    let (_dir, sandbox) = sandbox();
    let path = sandbox.resolve("blob.bin").unwrap();
    sandbox.write(&path, &[0xff, 0xfe, 0x00]).unwrap();

    assert!(matches!(
        sandbox.read_to_string(&path),
        Err(FsError::InvalidData(_))
    ));
}

#[test]
fn test_oversized_write_touches_nothing() {
    let (dir, sandbox) = sandbox();
    let path = sandbox.resolve("big.bin").unwrap();
    let content = vec![b'x'; DEFAULT_MAX_FILE_SIZE as usize + 1];

    let result = sandbox.write(&path, &content);

    assert!(matches!(
        result,
        Err(FsError::SizeLimitExceeded { size, max })
            if size == DEFAULT_MAX_FILE_SIZE + 1 && max == DEFAULT_MAX_FILE_SIZE
    ));
    assert!(!dir.path().join("big.bin").exists());
}

#[test]
fn test_oversized_write_leaves_existing_content() {
    let dir = TempDir::new().unwrap();
    let sandbox = SandboxBuilder::new(dir.path()).max_file_size(8).build().unwrap();
    let path = sandbox.resolve("keep.txt").unwrap();
    sandbox.write(&path, b"original").unwrap();

    assert!(sandbox.write(&path, b"way past eight bytes").is_err());
    assert_eq!(sandbox.read(&path).unwrap(), b"original");
}

#[test]
fn test_write_exactly_at_limit() {
    let dir = TempDir::new().unwrap();
    let sandbox = SandboxBuilder::new(dir.path()).max_file_size(4).build().unwrap();
    let path = sandbox.resolve("edge.txt").unwrap();

    assert!(sandbox.write(&path, b"1234").is_ok());
}

#[test]
fn test_append() {
    let (_dir, sandbox) = sandbox();
    let path = sandbox.resolve("log.txt").unwrap();
    sandbox.write(&path, b"line one").unwrap();

    sandbox.append(&path, b"\nline two").unwrap();

    assert_eq!(sandbox.read_to_string(&path).unwrap(), "line one\nline two");
}

#[test]
fn test_append_respects_combined_size() {
    let dir = TempDir::new().unwrap();
    let sandbox = SandboxBuilder::new(dir.path()).max_file_size(10).build().unwrap();
    let path = sandbox.resolve("log.txt").unwrap();
    sandbox.write(&path, b"123456").unwrap();

    let result = sandbox.append(&path, b"78901");

    assert!(matches!(
        result,
        Err(FsError::SizeLimitExceeded { size: 11, max: 10 })
    ));
    assert_eq!(sandbox.read(&path).unwrap(), b"123456");
}

#[test]
fn test_append_to_missing_file_is_not_found() {
    let (_dir, sandbox) = sandbox();
    let path = sandbox.resolve("nope.txt").unwrap();

    assert!(matches!(
        sandbox.append(&path, b"data"),
        Err(FsError::NotFound(_))
    ));
}

#[test]
fn test_concurrent_appends_never_overshoot() {
    let dir = TempDir::new().unwrap();
    let sandbox = Arc::new(SandboxBuilder::new(dir.path()).max_file_size(50).build().unwrap());
    let path = sandbox.resolve("counter.txt").unwrap();
    sandbox.write(&path, b"").unwrap();

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let sandbox = Arc::clone(&sandbox);
            let path = path.clone();
            thread::spawn(move || sandbox.append(&path, b"xxxxx").is_ok())
        })
        .collect();
    let succeeded = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();

    assert_eq!(succeeded, 10);
    assert_eq!(sandbox.read(&path).unwrap().len(), 50);
}

#[test]
fn test_delete() {
    let (dir, sandbox) = sandbox();
    let path = sandbox.resolve("temp.txt").unwrap();
    sandbox.write(&path, b"bye").unwrap();

    sandbox.delete(&path).unwrap();

    assert!(!dir.path().join("temp.txt").exists());
    assert!(matches!(sandbox.delete(&path), Err(FsError::NotFound(_))));
}

#[test]
fn test_copy() {
    let (_dir, sandbox) = sandbox();
    let src = sandbox.resolve("source.txt").unwrap();
    let dst = sandbox.resolve("source_copy.txt").unwrap();
    sandbox.write(&src, b"payload").unwrap();

    sandbox.copy(&src, &dst).unwrap();

    assert_eq!(sandbox.read(&src).unwrap(), b"payload");
    assert_eq!(sandbox.read(&dst).unwrap(), b"payload");
}

#[test]
fn test_copy_rejects_oversized_source() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("huge.bin"), vec![0u8; 32]).unwrap();
    let sandbox = SandboxBuilder::new(dir.path()).max_file_size(16).build().unwrap();
    let src = sandbox.resolve("huge.bin").unwrap();
    let dst = sandbox.resolve("huge_copy.bin").unwrap();

    assert!(matches!(
        sandbox.copy(&src, &dst),
        Err(FsError::SizeLimitExceeded { size: 32, max: 16 })
    ));
    assert!(!dir.path().join("huge_copy.bin").exists());
}

#[test]
fn test_copy_missing_source() {
    let (_dir, sandbox) = sandbox();
    let src = sandbox.resolve("ghost.txt").unwrap();
    let dst = sandbox.resolve("copy.txt").unwrap();

    assert!(matches!(sandbox.copy(&src, &dst), Err(FsError::NotFound(_))));
}

#[test]
fn test_move_file() {
    let (dir, sandbox) = sandbox();
    let src = sandbox.resolve("old.txt").unwrap();
    let archive_dir = sandbox.resolve("archive").unwrap();
    let dst = sandbox.resolve("archive/old.txt").unwrap();
    sandbox.write(&src, b"moving").unwrap();
    sandbox.create_directory(&archive_dir).unwrap();

    sandbox.move_file(&src, &dst).unwrap();

    assert!(!dir.path().join("old.txt").exists());
    assert_eq!(sandbox.read(&dst).unwrap(), b"moving");
}

#[test]
fn test_list_directory() {
    let (_dir, sandbox) = sandbox();
    sandbox.write(&sandbox.resolve("file.txt").unwrap(), b"Hello").unwrap();
    sandbox.create_directory(&sandbox.resolve("subdir").unwrap()).unwrap();

    let mut entries = sandbox.list_directory(&sandbox.resolve(".").unwrap()).unwrap();
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].name, "file.txt");
    assert!(!entries[0].is_dir);
    assert_eq!(entries[0].size, 5);
    assert_eq!(entries[1].name, "subdir");
    assert!(entries[1].is_dir);
    assert_eq!(entries[1].size, 0);
}

#[test]
fn test_list_missing_directory() {
    let (_dir, sandbox) = sandbox();
    let path = sandbox.resolve("nowhere").unwrap();

    assert!(matches!(
        sandbox.list_directory(&path),
        Err(FsError::NotFound(_))
    ));
}

#[test]
fn test_create_directory_is_recursive_and_idempotent() {
    let (dir, sandbox) = sandbox();
    let path = sandbox.resolve("reports/2024/q1").unwrap();

    sandbox.create_directory(&path).unwrap();
    sandbox.create_directory(&path).unwrap();

    assert!(dir.path().join("reports/2024/q1").is_dir());
}

#[test]
fn test_disk_usage_of_root_filesystem() {
    let (_dir, sandbox) = sandbox();

    let usage = sandbox.disk_usage().unwrap();

    assert!(usage.total > 0);
    assert!(usage.free <= usage.total);
    assert!((0.0..=100.0).contains(&usage.used_percent()));
}

#[test]
fn test_concurrent_writers_never_interleave() {
    let (_dir, sandbox) = sandbox();
    let sandbox = Arc::new(sandbox);
    let path = sandbox.resolve("race_test.txt").unwrap();

    // Large enough that an unguarded write would be split across syscalls
    let candidates: Vec<Vec<u8>> = (0..100u8)
        .map(|i| vec![b'a' + (i % 26); 64 * 1024 + i as usize])
        .collect();

    let handles: Vec<_> = candidates
        .iter()
        .cloned()
        .map(|content| {
            let sandbox = Arc::clone(&sandbox);
            let path = path.clone();
            thread::spawn(move || sandbox.write(&path, &content))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    let final_content = sandbox.read(&path).unwrap();
    assert!(candidates.contains(&final_content));
}

#[test]
fn test_concurrent_reads_and_writes() {
    let (_dir, sandbox) = sandbox();
    let sandbox = Arc::new(sandbox);
    let path = sandbox.resolve("shared.txt").unwrap();
    sandbox.write(&path, b"initial").unwrap();

    let mut handles = Vec::new();
    for i in 0..50u8 {
        let reader = Arc::clone(&sandbox);
        let read_path = path.clone();
        handles.push(thread::spawn(move || {
            let content = reader.read(&read_path).unwrap();
            // A reader only ever observes a complete write
            assert!(content == b"initial" || content.starts_with(b"write "));
            assert!(content == b"initial" || content.len() == 7);
        }));

        let writer = Arc::clone(&sandbox);
        let write_path = path.clone();
        handles.push(thread::spawn(move || {
            let content = format!("write {}", i % 10);
            writer.write(&write_path, content.as_bytes()).unwrap();
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

#[cfg(unix)]
mod symlinks {
    use super::*;
    use std::os::unix::fs::symlink;

    #[test]
    fn test_symlinked_directory_escape_rejected() {
        let (dir, sandbox) = sandbox();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret.txt"), "secret").unwrap();
        symlink(outside.path(), dir.path().join("link")).unwrap();

        let path = sandbox.resolve("link/secret.txt").unwrap();

        assert!(matches!(sandbox.read(&path), Err(FsError::PathTraversal)));
        assert!(matches!(
            sandbox.write(&path, b"overwrite"),
            Err(FsError::PathTraversal)
        ));
        assert_eq!(
            fs::read_to_string(outside.path().join("secret.txt")).unwrap(),
            "secret"
        );
    }

    #[test]
    fn test_dangling_symlink_rejected() {
        let (dir, sandbox) = sandbox();
        let outside = TempDir::new().unwrap();
        let target = outside.path().join("created_outside.txt");
        symlink(&target, dir.path().join("trap.txt")).unwrap();

        let path = sandbox.resolve("trap.txt").unwrap();

        assert!(matches!(
            sandbox.write(&path, b"gotcha"),
            Err(FsError::PathTraversal)
        ));
        assert!(!target.exists());
    }

    #[test]
    fn test_symlink_inside_sandbox_allowed() {
        let (dir, sandbox) = sandbox();
        fs::write(dir.path().join("real.txt"), "inside").unwrap();
        symlink(dir.path().join("real.txt"), dir.path().join("alias.txt")).unwrap();

        let path = sandbox.resolve("alias.txt").unwrap();

        assert_eq!(sandbox.read(&path).unwrap(), b"inside");
    }

    #[test]
    fn test_symlink_check_can_be_disabled() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("shared.txt"), "shared").unwrap();
        symlink(outside.path(), dir.path().join("mount")).unwrap();
        let sandbox = SandboxBuilder::new(dir.path())
            .verify_symlinks(false)
            .build()
            .unwrap();

        let path = sandbox.resolve("mount/shared.txt").unwrap();

        assert_eq!(sandbox.read(&path).unwrap(), b"shared");
    }
}
