//! Concurrent use of one filesystem from many tasks.

mod common;

use std::sync::Arc;

use common::TestFs;
use tidefs_vfs::{AccessMask, FsError, OpContext, ReadOutcome, RenameFlags, VfsConfig};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_in_one_directory() {
    let t = Arc::new(TestFs::walking().await);
    let ctx = OpContext::root();
    t.fs.mkdir(&ctx, "/shared", 0o777, 0).await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..32 {
        let t = Arc::clone(&t);
        tasks.push(tokio::spawn(async move {
            let ctx = OpContext::new(1000 + i, 1000, 4242);
            let path = format!("/shared/f{i:02}");
            t.write_file(&ctx, &path, path.as_bytes()).await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let dir = t.fs.open(&ctx, "/shared", AccessMask::READ).await.unwrap();
    let entries = dir.readdir_plus(&ctx, 0).await.unwrap();
    assert_eq!(entries.len(), 32);
    for entry in &entries {
        let path = format!("/shared/{}", entry.name);
        assert_eq!(t.backend.content(&path).unwrap(), path.as_bytes());
    }
    assert_eq!(t.fs.stats().open_handles(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_mkdir_has_one_winner() {
    let t = Arc::new(TestFs::walking().await);

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let t = Arc::clone(&t);
        tasks.push(tokio::spawn(async move {
            t.fs.mkdir(&OpContext::root(), "/race", 0o755, 0).await.map(drop)
        }));
    }
    let mut won = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(()) => won += 1,
            Err(err) => assert_eq!(err, FsError::AlreadyExists),
        }
    }
    assert_eq!(won, 1);
    assert!(t.fs.stat(&OpContext::root(), "/race").await.unwrap().is_dir());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shared_handle_serializes_writes() {
    let t = TestFs::walking().await;
    let ctx = OpContext::root();
    let file = Arc::new(t.fs.create(&ctx, "/f", 0o644, 0).await.unwrap());

    let mut tasks = Vec::new();
    for i in 0..16u8 {
        let file = Arc::clone(&file);
        tasks.push(tokio::spawn(async move {
            let ctx = OpContext::root();
            file.pwrite(&ctx, &[b'a' + i; 4], u64::from(i) * 4).await
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), Ok(4));
    }
    assert_eq!(file.stat().await.size(), 64);

    let mut buf = [0u8; 64];
    assert_eq!(file.pread(&ctx, &mut buf, 0).await, Ok(ReadOutcome::Data(64)));
    for (i, chunk) in buf.chunks(4).enumerate() {
        assert!(chunk.iter().all(|b| *b == b'a' + i as u8), "chunk {i}: {chunk:?}");
    }
    file.close(&ctx).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_and_renames_interleave() {
    let t = Arc::new(TestFs::new(VfsConfig::default()).await);
    let ctx = OpContext::root();
    t.fs.mkdir_all(&ctx, "/src/deep", 0o755, 0).await.unwrap();
    t.write_file(&ctx, "/src/deep/file", b"payload").await;

    let reader = {
        let t = Arc::clone(&t);
        tokio::spawn(async move {
            let ctx = OpContext::root();
            let mut seen = 0;
            for _ in 0..200 {
                match t.fs.stat(&ctx, "/src/deep/file").await {
                    Ok(info) => {
                        assert_eq!(info.size(), 7);
                        seen += 1;
                    }
                    Err(err) => assert_eq!(err, FsError::NotFound),
                }
                tokio::task::yield_now().await;
            }
            seen
        })
    };
    let renamer = {
        let t = Arc::clone(&t);
        tokio::spawn(async move {
            let ctx = OpContext::root();
            for _ in 0..50 {
                t.fs.rename(&ctx, "/src", "/dst", RenameFlags::empty()).await.unwrap();
                t.fs.rename(&ctx, "/dst", "/src", RenameFlags::empty()).await.unwrap();
            }
        })
    };

    renamer.await.unwrap();
    reader.await.unwrap();
    // Once quiet, the original path resolves again.
    assert_eq!(t.fs.stat(&ctx, "/src/deep/file").await.unwrap().size(), 7);
    assert_eq!(t.fs.stat(&ctx, "/dst").await.map(drop), Err(FsError::NotFound));
}
