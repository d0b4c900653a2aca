//! Namespace and attribute mutations through the facade.

mod common;

use std::time::{Duration, SystemTime};

use common::{TestFs, user};
use tidefs_vfs::{
    AccessMask, AclEntry, AclRule, AclType, FsError, OpContext, RenameFlags, XattrFlags,
};

// ============================================================================
// mkdir / create
// ============================================================================

#[tokio::test]
async fn test_mkdir_applies_umask_and_owner() {
    let t = TestFs::walking().await;
    let ctx = user();

    let dir = t.fs.mkdir(&ctx, "/d", 0o777, 0o022).await.unwrap();
    assert_eq!(dir.name, "d");
    assert_eq!(dir.attr.mode, 0o755);
    assert_eq!(dir.attr.uid, 1000);
    assert_eq!(t.fs.stat(&ctx, "/d").await.unwrap().inode, dir.inode);
}

#[tokio::test]
async fn test_mkdir_edge_cases() {
    let t = TestFs::walking().await;
    let ctx = OpContext::root();

    assert_eq!(t.fs.mkdir(&ctx, "/", 0o755, 0).await, Err(FsError::AlreadyExists));
    t.fs.mkdir(&ctx, "/d", 0o755, 0).await.unwrap();
    assert_eq!(t.fs.mkdir(&ctx, "/d", 0o755, 0).await, Err(FsError::AlreadyExists));
    assert_eq!(t.fs.mkdir(&ctx, "/x/y", 0o755, 0).await, Err(FsError::NotFound));
    assert_eq!(
        t.fs.create(&ctx, "/d/", 0o644, 0).await.map(drop),
        Err(FsError::InvalidArgument)
    );
}

#[tokio::test]
async fn test_mkdir_all_creates_missing_ancestors() {
    let t = TestFs::walking().await;
    let ctx = OpContext::root();
    t.fs.mkdir(&ctx, "/a", 0o755, 0).await.unwrap();

    t.backend.reset_calls();
    t.fs.mkdir_all(&ctx, "/a/b/c/d", 0o755, 0).await.unwrap();
    assert!(t.fs.stat(&ctx, "/a/b/c/d").await.unwrap().is_dir());
    // Only b, c and d reach the backend; the missing parents fail in resolution.
    assert_eq!(t.backend.calls("mkdir"), 3);

    assert_eq!(
        t.fs.mkdir_all(&ctx, "/a/b", 0o755, 0).await,
        Err(FsError::AlreadyExists)
    );
}

#[tokio::test]
async fn test_mkdir_retries_once_when_cached_parent_was_trashed() {
    let t = TestFs::walking().await;
    let ctx = OpContext::root();
    t.fs.mkdir_all(&ctx, "/a/b", 0o755, 0).await.unwrap();
    let stale = t.fs.stat(&ctx, "/a/b").await.unwrap();

    // Another client deletes /a/b and creates a new directory in its place.
    t.backend.trash("/a/b").unwrap();
    let fresh = t.backend.mkdir_external("/a/b", 0o755).unwrap();
    assert_ne!(stale.inode, fresh);

    let before = t.backend.calls("mkdir");
    let made = t.fs.mkdir(&ctx, "/a/b/c", 0o755, 0).await.unwrap();
    assert_eq!(t.backend.calls("mkdir") - before, 2);
    assert_eq!(t.backend.inode_of("/a/b/c").unwrap(), made.inode);
    assert_eq!(t.fs.stat(&ctx, "/a/b").await.unwrap().inode, fresh);
}

#[tokio::test]
async fn test_create_retries_once_when_cached_parent_was_trashed() {
    let t = TestFs::walking().await;
    let ctx = OpContext::root();
    t.fs.mkdir_all(&ctx, "/a/b", 0o755, 0).await.unwrap();
    t.fs.stat(&ctx, "/a/b").await.unwrap();

    t.backend.trash("/a/b").unwrap();
    t.backend.mkdir_external("/a/b", 0o755).unwrap();

    let before = t.backend.calls("create");
    let file = t.fs.create(&ctx, "/a/b/f", 0o644, 0).await.unwrap();
    assert_eq!(t.backend.calls("create") - before, 2);
    file.close(&ctx).await.unwrap();
    assert!(t.backend.inode_of("/a/b/f").is_ok());
}

#[tokio::test]
async fn test_trashed_parent_without_replacement_fails() {
    let t = TestFs::walking().await;
    let ctx = OpContext::root();
    t.fs.mkdir_all(&ctx, "/a/b", 0o755, 0).await.unwrap();
    t.fs.stat(&ctx, "/a/b").await.unwrap();
    t.backend.trash("/a/b").unwrap();

    let before = t.backend.calls("mkdir");
    assert_eq!(t.fs.mkdir(&ctx, "/a/b/c", 0o755, 0).await, Err(FsError::NotFound));
    assert_eq!(t.backend.calls("mkdir") - before, 1);
}

#[tokio::test]
async fn test_not_found_under_root_is_not_retried() {
    let t = TestFs::walking().await;
    let ctx = OpContext::root();
    t.backend.fail_next("mkdir", FsError::NotFound);

    assert_eq!(t.fs.mkdir(&ctx, "/d", 0o755, 0).await, Err(FsError::NotFound));
    assert_eq!(t.backend.calls("mkdir"), 1);
}

#[tokio::test]
async fn test_create_requires_write_on_parent() {
    let t = TestFs::walking().await;
    t.backend.mkdir_external("/ro", 0o755).unwrap();

    let ctx = user();
    assert_eq!(
        t.fs.create(&ctx, "/ro/f", 0o644, 0).await.map(drop),
        Err(FsError::PermissionDenied)
    );
    assert_eq!(t.backend.calls("create"), 0);
}

// ============================================================================
// delete / rmr / rename / link
// ============================================================================

#[tokio::test]
async fn test_delete_by_type() {
    let t = TestFs::walking().await;
    let ctx = OpContext::root();
    t.fs.mkdir(&ctx, "/d", 0o755, 0).await.unwrap();
    t.write_file(&ctx, "/d/f", b"x").await;
    t.fs.symlink(&ctx, "d", "/l").await.unwrap();

    assert_eq!(t.fs.delete(&ctx, "/d").await, Err(FsError::NotEmpty));
    // The link itself is removed, not its target.
    t.fs.delete(&ctx, "/l").await.unwrap();
    assert!(t.fs.stat(&ctx, "/d").await.is_ok());

    t.fs.delete(&ctx, "/d/f").await.unwrap();
    t.fs.delete(&ctx, "/d").await.unwrap();
    assert_eq!(t.backend.calls("unlink"), 2);
    assert_eq!(t.backend.calls("rmdir"), 2);
    assert_eq!(t.fs.delete(&ctx, "/").await, Err(FsError::InvalidArgument));
    assert_eq!(t.fs.delete(&ctx, "/missing").await, Err(FsError::NotFound));
}

#[tokio::test]
async fn test_rmr_counts_removed_entries() {
    let t = TestFs::walking().await;
    let ctx = OpContext::root();
    t.fs.mkdir_all(&ctx, "/tree/sub", 0o755, 0).await.unwrap();
    t.write_file(&ctx, "/tree/a", b"1").await;
    t.write_file(&ctx, "/tree/sub/b", b"2").await;

    assert_eq!(t.fs.rmr(&ctx, "/tree").await, Ok(4));
    assert_eq!(t.fs.stat(&ctx, "/tree/sub").await, Err(FsError::NotFound));
}

#[tokio::test]
async fn test_rename_flags() {
    let t = TestFs::walking().await;
    let ctx = OpContext::root();
    t.write_file(&ctx, "/a", b"aaa").await;
    t.write_file(&ctx, "/b", b"b").await;

    assert_eq!(
        t.fs.rename(&ctx, "/a", "/b", RenameFlags::NOREPLACE).await,
        Err(FsError::AlreadyExists)
    );

    t.fs.rename(&ctx, "/a", "/b", RenameFlags::EXCHANGE).await.unwrap();
    assert_eq!(t.fs.stat(&ctx, "/a").await.unwrap().size(), 1);
    assert_eq!(t.fs.stat(&ctx, "/b").await.unwrap().size(), 3);

    t.fs.rename(&ctx, "/a", "/b", RenameFlags::empty()).await.unwrap();
    assert_eq!(t.fs.stat(&ctx, "/a").await, Err(FsError::NotFound));
    assert_eq!(t.backend.content("/b").unwrap(), b"b");
}

#[tokio::test]
async fn test_rename_across_directories() {
    let t = TestFs::walking().await;
    let ctx = OpContext::root();
    t.fs.mkdir(&ctx, "/src", 0o755, 0).await.unwrap();
    t.fs.mkdir(&ctx, "/dst", 0o755, 0).await.unwrap();
    t.write_file(&ctx, "/src/f", b"moved").await;
    t.fs.stat(&ctx, "/src/f").await.unwrap();

    t.fs.rename(&ctx, "/src/f", "/dst/f", RenameFlags::empty()).await.unwrap();
    assert_eq!(t.fs.stat(&ctx, "/src/f").await, Err(FsError::NotFound));
    assert_eq!(t.fs.stat(&ctx, "/dst/f").await.unwrap().size(), 5);
}

#[tokio::test]
async fn test_rename_over_linked_file_refreshes_its_link_count() {
    let t = TestFs::walking().await;
    let ctx = OpContext::root();
    t.write_file(&ctx, "/a", b"new").await;
    t.write_file(&ctx, "/b", b"old").await;
    t.fs.link(&ctx, "/b", "/c").await.unwrap();
    assert_eq!(t.fs.stat(&ctx, "/c").await.unwrap().attr.nlink, 2);

    t.fs.rename(&ctx, "/a", "/b", RenameFlags::empty()).await.unwrap();
    let survivor = t.fs.stat(&ctx, "/c").await.unwrap();
    assert_eq!(survivor.attr.nlink, 1);
    assert_eq!(t.backend.content("/c").unwrap(), b"old");
    assert_eq!(t.backend.content("/b").unwrap(), b"new");
}

#[tokio::test]
async fn test_hard_link_shares_inode() {
    let t = TestFs::walking().await;
    let ctx = OpContext::root();
    t.write_file(&ctx, "/f", b"shared").await;

    let linked = t.fs.link(&ctx, "/f", "/g").await.unwrap();
    let original = t.fs.stat(&ctx, "/f").await.unwrap();
    assert_eq!(linked.inode, original.inode);
    assert_eq!(original.attr.nlink, 2);

    t.fs.mkdir(&ctx, "/d", 0o755, 0).await.unwrap();
    assert_eq!(t.fs.link(&ctx, "/d", "/e").await.map(drop), Err(FsError::NotPermitted));
}

// ============================================================================
// truncate / copy_file_range
// ============================================================================

#[tokio::test]
async fn test_truncate_notifies_data_engine() {
    let t = TestFs::walking().await;
    let ctx = OpContext::root();
    t.write_file(&ctx, "/f", b"0123456789").await;
    t.fs.stat(&ctx, "/f").await.unwrap();

    t.fs.truncate(&ctx, "/f", 4).await.unwrap();
    assert_eq!(t.fs.stat(&ctx, "/f").await.unwrap().size(), 4);
    assert_eq!(t.backend.content("/f").unwrap(), b"0123");
    assert_eq!(t.backend.calls("read_truncate"), 1);
    assert_eq!(t.backend.calls("write_truncate"), 1);

    t.fs.mkdir(&ctx, "/d", 0o755, 0).await.unwrap();
    assert_eq!(t.fs.truncate(&ctx, "/d", 0).await, Err(FsError::IsADirectory));
}

#[tokio::test]
async fn test_copy_file_range_invalidates_destination() {
    let t = TestFs::walking().await;
    let ctx = OpContext::root();
    t.write_file(&ctx, "/src", b"hello world").await;
    t.write_file(&ctx, "/dst", b"").await;
    assert_eq!(t.fs.stat(&ctx, "/dst").await.unwrap().size(), 0);

    let copied = t.fs.copy_file_range(&ctx, "/src", 6, "/dst", 0, 100).await.unwrap();
    assert_eq!(copied, 5);
    assert_eq!(t.backend.content("/dst").unwrap(), b"world");
    assert_eq!(t.fs.stat(&ctx, "/dst").await.unwrap().size(), 5);
    assert_eq!(t.backend.calls("invalidate_chunk_cache"), 1);

    // Nothing copied, nothing to invalidate.
    assert_eq!(t.fs.copy_file_range(&ctx, "/src", 64, "/dst", 0, 10).await, Ok(0));
    assert_eq!(t.backend.calls("invalidate_chunk_cache"), 1);
}

#[tokio::test]
async fn test_copy_file_range_rejects_wrapping_offsets() {
    let t = TestFs::walking().await;
    let ctx = OpContext::root();
    t.write_file(&ctx, "/src", b"hello world").await;
    t.write_file(&ctx, "/dst", b"").await;

    assert_eq!(
        t.fs.copy_file_range(&ctx, "/src", 0, "/dst", u64::MAX, 6).await,
        Err(FsError::InvalidArgument)
    );
    assert_eq!(
        t.fs.copy_file_range(&ctx, "/src", u64::MAX - 2, "/dst", 0, 6).await,
        Err(FsError::InvalidArgument)
    );
    assert_eq!(t.backend.calls("copy_file_range"), 0);

    assert_eq!(t.fs.copy_file_range(&ctx, "/src", 0, "/dst", 0, 5).await, Ok(5));
    assert_eq!(t.backend.content("/dst").unwrap(), b"hello");
}

#[tokio::test]
async fn test_copy_file_range_permissions() {
    let t = TestFs::walking().await;
    let root = OpContext::root();
    let ctx = user();
    t.write_file(&root, "/secret", b"secret").await;
    t.fs.chmod(&root, "/secret", 0o600).await.unwrap();
    t.write_file(&ctx, "/mine", b"").await;

    assert_eq!(
        t.fs.copy_file_range(&ctx, "/secret", 0, "/mine", 0, 6).await,
        Err(FsError::PermissionDenied)
    );
    assert_eq!(
        t.fs.copy_file_range(&ctx, "/mine", 0, "/secret", 0, 6).await,
        Err(FsError::PermissionDenied)
    );
}

// ============================================================================
// chmod / chown / utime
// ============================================================================

#[tokio::test]
async fn test_chmod_owner_only() {
    let t = TestFs::walking().await;
    let ctx = user();
    t.write_file(&ctx, "/mine", b"").await;
    t.write_file(&OpContext::root(), "/theirs", b"").await;

    t.fs.chmod(&ctx, "/mine", 0o600).await.unwrap();
    assert_eq!(t.fs.stat(&ctx, "/mine").await.unwrap().attr.mode, 0o600);
    assert_eq!(
        t.fs.chmod(&ctx, "/theirs", 0o777).await,
        Err(FsError::PermissionDenied)
    );
}

#[tokio::test]
async fn test_chown_rules() {
    let t = TestFs::walking().await;
    let ctx = OpContext::with_groups(1000, vec![1000, 2000], 1);
    t.write_file(&ctx, "/f", b"").await;

    t.fs.chown(&ctx, "/f", 1000, 2000).await.unwrap();
    assert_eq!(t.fs.stat(&ctx, "/f").await.unwrap().attr.gid, 2000);

    assert_eq!(t.fs.chown(&ctx, "/f", 1000, 3000).await, Err(FsError::PermissionDenied));
    assert_eq!(t.fs.chown(&ctx, "/f", 0, 2000).await, Err(FsError::PermissionDenied));

    let before = t.backend.calls("set_attr");
    t.fs.chown(&ctx, "/f", 1000, 2000).await.unwrap();
    assert_eq!(t.backend.calls("set_attr"), before);

    t.fs.chown(&OpContext::root(), "/f", 0, 0).await.unwrap();
    let attr = t.fs.stat(&ctx, "/f").await.unwrap().attr;
    assert_eq!((attr.uid, attr.gid), (0, 0));
}

#[tokio::test]
async fn test_utime_sets_only_given_times() {
    let t = TestFs::walking().await;
    let ctx = OpContext::root();
    t.write_file(&ctx, "/f", b"").await;
    let before = t.fs.stat(&ctx, "/f").await.unwrap().attr;

    let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
    t.fs.utime(&ctx, "/f", None, Some(mtime)).await.unwrap();
    let after = t.fs.stat(&ctx, "/f").await.unwrap().attr;
    assert_eq!(after.mtime, mtime);
    assert_eq!(after.atime, before.atime);

    let calls = t.backend.calls("set_attr");
    t.fs.utime(&ctx, "/f", None, None).await.unwrap();
    assert_eq!(t.backend.calls("set_attr"), calls);
}

#[tokio::test]
async fn test_utime_requires_write_access() {
    let t = TestFs::walking().await;
    t.write_file(&OpContext::root(), "/f", b"").await;

    assert_eq!(
        t.fs.utime(&user(), "/f", Some(SystemTime::now()), None).await,
        Err(FsError::PermissionDenied)
    );
}

// ============================================================================
// xattr / ACL
// ============================================================================

#[tokio::test]
async fn test_xattr_lifecycle() {
    let t = TestFs::walking().await;
    let ctx = OpContext::root();
    t.write_file(&ctx, "/f", b"").await;

    t.fs.set_xattr(&ctx, "/f", "user.k", b"v1", XattrFlags::CREATE).await.unwrap();
    assert_eq!(
        t.fs.set_xattr(&ctx, "/f", "user.k", b"v2", XattrFlags::CREATE).await,
        Err(FsError::AlreadyExists)
    );
    t.fs.set_xattr(&ctx, "/f", "user.k", b"v2", XattrFlags::REPLACE).await.unwrap();
    assert_eq!(t.fs.get_xattr(&ctx, "/f", "user.k").await.unwrap(), b"v2");
    assert_eq!(t.fs.list_xattr(&ctx, "/f").await.unwrap(), vec!["user.k".to_string()]);

    t.fs.remove_xattr(&ctx, "/f", "user.k").await.unwrap();
    let err = t.fs.get_xattr(&ctx, "/f", "user.k").await.unwrap_err();
    assert_eq!(err, FsError::NoAttribute);
    assert!(err.is_not_found());
    assert_eq!(t.fs.remove_xattr(&ctx, "/f", "user.k").await, Err(FsError::NoAttribute));
}

#[tokio::test]
async fn test_xattr_permissions() {
    let t = TestFs::walking().await;
    t.write_file(&OpContext::root(), "/f", b"").await;
    let ctx = user();

    assert_eq!(t.fs.list_xattr(&ctx, "/f").await, Ok(Vec::new()));
    assert_eq!(
        t.fs.set_xattr(&ctx, "/f", "user.k", b"v", XattrFlags::empty()).await,
        Err(FsError::PermissionDenied)
    );
}

fn named_user_rule() -> AclRule {
    AclRule {
        owner: 6,
        group: 4,
        mask: 6,
        other: 4,
        named_users: vec![AclEntry { id: 1000, perm: 6 }],
        named_groups: Vec::new(),
    }
}

#[tokio::test]
async fn test_access_acl_roundtrip_and_removal() {
    let t = TestFs::walking().await;
    let ctx = OpContext::root();
    t.write_file(&ctx, "/f", b"").await;
    assert_eq!(t.fs.stat(&ctx, "/f").await.unwrap().attr.mode, 0o644);

    let rule = named_user_rule();
    t.fs.set_facl(&ctx, "/f", AclType::Access, &rule).await.unwrap();
    assert_eq!(t.fs.get_facl(&ctx, "/f", AclType::Access).await.unwrap(), rule);
    let attr = t.fs.stat(&ctx, "/f").await.unwrap().attr;
    assert!(attr.access_acl);
    assert_eq!(attr.mode, 0o664);

    // An empty rule folds the mask into the group bits and drops the ACL.
    t.fs.set_facl(&ctx, "/f", AclType::Access, &AclRule::empty()).await.unwrap();
    let attr = t.fs.stat(&ctx, "/f").await.unwrap().attr;
    assert!(!attr.access_acl);
    assert_eq!(attr.mode, 0o644);
    assert_eq!(
        t.fs.get_facl(&ctx, "/f", AclType::Access).await,
        Err(FsError::NoAttribute)
    );
}

#[tokio::test]
async fn test_default_acl_only_on_directories() {
    let t = TestFs::walking().await;
    let ctx = OpContext::root();
    t.write_file(&ctx, "/f", b"").await;
    t.fs.mkdir(&ctx, "/d", 0o755, 0).await.unwrap();

    assert_eq!(
        t.fs.set_facl(&ctx, "/f", AclType::Default, &named_user_rule()).await,
        Err(FsError::InvalidArgument)
    );
    t.fs.set_facl(&ctx, "/d", AclType::Default, &named_user_rule()).await.unwrap();
    assert!(t.fs.stat(&ctx, "/d").await.unwrap().attr.default_acl);
}

#[tokio::test]
async fn test_set_facl_owner_only() {
    let t = TestFs::walking().await;
    t.write_file(&OpContext::root(), "/f", b"").await;

    assert_eq!(
        t.fs.set_facl(&user(), "/f", AclType::Access, &named_user_rule()).await,
        Err(FsError::NotPermitted)
    );
}

// ============================================================================
// statfs / summary / access
// ============================================================================

#[tokio::test]
async fn test_summary_and_statfs() {
    let t = TestFs::walking().await;
    let ctx = OpContext::root();
    t.fs.mkdir_all(&ctx, "/s/sub", 0o755, 0).await.unwrap();
    t.write_file(&ctx, "/s/a", b"12345").await;
    t.write_file(&ctx, "/s/sub/b", b"123").await;

    let summary = t.fs.summary(&ctx, "/s").await.unwrap();
    assert_eq!(summary.dirs, 2);
    assert_eq!(summary.files, 2);
    assert_eq!(summary.length, 8);
    assert_eq!(summary.size, 4 * 4096);

    let statfs = t.fs.stat_fs(&ctx).await.unwrap();
    assert!(statfs.avail_space < statfs.total_space);
    assert!(statfs.used_inodes >= 5);
}

#[tokio::test]
async fn test_access_checks_mode_bits() {
    let t = TestFs::walking().await;
    t.write_file(&OpContext::root(), "/f", b"").await;
    let ctx = user();

    t.fs.access(&ctx, "/f", AccessMask::READ).await.unwrap();
    assert_eq!(
        t.fs.access(&ctx, "/f", AccessMask::READ | AccessMask::WRITE).await,
        Err(FsError::PermissionDenied)
    );
    t.fs.access(&OpContext::root(), "/f", AccessMask::WRITE).await.unwrap();
}
