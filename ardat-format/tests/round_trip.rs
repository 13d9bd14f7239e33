use std::path::Path;

use ardat_format::fs::ACCESS_TIME;
use ardat_format::{
    ArchiveEntityProperty, ArchiveTreeBuilder, ArchiveTreeWriter, ChannelFactory, ContentEncoding,
    Error, FsTreeBuilder, FsTreeWriter, TreeBuilder, TreeRoot, TreeWriter,
};
use tempfile::TempDir;

fn xattrs_supported(dir: &Path) -> bool {
    #[cfg(unix)]
    {
        let marker = dir.join(".xattr-check");
        std::fs::write(&marker, "").unwrap();
        let supported = xattr::set(&marker, "user.check", b"1").is_ok();
        std::fs::remove_file(&marker).unwrap();
        supported
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
        false
    }
}

/// `a/b.txt` holding `hi` with `owner=bob`, and an empty `a/c/`.
fn fixture(dir: &Path) -> std::path::PathBuf {
    let root = dir.join("a");
    std::fs::create_dir_all(root.join("c")).unwrap();
    std::fs::write(root.join("b.txt"), "hi").unwrap();
    #[cfg(unix)]
    {
        if xattrs_supported(dir) {
            xattr::set(root.join("b.txt"), "user.owner", b"bob").unwrap();
        }
    }
    root
}

#[test]
fn filesystem_round_trip() {
    let work = TempDir::new().unwrap();
    let source = fixture(work.path());
    let archive = work.path().join("a.ardat");
    let factory = ChannelFactory::new();

    let tree = FsTreeBuilder::new(&source)
        .with_factory(factory.clone())
        .build()
        .unwrap();
    tree.find("a/b.txt").unwrap().set_property("owner", "bob").unwrap();
    ArchiveTreeWriter::create_with_factory(&archive, factory.clone())
        .unwrap()
        .write(&tree)
        .unwrap();
    drop(tree);
    assert_eq!(factory.open_descriptors(), 0);

    let mut builder = ArchiveTreeBuilder::open(&archive).with_factory(factory.clone());
    let rebuilt = builder.build().unwrap();
    drop(builder);
    let names: Vec<_> = rebuilt
        .depth_first()
        .unwrap()
        .iter()
        .map(|e| e.relative_path().to_string())
        .collect();
    assert_eq!(names, ["a", "a/b.txt", "a/c"]);

    let file = rebuilt.find("a/b.txt").unwrap();
    assert_eq!(file.get_property("owner").as_deref(), Some("bob"));
    assert_eq!(file.parent().unwrap().name(), "a");
    assert_eq!(factory.open_descriptors(), 1);
    assert_eq!(factory.reference_count(&archive), 1);

    let out = work.path().join("out");
    std::fs::create_dir(&out).unwrap();
    FsTreeWriter::new(&out)
        .with_factory(factory.clone())
        .write(&rebuilt)
        .unwrap();
    rebuilt.close();
    assert_eq!(factory.open_descriptors(), 0);

    assert_eq!(std::fs::read(out.join("a").join("b.txt")).unwrap(), b"hi");
    let empty = out.join("a").join("c");
    assert!(empty.is_dir());
    assert_eq!(std::fs::read_dir(&empty).unwrap().count(), 0);

    #[cfg(unix)]
    {
        if xattrs_supported(work.path()) {
            let value = xattr::get(out.join("a").join("b.txt"), "user.owner").unwrap();
            assert_eq!(value.as_deref(), Some(&b"bob"[..]));
        }
    }
}

/// Every entity's path and properties in pre-order, leaving out the access time that reading the
/// tree itself disturbs.
fn snapshot(tree: &TreeRoot) -> Vec<(String, Vec<ArchiveEntityProperty>)> {
    tree.depth_first()
        .unwrap()
        .iter()
        .map(|entity| {
            let mut properties: Vec<_> = entity
                .properties()
                .into_iter()
                .filter(|p| p.key() != ACCESS_TIME)
                .collect();
            properties.sort_by(|a, b| a.key().cmp(b.key()));
            (entity.relative_path().to_string(), properties)
        })
        .collect()
}

#[test]
fn round_trip_keeps_every_property() {
    let work = TempDir::new().unwrap();
    let source = fixture(work.path());
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(source.join("b.txt"), std::fs::Permissions::from_mode(0o640)).unwrap();
        std::fs::set_permissions(source.join("c"), std::fs::Permissions::from_mode(0o750)).unwrap();
    }
    let old = std::time::UNIX_EPOCH + std::time::Duration::from_millis(1_500_000_000_250);
    std::fs::File::open(source.join("b.txt"))
        .unwrap()
        .set_modified(old)
        .unwrap();

    let archive = work.path().join("a.ardat");
    ardat_format::archive(&source, &archive).unwrap();
    let out = work.path().join("out");
    std::fs::create_dir(&out).unwrap();
    ardat_format::extract(&archive, &out).unwrap();

    let before = FsTreeBuilder::new(&source).build().unwrap();
    let after = FsTreeBuilder::new(out.join("a")).build().unwrap();
    let expected = snapshot(&before);
    assert_eq!(snapshot(&after), expected);
    before.close();
    after.close();

    let file = expected.iter().find(|(path, _)| path == "a/b.txt").unwrap();
    let modified = file.1.iter().find(|p| p.key() == "modify-time").unwrap();
    assert_eq!(modified.value(), "1500000000250");
    #[cfg(unix)]
    {
        let mode = file.1.iter().find(|p| p.key() == "unix.mode").unwrap();
        assert_eq!(mode.value(), "640");
    }
}

#[test]
fn listing_checks_the_declared_entity_count() {
    let work = TempDir::new().unwrap();
    let source = fixture(work.path());
    let archive = work.path().join("a.ardat");
    ardat_format::archive(&source, &archive).unwrap();
    assert!(ardat_format::list(&archive).is_ok());

    let text = std::fs::read(&archive).unwrap();
    let needle = b"entities:3\n";
    let at = text.windows(needle.len()).position(|w| w == needle).unwrap();
    let mut forged = text.clone();
    forged[at + needle.len() - 2] = b'9';
    let forged_path = work.path().join("forged.ardat");
    std::fs::write(&forged_path, forged).unwrap();

    assert!(matches!(
        ardat_format::list(&forged_path),
        Err(Error::ArchiveCorrupted(_))
    ));
    let err = ArchiveTreeBuilder::open(&forged_path).build().unwrap_err();
    assert!(matches!(err.innermost(), Error::ArchiveCorrupted(_)));
}

#[test]
fn facade_round_trip_with_pool() {
    let work = TempDir::new().unwrap();
    let source = fixture(work.path());
    for i in 0..20 {
        std::fs::write(source.join("c").join(format!("f{:02}", i)), vec![b'x'; i * 1000]).unwrap();
    }
    let archive = work.path().join("a.ardat");
    let pool = rayon::ThreadPoolBuilder::new().num_threads(4).build().unwrap();

    ardat_format::archive_with_pool(&source, &archive, Some(&pool)).unwrap();
    let (metadata, headers) = ardat_format::list(&archive).unwrap();
    assert_eq!(metadata.get_property("entities"), Some("23"));
    assert_eq!(headers.len(), 23);

    let out = work.path().join("out");
    std::fs::create_dir(&out).unwrap();
    ardat_format::extract_with_pool(&archive, &out, Some(&pool)).unwrap();
    for i in 0..20 {
        let data = std::fs::read(out.join("a").join("c").join(format!("f{:02}", i))).unwrap();
        assert_eq!(data.len(), i * 1000);
    }
    assert_eq!(std::fs::read(out.join("a").join("b.txt")).unwrap(), b"hi");
}

#[test]
fn hex_encoded_content_round_trips() {
    let work = TempDir::new().unwrap();
    let source = fixture(work.path());
    std::fs::write(source.join("c").join("bin"), [0u8, 0xff, 0x10]).unwrap();
    let archive = work.path().join("a.ardat");

    ardat_format::archive_encoded(&source, &archive, &[ContentEncoding::Hex], None).unwrap();
    let stored = std::fs::read_to_string(&archive).unwrap();
    assert!(stored.contains("path:a/b.txt\nkind:file\nchildren:0\nsize:0000000000000004\n"));
    assert!(stored.contains("encoding:hex\n\n6869"));
    assert!(stored.ends_with("00ff10"));

    let (_, headers) = ardat_format::list(&archive).unwrap();
    let info = headers.iter().find(|i| i.path().as_str() == "a/c/bin").unwrap();
    assert_eq!(info.size(), 6);
    assert_eq!(info.properties().get_property("encoding"), Some("hex"));

    let rebuilt = ArchiveTreeBuilder::open(&archive).build().unwrap();
    let file = rebuilt.find("a/c/bin").unwrap();
    assert_eq!(file.content_size().unwrap(), 3);
    assert_eq!(file.get_property("encoding"), None);
    rebuilt.close();

    let out = work.path().join("out");
    std::fs::create_dir(&out).unwrap();
    ardat_format::extract(&archive, &out).unwrap();
    assert_eq!(std::fs::read(out.join("a").join("b.txt")).unwrap(), b"hi");
    assert_eq!(std::fs::read(out.join("a").join("c").join("bin")).unwrap(), [0u8, 0xff, 0x10]);
    #[cfg(unix)]
    {
        if xattrs_supported(work.path()) {
            let encoding = xattr::get(out.join("a").join("b.txt"), "user.encoding").unwrap();
            assert_eq!(encoding, None);
        }
    }
}

#[test]
fn corrupted_archive_is_rejected() {
    let work = TempDir::new().unwrap();
    let source = fixture(work.path());
    let archive = work.path().join("a.ardat");
    ardat_format::archive(&source, &archive).unwrap();

    let data = std::fs::read(&archive).unwrap();
    let truncated = work.path().join("truncated.ardat");
    std::fs::write(&truncated, &data[..data.len() - 4]).unwrap();

    let err = ArchiveTreeBuilder::open(&truncated).build().unwrap_err();
    assert!(matches!(err.innermost(), Error::ArchiveCorrupted(_)));

    let out = work.path().join("out");
    std::fs::create_dir(&out).unwrap();
    assert!(ardat_format::extract(&truncated, &out).is_err());
    assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);
}

#[test]
fn extraction_does_not_overwrite() {
    let work = TempDir::new().unwrap();
    let source = fixture(work.path());
    let archive = work.path().join("a.ardat");
    ardat_format::archive(&source, &archive).unwrap();

    assert!(matches!(
        ardat_format::archive(&source, &archive),
        Err(Error::Io(_))
    ));
    let err = ardat_format::extract(&archive, work.path()).unwrap_err();
    assert_eq!(err.entity_path(), Some("a"));
}
