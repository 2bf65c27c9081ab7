// Integration tests - the FileSystem contract as seen through its compositions

mod common;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use common::recording_fs::RecordingFileSystem;
use common::tracing::init_tracing_from_env;
use fresh_fs::fs::{
    AsyncSink, AsyncSource, FileSystem, FileSystemExt, LocalFileSystem, MemoryFileSystem,
    SlowFileSystem, SlowFsConfig,
};
use fresh_fs::options::{
    AccessMode, CopyFileOption, CreateFileOption, FileContentOption, FileMetadataOption,
};
use fresh_fs::{ByteString, CancellationSource, FsPath};
use proptest::prelude::*;
use tempfile::TempDir;

fn path(p: &str) -> FsPath {
    FsPath::memory(p)
}

async fn populated(entries: usize) -> RecordingFileSystem {
    let fs = RecordingFileSystem::new();
    fs.inner().create_directory(&path("/dir"), &[]).await.unwrap();
    for i in 0..entries {
        fs.inner()
            .write_file(&path(&format!("/dir/entry{:02}", i)), b"x")
            .await
            .unwrap();
    }
    fs.reset();
    fs
}

// =============================================================================
// check_access
// =============================================================================

#[tokio::test]
async fn test_check_access_missing_path_is_not_found() {
    init_tracing_from_env();
    let memory = MemoryFileSystem::new();
    let err = memory
        .check_access(&path("/nope"), &[AccessMode::Read])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotFound);

    let temp_dir = TempDir::new().unwrap();
    let local = LocalFileSystem::new();
    let err = local
        .check_access(&FsPath::file(temp_dir.path().join("nope")), &[])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotFound);
}

// =============================================================================
// read_directory
// =============================================================================

#[tokio::test]
async fn test_read_directory_matches_drained_stream() {
    let fs = populated(5).await;
    let dir = path("/dir");

    let listed = fs.read_directory(&dir, &[]).await.unwrap();

    let mut stream = fs.open_directory_stream(&dir, &[]).await.unwrap();
    let mut drained = Vec::new();
    while let Some(entry) = stream.read().await.unwrap() {
        drained.push(dir.resolve(&entry.name));
    }
    drop(stream);

    assert_eq!(listed, drained);
    assert_eq!(listed.len(), 5);

    let recording = fs.recording();
    assert_eq!(recording.streams_opened, 2);
    assert_eq!(recording.streams_closed, 2);
}

#[tokio::test]
async fn test_read_directory_of_missing_directory_opens_nothing() {
    let fs = populated(0).await;
    let err = fs.read_directory(&path("/missing"), &[]).await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotFound);
    assert_eq!(fs.recording().total_opened(), 0);
}

#[tokio::test]
async fn test_read_directory_cancelled_mid_iteration_closes_stream() {
    let fs = populated(20).await;
    let slow = SlowFileSystem::new(
        Arc::new(fs.clone()),
        SlowFsConfig {
            read_entry_delay: Duration::from_millis(20),
            ..SlowFsConfig::none()
        },
    );

    let source = CancellationSource::new();
    let token = source.token();
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(70)).await;
        source.cancel();
    });

    let result = token.run(slow.read_directory(&path("/dir"), &[])).await;
    canceller.await.unwrap();

    assert!(result.is_err(), "listing should have been cancelled");
    let metrics = slow.metrics();
    assert!(metrics.entries_read > 0 && metrics.entries_read < 20);
    assert_eq!(metrics.handles_opened, 1);
    assert_eq!(metrics.handles_closed, 1);

    let recording = fs.recording();
    assert_eq!(recording.streams_opened, 1);
    assert_eq!(recording.streams_closed, 1);
}

#[tokio::test]
async fn test_read_directory_timeout_closes_stream() {
    let fs = populated(20).await;
    let slow = SlowFileSystem::new(
        Arc::new(fs.clone()),
        SlowFsConfig {
            read_entry_delay: Duration::from_millis(20),
            ..SlowFsConfig::none()
        },
    );

    let result =
        tokio::time::timeout(Duration::from_millis(70), slow.read_directory(&path("/dir"), &[]))
            .await;
    assert!(result.is_err());

    let recording = fs.recording();
    assert_eq!(recording.streams_opened, 1);
    assert_eq!(recording.streams_closed, 1);
}

// =============================================================================
// open_source / open_sink
// =============================================================================

#[tokio::test]
async fn test_open_source_rejects_write_options_before_opening() {
    let fs = populated(1).await;
    let file = path("/dir/entry00");

    for options in [
        vec![FileContentOption::Write],
        vec![FileContentOption::Append],
        vec![FileContentOption::Read, FileContentOption::Write],
    ] {
        let err = fs.open_source(&file, &options).await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput, "{:?}", options);
    }
    assert_eq!(fs.recording().total_opened(), 0);

    let mut source = fs.open_source(&file, &[]).await.unwrap();
    let mut data = Vec::new();
    source.read_to_end(&mut data).await.unwrap();
    assert_eq!(data, b"x");
    drop(source);

    let recording = fs.recording();
    assert_eq!(recording.contents_opened, 1);
    assert_eq!(recording.contents_closed, 1);
}

#[tokio::test]
async fn test_open_sink_option_rules() {
    let fs = populated(0).await;
    let file = path("/dir/out");

    for options in [
        vec![FileContentOption::Read],
        vec![FileContentOption::Read, FileContentOption::Write],
        vec![FileContentOption::TruncateExisting],
        vec![FileContentOption::Create],
        vec![FileContentOption::Append, FileContentOption::TruncateExisting],
    ] {
        let err = fs.open_sink(&file, &options).await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput, "{:?}", options);
    }
    assert_eq!(fs.recording().total_opened(), 0);
    assert!(!fs.exists(&file).await.unwrap());

    // Defaults create, then truncate
    let mut sink = fs.open_sink(&file, &[]).await.unwrap();
    sink.write_all(b"first version").await.unwrap();
    drop(sink);
    let mut sink = fs.open_sink(&file, &[]).await.unwrap();
    sink.write_all(b"second").await.unwrap();
    drop(sink);
    assert_eq!(fs.read_file(&file).await.unwrap(), b"second");

    // Append alone is enough
    let mut sink = fs
        .open_sink(&file, &[FileContentOption::Append])
        .await
        .unwrap();
    sink.write_all(b"+more").await.unwrap();
    drop(sink);
    assert_eq!(fs.read_file(&file).await.unwrap(), b"second+more");

    // Write without Create does not create
    let err = fs
        .open_sink(&path("/dir/absent"), &[FileContentOption::Write])
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind(), io::ErrorKind::NotFound);

    let recording = fs.recording();
    assert_eq!(recording.contents_opened, recording.contents_closed);
}

// =============================================================================
// read_metadata
// =============================================================================

#[tokio::test]
async fn test_read_metadata_opens_and_closes_once() {
    let fs = populated(1).await;
    let file = path("/dir/entry00");

    let metadata = fs.read_metadata(&file, &[]).await.unwrap();
    assert_eq!(metadata.size, 1);
    let recording = fs.recording();
    assert_eq!(recording.metadata_views_opened, 1);
    assert_eq!(recording.metadata_views_closed, 1);

    fs.reset();
    fs.fail_metadata_reads(true);
    let err = fs.read_metadata(&file, &[]).await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::Other);
    let recording = fs.recording();
    assert_eq!(recording.metadata_views_opened, 1);
    assert_eq!(recording.metadata_views_closed, 1);
}

#[tokio::test]
async fn test_metadata_view_observes_external_changes() {
    let fs = populated(1).await;
    let file = path("/dir/entry00");

    let view = fs.open_metadata_view(&file, &[]).await.unwrap();
    assert_eq!(view.read_metadata().await.unwrap().size, 1);
    fs.write_file(&file, b"longer content").await.unwrap();
    assert_eq!(view.read_metadata().await.unwrap().size, 14);
}

// =============================================================================
// is_same_file
// =============================================================================

#[tokio::test]
async fn test_is_same_file_memory() {
    let fs = MemoryFileSystem::new();
    fs.write_file(&path("/a"), b"same").await.unwrap();
    fs.write_file(&path("/b"), b"same").await.unwrap();
    fs.create_symbolic_link(&path("/link"), &ByteString::from("/a"), &[])
        .await
        .unwrap();

    assert!(fs.is_same_file(&path("/link"), &path("/a")).await.unwrap());
    assert!(!fs.is_same_file(&path("/a"), &path("/b")).await.unwrap());
}

#[cfg(unix)]
#[tokio::test]
async fn test_is_same_file_local() {
    let temp_dir = TempDir::new().unwrap();
    let fs = LocalFileSystem::new();
    let a = FsPath::file(temp_dir.path().join("a"));
    let b = FsPath::file(temp_dir.path().join("b"));
    let link = FsPath::file(temp_dir.path().join("link"));

    fs.write_file(&a, b"same").await.unwrap();
    fs.write_file(&b, b"same").await.unwrap();
    fs.create_symbolic_link(&link, &ByteString::from("a"), &[])
        .await
        .unwrap();

    assert!(fs.is_same_file(&link, &a).await.unwrap());
    assert!(!fs.is_same_file(&a, &b).await.unwrap());
}

// =============================================================================
// Backend agreement
// =============================================================================

type Outcome = Result<(), io::ErrorKind>;

fn outcome<T>(result: io::Result<T>) -> Outcome {
    result.map(|_| ()).map_err(|e| e.kind())
}

/// Run the same sequence of operations under `root` and record how each one ends
async fn contract_outcomes(fs: &dyn FileSystem, root: &FsPath) -> Vec<(&'static str, Outcome)> {
    let target = root.resolve("target");
    let link = root.resolve("link");
    fs.write_file(&target, b"data").await.unwrap();
    fs.create_symbolic_link(&link, &ByteString::from("target"), &[])
        .await
        .unwrap();

    let mut outcomes = vec![
        (
            "move link onto its target",
            outcome(fs.move_file(&link, &target, &[]).await),
        ),
        (
            "copy link onto its target without following",
            outcome(
                fs.copy(&link, &target, &[CopyFileOption::NoFollowLinks])
                    .await,
            ),
        ),
        (
            "copy link onto its target",
            outcome(fs.copy(&link, &target, &[]).await),
        ),
        (
            "copy link without following",
            outcome(
                fs.copy(&link, &root.resolve("link_copy"), &[CopyFileOption::NoFollowLinks])
                    .await,
            ),
        ),
    ];

    let read_only = fs
        .open_content(&target, &[FileContentOption::Read])
        .await
        .unwrap();
    outcomes.push((
        "write to read-only content",
        outcome(read_only.write_at(0, b"x").await),
    ));
    outcomes.push((
        "truncate read-only content",
        outcome(read_only.set_size(0).await),
    ));
    drop(read_only);
    let write_only = fs
        .open_content(&target, &[FileContentOption::Write])
        .await
        .unwrap();
    let mut buf = [0u8; 4];
    outcomes.push((
        "read write-only content",
        outcome(write_only.read_at(0, &mut buf).await),
    ));
    drop(write_only);

    let dangling = root.resolve("dangling");
    fs.create_symbolic_link(&dangling, &ByteString::from("missing"), &[])
        .await
        .unwrap();
    outcomes.push((
        "create new through dangling link",
        outcome(
            fs.open_content(
                &dangling,
                &[FileContentOption::Write, FileContentOption::CreateNew],
            )
            .await,
        ),
    ));
    outcomes.push((
        "write through dangling link",
        outcome(fs.write_file(&dangling, b"through").await),
    ));
    assert_eq!(
        fs.read_file(&root.resolve("missing")).await.unwrap(),
        b"through"
    );

    let dir = root.resolve("dir");
    outcomes.push(("create directory", outcome(fs.create_directory(&dir, &[]).await)));
    outcomes.push((
        "create existing directory",
        outcome(fs.create_directory(&dir, &[]).await),
    ));
    fs.write_file(&dir.resolve("child"), b"x").await.unwrap();
    outcomes.push(("delete non-empty directory", outcome(fs.delete(&dir).await)));
    outcomes.push((
        "list a regular file",
        outcome(fs.read_directory(&target, &[]).await),
    ));
    outcomes.push((
        "open missing file",
        outcome(fs.open_content(&root.resolve("absent"), &[]).await),
    ));
    outcomes.push((
        "missing file exists",
        fs.exists(&root.resolve("absent"))
            .await
            .map_err(|e| e.kind())
            .and_then(|exists| {
                if exists {
                    Ok(())
                } else {
                    Err(io::ErrorKind::NotFound)
                }
            }),
    ));

    outcomes.push((
        "move link onto its target, replacing",
        outcome(
            fs.move_file(&link, &target, &[CopyFileOption::ReplaceExisting])
                .await,
        ),
    ));
    let moved = fs
        .read_metadata(&target, &[FileMetadataOption::NoFollowLinks])
        .await
        .unwrap();
    assert!(moved.is_symlink());
    assert!(!fs.exists(&link).await.unwrap());

    outcomes
}

#[cfg(unix)]
#[tokio::test]
async fn test_local_and_memory_backends_agree() {
    let temp_dir = TempDir::new().unwrap();
    let local = LocalFileSystem::new();
    let local_outcomes = contract_outcomes(&local, &FsPath::file(temp_dir.path())).await;

    let memory = MemoryFileSystem::new();
    let memory_outcomes = contract_outcomes(&memory, &FsPath::memory("/")).await;

    assert_eq!(local_outcomes.len(), memory_outcomes.len());
    for (local, memory) in local_outcomes.iter().zip(&memory_outcomes) {
        assert_eq!(local, memory, "backends disagree");
    }

    use io::ErrorKind::*;
    let expected: Vec<Outcome> = vec![
        Err(AlreadyExists),
        Err(AlreadyExists),
        Ok(()),
        Ok(()),
        Err(PermissionDenied),
        Err(PermissionDenied),
        Err(PermissionDenied),
        Err(AlreadyExists),
        Ok(()),
        Ok(()),
        Err(AlreadyExists),
        Err(DirectoryNotEmpty),
        Err(NotADirectory),
        Err(NotFound),
        Err(NotFound),
        Ok(()),
    ];
    let memory_kinds: Vec<Outcome> = memory_outcomes.iter().map(|(_, o)| *o).collect();
    assert_eq!(memory_kinds, expected);
}

// =============================================================================
// Concurrency
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn concurrent_disjoint_operations_do_not_interfere(
        contents in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..256), 1..12)
    ) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let fs = Arc::new(MemoryFileSystem::new());
            let mut tasks = Vec::new();
            for (i, data) in contents.iter().cloned().enumerate() {
                let fs = Arc::clone(&fs);
                tasks.push(tokio::spawn(async move {
                    let dir = FsPath::memory(format!("/task{}/nested", i));
                    fs.create_directory(&dir, &[CreateFileOption::CreateParents]).await?;
                    let file = dir.resolve("data");
                    fs.write_file(&file, &data).await?;
                    let copy = dir.resolve("copy");
                    fs.copy(&file, &copy, &[]).await?;
                    fs.delete(&file).await?;
                    fs.read_file(&copy).await
                }));
            }

            for (task, expected) in tasks.into_iter().zip(&contents) {
                let read = task.await.unwrap().unwrap();
                assert_eq!(&read, expected);
            }

            let top = fs.read_directory(&FsPath::memory("/"), &[]).await.unwrap();
            assert_eq!(top.len(), contents.len());
        });
    }
}
