use chrono::{DateTime, Duration, TimeZone, Utc};
use msf_backfill::{BackfillJob, Collaborators, JobState, MediaFilesize};
use msf_core::{
    AttachmentMetadata, AttributeStore, FileResolver, FilesizeConfig, HostError, ItemCatalog,
    ItemFilter, ItemId, ItemStatus, ManualClock, META_KEY,
};
use msf_storage::{LibraryStore, NewItem};
use std::cell::{Cell, RefCell};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn ts(offset_secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_772_000_000 + offset_secs, 0)
        .single()
        .expect("valid timestamp")
}

struct Library {
    dir: TempDir,
    store: LibraryStore,
}

impl Library {
    fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let store = LibraryStore::open_in_memory()
            .expect("open db")
            .with_uploads_root(dir.path());
        Self { dir, store }
    }

    fn add(&self, name: &str, len: Option<usize>) -> ItemId {
        if let Some(len) = len {
            fs::write(self.dir.path().join(name), vec![3u8; len]).expect("write file");
        }
        self.store
            .insert_item(&NewItem::attachment(name), ts(0))
            .expect("insert item")
    }

    fn size(&self, id: ItemId) -> Option<String> {
        self.store.get_attribute(id, META_KEY).expect("get attribute")
    }

    fn missing(&self) -> Vec<ItemId> {
        self.store
            .find_ids(&ItemFilter::missing(
                msf_core::ATTACHMENT_KIND,
                ItemStatus::Inherit,
                META_KEY,
            ))
            .expect("find missing")
    }
}

/// Counts every probe-side host call so tests can prove an item was never looked at.
struct CountingProbeHost<'a> {
    inner: &'a LibraryStore,
    metadata_reads: Cell<usize>,
    resolves: RefCell<Vec<ItemId>>,
}

impl<'a> CountingProbeHost<'a> {
    fn new(inner: &'a LibraryStore) -> Self {
        Self {
            inner,
            metadata_reads: Cell::new(0),
            resolves: RefCell::new(Vec::new()),
        }
    }
}

impl ItemCatalog for CountingProbeHost<'_> {
    fn find_ids(&self, filter: &ItemFilter) -> Result<Vec<ItemId>, HostError> {
        self.inner.find_ids(filter)
    }

    fn count_items(&self, kind: &str, status: ItemStatus) -> Result<u64, HostError> {
        self.inner.count_items(kind, status)
    }

    fn attachment_metadata(&self, id: ItemId) -> Result<Option<AttachmentMetadata>, HostError> {
        self.metadata_reads.set(self.metadata_reads.get() + 1);
        self.inner.attachment_metadata(id)
    }
}

impl FileResolver for CountingProbeHost<'_> {
    fn resolve_physical_path(&self, id: ItemId) -> Result<Option<PathBuf>, HostError> {
        self.resolves.borrow_mut().push(id);
        self.inner.resolve_physical_path(id)
    }

    fn read_byte_size(&self, path: &Path) -> io::Result<u64> {
        self.inner.read_byte_size(path)
    }
}

/// Plays a second worker that stores a size for `victim` the moment this worker
/// starts probing anything.
struct RacingWriter<'a> {
    inner: &'a LibraryStore,
    victim: ItemId,
    fired: Cell<bool>,
}

impl FileResolver for RacingWriter<'_> {
    fn resolve_physical_path(&self, id: ItemId) -> Result<Option<PathBuf>, HostError> {
        if !self.fired.replace(true) {
            self.inner.set_attribute(self.victim, META_KEY, "777")?;
        }
        self.inner.resolve_physical_path(id)
    }

    fn read_byte_size(&self, path: &Path) -> io::Result<u64> {
        self.inner.read_byte_size(path)
    }
}

#[test]
fn mixed_batch_sets_readable_items_and_logs_the_unreadable_one() {
    let lib = Library::new();
    let a = lib.add("a.jpg", Some(120));
    let b = lib.add("b.jpg", None);
    let c = lib.add("c.jpg", Some(4096));
    let clock = ManualClock::new(ts(0));
    let config = FilesizeConfig::default();

    let report = BackfillJob::new(Collaborators::from_host(&lib.store, &clock), &config)
        .run()
        .expect("run");

    assert_eq!(report.state, JobState::Completed);
    assert_eq!(lib.size(a).as_deref(), Some("120"));
    assert_eq!(lib.size(b), None);
    assert_eq!(lib.size(c).as_deref(), Some("4096"));
    assert_eq!(report.errors.item_ids(), vec![b]);
}

#[test]
fn budget_exhaustion_leaves_rest_for_the_next_run() {
    let lib = Library::new();
    let a = lib.add("a.jpg", Some(120));
    let b = lib.add("b.jpg", None);
    let c = lib.add("c.jpg", Some(4096));
    let config = FilesizeConfig::default();

    let slow = ManualClock::stepping(ts(0), Duration::seconds(40));
    let first = BackfillJob::new(Collaborators::from_host(&lib.store, &slow), &config)
        .run()
        .expect("first run");
    assert_eq!(first.state, JobState::BudgetExceeded);
    assert_eq!(lib.size(a).as_deref(), Some("120"));
    assert_eq!(lib.size(b), None);
    assert_eq!(lib.size(c), None);
    assert_eq!(lib.missing(), vec![b, c]);

    let fast = ManualClock::new(ts(3_600));
    let second = BackfillJob::new(Collaborators::from_host(&lib.store, &fast), &config)
        .run()
        .expect("second run");
    assert_eq!(second.state, JobState::Completed);
    assert_eq!(second.candidates, 2);
    assert_eq!(second.errors.item_ids(), vec![b]);
    assert_eq!(lib.size(c).as_deref(), Some("4096"));
    assert_eq!(lib.missing(), vec![b]);
}

#[test]
fn repeated_runs_drain_every_candidate() {
    let lib = Library::new();
    let n = 7usize;
    for index in 0..n {
        lib.add(&format!("{index}.bin"), Some(index * 10));
    }
    let config = FilesizeConfig::default();
    // each run: start at +0, items at +25 and +50, stop at +75 -> k = 2
    let k = 2usize;
    let clock = ManualClock::stepping(ts(0), Duration::seconds(25));

    let mut runs = 0;
    while !lib.missing().is_empty() {
        let before = lib.missing().len();
        let report = BackfillJob::new(Collaborators::from_host(&lib.store, &clock), &config)
            .run()
            .expect("run");
        runs += 1;
        assert!(lib.missing().len() < before, "every run makes progress");
        assert!(report.written <= k);
        assert!(runs <= n, "runaway backfill");
    }

    assert_eq!(runs, n.div_ceil(k));
}

#[test]
fn items_with_the_attribute_are_never_probed_again() {
    let lib = Library::new();
    let done = lib.add("done.jpg", Some(10));
    let todo = lib.add("todo.jpg", Some(20));
    lib.store
        .set_attribute(done, META_KEY, "10")
        .expect("pre-populate");
    let clock = ManualClock::new(ts(0));
    let config = FilesizeConfig::default();

    let counting = CountingProbeHost::new(&lib.store);
    let host = Collaborators {
        catalog: &counting,
        files: &counting,
        ..Collaborators::from_host(&lib.store, &clock)
    };

    let report = BackfillJob::new(host, &config).run().expect("run");
    assert_eq!(report.written, 1);
    assert_eq!(*counting.resolves.borrow(), vec![todo]);
    assert_eq!(counting.metadata_reads.get(), 1);

    let again = BackfillJob::new(host, &config).run().expect("rerun");
    assert_eq!(again.candidates, 0);
    assert_eq!(*counting.resolves.borrow(), vec![todo]);
    assert_eq!(counting.metadata_reads.get(), 1);
}

#[test]
fn concurrent_writer_is_detected_by_the_recheck() {
    let lib = Library::new();
    let first = lib.add("first.jpg", Some(1));
    let raced = lib.add("raced.jpg", Some(2));
    let clock = ManualClock::new(ts(0));
    let config = FilesizeConfig::default();

    let racer = RacingWriter {
        inner: &lib.store,
        victim: raced,
        fired: Cell::new(false),
    };
    let host = Collaborators::from_host(&lib.store, &clock).with_files(&racer);

    let report = BackfillJob::new(host, &config).run().expect("run");
    assert_eq!(report.candidates, 2);
    assert_eq!(report.written, 1);
    assert_eq!(report.skipped_existing, 1);
    assert_eq!(lib.size(first).as_deref(), Some("1"));
    assert_eq!(lib.size(raced).as_deref(), Some("777"));
}

#[test]
fn externally_deleted_attribute_is_recomputed_on_next_pass() {
    let lib = Library::new();
    let a = lib.add("a.jpg", Some(55));
    let clock = ManualClock::new(ts(0));
    let media = MediaFilesize::new(
        Collaborators::from_host(&lib.store, &clock),
        FilesizeConfig::default(),
    );

    media.run_backfill().expect("first");
    assert!(lib.missing().is_empty());

    assert!(lib.store.delete_meta(a, META_KEY).expect("delete"));
    assert_eq!(lib.missing(), vec![a]);

    let report = media.run_backfill().expect("second");
    assert_eq!(report.written, 1);
    assert_eq!(lib.size(a).as_deref(), Some("55"));
}

#[test]
fn oversized_ttl_config_still_runs_the_job() {
    let lib = Library::new();
    let a = lib.add("a.jpg", Some(64));
    let clock = ManualClock::new(ts(0));
    let config: FilesizeConfig = serde_json::from_str(
        r#"{"count_ttl_secs": 9000000000000000, "list_cache_ttl_secs": 18446744073709551615}"#,
    )
    .expect("parse config");
    let media = MediaFilesize::new(Collaborators::from_host(&lib.store, &clock), config);

    let report = media.run_backfill().expect("run");
    assert_eq!(report.state, JobState::Completed);
    assert_eq!(lib.size(a).as_deref(), Some("64"));
    assert_eq!(media.refresh_missing_count().expect("recount"), 0);
    assert!(media.missing_items(true).expect("cached list").is_empty());
}

#[test]
fn storage_failures_propagate_out_of_the_job() {
    struct BrokenCatalog;

    impl ItemCatalog for BrokenCatalog {
        fn find_ids(&self, _filter: &ItemFilter) -> Result<Vec<ItemId>, HostError> {
            Err(HostError::new("find_ids", "connection reset"))
        }

        fn count_items(&self, _kind: &str, _status: ItemStatus) -> Result<u64, HostError> {
            Ok(0)
        }

        fn attachment_metadata(
            &self,
            _id: ItemId,
        ) -> Result<Option<AttachmentMetadata>, HostError> {
            Ok(None)
        }
    }

    let lib = Library::new();
    let clock = ManualClock::new(ts(0));
    let config = FilesizeConfig::default();
    let broken = BrokenCatalog;
    let host = Collaborators {
        catalog: &broken,
        ..Collaborators::from_host(&lib.store, &clock)
    };

    let err = BackfillJob::new(host, &config)
        .run()
        .expect_err("query failure must surface");
    assert!(err.to_string().contains("connection reset"));
}
