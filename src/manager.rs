// SPDX-License-Identifier: Apache-2.0

//! The file consumer.
//!
//! Each poll cycle:
//! - Discovers candidate paths and fingerprints each of them
//! - Matches the candidates one-to-one against the readers of the previous cycle
//! - Continues, rotates, truncates, drains or creates readers accordingly
//! - Reads every open reader on the blocking pool, bounded by `max_concurrent_files`
//! - Closes the least recently read readers beyond `max_open_files`
//! - Writes a checkpoint

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::{KeyValue, global};
use std::fs::File;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::select;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{FileConsumerConfig, StartAt};
use crate::consumer::Consumer;
use crate::error::Result;
use crate::input::{
    FileFinder, FileId, Fingerprint, GlobFileFinder, ReadSummary, Reader, ReaderFactory,
};
use crate::persistence::{
    CHECKPOINT_SCOPE, JsonFileDatabase, KNOWN_FILES_KEY, PersistedStateV1, Persister,
    PersisterExt,
};

/// Consecutive failed reads after which a reader's handle is closed
const MAX_READ_FAILURES: u32 = 3;

pub fn get_meter() -> Meter {
    global::meter("fileconsumer")
}

/// A discovered file, opened and fingerprinted for matching.
struct Candidate {
    path: PathBuf,
    file: File,
    fingerprint: Fingerprint,
    file_id: Option<FileId>,
}

/// What a read task does with its reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadMode {
    /// Read complete records and keep the reader open
    Tail,
    /// The file is gone: read what is left, then close
    Drain,
}

/// A finished read task.
struct ReadDone {
    reader: Reader,
    mode: ReadMode,
    result: io::Result<ReadSummary>,
    /// The offset moved during the pass
    progressed: bool,
}

/// Ranks a reader/candidate pair. Higher is a better match.
///
/// Same OS identity first, then growth over shrinkage, then the longer
/// (more specific) candidate fingerprint, then an unchanged path. This is a
/// best-effort policy: two candidates that extend a fingerprint equally well
/// are told apart by the remaining fields only.
type MatchScore = (bool, bool, usize, bool);

fn match_score(reader: &Reader, candidate: &Candidate) -> Option<MatchScore> {
    let same_id = reader.file_id.is_some() && reader.file_id == candidate.file_id;

    // An empty fingerprint is a prefix of everything and identifies nothing
    if reader.fingerprint.is_empty() && !same_id {
        return None;
    }

    let grown = candidate.fingerprint.starts_with(&reader.fingerprint);
    let shrunk = reader.fingerprint.starts_with(&candidate.fingerprint);
    if !grown && !shrunk {
        return None;
    }

    Some((
        same_id,
        grown,
        candidate.fingerprint.len(),
        reader.path == candidate.path,
    ))
}

/// Tails every file matching the configured patterns.
pub struct FileConsumer {
    config: FileConsumerConfig,
    factory: ReaderFactory,
    finder: Box<dyn FileFinder>,
    consumer: Arc<dyn Consumer>,
    persister: Option<Box<dyn Persister>>,
    /// Every known reader, open or closed
    readers: Vec<Reader>,
    shutdown: Arc<AtomicBool>,
    first_poll: bool,
    cycle: u64,
    emitted_counter: Counter<u64>,
    refused_counter: Counter<u64>,
    read_error_counter: Counter<u64>,
    tags: [KeyValue; 1],
}

impl FileConsumer {
    /// Build a consumer using glob discovery and, when `offsets_path` is
    /// set, a JSON checkpoint file.
    pub fn from_config(config: FileConsumerConfig, consumer: Arc<dyn Consumer>) -> Result<Self> {
        let finder = GlobFileFinder::new(config.include.clone(), config.exclude.clone())?;
        let persister = match &config.offsets_path {
            Some(path) => {
                let db = JsonFileDatabase::open(path)?;
                Some(Box::new(db.persister(CHECKPOINT_SCOPE)) as Box<dyn Persister>)
            }
            None => None,
        };

        Self::new(config, Box::new(finder), consumer, persister)
    }

    /// Build a consumer from explicit parts. Checkpointed readers are loaded
    /// from `persister` right away.
    pub fn new(
        config: FileConsumerConfig,
        finder: Box<dyn FileFinder>,
        consumer: Arc<dyn Consumer>,
        persister: Option<Box<dyn Persister>>,
    ) -> Result<Self> {
        config.validate()?;
        let factory = ReaderFactory::new(&config)?;

        let emitted_counter = get_meter()
            .u64_counter("fileconsumer_emitted_records")
            .with_description("Number of records accepted by the downstream consumer.")
            .with_unit("records")
            .build();

        let refused_counter = get_meter()
            .u64_counter("fileconsumer_refused_records")
            .with_description("Number of read passes stopped by a refused record.")
            .with_unit("records")
            .build();

        let read_error_counter = get_meter()
            .u64_counter("fileconsumer_read_errors")
            .with_description("Number of failed file reads.")
            .with_unit("errors")
            .build();

        let mut this = Self {
            config,
            factory,
            finder,
            consumer,
            persister,
            readers: Vec::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            first_poll: true,
            cycle: 0,
            emitted_counter,
            refused_counter,
            read_error_counter,
            tags: [KeyValue::new("component", "fileconsumer")],
        };
        this.load_state()?;
        Ok(this)
    }

    /// Readers known after the last poll
    pub fn readers(&self) -> &[Reader] {
        &self.readers
    }

    /// Restore closed readers from the checkpoint store.
    fn load_state(&mut self) -> Result<()> {
        let Some(persister) = self.persister.as_mut() else {
            return Ok(());
        };
        persister.load()?;

        let Some(state) = persister.try_get_raw_json::<PersistedStateV1>(KNOWN_FILES_KEY)? else {
            debug!("No checkpoint found, starting fresh");
            return Ok(());
        };
        let state = state.check_version()?;

        for reader_state in state.readers {
            if reader_state.fingerprint.is_empty() {
                continue;
            }
            self.readers.push(self.factory.restore(reader_state)?);
        }

        if !self.readers.is_empty() {
            // Unknown files found after a restart appeared while stopped
            self.first_poll = false;
            info!(readers = self.readers.len(), "Restored reader checkpoints");
        }
        Ok(())
    }

    /// Poll until `cancel` fires, then close every reader and write a final
    /// checkpoint.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        info!(
            include = ?self.config.include,
            exclude = ?self.config.exclude,
            poll_interval = ?self.config.poll_interval(),
            "Starting file consumer"
        );

        // Readers check the flag between records so an in-flight poll ends quickly
        let shutdown = self.shutdown.clone();
        let watch = cancel.clone();
        tokio::spawn(async move {
            watch.cancelled().await;
            shutdown.store(true, Ordering::Relaxed);
        });

        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                biased;

                _ = cancel.cancelled() => break,
                _ = interval.tick() => self.poll().await,
            }
        }

        info!("File consumer cancelled, shutting down");
        self.stop()
    }

    /// Close every reader and write a final checkpoint.
    pub fn stop(&mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::Relaxed);
        for reader in &mut self.readers {
            reader.close();
        }
        self.save_state()
    }

    /// Run one poll cycle.
    pub async fn poll(&mut self) {
        self.cycle += 1;

        let paths = match self.finder.find_files() {
            Ok(paths) => paths,
            Err(e) => {
                warn!("File discovery failed: {}", e);
                return;
            }
        };

        if self.first_poll && paths.is_empty() {
            warn!(
                "No files match the configured include patterns: {:?}",
                self.config.include
            );
        }

        let candidates = self.open_candidates(paths);
        let jobs = self.reconcile(candidates);
        self.first_poll = false;

        self.read_all(jobs).await;
        self.enforce_open_limit();

        if let Err(e) = self.save_state() {
            error!("Failed to save checkpoint: {}", e);
        }
    }

    /// Open and fingerprint each path, dropping empty files and duplicates.
    fn open_candidates(&self, paths: Vec<PathBuf>) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = Vec::with_capacity(paths.len());

        for path in paths {
            let file = match File::open(&path) {
                Ok(file) => file,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Failed to open file");
                    continue;
                }
            };

            let fingerprint = match self.factory.fingerprint(&file) {
                Ok(fp) => fp,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to fingerprint file");
                    continue;
                }
            };

            // Nothing to identify the file by until it has content
            if fingerprint.is_empty() {
                continue;
            }

            let file_id = FileId::from_file(&file).ok();

            let duplicate = candidates.iter().any(|c| {
                (file_id.is_some() && c.file_id == file_id) || c.fingerprint == fingerprint
            });
            if duplicate {
                debug!(
                    path = %path.display(),
                    fingerprint = %fingerprint,
                    "Skipping duplicate file"
                );
                continue;
            }

            candidates.push(Candidate {
                path,
                file,
                fingerprint,
                file_id,
            });
        }

        candidates
    }

    /// Match candidates against the previous readers and decide the fate of
    /// each. Returns the reads to run this cycle.
    fn reconcile(&mut self, candidates: Vec<Candidate>) -> Vec<(Reader, ReadMode)> {
        let mut previous: Vec<Option<Reader>> =
            std::mem::take(&mut self.readers).into_iter().map(Some).collect();
        let mut candidates: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();

        let mut scored = Vec::new();
        for (ri, reader) in previous.iter().enumerate() {
            for (ci, candidate) in candidates.iter().enumerate() {
                if let (Some(reader), Some(candidate)) = (reader, candidate) {
                    if let Some(score) = match_score(reader, candidate) {
                        scored.push((score, ri, ci));
                    }
                }
            }
        }
        // Best score first; index order breaks exact ties deterministically
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        let mut jobs = Vec::new();
        let mut closed = Vec::new();

        for (_, ri, ci) in scored {
            if previous[ri].is_none() || candidates[ci].is_none() {
                continue;
            }
            let (Some(reader), Some(candidate)) = (previous[ri].take(), candidates[ci].take())
            else {
                continue;
            };

            match self.continue_or_rotate(reader, candidate) {
                Ok(reader) => jobs.push((reader, ReadMode::Tail)),
                Err(reader) => closed.push(reader),
            }
        }

        for reader in previous.into_iter().flatten() {
            let truncated = candidates.iter().position(|c| {
                c.as_ref().is_some_and(|c| {
                    c.path == reader.path && reader.file_id.is_some() && c.file_id == reader.file_id
                })
            });

            if let Some(ci) = truncated {
                if let Some(candidate) = candidates[ci].take() {
                    match self.truncate(reader, candidate) {
                        Ok(reader) => jobs.push((reader, ReadMode::Tail)),
                        Err(reader) => closed.push(reader),
                    }
                    continue;
                }
            }

            if reader.is_open() {
                debug!(
                    path = %reader.path.display(),
                    fingerprint = %reader.fingerprint,
                    "File no longer found, draining"
                );
                jobs.push((reader, ReadMode::Drain));
            } else {
                closed.push(reader);
            }
        }

        let start_at = if self.first_poll {
            self.config.start_at
        } else {
            StartAt::Beginning
        };

        for candidate in candidates.into_iter().flatten() {
            let Candidate {
                path, fingerprint, file, ..
            } = candidate;
            match self
                .factory
                .new_reader(file, path.clone(), Some(fingerprint), start_at)
            {
                Ok(mut reader) => {
                    reader.last_read = self.cycle;
                    info!(
                        path = %reader.path.display(),
                        fingerprint = %reader.fingerprint,
                        offset = reader.offset,
                        "Started watching file"
                    );
                    jobs.push((reader, ReadMode::Tail));
                }
                Err(e) => error!(path = %path.display(), "Failed to create reader: {}", e),
            }
        }

        for mut reader in closed {
            reader.generation += 1;
            if reader.generation > self.config.forget_after_polls {
                debug!(
                    path = %reader.path.display(),
                    fingerprint = %reader.fingerprint,
                    "Forgetting file"
                );
                continue;
            }
            self.readers.push(reader);
        }

        jobs
    }

    /// A matched pair: keep the reader when nothing changed, otherwise hand
    /// its state to a reader on the new handle. On failure the old reader is
    /// returned closed.
    fn continue_or_rotate(
        &self,
        mut reader: Reader,
        candidate: Candidate,
    ) -> std::result::Result<Reader, Reader> {
        let grown = candidate.fingerprint.starts_with(&reader.fingerprint);

        if reader.is_open() && reader.path == candidate.path && reader.file_id == candidate.file_id {
            if grown {
                reader.fingerprint = candidate.fingerprint;
            }
            reader.generation = 0;
            return Ok(reader);
        }

        match self.factory.copy(&reader, candidate.file, candidate.path) {
            Ok(mut next) => {
                if reader.is_open() {
                    debug!(
                        from = %reader.path.display(),
                        to = %next.path.display(),
                        fingerprint = %next.fingerprint,
                        "File rotated"
                    );
                }
                if grown {
                    next.fingerprint = candidate.fingerprint;
                }
                next.last_read = reader.last_read;
                Ok(next)
            }
            Err(e) => {
                error!(
                    path = %reader.path.display(),
                    fingerprint = %reader.fingerprint,
                    "Failed to continue reader: {}",
                    e
                );
                reader.close();
                Err(reader)
            }
        }
    }

    /// Same file, same path, but its leading bytes changed: the content was
    /// replaced in place. Continue with the reader's attributes from offset 0.
    fn truncate(&self, mut reader: Reader, candidate: Candidate) -> std::result::Result<Reader, Reader> {
        info!(
            path = %reader.path.display(),
            fingerprint = %reader.fingerprint,
            offset = reader.offset,
            "File truncated, reading from the start"
        );

        let fingerprint = candidate.fingerprint;
        match self.factory.copy(&reader, candidate.file, candidate.path) {
            Ok(mut next) => {
                next.offset = 0;
                next.fingerprint = fingerprint;
                Ok(next)
            }
            Err(e) => {
                error!(path = %reader.path.display(), "Failed to continue reader: {}", e);
                reader.close();
                Err(reader)
            }
        }
    }

    /// Run every read on the blocking pool, at most `max_concurrent_files`
    /// at a time, and collect the readers back.
    async fn read_all(&mut self, jobs: Vec<(Reader, ReadMode)>) {
        let max_in_flight = self.config.max_concurrent_files.max(1);
        let mut pending = jobs.into_iter();
        let mut in_flight: FuturesUnordered<JoinHandle<ReadDone>> = FuturesUnordered::new();

        loop {
            while in_flight.len() < max_in_flight {
                let Some((reader, mode)) = pending.next() else {
                    break;
                };
                in_flight.push(self.spawn_read(reader, mode));
            }

            match in_flight.next().await {
                Some(Ok(done)) => self.finish_read(done),
                // Panics are caught inside the task, only runtime shutdown lands here
                Some(Err(e)) => error!("Read task failed: {}", e),
                None => break,
            }
        }
    }

    fn spawn_read(&self, reader: Reader, mode: ReadMode) -> JoinHandle<ReadDone> {
        let consumer = self.consumer.clone();
        let shutdown = self.shutdown.clone();
        let flush = self.config.flush_on_close;

        tokio::task::spawn_blocking(move || {
            let mut reader = reader;
            let start = reader.offset;

            // A panicking consumer must not take the reader and its offset with it
            let result = panic::catch_unwind(AssertUnwindSafe(|| match mode {
                ReadMode::Drain if flush => reader.flush(consumer.as_ref(), &shutdown),
                _ => reader.read_to_end(consumer.as_ref(), &shutdown),
            }))
            .unwrap_or_else(|_| Err(io::Error::other("read task panicked")));

            ReadDone {
                progressed: reader.offset != start,
                reader,
                mode,
                result,
            }
        })
    }

    fn finish_read(&mut self, done: ReadDone) {
        let ReadDone {
            mut reader,
            mode,
            result,
            progressed,
        } = done;

        // Idle readers keep their old position in the eviction order
        if progressed {
            reader.last_read = self.cycle;
        }

        match result {
            Ok(summary) => {
                reader.read_failures = 0;
                if summary.emitted > 0 {
                    self.emitted_counter.add(summary.emitted as u64, &self.tags);
                }
                if summary.refused {
                    self.refused_counter.add(1, &self.tags);
                }
            }
            Err(e) => {
                self.read_error_counter.add(1, &self.tags);
                reader.read_failures += 1;
                warn!(
                    path = %reader.path.display(),
                    fingerprint = %reader.fingerprint,
                    failures = reader.read_failures,
                    "Failed to read file: {}",
                    e
                );
                if reader.read_failures >= MAX_READ_FAILURES {
                    reader.close();
                }
            }
        }

        if mode == ReadMode::Drain {
            reader.close();
            reader.generation = 1;
        }

        self.readers.push(reader);
    }

    /// Close the least recently read readers beyond `max_open_files`.
    fn enforce_open_limit(&mut self) {
        let mut open: Vec<usize> = (0..self.readers.len())
            .filter(|&i| self.readers[i].is_open())
            .collect();
        if open.len() <= self.config.max_open_files {
            return;
        }

        open.sort_by_key(|&i| self.readers[i].last_read);
        let excess = open.len() - self.config.max_open_files;
        for &i in &open[..excess] {
            self.readers[i].close();
        }
        debug!(closed = excess, "Closed readers above the open file limit");
    }

    fn save_state(&mut self) -> Result<()> {
        let Some(persister) = self.persister.as_mut() else {
            return Ok(());
        };

        let state = PersistedStateV1::new(self.readers.iter().map(Reader::state).collect());
        persister.set_raw_json(KNOWN_FILES_KEY, &state)?;
        persister.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::TestConsumer;
    use crate::persistence::MemoryPersister;
    use std::io::Write;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> FileConsumerConfig {
        FileConsumerConfig {
            include: vec![dir.path().join("*.log").to_string_lossy().into_owned()],
            start_at: StartAt::Beginning,
            fingerprint_size: 16,
            ..Default::default()
        }
    }

    fn consumer_for(
        config: FileConsumerConfig,
        sink: Arc<TestConsumer>,
        persister: Option<Box<dyn Persister>>,
    ) -> FileConsumer {
        let finder = GlobFileFinder::new(config.include.clone(), vec![]).unwrap();
        FileConsumer::new(config, Box::new(finder), sink, persister).unwrap()
    }

    fn append(path: &std::path::Path, data: &[u8]) {
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(data).unwrap();
    }

    #[tokio::test]
    async fn test_poll_reads_new_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"A\n");

        let sink = Arc::new(TestConsumer::default());
        let mut fc = consumer_for(config(&dir), sink.clone(), None);

        fc.poll().await;
        assert_eq!(sink.bodies(), vec!["A"]);

        append(&path, b"B\n");
        fc.poll().await;
        assert_eq!(sink.bodies(), vec!["A", "B"]);
        assert_eq!(fc.readers().len(), 1);
        assert_eq!(fc.readers()[0].offset(), 4);
    }

    #[tokio::test]
    async fn test_start_at_end_only_on_first_poll() {
        let dir = TempDir::new().unwrap();
        append(&dir.path().join("old.log"), b"old content\n");

        let sink = Arc::new(TestConsumer::default());
        let mut fc = consumer_for(
            FileConsumerConfig {
                start_at: StartAt::End,
                ..config(&dir)
            },
            sink.clone(),
            None,
        );

        fc.poll().await;
        assert!(sink.bodies().is_empty());

        append(&dir.path().join("old.log"), b"appended\n");
        append(&dir.path().join("new.log"), b"from a new file\n");
        fc.poll().await;

        let mut bodies = sink.bodies();
        bodies.sort();
        assert_eq!(bodies, vec!["appended", "from a new file"]);
    }

    #[tokio::test]
    async fn test_empty_files_are_not_tracked() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.log");
        append(&path, b"");

        let sink = Arc::new(TestConsumer::default());
        let mut fc = consumer_for(config(&dir), sink.clone(), None);

        fc.poll().await;
        assert!(fc.readers().is_empty());

        append(&path, b"now\n");
        fc.poll().await;
        assert_eq!(sink.bodies(), vec!["now"]);
    }

    #[tokio::test]
    async fn test_vanished_file_is_flushed_then_forgotten() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"line\ntrailing");

        let sink = Arc::new(TestConsumer::default());
        let mut fc = consumer_for(config(&dir), sink.clone(), None);

        fc.poll().await;
        assert_eq!(sink.bodies(), vec!["line"]);

        std::fs::rename(&path, dir.path().join("app.old")).unwrap();
        fc.poll().await;
        assert_eq!(sink.bodies(), vec!["line", "trailing"]);
        assert!(!fc.readers()[0].is_open());

        for _ in 0..3 {
            fc.poll().await;
        }
        assert!(fc.readers().is_empty());
    }

    #[tokio::test]
    async fn test_open_file_limit() {
        let dir = TempDir::new().unwrap();
        for name in ["a.log", "b.log", "c.log"] {
            append(&dir.path().join(name), format!("{}\n", name).as_bytes());
        }

        let sink = Arc::new(TestConsumer::default());
        let mut fc = consumer_for(
            FileConsumerConfig {
                max_open_files: 2,
                ..config(&dir)
            },
            sink.clone(),
            None,
        );

        fc.poll().await;
        assert_eq!(fc.readers().len(), 3);
        assert_eq!(fc.readers().iter().filter(|r| r.is_open()).count(), 2);

        // A closed reader is matched again without re-reading
        append(&dir.path().join("a.log"), b"more\n");
        fc.poll().await;
        assert_eq!(sink.bodies().len(), 4);
        assert_eq!(sink.bodies().iter().filter(|b| *b == "a.log").count(), 1);
    }

    #[tokio::test]
    async fn test_vanished_file_without_flush_drops_partial_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"line\ntrailing");

        let sink = Arc::new(TestConsumer::default());
        let mut fc = consumer_for(
            FileConsumerConfig {
                flush_on_close: false,
                ..config(&dir)
            },
            sink.clone(),
            None,
        );

        fc.poll().await;
        std::fs::rename(&path, dir.path().join("app.old")).unwrap();
        fc.poll().await;

        assert_eq!(sink.bodies(), vec!["line"]);
        assert_eq!(fc.readers().len(), 1);
        assert!(!fc.readers()[0].is_open());
        assert_eq!(fc.readers()[0].offset(), 5);
    }

    #[tokio::test]
    async fn test_open_file_limit_keeps_active_file() {
        let dir = TempDir::new().unwrap();
        let idle = dir.path().join("a_idle.log");
        let active = dir.path().join("b_active.log");
        append(&idle, b"idle\n");
        append(&active, b"active-00\n");

        let sink = Arc::new(TestConsumer::default());
        let mut fc = consumer_for(
            FileConsumerConfig {
                max_open_files: 1,
                ..config(&dir)
            },
            sink.clone(),
            None,
        );
        fc.poll().await;

        for i in 1..=10 {
            append(&active, format!("active-{:02}\n", i).as_bytes());
            fc.poll().await;

            let open: Vec<&Reader> = fc.readers().iter().filter(|r| r.is_open()).collect();
            assert_eq!(open.len(), 1);
            assert_eq!(open[0].path(), active.as_path(), "poll {}", i);
        }

        // every line exactly once
        assert_eq!(sink.bodies().len(), 12);
        assert_eq!(sink.bodies().iter().filter(|b| *b == "idle").count(), 1);
    }

    #[tokio::test]
    async fn test_repeated_read_failures_close_the_handle() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, b"first\n");

        let sink = Arc::new(TestConsumer::default());
        let mut fc = consumer_for(config(&dir), sink.clone(), None);
        fc.poll().await;

        let mut reader = fc.readers.pop().unwrap();
        let fingerprint = reader.fingerprint().clone();

        for attempt in 1..=MAX_READ_FAILURES {
            assert!(reader.is_open());
            fc.finish_read(ReadDone {
                reader,
                mode: ReadMode::Tail,
                result: Err(io::Error::other("device went away")),
                progressed: false,
            });
            reader = fc.readers.pop().unwrap();
            assert_eq!(reader.read_failures, attempt);
        }

        assert!(!reader.is_open());
        assert_eq!(reader.offset(), 6);
        assert_eq!(reader.fingerprint(), &fingerprint);
    }

    #[tokio::test]
    async fn test_successful_read_resets_failures() {
        let dir = TempDir::new().unwrap();
        append(&dir.path().join("app.log"), b"first\n");

        let sink = Arc::new(TestConsumer::default());
        let mut fc = consumer_for(config(&dir), sink.clone(), None);
        fc.poll().await;

        let reader = fc.readers.pop().unwrap();
        fc.finish_read(ReadDone {
            reader,
            mode: ReadMode::Tail,
            result: Err(io::Error::other("transient")),
            progressed: false,
        });
        assert_eq!(fc.readers[0].read_failures, 1);

        fc.poll().await;
        assert_eq!(fc.readers[0].read_failures, 0);
        assert!(fc.readers[0].is_open());
    }

    #[tokio::test]
    async fn test_panicking_consumer_keeps_reader() {
        struct Panics;

        impl Consumer for Panics {
            fn emit(&self, _entry: crate::entry::Entry) -> Result<()> {
                panic!("downstream bug");
            }
        }

        let dir = TempDir::new().unwrap();
        append(&dir.path().join("app.log"), b"boom\n");

        let config = config(&dir);
        let finder = GlobFileFinder::new(config.include.clone(), vec![]).unwrap();
        let mut fc = FileConsumer::new(config, Box::new(finder), Arc::new(Panics), None).unwrap();

        fc.poll().await;
        assert_eq!(fc.readers().len(), 1);
        assert_eq!(fc.readers()[0].offset(), 0);
        assert_eq!(fc.readers[0].read_failures, 1);
    }

    #[tokio::test]
    async fn test_refused_records_are_retried() {
        let dir = TempDir::new().unwrap();
        append(&dir.path().join("app.log"), b"one\n");

        let sink = Arc::new(TestConsumer::default());
        sink.refuse.store(true, Ordering::SeqCst);
        let mut fc = consumer_for(config(&dir), sink.clone(), None);

        fc.poll().await;
        assert!(sink.bodies().is_empty());
        assert_eq!(fc.readers()[0].offset(), 0);

        sink.refuse.store(false, Ordering::SeqCst);
        fc.poll().await;
        assert_eq!(sink.bodies(), vec!["one"]);
    }

    #[tokio::test]
    async fn test_checkpoint_saved_each_poll() {
        let dir = TempDir::new().unwrap();
        append(&dir.path().join("app.log"), b"hello\n");

        let db = JsonFileDatabase::open_memory();
        let sink = Arc::new(TestConsumer::default());
        let mut fc = consumer_for(
            config(&dir),
            sink.clone(),
            Some(Box::new(db.persister(CHECKPOINT_SCOPE))),
        );
        fc.poll().await;

        let mut persister = db.persister(CHECKPOINT_SCOPE);
        persister.load().unwrap();
        let state: PersistedStateV1 = persister
            .try_get_raw_json(KNOWN_FILES_KEY)
            .unwrap()
            .unwrap();
        assert_eq!(state.readers.len(), 1);
        assert_eq!(state.readers[0].offset, 6);
        assert_eq!(state.readers[0].fingerprint.bytes(), b"hello\n");
    }

    #[test]
    fn test_corrupt_checkpoint_fails_startup() {
        let dir = TempDir::new().unwrap();
        let mut persister = MemoryPersister::new();
        persister
            .set_raw_json(KNOWN_FILES_KEY, &serde_json::json!({"version": 1, "readers": 5}))
            .unwrap();

        let config = config(&dir);
        let finder = GlobFileFinder::new(config.include.clone(), vec![]).unwrap();
        let result = FileConsumer::new(
            config,
            Box::new(finder),
            Arc::new(TestConsumer::default()),
            Some(Box::new(persister)),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let dir = TempDir::new().unwrap();
        append(&dir.path().join("app.log"), b"x\n");

        let sink = Arc::new(TestConsumer::default());
        let fc = consumer_for(
            FileConsumerConfig {
                poll_interval_ms: 10,
                ..config(&dir)
            },
            sink.clone(),
            None,
        );

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(fc.run(cancel.clone()));

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(sink.bodies(), vec!["x"]);
    }

    #[test]
    fn test_match_score_prefers_same_identity() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.log");
        append(&path, b"abc\n");

        let factory = ReaderFactory::new(&config(&dir)).unwrap();
        let reader = factory
            .new_reader(File::open(&path).unwrap(), path.clone(), None, StartAt::Beginning)
            .unwrap();

        let same = Candidate {
            path: path.clone(),
            file: File::open(&path).unwrap(),
            fingerprint: Fingerprint::from_bytes(b"abc\ndef".to_vec()),
            file_id: reader.file_id(),
        };
        let other = Candidate {
            path: dir.path().join("b.log"),
            file: File::open(&path).unwrap(),
            fingerprint: Fingerprint::from_bytes(b"abc\ndefghij".to_vec()),
            file_id: None,
        };
        let unrelated = Candidate {
            path: path.clone(),
            file: File::open(&path).unwrap(),
            fingerprint: Fingerprint::from_bytes(b"xyz".to_vec()),
            file_id: None,
        };

        let same_score = match_score(&reader, &same).unwrap();
        let other_score = match_score(&reader, &other).unwrap();
        assert!(same_score > other_score);
        assert!(match_score(&reader, &unrelated).is_none());
    }
}
