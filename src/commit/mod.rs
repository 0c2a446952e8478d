use crate::batch::WriteBatch;
use crate::entry::{BytewiseComparator, UserComparator};
use crate::error::{Result, StorageError};
use crate::memtable::Memtable;
use crate::metrics::Metrics;
use crate::sink::DurableSink;
use crate::threshold::ThresholdCounter;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::AtomicI64;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

/// Group commit parameters.
#[derive(Debug, Clone, Copy)]
pub struct CommitOptions {
    /// Stop folding batches into a group once it holds this many key and value bytes.
    pub max_group_bytes: usize,
    /// Sync the log after every group.
    pub sync_on_commit: bool,
}

impl Default for CommitOptions {
    fn default() -> Self {
        Self {
            max_group_bytes: 4 * 1024 * 1024,
            sync_on_commit: true,
        }
    }
}

struct Task {
    id: u64,
    /// Taken by the leader that folds this task into its group.
    batch: Option<WriteBatch>,
}

/// The log sink plus what is needed to roll back a failed record.
struct LogState {
    sink: Option<Box<dyn DurableSink>>,
    /// Start offset of a record whose append or sync has not completed.
    in_flight: Option<u64>,
    /// Set when a failed record could not be rolled back.
    broken: Option<String>,
}

impl LogState {
    /// Discards a failed record so the next record follows intact data.
    fn roll_back(&mut self, start: u64) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        match sink.rewind(start) {
            Ok(()) => tracing::warn!("Rolled back failed log record at offset {}", start),
            Err(e) => {
                tracing::error!("Failed to roll back log record at offset {}: {}", start, e);
                self.broken = Some(e.to_string());
            }
        }
    }
}

struct QueueState {
    tasks: VecDeque<Task>,
    finished: HashMap<u64, Result<()>>,
    next_id: u64,
    closed: bool,
}

/// Serializes concurrent write batches into the log and the memtable.
///
/// The writer at the head of the queue leads: it folds the batches queued
/// behind it into one group and logs it with a single append. It stays at
/// the head until the group is released, so groups apply in arrival order.
pub struct WriteCoordinator<C: UserComparator = BytewiseComparator> {
    memtable: Arc<Memtable<C>>,
    log: Mutex<LogState>,
    state: Mutex<QueueState>,
    wakeup: Condvar,
    options: CommitOptions,
    metrics: Arc<Metrics>,
}

impl<C: UserComparator> WriteCoordinator<C> {
    pub fn new(
        memtable: Arc<Memtable<C>>,
        sink: Box<dyn DurableSink>,
        options: CommitOptions,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            memtable,
            log: Mutex::new(LogState {
                sink: Some(sink),
                in_flight: None,
                broken: None,
            }),
            state: Mutex::new(QueueState {
                tasks: VecDeque::new(),
                finished: HashMap::new(),
                next_id: 0,
                closed: false,
            }),
            wakeup: Condvar::new(),
            options,
            metrics,
        }
    }

    pub fn memtable(&self) -> &Arc<Memtable<C>> {
        &self.memtable
    }

    /// Number of writers currently queued, including an active leader.
    pub fn queued(&self) -> usize {
        self.state.lock().map(|state| state.tasks.len()).unwrap_or(0)
    }

    /// Applies `batch` atomically, blocking until it is durable and visible.
    ///
    /// # Errors
    ///
    /// - `Closed` after [`WriteCoordinator::close`]
    /// - the original error if this writer led a failing group
    /// - `GroupCommitFailed` if this writer was folded into a failing group
    /// - `LockPoisoned` if the wait was interrupted by a poisoned lock
    pub fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut state = self.lock_state()?;
        if state.closed {
            return Err(StorageError::Closed);
        }
        let id = state.next_id;
        state.next_id += 1;
        state.tasks.push_back(Task {
            id,
            batch: Some(batch),
        });

        loop {
            if let Some(result) = state.finished.remove(&id) {
                return result;
            }
            if state.tasks.front().map(|task| task.id) == Some(id) {
                break;
            }
            state = match self.wakeup.wait(state) {
                Ok(state) => state,
                Err(poisoned) => {
                    let mut state = poisoned.into_inner();
                    if let Some(result) = state.finished.remove(&id) {
                        return result;
                    }
                    if self.abandon(&mut state, id) {
                        tracing::error!("Writer {} interrupted while waiting for group commit", id);
                        return Err(StorageError::LockPoisoned("write queue".to_string()));
                    }
                    // Folded into a running group, its leader reports the outcome
                    state
                }
            };
        }

        self.lead(state)
    }

    /// Stops accepting writes and closes the sink.
    pub fn close(&self) -> Result<()> {
        self.lock_state()?.closed = true;

        let mut log = self.lock_log();
        if let Some(mut sink) = log.sink.take() {
            sink.close()?;
            tracing::info!("Write coordinator closed");
        }
        Ok(())
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, QueueState>> {
        self.state
            .lock()
            .map_err(|_| StorageError::LockPoisoned("write queue".to_string()))
    }

    /// Locks the log, rolling back a record left behind by a panicked leader.
    fn lock_log(&self) -> MutexGuard<'_, LogState> {
        let mut log = match self.log.lock() {
            Ok(log) => log,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(start) = log.in_flight.take() {
            log.roll_back(start);
        }
        log
    }

    /// Drops a task that has not been folded yet so it cannot block the queue.
    /// Returns false if the task was already taken by a leader.
    fn abandon(&self, state: &mut QueueState, id: u64) -> bool {
        let Some(index) = state
            .tasks
            .iter()
            .position(|task| task.id == id && task.batch.is_some())
        else {
            return false;
        };
        state.tasks.remove(index);
        self.wakeup.notify_all();
        true
    }

    fn lead(&self, mut state: MutexGuard<'_, QueueState>) -> Result<()> {
        let limit = i64::try_from(self.options.max_group_bytes).unwrap_or(i64::MAX);
        let counter = ThresholdCounter::<AtomicI64>::new(limit);
        let mut group = WriteBatch::new();
        let mut members = 0usize;

        for task in state.tasks.iter_mut() {
            if members > 0 && counter.is_reached() {
                break;
            }
            if let Some(batch) = task.batch.take() {
                counter.increase(i64::try_from(batch.approximate_size()).unwrap_or(i64::MAX));
                group.append(batch);
            }
            members += 1;
        }
        let ids: Vec<u64> = state.tasks.iter().take(members).map(|task| task.id).collect();
        drop(state);

        tracing::debug!(
            "Leading group of {} batches, {} entries, {} bytes",
            members,
            group.len(),
            group.approximate_size()
        );

        let guard = GroupGuard {
            coordinator: self,
            ids,
            finished: false,
        };
        let result = self.apply(&group, members);
        guard.finish(result)
    }

    /// Logs and inserts a group. Runs without the queue lock held.
    fn apply(&self, group: &WriteBatch, members: usize) -> Result<()> {
        let count = group.len() as u64;

        // Step 1: Reserve one contiguous run of sequences
        let first = self.memtable.reserve_sequences(count)?;

        // Step 2: Append the whole group to the log with a single write.
        // A record that fails to append or sync is rolled back, so a failed
        // group is never replayed and later groups stay readable.
        let payload = group.encode(first)?;
        {
            let mut guard = self.lock_log();
            let log = &mut *guard;
            if let Some(reason) = &log.broken {
                return Err(StorageError::GroupCommitFailed(format!(
                    "log unusable until reopen: {}",
                    reason
                )));
            }
            let sink = log.sink.as_mut().ok_or(StorageError::Closed)?;
            let start = sink.end();
            log.in_flight = Some(start);

            let mut written = sink.append(&payload);
            if written.is_ok() && self.options.sync_on_commit {
                written = sink.sync();
            }
            log.in_flight = None;

            if let Err(e) = written {
                log.roll_back(start);
                return Err(e);
            }
            if self.options.sync_on_commit {
                self.metrics.increment_sync();
            }
        }

        // Step 3: Insert into the memtable, then make the group visible at once
        for (offset, entry) in group.iter().enumerate() {
            self.memtable.insert(
                first + offset as u64,
                entry.value_type,
                &entry.key,
                entry.value.clone(),
            )?;
        }
        self.memtable.publish(first + count - 1);

        self.metrics.record_group(members, payload.len());
        Ok(())
    }

    /// Pops a finished group off the queue, records follower results and
    /// wakes every waiter.
    fn release<F>(&self, ids: &[u64], mut follower_result: F)
    where
        F: FnMut() -> Result<()>,
    {
        // A poisoned queue must still be drained or waiters hang forever
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (index, id) in ids.iter().enumerate() {
            let popped = state.tasks.pop_front();
            debug_assert_eq!(popped.map(|task| task.id), Some(*id));
            if index > 0 {
                state.finished.insert(*id, follower_result());
            }
        }
        drop(state);
        self.wakeup.notify_all();
    }
}

/// Releases a group's followers even if the leader unwinds.
struct GroupGuard<'a, C: UserComparator> {
    coordinator: &'a WriteCoordinator<C>,
    ids: Vec<u64>,
    finished: bool,
}

impl<'a, C: UserComparator> GroupGuard<'a, C> {
    fn finish(mut self, result: Result<()>) -> Result<()> {
        self.finished = true;
        match &result {
            Ok(()) => self.coordinator.release(&self.ids, || Ok(())),
            Err(e) => {
                tracing::warn!("Group commit of {} batches failed: {}", self.ids.len(), e);
                self.coordinator.metrics.increment_failed_groups();
                let message = e.to_string();
                self.coordinator.release(&self.ids, || {
                    Err(StorageError::GroupCommitFailed(message.clone()))
                });
            }
        }
        result
    }
}

impl<'a, C: UserComparator> Drop for GroupGuard<'a, C> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::error!("Group leader panicked, failing {} batches", self.ids.len());
            self.coordinator.release(&self.ids, || {
                Err(StorageError::GroupCommitFailed("group leader panicked".to_string()))
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::decode_payload;
    use crate::checksum::ChecksumAlgorithm;
    use crate::memtable::LookupResult;
    use crate::view::ByteView;
    use crate::wal::{replay, LogWriter};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    /// Blocks an append until opened.
    #[derive(Default)]
    struct Gate {
        open: Mutex<bool>,
        opened: Condvar,
    }

    impl Gate {
        fn wait(&self) {
            let mut open = self.open.lock().unwrap();
            while !*open {
                open = self.opened.wait(open).unwrap();
            }
        }

        fn open(&self) {
            *self.open.lock().unwrap() = true;
            self.opened.notify_all();
        }
    }

    #[derive(Clone, Default)]
    struct Recorder {
        appends: Arc<Mutex<Vec<ByteView>>>,
        bytes: Arc<Mutex<Vec<u8>>>,
        rewinds: Arc<Mutex<Vec<u64>>>,
        syncs: Arc<AtomicUsize>,
        closed: Arc<AtomicBool>,
    }

    impl Recorder {
        fn appends(&self) -> Vec<ByteView> {
            self.appends.lock().unwrap().clone()
        }

        fn bytes(&self) -> Vec<u8> {
            self.bytes.lock().unwrap().clone()
        }

        fn rewinds(&self) -> Vec<u64> {
            self.rewinds.lock().unwrap().clone()
        }
    }

    /// In-memory sink. Failing and panicking appends leave half the data behind.
    struct TestSink {
        recorder: Recorder,
        gates: Vec<(usize, Arc<Gate>)>,
        fail_on: Option<usize>,
        fail_sync_on: Option<usize>,
        panic_on: Option<usize>,
    }

    impl TestSink {
        fn new(recorder: &Recorder) -> Self {
            Self {
                recorder: recorder.clone(),
                gates: Vec::new(),
                fail_on: None,
                fail_sync_on: None,
                panic_on: None,
            }
        }

        fn write_prefix(&self, data: &ByteView, len: usize) {
            let data = data.to_vec();
            self.recorder.bytes.lock().unwrap().extend_from_slice(&data[..len]);
        }
    }

    impl DurableSink for TestSink {
        fn append(&mut self, data: &ByteView) -> Result<()> {
            let index = {
                let mut appends = self.recorder.appends.lock().unwrap();
                appends.push(data.clone());
                appends.len() - 1
            };
            for (at, gate) in &self.gates {
                if *at == index {
                    gate.wait();
                }
            }
            if self.fail_on == Some(index) {
                self.write_prefix(data, data.len() / 2);
                return Err(StorageError::IoError(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk full",
                )));
            }
            if self.panic_on == Some(index) {
                self.write_prefix(data, data.len() / 2);
                panic!("sink failed mid-append");
            }
            self.write_prefix(data, data.len());
            Ok(())
        }

        fn sync(&mut self) -> Result<()> {
            let index = self.recorder.syncs.fetch_add(1, Ordering::SeqCst);
            if self.fail_sync_on == Some(index) {
                return Err(StorageError::IoError(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "sync failed",
                )));
            }
            Ok(())
        }

        fn end(&self) -> u64 {
            self.recorder.bytes.lock().unwrap().len() as u64
        }

        fn rewind(&mut self, end: u64) -> Result<()> {
            self.recorder.bytes.lock().unwrap().truncate(end as usize);
            self.recorder.rewinds.lock().unwrap().push(end);
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.recorder.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn start(
        sink: Box<dyn DurableSink>,
        options: CommitOptions,
    ) -> (Arc<WriteCoordinator>, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        let coordinator = WriteCoordinator::new(
            Arc::new(Memtable::new()),
            sink,
            options,
            Arc::clone(&metrics),
        );
        (Arc::new(coordinator), metrics)
    }

    fn coordinator(
        gate: Option<Arc<Gate>>,
        fail_on: Option<usize>,
        options: CommitOptions,
    ) -> (Arc<WriteCoordinator>, Recorder, Arc<Metrics>) {
        let recorder = Recorder::default();
        let mut sink = TestSink::new(&recorder);
        sink.gates.extend(gate.map(|gate| (0, gate)));
        sink.fail_on = fail_on;
        let (coordinator, metrics) = start(Box::new(sink), options);
        (coordinator, recorder, metrics)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for condition");
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn single_put(key: &str, value: &str) -> WriteBatch {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        batch
    }

    /// Starts one writer per key, each enqueued only after the previous one
    /// is queued, with the first writer's append held at the gate.
    fn gated_writers(
        coordinator: &Arc<WriteCoordinator>,
        recorder: &Recorder,
        keys: &[&str],
    ) -> Vec<thread::JoinHandle<Result<()>>> {
        let mut handles = Vec::new();
        for (i, key) in keys.iter().enumerate() {
            let writer = Arc::clone(coordinator);
            let batch = single_put(key, "0123456789");
            handles.push(thread::spawn(move || writer.commit(batch)));
            if i == 0 {
                wait_until(|| recorder.appends().len() == 1);
            } else {
                wait_until(|| coordinator.queued() == i + 1);
            }
        }
        handles
    }

    #[test]
    fn test_single_commit_visible() {
        let (coordinator, recorder, metrics) = coordinator(None, None, CommitOptions::default());

        let mut batch = WriteBatch::new();
        batch.put("cat", "meow").put("dog", "woof");
        coordinator.commit(batch).unwrap();

        let memtable = coordinator.memtable();
        assert_eq!(memtable.last_sequence(), 2);
        assert_eq!(
            memtable.get(&ByteView::from("cat")).unwrap(),
            LookupResult::Found(ByteView::from("meow"))
        );
        assert_eq!(recorder.appends().len(), 1);
        assert_eq!(recorder.syncs.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.report().group_commits, 1);
        assert_eq!(coordinator.queued(), 0);
    }

    #[test]
    fn test_empty_batch_skips_log() {
        let (coordinator, recorder, _) = coordinator(None, None, CommitOptions::default());
        coordinator.commit(WriteBatch::new()).unwrap();
        assert!(recorder.appends().is_empty());
        assert_eq!(coordinator.memtable().last_sequence(), 0);
    }

    #[test]
    fn test_no_sync_when_disabled() {
        let options = CommitOptions {
            sync_on_commit: false,
            ..CommitOptions::default()
        };
        let (coordinator, recorder, metrics) = coordinator(None, None, options);
        coordinator.commit(single_put("k", "v")).unwrap();

        assert_eq!(recorder.syncs.load(Ordering::SeqCst), 0);
        assert_eq!(metrics.report().sync_count, 0);
    }

    #[test]
    fn test_queued_writers_fold_in_arrival_order() {
        let gate = Arc::new(Gate::default());
        let (coordinator, recorder, metrics) =
            coordinator(Some(Arc::clone(&gate)), None, CommitOptions::default());

        let handles = gated_writers(&coordinator, &recorder, &["w1", "w2", "w3", "w4"]);
        gate.open();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        let appends = recorder.appends();
        assert_eq!(appends.len(), 2);

        let group = decode_payload(&appends[1]).unwrap();
        let order: Vec<_> = group
            .iter()
            .map(|(key, _)| (key.user_key.to_string_lossy(), key.sequence))
            .collect();
        assert_eq!(
            order,
            vec![
                ("w2".to_string(), 2),
                ("w3".to_string(), 3),
                ("w4".to_string(), 4)
            ]
        );

        assert_eq!(coordinator.memtable().last_sequence(), 4);
        let report = metrics.report();
        assert_eq!(report.group_commits, 2);
        assert_eq!(report.grouped_batches, 4);
    }

    #[test]
    fn test_group_size_threshold() {
        let gate = Arc::new(Gate::default());
        let options = CommitOptions {
            max_group_bytes: 15,
            sync_on_commit: true,
        };
        let (coordinator, recorder, _) = coordinator(Some(Arc::clone(&gate)), None, options);

        // Each batch is 12 bytes: the second group takes w2 and w3, w4 goes alone
        let handles = gated_writers(&coordinator, &recorder, &["w1", "w2", "w3", "w4"]);
        gate.open();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        let groups: Vec<usize> = recorder
            .appends()
            .iter()
            .map(|payload| decode_payload(payload).unwrap().len())
            .collect();
        assert_eq!(groups, vec![1, 2, 1]);
    }

    #[test]
    fn test_failed_group_releases_followers() {
        let gate = Arc::new(Gate::default());
        let (coordinator, recorder, metrics) =
            coordinator(Some(Arc::clone(&gate)), Some(1), CommitOptions::default());

        let mut handles = gated_writers(&coordinator, &recorder, &["w1", "w2", "w3"]);
        gate.open();

        let follower = handles.pop().unwrap().join().unwrap();
        let leader = handles.pop().unwrap().join().unwrap();
        let first = handles.pop().unwrap().join().unwrap();

        assert!(first.is_ok());
        assert!(matches!(leader, Err(StorageError::IoError(_))));
        match follower {
            Err(StorageError::GroupCommitFailed(message)) => assert!(message.contains("disk full")),
            other => panic!("unexpected follower result: {:?}", other),
        }

        // Failed writes never became visible
        let memtable = coordinator.memtable();
        assert_eq!(memtable.get(&ByteView::from("w2")).unwrap(), LookupResult::NotFound);
        assert_eq!(memtable.get(&ByteView::from("w3")).unwrap(), LookupResult::NotFound);
        assert_eq!(metrics.report().failed_groups, 1);

        // The torn half of the failed record was discarded
        let appends = recorder.appends();
        assert_eq!(recorder.rewinds(), vec![appends[0].len() as u64]);
        assert_eq!(recorder.bytes(), appends[0].to_vec());

        // The coordinator keeps working after a failed group
        coordinator.commit(single_put("w4", "v")).unwrap();
        assert_eq!(
            memtable.get(&ByteView::from("w4")).unwrap(),
            LookupResult::Found(ByteView::from("v"))
        );
        assert_eq!(coordinator.queued(), 0);
    }

    #[test]
    fn test_commit_after_close() {
        let (coordinator, recorder, _) = coordinator(None, None, CommitOptions::default());
        coordinator.close().unwrap();

        assert!(recorder.closed.load(Ordering::SeqCst));
        assert!(matches!(
            coordinator.commit(single_put("k", "v")),
            Err(StorageError::Closed)
        ));
        // Closing twice is fine
        assert!(coordinator.close().is_ok());
    }

    #[test]
    fn test_concurrent_writers() {
        let (coordinator, recorder, metrics) = coordinator(None, None, CommitOptions::default());
        let mut handles = vec![];

        for t in 0..8 {
            let coordinator = Arc::clone(&coordinator);
            handles.push(thread::spawn(move || {
                for i in 0..50 {
                    let mut batch = WriteBatch::new();
                    batch
                        .put(format!("a_{}_{}", t, i), "x")
                        .put(format!("b_{}_{}", t, i), "y");
                    coordinator.commit(batch).unwrap();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let memtable = coordinator.memtable();
        assert_eq!(memtable.len(), 800);
        assert_eq!(memtable.last_sequence(), 800);

        let report = metrics.report();
        assert_eq!(report.grouped_batches, 400);
        assert_eq!(report.group_commits as usize, recorder.appends().len());
        assert!(report.group_commits <= 400);

        // Every log record holds whole batches with contiguous sequences
        let mut expected_sequence = 1;
        for payload in recorder.appends() {
            for (key, _) in decode_payload(&payload).unwrap() {
                assert_eq!(key.sequence, expected_sequence);
                expected_sequence += 1;
            }
        }
    }

    #[test]
    fn test_batches_become_visible_atomically() {
        let (coordinator, _, _) = coordinator(None, None, CommitOptions::default());
        let done = Arc::new(AtomicBool::new(false));

        let writers: Vec<_> = (0..2)
            .map(|t| {
                let coordinator = Arc::clone(&coordinator);
                thread::spawn(move || {
                    for i in 0..300 {
                        let value = format!("{}-{}", t, i);
                        let mut batch = WriteBatch::new();
                        batch.put("left", value.as_str()).put("right", value.as_str());
                        coordinator.commit(batch).unwrap();
                    }
                })
            })
            .collect();

        let reader = {
            let memtable = Arc::clone(coordinator.memtable());
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let left = ByteView::from("left");
                let right = ByteView::from("right");
                while !done.load(Ordering::SeqCst) {
                    let snapshot = memtable.last_sequence();
                    let l = memtable.lookup(&left, snapshot).unwrap();
                    let r = memtable.lookup(&right, snapshot).unwrap();
                    assert_eq!(l, r, "torn batch at snapshot {}", snapshot);
                }
            })
        };

        for writer in writers {
            writer.join().unwrap();
        }
        done.store(true, Ordering::SeqCst);
        reader.join().unwrap();
    }

    #[test]
    fn test_leader_panic_fails_followers() {
        let gate = Arc::new(Gate::default());
        let recorder = Recorder::default();
        let mut sink = TestSink::new(&recorder);
        sink.gates.push((0, Arc::clone(&gate)));
        sink.panic_on = Some(1);
        let (coordinator, _) = start(Box::new(sink), CommitOptions::default());

        let mut handles = gated_writers(&coordinator, &recorder, &["w1", "w2", "w3"]);
        gate.open();

        let follower = handles.pop().unwrap().join().unwrap();
        let leader = handles.pop().unwrap().join();
        let first = handles.pop().unwrap().join().unwrap();

        assert!(first.is_ok());
        assert!(leader.is_err());
        match follower {
            Err(StorageError::GroupCommitFailed(message)) => assert!(message.contains("panicked")),
            other => panic!("unexpected follower result: {:?}", other),
        }
        assert_eq!(coordinator.queued(), 0);

        // The next writer recovers the log and drops the half-written record
        coordinator.commit(single_put("w4", "v")).unwrap();
        let appends = recorder.appends();
        assert_eq!(recorder.rewinds(), vec![appends[0].len() as u64]);
        let mut expected = appends[0].to_vec();
        expected.extend_from_slice(&appends[2].to_vec());
        assert_eq!(recorder.bytes(), expected);

        let memtable = coordinator.memtable();
        assert_eq!(memtable.get(&ByteView::from("w2")).unwrap(), LookupResult::NotFound);
        assert_eq!(
            memtable.get(&ByteView::from("w4")).unwrap(),
            LookupResult::Found(ByteView::from("v"))
        );
    }

    #[test]
    fn test_failed_sync_rolls_back_group() {
        let recorder = Recorder::default();
        let mut sink = TestSink::new(&recorder);
        sink.fail_sync_on = Some(0);
        let (coordinator, metrics) = start(Box::new(sink), CommitOptions::default());

        let result = coordinator.commit(single_put("k1", "v1"));
        assert!(matches!(result, Err(StorageError::IoError(_))));
        assert_eq!(recorder.rewinds(), vec![0]);
        assert!(recorder.bytes().is_empty());

        let memtable = coordinator.memtable();
        assert_eq!(memtable.get(&ByteView::from("k1")).unwrap(), LookupResult::NotFound);

        coordinator.commit(single_put("k2", "v2")).unwrap();
        assert_eq!(recorder.bytes(), recorder.appends()[1].to_vec());

        let report = metrics.report();
        assert_eq!(report.failed_groups, 1);
        assert_eq!(report.sync_count, 1);
    }

    #[test]
    fn test_torn_append_keeps_later_groups_replayable() {
        let recorder = Recorder::default();
        let mut sink = TestSink::new(&recorder);
        sink.fail_on = Some(1);
        let writer = LogWriter::new(sink, ChecksumAlgorithm::CRC32);
        let (coordinator, _) = start(Box::new(writer), CommitOptions::default());

        coordinator.commit(single_put("k1", "v1")).unwrap();
        assert!(coordinator.commit(single_put("k2", "v2")).is_err());
        coordinator.commit(single_put("k3", "v3")).unwrap();

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("commit.log");
        std::fs::write(&path, recorder.bytes()).unwrap();

        let replayed = replay(&path, ChecksumAlgorithm::CRC32).unwrap();
        assert_eq!(replayed.records.len(), 2);
        assert_eq!(replayed.discarded_bytes, 0);

        let keys: Vec<_> = replayed
            .records
            .iter()
            .flat_map(|record| decode_payload(record).unwrap())
            .map(|(key, _)| (key.user_key.to_string_lossy(), key.sequence))
            .collect();
        assert_eq!(keys, vec![("k1".to_string(), 1), ("k3".to_string(), 3)]);
    }

    #[test]
    fn test_folded_writer_survives_poisoned_queue() {
        let first_gate = Arc::new(Gate::default());
        let second_gate = Arc::new(Gate::default());
        let recorder = Recorder::default();
        let mut sink = TestSink::new(&recorder);
        sink.gates.push((0, Arc::clone(&first_gate)));
        sink.gates.push((1, Arc::clone(&second_gate)));
        let (coordinator, _) = start(Box::new(sink), CommitOptions::default());

        let mut handles = gated_writers(&coordinator, &recorder, &["w1", "w2", "w3"]);
        first_gate.open();
        // w2 leads a group holding w3 and blocks inside its append
        wait_until(|| recorder.appends().len() == 2);

        let poisoner = Arc::clone(&coordinator);
        let poisoned = thread::spawn(move || {
            let _state = poisoner.state.lock().unwrap();
            panic!("queue lock holder failed");
        })
        .join();
        assert!(poisoned.is_err());

        second_gate.open();
        for handle in handles.drain(..) {
            handle.join().unwrap().unwrap();
        }
        assert_eq!(
            coordinator.memtable().get(&ByteView::from("w3")).unwrap(),
            LookupResult::Found(ByteView::from("0123456789"))
        );
    }
}
