//! Journaled on-disk LRU cache
//!
//! Each entry is a pair of files named after the SHA-256 of its key:
//! `<hash>.0` holds response metadata and `<hash>.1` the fetched bytes.
//! Edits are written to `<hash>.<n>.tmp` and renamed into place on commit, so
//! readers never observe a partial write. All bookkeeping lives behind one
//! mutex; the file I/O done by callers through editors and snapshots does not.

use super::journal::{
    read_journal, write_journal, JournalRecord, JournalWriter, JOURNAL_FILE, JOURNAL_FILE_BACKUP,
    JOURNAL_FILE_TMP, VALUE_COUNT,
};
use crate::error::Result;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use lru::LruCache;
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const METADATA_INDEX: usize = 0;
const DATA_INDEX: usize = 1;

/// Journal lines that no longer describe live state before a rewrite
const REDUNDANT_OP_COMPACT_THRESHOLD: usize = 2000;

/// File name stem for a cache key
pub fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Bookkeeping for one entry
#[derive(Debug, Default)]
struct Entry {
    lengths: [u64; VALUE_COUNT],
    /// Has a committed version
    readable: bool,
    /// Removed while in use; deleted once the last handle is released
    zombie: bool,
    /// Id of the open editor, if any
    editor: Option<u64>,
    snapshots: usize,
    sequence_number: u64,
}

struct State {
    entries: HashMap<String, Entry>,
    /// Recency order of every known hash
    lru: LruCache<String, ()>,
    /// Sum of committed data file lengths
    size: u64,
    journal: Option<JournalWriter>,
    redundant_op_count: usize,
    next_editor_id: u64,
    next_sequence_number: u64,
}

impl State {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruCache::unbounded(),
            size: 0,
            journal: None,
            redundant_op_count: 0,
            next_editor_id: 1,
            next_sequence_number: 1,
        }
    }

    fn touch(&mut self, hash: &str) {
        self.lru.put(hash.to_string(), ());
    }

    fn forget(&mut self, hash: &str) {
        self.entries.remove(hash);
        self.lru.pop(hash);
    }

    /// Hashes, least recently used first
    fn least_recent(&self) -> impl Iterator<Item = &String> {
        self.lru.iter().rev().map(|(hash, _)| hash)
    }

    /// Append to the journal; a failed write detaches it until the next rebuild
    fn append(&mut self, record: JournalRecord) -> bool {
        let Some(journal) = self.journal.as_mut() else {
            return false;
        };
        match journal.append(&record) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to append to disk cache journal: {}", e);
                self.journal = None;
                false
            }
        }
    }

    fn journal_rebuild_required(&self) -> bool {
        self.redundant_op_count >= REDUNDANT_OP_COMPACT_THRESHOLD
            && self.redundant_op_count >= self.entries.len()
    }

    fn apply(&mut self, record: JournalRecord) {
        match record {
            JournalRecord::Clean { key, lengths } => {
                let entry = self.entries.entry(key.clone()).or_default();
                entry.readable = true;
                entry.editor = None;
                entry.lengths = lengths;
                self.touch(&key);
            }
            JournalRecord::Dirty { key } => {
                self.entries.entry(key.clone()).or_default().editor = Some(0);
                self.touch(&key);
            }
            JournalRecord::Remove { key } => self.forget(&key),
            JournalRecord::Read { key } => {
                if self.entries.contains_key(&key) {
                    self.touch(&key);
                }
            }
        }
    }
}

struct Inner {
    directory: PathBuf,
    max_size: u64,
    state: Mutex<State>,
}

/// Summary of one committed entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskEntryInfo {
    pub hash: String,
    pub metadata_len: u64,
    pub data_len: u64,
    pub sequence_number: u64,
}

/// Size-bounded LRU cache of files, persisted through a journal
#[derive(Clone)]
pub struct DiskCache {
    inner: Arc<Inner>,
}

impl DiskCache {
    /// Open (or create) a cache in `directory`
    ///
    /// A journal whose header is not recognized is treated as corruption:
    /// the directory is emptied and the cache starts over.
    pub fn open(directory: impl Into<PathBuf>, max_size_bytes: u64) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;

        let journal_path = directory.join(JOURNAL_FILE);
        let backup_path = directory.join(JOURNAL_FILE_BACKUP);
        if backup_path.exists() {
            if journal_path.exists() {
                fs::remove_file(&backup_path)?;
            } else {
                fs::rename(&backup_path, &journal_path)?;
            }
        }

        let inner = Inner {
            directory,
            max_size: max_size_bytes,
            state: Mutex::new(State::new()),
        };

        {
            let mut state = inner.state.lock();
            let mut rebuild = true;

            if journal_path.exists() {
                match read_journal(&journal_path) {
                    Ok(contents) => {
                        let needs_rebuild = contents.needs_rebuild();
                        if needs_rebuild {
                            warn!(
                                "Ignoring {} malformed disk cache journal lines in {}",
                                contents.malformed_lines,
                                inner.directory.display()
                            );
                        }
                        let line_count = contents.line_count;
                        for record in contents.records {
                            state.apply(record);
                        }
                        inner.process_journal(&mut state);
                        state.redundant_op_count = line_count.saturating_sub(state.entries.len());

                        if !needs_rebuild {
                            state.journal = Some(JournalWriter::open_append(&journal_path)?);
                            rebuild = false;
                        }
                    }
                    Err(e) => {
                        warn!(
                            "Disk cache journal in {} is corrupt ({}), clearing the cache",
                            inner.directory.display(),
                            e
                        );
                        wipe_directory(&inner.directory)?;
                        *state = State::new();
                    }
                }
            }

            if rebuild {
                inner.rebuild_journal(&mut state)?;
            }

            info!(
                "Opened disk cache at {} ({} entries, {} bytes)",
                inner.directory.display(),
                state.entries.len(),
                state.size
            );
        }

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.inner.directory
    }

    pub fn max_size_bytes(&self) -> u64 {
        self.inner.max_size
    }

    /// Bytes held by committed data files
    pub fn size(&self) -> u64 {
        self.inner.state.lock().size
    }

    /// Number of committed entries
    pub fn len(&self) -> usize {
        self.inner
            .state
            .lock()
            .entries
            .values()
            .filter(|e| e.readable && !e.zombie)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hashed keys of committed entries, least recently used first
    pub fn keys(&self) -> Vec<String> {
        self.entries().into_iter().map(|info| info.hash).collect()
    }

    /// Committed entries, least recently used first
    pub fn entries(&self) -> Vec<DiskEntryInfo> {
        let state = self.inner.state.lock();
        state
            .least_recent()
            .filter_map(|hash| {
                let entry = state.entries.get(hash)?;
                (entry.readable && !entry.zombie).then(|| DiskEntryInfo {
                    hash: hash.clone(),
                    metadata_len: entry.lengths[METADATA_INDEX],
                    data_len: entry.lengths[DATA_INDEX],
                    sequence_number: entry.sequence_number,
                })
            })
            .collect()
    }

    /// Start writing `key`
    ///
    /// Returns `None` when another editor is open for the key, when snapshots
    /// of it are open, or when the journal cannot be written. Callers treat
    /// that as "skip the disk cache this time".
    pub fn open_editor(&self, key: &str) -> Result<Option<Editor>> {
        let hash = hash_key(key);
        let mut state = self.inner.state.lock();
        Ok(self.inner.open_editor_locked(&mut state, key, &hash))
    }

    /// Read the committed version of `key`
    ///
    /// Returns `None` when the entry is missing or an editor is open for it.
    pub fn open_snapshot(&self, key: &str) -> Result<Option<Snapshot>> {
        let hash = hash_key(key);
        let mut state = self.inner.state.lock();
        Ok(self.inner.open_snapshot_locked(&mut state, key, &hash))
    }

    /// Remove `key`; entries in use are deleted once released
    pub fn remove(&self, key: &str) -> Result<bool> {
        let hash = hash_key(key);
        let mut state = self.inner.state.lock();
        Ok(self.inner.remove_entry(&mut state, &hash))
    }

    /// Remove every entry
    pub fn clear(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        let hashes: Vec<String> = state.least_recent().cloned().collect();
        for hash in &hashes {
            self.inner.remove_entry(&mut state, hash);
        }
        info!(
            "Cleared disk cache at {} ({} entries)",
            self.inner.directory.display(),
            hashes.len()
        );
        Ok(())
    }

    /// Evict least recently used entries until within budget
    pub fn trim(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        self.inner.trim_to_size(&mut state, self.inner.max_size);
        self.inner.compact_if_needed(&mut state);
        Ok(())
    }

    /// Evict until at most `max_bytes` remain, regardless of the configured budget
    pub fn trim_to(&self, max_bytes: u64) -> Result<()> {
        let mut state = self.inner.state.lock();
        self.inner.trim_to_size(&mut state, max_bytes);
        self.inner.compact_if_needed(&mut state);
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        if let Some(journal) = state.journal.as_mut() {
            journal.flush()?;
        }
        Ok(())
    }
}

impl fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskCache")
            .field("directory", &self.inner.directory)
            .field("max_size", &self.inner.max_size)
            .finish()
    }
}

impl Inner {
    fn clean_path(&self, hash: &str, index: usize) -> PathBuf {
        self.directory.join(format!("{}.{}", hash, index))
    }

    fn dirty_path(&self, hash: &str, index: usize) -> PathBuf {
        self.directory.join(format!("{}.{}.tmp", hash, index))
    }

    /// Settle state read from the journal: count sizes, drop unfinished edits
    fn process_journal(&self, state: &mut State) {
        let _ = fs::remove_file(self.directory.join(JOURNAL_FILE_TMP));

        let hashes: Vec<String> = state.entries.keys().cloned().collect();
        for hash in hashes {
            let keep = match state.entries.get(&hash) {
                Some(entry) => entry.editor.is_none() && entry.readable,
                None => continue,
            };
            if keep {
                state.size += state.entries[&hash].lengths[DATA_INDEX];
            } else {
                debug!("Dropping unfinished disk cache entry {}", hash);
                for index in 0..VALUE_COUNT {
                    delete_if_exists(&self.clean_path(&hash, index));
                    delete_if_exists(&self.dirty_path(&hash, index));
                }
                state.forget(&hash);
            }
        }
    }

    /// Rewrite the journal from live state
    fn rebuild_journal(&self, state: &mut State) -> io::Result<()> {
        state.journal = None;

        let records: Vec<JournalRecord> = state
            .least_recent()
            .filter_map(|hash| {
                let entry = state.entries.get(hash)?;
                if entry.editor.is_some() {
                    Some(JournalRecord::Dirty { key: hash.clone() })
                } else if entry.readable {
                    Some(JournalRecord::Clean {
                        key: hash.clone(),
                        lengths: entry.lengths,
                    })
                } else {
                    None
                }
            })
            .collect();

        let journal_path = self.directory.join(JOURNAL_FILE);
        let tmp_path = self.directory.join(JOURNAL_FILE_TMP);
        let backup_path = self.directory.join(JOURNAL_FILE_BACKUP);

        write_journal(&tmp_path, &records)?;
        if journal_path.exists() {
            fs::rename(&journal_path, &backup_path)?;
        }
        fs::rename(&tmp_path, &journal_path)?;
        delete_if_exists(&backup_path);

        state.journal = Some(JournalWriter::open_append(&journal_path)?);
        state.redundant_op_count = 0;
        debug!("Rebuilt disk cache journal with {} records", records.len());
        Ok(())
    }

    fn compact_if_needed(&self, state: &mut State) {
        if state.journal_rebuild_required() {
            info!(
                "Compacting disk cache journal ({} redundant operations)",
                state.redundant_op_count
            );
            if let Err(e) = self.rebuild_journal(state) {
                warn!("Failed to compact disk cache journal: {}", e);
            }
        }
    }

    fn open_editor_locked(
        self: &Arc<Self>,
        state: &mut State,
        key: &str,
        hash: &str,
    ) -> Option<Editor> {
        if let Some(entry) = state.entries.get(hash) {
            if entry.editor.is_some() {
                debug!("Disk cache entry {} already has an open editor", key);
                return None;
            }
            if entry.snapshots > 0 {
                debug!("Disk cache entry {} is being read, not editing", key);
                return None;
            }
        }

        if state.journal.is_none() {
            if let Err(e) = self.rebuild_journal(state) {
                warn!("Disk cache journal unavailable, skipping write: {}", e);
                return None;
            }
        }

        // Journal first so a crash mid-write leaves a record to clean up
        if !state.append(JournalRecord::Dirty {
            key: hash.to_string(),
        }) {
            return None;
        }

        let id = state.next_editor_id;
        state.next_editor_id += 1;
        state.entries.entry(hash.to_string()).or_default().editor = Some(id);
        state.touch(hash);

        Some(Editor {
            cache: Arc::clone(self),
            key: key.to_string(),
            hash: hash.to_string(),
            id,
            written: [false; VALUE_COUNT],
            done: false,
        })
    }

    fn open_snapshot_locked(
        self: &Arc<Self>,
        state: &mut State,
        key: &str,
        hash: &str,
    ) -> Option<Snapshot> {
        let sequence_number = match state.entries.get(hash) {
            Some(entry) if entry.editor.is_some() => {
                debug!("Disk cache entry {} is being written, not reading", key);
                return None;
            }
            Some(entry) if entry.readable && !entry.zombie => entry.sequence_number,
            _ => return None,
        };

        let missing = (0..VALUE_COUNT).find(|&index| !self.clean_path(hash, index).exists());
        if let Some(index) = missing {
            warn!(
                "Disk cache entry {} lost file {}.{}, removing it",
                key, hash, index
            );
            self.remove_entry(state, hash);
            return None;
        }

        if let Some(entry) = state.entries.get_mut(hash) {
            entry.snapshots += 1;
        }
        state.redundant_op_count += 1;
        state.append(JournalRecord::Read {
            key: hash.to_string(),
        });
        state.touch(hash);
        self.compact_if_needed(state);

        Some(Snapshot {
            cache: Arc::clone(self),
            key: key.to_string(),
            hash: hash.to_string(),
            sequence_number,
            metadata_path: self.clean_path(hash, METADATA_INDEX),
            data_path: self.clean_path(hash, DATA_INDEX),
            closed: false,
        })
    }

    fn release_snapshot(&self, state: &mut State, hash: &str) {
        let remove = match state.entries.get_mut(hash) {
            Some(entry) => {
                entry.snapshots = entry.snapshots.saturating_sub(1);
                entry.snapshots == 0 && entry.zombie
            }
            None => false,
        };
        if remove {
            self.remove_entry(state, hash);
        }
    }

    /// Delete an entry, or mark it for deletion if it is in use
    fn remove_entry(&self, state: &mut State, hash: &str) -> bool {
        let Some(entry) = state.entries.get_mut(hash) else {
            return false;
        };

        if entry.snapshots > 0 || entry.editor.is_some() {
            let newly_zombie = !entry.zombie;
            entry.zombie = true;
            if newly_zombie && entry.snapshots > 0 {
                // Not usable after a crash even though its files still exist
                state.append(JournalRecord::Dirty {
                    key: hash.to_string(),
                });
            }
            return true;
        }

        let data_len = entry.lengths[DATA_INDEX];
        let readable = entry.readable;
        for index in 0..VALUE_COUNT {
            delete_if_exists(&self.clean_path(hash, index));
        }
        if readable {
            state.size = state.size.saturating_sub(data_len);
        }
        state.redundant_op_count += 1;
        state.append(JournalRecord::Remove {
            key: hash.to_string(),
        });
        state.forget(hash);
        self.compact_if_needed(state);
        true
    }

    fn trim_to_size(&self, state: &mut State, max_bytes: u64) {
        while state.size > max_bytes {
            let victim = state
                .least_recent()
                .find(|hash| {
                    state
                        .entries
                        .get(hash.as_str())
                        .map(|e| e.readable && !e.zombie)
                        .unwrap_or(false)
                })
                .cloned();
            match victim {
                Some(hash) => {
                    debug!("Evicting disk cache entry {}", hash);
                    self.remove_entry(state, &hash);
                }
                None => break,
            }
        }
    }

    /// Move dirty files into place, returning the new lengths
    fn publish(&self, hash: &str, written: [bool; VALUE_COUNT]) -> io::Result<[u64; VALUE_COUNT]> {
        for index in 0..VALUE_COUNT {
            if written[index] && !self.dirty_path(hash, index).exists() {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("editor did not create {}.{}.tmp", hash, index),
                ));
            }
        }

        let mut lengths = [0u64; VALUE_COUNT];
        for (index, length) in lengths.iter_mut().enumerate() {
            let dirty = self.dirty_path(hash, index);
            let clean = self.clean_path(hash, index);
            if dirty.exists() {
                fs::rename(&dirty, &clean)?;
            } else if !clean.exists() {
                File::create(&clean)?;
            }
            *length = fs::metadata(&clean)?.len();
        }
        Ok(lengths)
    }

    fn complete_edit_locked(
        &self,
        state: &mut State,
        hash: &str,
        id: u64,
        written: [bool; VALUE_COUNT],
        success: bool,
    ) -> Result<()> {
        let zombie = match state.entries.get(hash) {
            Some(entry) if entry.editor == Some(id) => entry.zombie,
            // Detached editor
            _ => return Ok(()),
        };

        let mut outcome = Ok(());
        let mut committed = false;
        if success && !zombie {
            match self.publish(hash, written) {
                Ok(lengths) => {
                    committed = true;
                    let sequence_number = state.next_sequence_number;
                    state.next_sequence_number += 1;
                    if let Some(entry) = state.entries.get_mut(hash) {
                        let old_len = if entry.readable {
                            entry.lengths[DATA_INDEX]
                        } else {
                            0
                        };
                        entry.lengths = lengths;
                        entry.readable = true;
                        entry.sequence_number = sequence_number;
                        state.size = state.size.saturating_sub(old_len) + lengths[DATA_INDEX];
                    }
                }
                Err(e) => {
                    warn!("Failed to commit disk cache entry {}: {}", hash, e);
                    outcome = Err(e.into());
                }
            }
        }

        if !committed {
            for index in 0..VALUE_COUNT {
                delete_if_exists(&self.dirty_path(hash, index));
            }
        }

        let (readable, lengths) = match state.entries.get_mut(hash) {
            Some(entry) => {
                entry.editor = None;
                (entry.readable, entry.lengths)
            }
            None => return outcome,
        };

        if zombie {
            self.remove_entry(state, hash);
            return outcome;
        }

        state.redundant_op_count += 1;
        if readable {
            state.append(JournalRecord::Clean {
                key: hash.to_string(),
                lengths,
            });
        } else {
            state.forget(hash);
            state.append(JournalRecord::Remove {
                key: hash.to_string(),
            });
        }

        if state.size > self.max_size {
            self.trim_to_size(state, self.max_size);
        }
        self.compact_if_needed(state);
        outcome
    }
}

fn delete_if_exists(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("Failed to delete {}: {}", path.display(), e);
        }
    }
}

fn wipe_directory(directory: &Path) -> io::Result<()> {
    for entry in fs::read_dir(directory)? {
        let path = entry?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Exclusive write access to one entry
///
/// Dropping an editor without committing aborts it.
pub struct Editor {
    cache: Arc<Inner>,
    key: String,
    hash: String,
    id: u64,
    written: [bool; VALUE_COUNT],
    done: bool,
}

impl Editor {
    pub fn key(&self) -> &str {
        &self.key
    }

    fn file(&mut self, index: usize) -> PathBuf {
        self.written[index] = true;
        self.cache.dirty_path(&self.hash, index)
    }

    /// Path the new metadata must be written to before committing
    pub fn metadata_path(&mut self) -> PathBuf {
        self.file(METADATA_INDEX)
    }

    /// Path the new data must be written to before committing
    pub fn data_path(&mut self) -> PathBuf {
        self.file(DATA_INDEX)
    }

    pub fn metadata_writer(&mut self) -> Result<File> {
        Ok(File::create(self.metadata_path())?)
    }

    pub fn data_writer(&mut self) -> Result<File> {
        Ok(File::create(self.data_path())?)
    }

    pub fn write_metadata(&mut self, bytes: &[u8]) -> Result<()> {
        Ok(fs::write(self.metadata_path(), bytes)?)
    }

    pub fn write_data(&mut self, bytes: &[u8]) -> Result<()> {
        Ok(fs::write(self.data_path(), bytes)?)
    }

    /// Publish the written files
    ///
    /// Files that were never written keep their previously committed
    /// contents (or are created empty for a new entry).
    pub fn commit(mut self) -> Result<()> {
        self.done = true;
        let mut state = self.cache.state.lock();
        self.cache
            .complete_edit_locked(&mut state, &self.hash, self.id, self.written, true)
    }

    /// Commit and open a snapshot of the result in one step
    pub fn commit_and_get(mut self) -> Result<Option<Snapshot>> {
        self.done = true;
        let mut state = self.cache.state.lock();
        self.cache
            .complete_edit_locked(&mut state, &self.hash, self.id, self.written, true)?;
        Ok(self
            .cache
            .open_snapshot_locked(&mut state, &self.key, &self.hash))
    }

    /// Discard the written files, keeping any previously committed version
    pub fn abort(mut self) -> Result<()> {
        self.done = true;
        let mut state = self.cache.state.lock();
        self.cache
            .complete_edit_locked(&mut state, &self.hash, self.id, self.written, false)
    }
}

impl Drop for Editor {
    fn drop(&mut self) {
        if !self.done {
            let mut state = self.cache.state.lock();
            if let Err(e) =
                self.cache
                    .complete_edit_locked(&mut state, &self.hash, self.id, self.written, false)
            {
                warn!("Failed to abort disk cache editor for {}: {}", self.key, e);
            }
        }
    }
}

impl fmt::Debug for Editor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Editor")
            .field("key", &self.key)
            .field("written", &self.written)
            .finish()
    }
}

/// Read-only view of a committed entry
///
/// The files stay in place and unchanged while the snapshot is open: no
/// editor can be opened for the entry until every snapshot of it is
/// released, and removal or eviction is deferred until then.
pub struct Snapshot {
    cache: Arc<Inner>,
    key: String,
    hash: String,
    sequence_number: u64,
    metadata_path: PathBuf,
    data_path: PathBuf,
    closed: bool,
}

impl Snapshot {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Changes every time the entry is committed
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn metadata_path(&self) -> &Path {
        &self.metadata_path
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn read_metadata(&self) -> Result<Vec<u8>> {
        Ok(fs::read(&self.metadata_path)?)
    }

    pub fn read_data(&self) -> Result<Vec<u8>> {
        Ok(fs::read(&self.data_path)?)
    }

    pub fn data_reader(&self) -> Result<BufReader<File>> {
        Ok(BufReader::new(File::open(&self.data_path)?))
    }

    /// Close this snapshot and open an editor for the same entry
    ///
    /// Returns `None` if the entry changed since the snapshot was taken or
    /// is otherwise busy.
    pub fn close_and_edit(mut self) -> Result<Option<Editor>> {
        self.closed = true;
        let mut state = self.cache.state.lock();
        self.cache.release_snapshot(&mut state, &self.hash);

        match state.entries.get(&self.hash) {
            Some(entry) if entry.sequence_number == self.sequence_number => {}
            _ => return Ok(None),
        }
        Ok(self
            .cache
            .open_editor_locked(&mut state, &self.key, &self.hash))
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        if !self.closed {
            let mut state = self.cache.state.lock();
            self.cache.release_snapshot(&mut state, &self.hash);
        }
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("key", &self.key)
            .field("sequence_number", &self.sequence_number)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn put(cache: &DiskCache, key: &str, metadata: &[u8], data: &[u8]) {
        let mut editor = cache.open_editor(key).unwrap().unwrap();
        editor.write_metadata(metadata).unwrap();
        editor.write_data(data).unwrap();
        editor.commit().unwrap();
    }

    #[test]
    fn test_commit_then_read() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(dir.path(), 1024).unwrap();
        put(&cache, "https://example.com/a.png", b"meta", b"0123456789");

        let snapshot = cache.open_snapshot("https://example.com/a.png").unwrap().unwrap();
        assert_eq!(snapshot.read_metadata().unwrap(), b"meta");
        assert_eq!(snapshot.read_data().unwrap(), b"0123456789");
        assert_eq!(cache.size(), 10);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_missing_key_is_none() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(dir.path(), 1024).unwrap();
        assert!(cache.open_snapshot("nope").unwrap().is_none());
        assert!(!cache.remove("nope").unwrap());
    }

    #[test]
    fn test_abort_keeps_previous_version() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(dir.path(), 1024).unwrap();
        put(&cache, "k", b"m1", b"v1");

        let mut editor = cache.open_editor("k").unwrap().unwrap();
        editor.write_data(b"replacement").unwrap();
        editor.abort().unwrap();

        let snapshot = cache.open_snapshot("k").unwrap().unwrap();
        assert_eq!(snapshot.read_data().unwrap(), b"v1");
        assert_eq!(cache.size(), 2);
    }

    #[test]
    fn test_dropped_editor_of_new_entry_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(dir.path(), 1024).unwrap();
        {
            let mut editor = cache.open_editor("k").unwrap().unwrap();
            editor.write_data(b"partial").unwrap();
        }
        assert!(cache.open_snapshot("k").unwrap().is_none());
        assert!(!dir.path().join(format!("{}.1.tmp", hash_key("k"))).exists());
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_unwritten_file_keeps_committed_contents() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(dir.path(), 1024).unwrap();
        put(&cache, "k", b"old-meta", b"body");

        let mut editor = cache.open_editor("k").unwrap().unwrap();
        editor.write_metadata(b"new-meta").unwrap();
        let snapshot = editor.commit_and_get().unwrap().unwrap();
        assert_eq!(snapshot.read_metadata().unwrap(), b"new-meta");
        assert_eq!(snapshot.read_data().unwrap(), b"body");
    }

    #[test]
    fn test_snapshots_block_editors() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(dir.path(), 1024).unwrap();
        put(&cache, "k", b"m", b"v");

        let snapshot = cache.open_snapshot("k").unwrap().unwrap();
        assert!(cache.open_editor("k").unwrap().is_none());
        drop(snapshot);
        assert!(cache.open_editor("k").unwrap().is_some());
    }

    #[test]
    fn test_close_and_edit() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(dir.path(), 1024).unwrap();
        put(&cache, "k", b"m", b"v");

        let snapshot = cache.open_snapshot("k").unwrap().unwrap();
        let mut editor = snapshot.close_and_edit().unwrap().unwrap();
        editor.write_data(b"v2").unwrap();
        editor.commit().unwrap();
        assert_eq!(
            cache.open_snapshot("k").unwrap().unwrap().read_data().unwrap(),
            b"v2"
        );
    }

    #[test]
    fn test_editors_block_snapshots() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(dir.path(), 1024).unwrap();
        put(&cache, "k", b"m", b"v1");

        let mut editor = cache.open_editor("k").unwrap().unwrap();
        assert!(cache.open_snapshot("k").unwrap().is_none());
        editor.write_data(b"v2-new").unwrap();
        editor.commit().unwrap();

        let snapshot = cache.open_snapshot("k").unwrap().unwrap();
        assert_eq!(snapshot.read_data().unwrap(), b"v2-new");
    }

    #[test]
    fn test_snapshot_contents_survive_later_writes() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(dir.path(), 1024).unwrap();
        put(&cache, "k", b"m", b"v1");

        let snapshot = cache.open_snapshot("k").unwrap().unwrap();
        assert!(cache.open_editor("k").unwrap().is_none());
        // A writer that gave up does not disturb the reader
        put_if_free(&cache, "k", b"v2-new");
        assert_eq!(snapshot.read_data().unwrap(), b"v1");
        assert_eq!(fs::read(snapshot.data_path()).unwrap(), b"v1");

        drop(snapshot);
        put(&cache, "k", b"m", b"v2-new");
        assert_eq!(
            cache.open_snapshot("k").unwrap().unwrap().read_data().unwrap(),
            b"v2-new"
        );
    }

    fn put_if_free(cache: &DiskCache, key: &str, data: &[u8]) {
        if let Some(mut editor) = cache.open_editor(key).unwrap() {
            editor.write_data(data).unwrap();
            editor.commit().unwrap();
        }
    }

    #[test]
    fn test_close_and_edit_of_removed_entry_fails() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(dir.path(), 1024).unwrap();
        put(&cache, "k", b"m", b"v");

        let stale = cache.open_snapshot("k").unwrap().unwrap();
        assert!(cache.remove("k").unwrap());

        assert!(stale.close_and_edit().unwrap().is_none());
        assert!(cache.open_snapshot("k").unwrap().is_none());
        assert!(cache.open_editor("k").unwrap().is_some());
    }

    #[test]
    fn test_removed_entry_in_use_is_deleted_on_release() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(dir.path(), 1024).unwrap();
        put(&cache, "k", b"m", b"value");

        let snapshot = cache.open_snapshot("k").unwrap().unwrap();
        assert!(cache.remove("k").unwrap());
        assert!(cache.open_snapshot("k").unwrap().is_none());
        // Still readable through the open handle
        assert_eq!(snapshot.read_data().unwrap(), b"value");
        let data_path = snapshot.data_path().to_path_buf();
        drop(snapshot);

        assert!(!data_path.exists());
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_eviction_is_lru() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(dir.path(), 20).unwrap();
        put(&cache, "a", b"", &[0u8; 8]);
        put(&cache, "b", b"", &[0u8; 8]);
        // Touch a so b becomes the eviction candidate
        drop(cache.open_snapshot("a").unwrap());
        put(&cache, "c", b"", &[0u8; 8]);

        assert!(cache.size() <= 20);
        assert!(cache.open_snapshot("a").unwrap().is_some());
        assert!(cache.open_snapshot("b").unwrap().is_none());
        assert!(cache.open_snapshot("c").unwrap().is_some());
    }

    #[test]
    fn test_keys_follow_access_order() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(dir.path(), 1024).unwrap();
        for name in ["a", "b", "c"] {
            put(&cache, name, b"", b"x");
        }
        drop(cache.open_snapshot("a").unwrap());
        put(&cache, "b", b"", b"y");

        assert_eq!(cache.keys(), vec![hash_key("c"), hash_key("a"), hash_key("b")]);
        cache.remove("a").unwrap();
        assert_eq!(cache.keys(), vec![hash_key("c"), hash_key("b")]);

        // The order is rebuilt from the journal
        cache.flush().unwrap();
        drop(cache);
        let cache = DiskCache::open(dir.path(), 1024).unwrap();
        assert_eq!(cache.keys(), vec![hash_key("c"), hash_key("b")]);
    }

    #[test]
    fn test_clear_and_trim_to() {
        let dir = TempDir::new().unwrap();
        let cache = DiskCache::open(dir.path(), 1024).unwrap();
        put(&cache, "a", b"", &[0u8; 10]);
        put(&cache, "b", b"", &[0u8; 10]);

        cache.trim_to(10).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.keys(), vec![hash_key("b")]);

        cache.clear().unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.size(), 0);
    }
}
