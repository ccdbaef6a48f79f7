//! RocksDB storage layer shared by the statistics and credential stores

use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Arc;

#[derive(Clone)]
pub struct OptimizedStorage {
    db: Arc<DB>,
}

impl OptimizedStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, rocksdb::Error> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(16 * 1024 * 1024);
        opts.set_max_write_buffer_number(2);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path)?;
        Ok(Self { db: Arc::new(db) })
    }

    /// `Ok(None)` only when the key is absent; read failures are returned
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, rocksdb::Error> {
        self.db.get(key)
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<(), rocksdb::Error> {
        self.db.put(key, value)
    }

    pub fn batch_write<K, V>(&self, items: &[(K, V)]) -> Result<(), rocksdb::Error>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut batch = WriteBatch::default();
        for (key, value) in items {
            batch.put(key, value);
        }
        self.db.write(batch)
    }

    /// All rows whose key starts with `prefix`, in key order
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, rocksdb::Error> {
        let mut rows = Vec::new();
        for item in self.db.iterator(IteratorMode::From(prefix, Direction::Forward)) {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            rows.push((key.to_vec(), value.to_vec()));
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_prefix_stops_at_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let storage = OptimizedStorage::new(dir.path()).unwrap();

        storage
            .batch_write(&[
                (b"stat:1:a".to_vec(), b"1".to_vec()),
                (b"stat:1:b".to_vec(), b"2".to_vec()),
                (b"stat:2:a".to_vec(), b"3".to_vec()),
            ])
            .unwrap();

        let rows = storage.scan_prefix(b"stat:1:").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].1, b"2".to_vec());
        assert_eq!(storage.get(b"stat:2:a").unwrap(), Some(b"3".to_vec()));
    }

    #[test]
    fn test_get_distinguishes_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let storage = OptimizedStorage::new(dir.path()).unwrap();
        storage.put(b"meta:k", b"").unwrap();

        assert_eq!(storage.get(b"meta:k").unwrap(), Some(Vec::new()));
        assert_eq!(storage.get(b"meta:missing").unwrap(), None);
        assert!(storage.scan_prefix(b"nothing:").unwrap().is_empty());
    }
}
