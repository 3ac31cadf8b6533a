use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::ProcessError;

use super::CacheBackend;

/// HashMap-backed cache for tests and local runs. Expiry is checked on
/// read; expired entries are dropped lazily.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Instant, Vec<u8>)>>,
}

impl MemoryCache {
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ProcessError> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some((deadline, value)) if *deadline > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), ProcessError> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (Instant::now() + ttl, value));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ProcessError> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}
