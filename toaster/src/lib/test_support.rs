use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::dfs::{DfsClient, DfsPath, SUCCESS_FLAG};
use crate::errors::StorageError;
use crate::exec::{CommandRunner, ProcessHandle};

/// In-memory DFS double. Keeps an ordered write log so tests can assert on
/// marker ordering.
#[derive(Default)]
pub struct MemDfs {
    objects: Mutex<Vec<String>>,
}

impl MemDfs {
    pub fn insert(&self, url: &str) {
        let mut objects = self.objects.lock().unwrap();
        if !objects.iter().any(|o| o == url) {
            objects.push(url.to_string());
        }
    }

    pub fn contains(&self, url: &str) -> bool {
        self.objects.lock().unwrap().iter().any(|o| o == url)
    }

    pub fn writes(&self) -> Vec<String> {
        self.objects.lock().unwrap().clone()
    }
}

#[async_trait]
impl DfsClient for MemDfs {
    async fn exists(&self, path: &DfsPath) -> Result<bool, StorageError> {
        let url = path.url();
        let prefix = format!("{url}/");
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .any(|o| o == url || o.starts_with(&prefix)))
    }

    async fn put(&self, _local: &Path, path: &DfsPath) -> Result<(), StorageError> {
        self.insert(path.url());
        Ok(())
    }

    async fn mv(&self, src: &DfsPath, dst: &DfsPath) -> Result<(), StorageError> {
        self.objects.lock().unwrap().retain(|o| o != src.url());
        self.insert(dst.url());
        Ok(())
    }

    async fn rm(&self, path: &DfsPath, recursive: bool) -> Result<(), StorageError> {
        let url = path.url();
        let prefix = format!("{url}/");
        self.objects
            .lock()
            .unwrap()
            .retain(|o| o != url && !(recursive && o.starts_with(&prefix)));
        Ok(())
    }

    async fn mark_complete(&self, dir: &DfsPath) -> Result<(), StorageError> {
        self.insert(dir.join(SUCCESS_FLAG).url());
        Ok(())
    }
}

pub struct DoneHandle(pub i32);

#[async_trait]
impl ProcessHandle for DoneHandle {
    fn try_status(&mut self) -> io::Result<Option<i32>> {
        Ok(Some(self.0))
    }

    async fn wait(&mut self) -> io::Result<i32> {
        Ok(self.0)
    }
}

/// Runner double that records every script and simulates the external
/// side effects against a `MemDfs`: crumpet invocations materialize their
/// `--dest` file, converter jobs drop a `_SUCCESS` marker into their target
/// directory (the Spark convention).
pub struct EffectRunner {
    pub dfs: Arc<MemDfs>,
    pub log: Mutex<Vec<String>>,
}

impl EffectRunner {
    pub fn new(dfs: Arc<MemDfs>) -> Self {
        EffectRunner {
            dfs,
            log: Mutex::new(vec![]),
        }
    }

    pub fn scripts(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for EffectRunner {
    async fn launch(&self, script: &str) -> io::Result<Box<dyn ProcessHandle>> {
        self.log.lock().unwrap().push(script.to_string());
        let tokens: Vec<&str> = script.split_whitespace().collect();
        if let Some(pos) = tokens.iter().position(|t| *t == "--dest") {
            self.dfs.insert(tokens[pos + 1]);
        } else if let Some(target) = tokens.last() {
            self.dfs.insert(&format!("{target}/{SUCCESS_FLAG}"));
        }
        Ok(Box::new(DoneHandle(0)))
    }
}

// Lets one recording runner be shared between a pool and a graph.
#[async_trait]
impl CommandRunner for Arc<EffectRunner> {
    async fn launch(&self, script: &str) -> io::Result<Box<dyn ProcessHandle>> {
        self.as_ref().launch(script).await
    }
}
