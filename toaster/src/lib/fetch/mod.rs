use std::collections::VecDeque;
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::{Source, WorkerSettings};
use crate::dfs::{DfsClient, DfsPath};
use crate::errors::{FetchError, ToastError};
use crate::exec::{CommandRunner, ProcessHandle, SshRunner};
use crate::util::dest_filename;

/// How often the control loop polls its in-flight downloads.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// One file to fetch: consumed by exactly one worker; permanently done once
/// the destination exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub source_url: String,
    pub destination: DfsPath,
    pub compression: bool,
}

impl WorkItem {
    pub fn from_source(source: &Source, raw_dir: &DfsPath) -> WorkItem {
        let filename = dest_filename(&source.url, source.compression);
        WorkItem {
            source_url: source.url.clone(),
            destination: raw_dir.join(&filename),
            compression: source.compression,
        }
    }

    /// The fetch-agent invocation executed on a worker host.
    pub fn agent_command(&self, workers: &WorkerSettings) -> String {
        let mut command = format!(
            "{} --url {} --dest {} --work-path {}",
            workers.crumpet_path, self.source_url, self.destination, workers.work_path
        );
        if self.compression {
            command.push_str(" --gunzip");
        }
        command
    }
}

struct Slot {
    host: String,
    runner: Box<dyn CommandRunner>,
    current: Option<(WorkItem, Box<dyn ProcessHandle>)>,
}

/// Fixed-size download pool keyed by worker host. A single control loop
/// dispatches one item per host, polls the in-flight processes, and hands
/// the next item to whichever host frees up first.
pub struct FetchPool {
    settings: WorkerSettings,
    slots: Vec<Slot>,
    poll_interval: Duration,
}

impl FetchPool {
    pub fn new(settings: &WorkerSettings) -> Self {
        let runners = settings
            .hosts
            .iter()
            .map(|host| {
                (
                    host.clone(),
                    Box::new(SshRunner::new(host)) as Box<dyn CommandRunner>,
                )
            })
            .collect();
        Self::with_runners(settings, runners)
    }

    /// Pool over caller-supplied runners; used for local single-host runs
    /// and for tests.
    pub fn with_runners(
        settings: &WorkerSettings,
        runners: Vec<(String, Box<dyn CommandRunner>)>,
    ) -> Self {
        FetchPool {
            settings: settings.clone(),
            slots: runners
                .into_iter()
                .map(|(host, runner)| Slot {
                    host,
                    runner,
                    current: None,
                })
                .collect(),
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Downloads every item whose destination is still missing, then marks
    /// the destination directory complete. Any nonzero agent exit fails the
    /// whole round and withholds the marker; a rerun retries only the items
    /// that are still missing.
    pub async fn download_all(
        &mut self,
        dfs: &dyn DfsClient,
        items: Vec<WorkItem>,
        dest_dir: &DfsPath,
    ) -> Result<(), ToastError> {
        let mut pending: VecDeque<WorkItem> = VecDeque::new();
        for item in items {
            if dfs.exists(&item.destination).await? {
                debug!("{} already present, skipping", item.destination);
            } else {
                pending.push_back(item);
            }
        }

        if pending.is_empty() {
            info!("nothing to download, marking {dest_dir} complete");
            dfs.mark_complete(dest_dir).await?;
            return Ok(());
        }

        // Without this the control loop below would spin forever: nothing
        // can ever be dispatched, so the drain condition never holds.
        if self.slots.is_empty() {
            return Err(FetchError::NoWorkers.into());
        }

        info!(
            "downloading {} file(s) across {} worker(s)",
            pending.len(),
            self.slots.len()
        );

        let mut failed: Vec<String> = vec![];
        loop {
            for slot in &mut self.slots {
                if let Some((item, handle)) = slot.current.as_mut() {
                    if let Some(status) = handle.try_status()? {
                        if status == 0 {
                            debug!("{}: finished {}", slot.host, item.source_url);
                        } else {
                            warn!(
                                "{}: download of {} exited with status {status}",
                                slot.host, item.source_url
                            );
                            failed.push(item.source_url.clone());
                        }
                        slot.current = None;
                    }
                }
                if slot.current.is_none() {
                    if let Some(item) = pending.pop_front() {
                        debug!("{}: dispatching {}", slot.host, item.source_url);
                        let handle =
                            slot.runner.launch(&item.agent_command(&self.settings)).await?;
                        slot.current = Some((item, handle));
                    }
                }
            }

            if pending.is_empty() && self.slots.iter().all(|s| s.current.is_none()) {
                break;
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        if !failed.is_empty() {
            return Err(FetchError::PartialFailure { failed }.into());
        }
        dfs.mark_complete(dest_dir).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::dfs::SUCCESS_FLAG;
    use crate::test_support::MemDfs;

    fn settings(hosts: &[&str]) -> WorkerSettings {
        WorkerSettings {
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            work_path: "/scratch".to_string(),
            crumpet_path: "crumpet".to_string(),
            master_host: None,
        }
    }

    fn items(n: usize, raw: &DfsPath) -> Vec<WorkItem> {
        (1..=n)
            .map(|i| WorkItem {
                source_url: format!("http://example/file{i}.vcf"),
                destination: raw.join(&format!("file{i}.vcf")),
                compression: false,
            })
            .collect()
    }

    // Simulates a worker host: every launched download "runs" for a fixed
    // number of polls, then exits with the next scripted status.
    struct FakeWorker {
        host: &'static str,
        polls_to_finish: usize,
        statuses: Mutex<VecDeque<i32>>,
        dispatches: Arc<Mutex<Vec<(String, String)>>>,
        dfs: Arc<MemDfs>,
    }

    struct TickingHandle {
        remaining: usize,
        status: i32,
        dest: String,
        dfs: Arc<MemDfs>,
    }

    #[async_trait]
    impl crate::exec::ProcessHandle for TickingHandle {
        fn try_status(&mut self) -> io::Result<Option<i32>> {
            if self.remaining > 0 {
                self.remaining -= 1;
                return Ok(None);
            }
            if self.status == 0 {
                self.dfs.insert(&self.dest);
            }
            Ok(Some(self.status))
        }

        async fn wait(&mut self) -> io::Result<i32> {
            Ok(self.status)
        }
    }

    #[async_trait]
    impl CommandRunner for FakeWorker {
        async fn launch(&self, script: &str) -> io::Result<Box<dyn ProcessHandle>> {
            let tokens: Vec<&str> = script.split_whitespace().collect();
            let url = tokens[tokens.iter().position(|t| *t == "--url").unwrap() + 1];
            let dest = tokens[tokens.iter().position(|t| *t == "--dest").unwrap() + 1];
            self.dispatches
                .lock()
                .unwrap()
                .push((self.host.to_string(), url.to_string()));
            let status = self.statuses.lock().unwrap().pop_front().unwrap_or(0);
            Ok(Box::new(TickingHandle {
                remaining: self.polls_to_finish,
                status,
                dest: dest.to_string(),
                dfs: self.dfs.clone(),
            }))
        }
    }

    struct Fixture {
        dfs: Arc<MemDfs>,
        dispatches: Arc<Mutex<Vec<(String, String)>>>,
        pool: FetchPool,
    }

    fn pool_of(workers: Vec<(&'static str, usize, Vec<i32>)>) -> Fixture {
        let dfs = Arc::new(MemDfs::default());
        let dispatches = Arc::new(Mutex::new(vec![]));
        let hosts: Vec<&str> = workers.iter().map(|(h, _, _)| *h).collect();
        let runners = workers
            .into_iter()
            .map(|(host, polls, statuses)| {
                (
                    host.to_string(),
                    Box::new(FakeWorker {
                        host,
                        polls_to_finish: polls,
                        statuses: Mutex::new(statuses.into()),
                        dispatches: dispatches.clone(),
                        dfs: dfs.clone(),
                    }) as Box<dyn CommandRunner>,
                )
            })
            .collect();
        let pool = FetchPool::with_runners(&settings(&hosts), runners)
            .poll_interval(Duration::ZERO);
        Fixture {
            dfs,
            dispatches,
            pool,
        }
    }

    #[tokio::test]
    async fn fans_out_and_steals_work() {
        let mut fx = pool_of(vec![("a", 0, vec![]), ("b", 2, vec![])]);
        let raw = DfsPath::parse("hdfs://nn/raw/dbsnp").unwrap();
        fx.pool
            .download_all(fx.dfs.as_ref(), items(5, &raw), &raw)
            .await
            .unwrap();

        let dispatches = fx.dispatches.lock().unwrap().clone();
        assert_eq!(dispatches.len(), 5);
        // First round fills both hosts in order.
        assert_eq!(dispatches[0], ("a".to_string(), "http://example/file1.vcf".to_string()));
        assert_eq!(dispatches[1], ("b".to_string(), "http://example/file2.vcf".to_string()));
        // Item 3 waits for a host to free up; host a finishes first.
        assert_eq!(dispatches[2].0, "a");
        // Every item dispatched exactly once.
        let mut urls: Vec<String> = dispatches.iter().map(|(_, u)| u.clone()).collect();
        urls.sort();
        urls.dedup();
        assert_eq!(urls.len(), 5);
        assert!(fx.dfs.contains("hdfs://nn/raw/dbsnp/_SUCCESS"));
    }

    #[tokio::test]
    async fn skips_items_already_present() {
        let mut fx = pool_of(vec![("a", 0, vec![])]);
        let raw = DfsPath::parse("hdfs://nn/raw/dbsnp").unwrap();
        let work = items(3, &raw);
        fx.dfs.insert(work[1].destination.url());

        fx.pool
            .download_all(fx.dfs.as_ref(), work, &raw)
            .await
            .unwrap();

        let dispatched: Vec<String> = fx
            .dispatches
            .lock()
            .unwrap()
            .iter()
            .map(|(_, u)| u.clone())
            .collect();
        assert_eq!(
            dispatched,
            vec!["http://example/file1.vcf", "http://example/file3.vcf"]
        );
    }

    #[tokio::test]
    async fn all_present_marks_complete_without_dispatch() {
        let mut fx = pool_of(vec![("a", 0, vec![])]);
        let raw = DfsPath::parse("hdfs://nn/raw/dbsnp").unwrap();
        let work = items(2, &raw);
        for item in &work {
            fx.dfs.insert(item.destination.url());
        }

        fx.pool
            .download_all(fx.dfs.as_ref(), work, &raw)
            .await
            .unwrap();

        assert!(fx.dispatches.lock().unwrap().is_empty());
        assert!(fx.dfs.contains(&format!("hdfs://nn/raw/dbsnp/{SUCCESS_FLAG}")));
    }

    #[tokio::test]
    async fn no_workers_with_pending_items_is_an_error() {
        let mut fx = pool_of(vec![]);
        let raw = DfsPath::parse("hdfs://nn/raw/dbsnp").unwrap();
        let err = fx
            .pool
            .download_all(fx.dfs.as_ref(), items(1, &raw), &raw)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ToastError::Fetch {
                source: FetchError::NoWorkers
            }
        ));
        assert!(!fx.dfs.contains(&format!("hdfs://nn/raw/dbsnp/{SUCCESS_FLAG}")));
    }

    #[tokio::test]
    async fn no_workers_with_everything_present_still_marks_complete() {
        let mut fx = pool_of(vec![]);
        let raw = DfsPath::parse("hdfs://nn/raw/dbsnp").unwrap();
        let work = items(1, &raw);
        fx.dfs.insert(work[0].destination.url());

        fx.pool
            .download_all(fx.dfs.as_ref(), work, &raw)
            .await
            .unwrap();
        assert!(fx.dfs.contains(&format!("hdfs://nn/raw/dbsnp/{SUCCESS_FLAG}")));
    }

    #[tokio::test]
    async fn nonzero_exit_fails_round_and_withholds_marker() {
        let mut fx = pool_of(vec![("a", 0, vec![0, 7, 0])]);
        let raw = DfsPath::parse("hdfs://nn/raw/dbsnp").unwrap();
        let err = fx
            .pool
            .download_all(fx.dfs.as_ref(), items(3, &raw), &raw)
            .await
            .unwrap_err();

        match err {
            ToastError::Fetch {
                source: FetchError::PartialFailure { failed },
            } => assert_eq!(failed, vec!["http://example/file2.vcf"]),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!fx.dfs.contains(&format!("hdfs://nn/raw/dbsnp/{SUCCESS_FLAG}")));
    }

    #[test]
    fn agent_command_shape() {
        let raw = DfsPath::parse("hdfs://nn/raw/dbsnp").unwrap();
        let source = Source {
            url: "http://example/dbsnp.vcf.gz".to_string(),
            format: crate::config::SourceFormat::Vcf,
            compression: true,
        };
        let item = WorkItem::from_source(&source, &raw);
        let command = item.agent_command(&settings(&["a"]));
        assert!(command.starts_with("crumpet --url http://example/dbsnp.vcf.gz --dest hdfs://nn/raw/dbsnp/"));
        assert!(command.contains("--work-path /scratch"));
        assert!(command.ends_with("--gunzip"));
        // Decompressed destination drops the .gz extension.
        assert!(!item.destination.url().ends_with(".gz"));
    }
}
