/// Job Registry (spec.md §4.4): a concurrent mapping from job id to job
/// record, supporting insert, point-lookup, filtered list with pagination,
/// and in-place field updates under the record's own lock.
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::models::{Job, JobStatus};

const SNAPSHOT_CHANNEL_CAPACITY: usize = 32;

/// Per-job shared state: the record itself under its own lock, a broadcast
/// channel for progress fan-out (spec.md §9), and a cancellation token used
/// to preempt an in-flight subprocess (spec.md §4.5).
pub struct JobHandle {
    job: Mutex<Job>,
    events: broadcast::Sender<Job>,
    pub cancel_token: CancellationToken,
}

impl JobHandle {
    fn new(job: Job) -> Self {
        let (events, _rx) = broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY);
        Self {
            job: Mutex::new(job),
            events,
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn snapshot(&self) -> Job {
        self.job.lock().unwrap().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Job> {
        self.events.subscribe()
    }

    /// Mutate the record under its own lock, then broadcast the new
    /// snapshot. Readers of the registry never block behind this — only
    /// this one record's lock is held, and only for the duration of `f`.
    pub fn update<F>(&self, f: F) -> Job
    where
        F: FnOnce(&mut Job),
    {
        let snapshot = {
            let mut guard = self.job.lock().unwrap();
            f(&mut guard);
            guard.clone()
        };
        let _ = self.events.send(snapshot.clone());
        snapshot
    }
}

#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<DashMap<String, Arc<JobHandle>>>,
    count: Arc<AtomicUsize>,
}

/// Contract for `list_jobs` (spec.md §4.4).
pub struct ListFilter {
    pub limit: i32,
    pub statuses: Option<HashSet<JobStatus>>,
    pub page_token: Option<String>,
}

pub struct ListPage {
    pub jobs: Vec<Job>,
    pub next_page_token: String,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or overwrite) a job record, returning its handle.
    pub fn insert(&self, job: Job) -> Arc<JobHandle> {
        let handle = Arc::new(JobHandle::new(job));
        let job_id = handle.snapshot().job_id.clone();
        if self.jobs.insert(job_id, handle.clone()).is_none() {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
        handle
    }

    pub fn get(&self, job_id: &str) -> Option<Arc<JobHandle>> {
        self.jobs.get(job_id).map(|e| e.value().clone())
    }

    pub fn list_by_video_id(&self, video_id: &str) -> Vec<Job> {
        self.jobs
            .iter()
            .map(|e| e.value().snapshot())
            .filter(|j| j.video_id == video_id)
            .collect()
    }

    pub fn list_by_status(&self, status: JobStatus) -> Vec<Job> {
        self.jobs
            .iter()
            .map(|e| e.value().snapshot())
            .filter(|j| j.status == status)
            .collect()
    }

    pub fn list_all(&self) -> Vec<Job> {
        self.jobs.iter().map(|e| e.value().snapshot()).collect()
    }

    pub fn total_count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// Filtered, paginated list (spec.md §4.4): status-filtered, ordered
    /// ascending by `created_at`, page bounded by `limit` and `page_token`
    /// (job_id strictly greater than the token, lexicographically).
    ///
    /// This only paginates correctly if job_id order agrees with created_at
    /// order — true here because job ids are minted as UUIDv7 (see
    /// `TranscodeManager::create_job`), which sorts lexicographically by
    /// creation time. A job_id scheme without that property (e.g. UUIDv4)
    /// would let this cursor skip or double-return records.
    pub fn list(&self, filter: ListFilter) -> ListPage {
        let limit = if filter.limit <= 0 { 100 } else { filter.limit as usize };

        let mut matching: Vec<Job> = self
            .jobs
            .iter()
            .map(|e| e.value().snapshot())
            .filter(|j| {
                filter
                    .statuses
                    .as_ref()
                    .map(|set| set.contains(&j.status))
                    .unwrap_or(true)
            })
            .filter(|j| {
                filter
                    .page_token
                    .as_ref()
                    .map(|token| j.job_id.as_str() > token.as_str())
                    .unwrap_or(true)
            })
            .collect();

        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.job_id.cmp(&b.job_id)));
        matching.truncate(limit);

        let next_page_token = if matching.len() == limit {
            matching.last().map(|j| j.job_id.clone()).unwrap_or_default()
        } else {
            String::new()
        };

        ListPage {
            jobs: matching,
            next_page_token,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TranscodeOptions, VideoFormat, VideoMetadata};
    use chrono::Utc;

    fn sample_job(id: &str, created_at: chrono::DateTime<Utc>) -> Job {
        Job::new(
            id.to_string(),
            "video-1".to_string(),
            "/in.mp4".into(),
            "/out".into(),
            vec![VideoFormat::standard("720p").unwrap()],
            "mp4".to_string(),
            TranscodeOptions::default(),
            VideoMetadata {
                width: 1280,
                height: 720,
                duration_seconds: 60.0,
                bitrate_kbps: 2000,
                video_codec: "h264".to_string(),
                audio_codec: "aac".to_string(),
            },
            created_at,
        )
    }

    #[test]
    fn pagination_visits_every_job_exactly_once_in_created_at_order() {
        let registry = JobRegistry::new();
        let base = Utc::now();
        for i in 0..5 {
            registry.insert(sample_job(
                &format!("j{i}"),
                base + chrono::Duration::seconds(i),
            ));
        }

        let mut seen = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = registry.list(ListFilter {
                limit: 2,
                statuses: None,
                page_token: token.clone(),
            });
            let exhausted = page.jobs.len() < 2;
            seen.extend(page.jobs.into_iter().map(|j| j.job_id));
            if page.next_page_token.is_empty() {
                break;
            }
            token = Some(page.next_page_token);
            if exhausted {
                break;
            }
        }

        assert_eq!(seen, vec!["j0", "j1", "j2", "j3", "j4"]);
    }

    #[test]
    fn status_filter_excludes_non_matching_jobs() {
        let registry = JobRegistry::new();
        let base = Utc::now();
        let a = sample_job("a", base);
        let b = sample_job("b", base + chrono::Duration::seconds(1));
        registry.insert(a);
        registry.insert(b);
        registry.get("b").unwrap().update(|j| j.status = JobStatus::Completed);

        let mut statuses = HashSet::new();
        statuses.insert(JobStatus::Completed);
        let page = registry.list(ListFilter {
            limit: 10,
            statuses: Some(statuses),
            page_token: None,
        });
        assert_eq!(page.jobs.len(), 1);
        assert_eq!(page.jobs[0].job_id, "b");
    }

    #[test]
    fn update_is_observable_through_get_and_broadcasts_to_subscribers() {
        let registry = JobRegistry::new();
        registry.insert(sample_job("x", Utc::now()));
        let handle = registry.get("x").unwrap();
        let mut rx = handle.subscribe();

        handle.update(|j| {
            j.status = JobStatus::InProgress;
            j.progress = 10;
        });

        assert_eq!(registry.get("x").unwrap().snapshot().progress, 10);
        let received = rx.try_recv().unwrap();
        assert_eq!(received.progress, 10);
    }
}
