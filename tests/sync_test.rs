use anyhow::{anyhow, Result};
use booktracker_offline::db;
use booktracker_offline::model::PendingUpdate;
use booktracker_offline::sync::{drain_pending, run_sync_worker, SyncRegistration};
use booktracker_offline::upstream::UpstreamService;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;
use url::Url;

/// Delivery-only double: scripted per-call outcomes plus an online switch.
#[derive(Clone)]
struct FlakyDelivery {
    online: Arc<AtomicBool>,
    responses: Arc<Mutex<VecDeque<Result<()>>>>,
    delivered_ids: Arc<Mutex<Vec<String>>>,
}

impl FlakyDelivery {
    fn new(responses: Vec<Result<()>>) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(true)),
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            delivered_ids: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    async fn delivered_ids(&self) -> Vec<String> {
        self.delivered_ids.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl UpstreamService for FlakyDelivery {
    async fn fetch(&self, _method: &str, _url: &Url) -> Result<booktracker_offline::model::HttpPayload> {
        Err(anyhow!("not used in this test"))
    }

    async fn deliver_update(&self, update: &PendingUpdate) -> Result<()> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }
        let res = self.responses.lock().await.pop_front().unwrap_or(Ok(()));
        if res.is_ok() {
            self.delivered_ids.lock().await.push(update.id.clone());
        }
        res
    }

    async fn probe(&self) -> Result<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(anyhow!("connection refused"))
        }
    }
}

async fn setup_pool() -> db::Pool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn update(id: &str, book: &str, page: i64) -> PendingUpdate {
    PendingUpdate {
        id: id.to_string(),
        book_id: book.to_string(),
        current_page: page,
        thoughts: String::new(),
        timestamp: chrono::Utc::now(),
    }
}

#[tokio::test]
async fn one_failure_does_not_block_other_records() {
    let pool = setup_pool().await;
    db::put_pending(&pool, &update("a", "book-a", 10)).await.unwrap();
    db::put_pending(&pool, &update("b", "book-b", 20)).await.unwrap();

    // A fails, B succeeds.
    let upstream = FlakyDelivery::new(vec![Err(anyhow!("rejected")), Ok(())]);
    let report = drain_pending(&pool, &upstream).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(report.retained, 1);

    let remaining: Vec<String> = db::all_pending(&pool)
        .await
        .unwrap()
        .into_iter()
        .map(|u| u.id)
        .collect();
    assert_eq!(remaining, vec!["a"]);
    assert_eq!(upstream.delivered_ids().await, vec!["b"]);
}

#[tokio::test]
async fn retained_record_delivers_on_next_drain() {
    let pool = setup_pool().await;
    db::put_pending(&pool, &update("a", "book-a", 10)).await.unwrap();

    let upstream = FlakyDelivery::new(vec![Err(anyhow!("temp failure")), Ok(())]);
    let first = drain_pending(&pool, &upstream).await.unwrap();
    assert_eq!(first.retained, 1);
    assert_eq!(db::count_pending(&pool).await.unwrap(), 1);

    let second = drain_pending(&pool, &upstream).await.unwrap();
    assert_eq!(second.delivered, 1);
    assert_eq!(db::count_pending(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn drain_of_empty_queue_is_a_noop() {
    let pool = setup_pool().await;
    let upstream = FlakyDelivery::new(vec![]);
    let report = drain_pending(&pool, &upstream).await.unwrap();
    assert_eq!(report.delivered, 0);
    assert_eq!(report.retained, 0);
}

#[tokio::test]
async fn worker_drains_once_connectivity_returns() {
    let pool = setup_pool().await;
    db::put_pending(&pool, &update("a", "book-a", 5)).await.unwrap();

    let upstream = FlakyDelivery::new(vec![]);
    upstream.set_online(false);

    let registration = SyncRegistration::new();
    let worker = tokio::spawn(run_sync_worker(
        pool.clone(),
        Arc::new(upstream.clone()),
        registration.clone(),
        "reading-updates-sync".to_string(),
        Duration::from_millis(10),
    ));

    registration.register();
    // Worker is probing; the record must stay put while offline.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(db::count_pending(&pool).await.unwrap(), 1);

    upstream.set_online(true);
    for _ in 0..50 {
        if db::count_pending(&pool).await.unwrap() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(db::count_pending(&pool).await.unwrap(), 0);
    assert_eq!(upstream.delivered_ids().await, vec!["a"]);

    worker.abort();
}

#[tokio::test]
async fn queue_survives_process_restart() {
    let td = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}/offline.db", td.path().display());

    {
        let pool = db::init_pool(&url).await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        db::put_pending(&pool, &update("survivor", "b1", 42))
            .await
            .unwrap();
        pool.close().await;
    }

    let pool = db::init_pool(&url).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    let pending = db::all_pending(&pool).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "survivor");
    assert_eq!(pending[0].current_page, 42);
}

#[tokio::test]
async fn partial_drain_progress_survives_restart() {
    let td = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}/offline.db", td.path().display());

    {
        let pool = db::init_pool(&url).await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        db::put_pending(&pool, &update("a", "b1", 1)).await.unwrap();
        db::put_pending(&pool, &update("b", "b2", 2)).await.unwrap();

        // First record delivers, second fails, then the process dies.
        let upstream = FlakyDelivery::new(vec![Ok(()), Err(anyhow!("boom"))]);
        drain_pending(&pool, &upstream).await.unwrap();
        pool.close().await;
    }

    let pool = db::init_pool(&url).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    let remaining: Vec<String> = db::all_pending(&pool)
        .await
        .unwrap()
        .into_iter()
        .map(|u| u.id)
        .collect();
    assert_eq!(remaining, vec!["b"]);
}
