use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;

use crate::config::ConfigStore;
use crate::error::CrawlerError;
use crate::plugins::crawler::driver::{BrowserDriver, BrowserOptions};
use crate::plugins::crawler::session::{BrowserSession, CrawlerSession, UserPool};
use crate::service::{Service, ServiceEvent, TaskService};
use crate::worker::{Executor, Mailbox, Task};

/// Runs browser sessions on the IO pool, one leased user profile each.
#[derive(Clone)]
pub struct CrawlerService {
    service: Service,
    driver: Arc<dyn BrowserDriver>,
    options: BrowserOptions,
    user_root_dir: String,
    users: Arc<UserPool>,
    sessions: Arc<Mutex<Vec<CrawlerSession>>>,
}

impl CrawlerService {
    pub fn spawn(
        executor: Arc<dyn Executor>,
        driver: Arc<dyn BrowserDriver>,
        options: BrowserOptions,
        user_root_dir: impl Into<String>,
        user_ids: Vec<String>,
    ) -> Self {
        Self {
            service: Service::spawn("CrawlerService", executor),
            driver,
            options,
            user_root_dir: user_root_dir.into(),
            users: UserPool::new(user_ids),
            sessions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Build from `/crawler/browser` and `/crawler/users`.
    pub fn from_store(
        store: &ConfigStore,
        executor: Arc<dyn Executor>,
        driver: Arc<dyn BrowserDriver>,
    ) -> Self {
        Self::spawn(
            executor,
            driver,
            BrowserOptions::from_store(store),
            store.get_or("/crawler/users/user_root_dir", String::new()),
            store.get_or("/crawler/users/ids", Vec::new()),
        )
    }

    /// Start `count` browser sessions, each with its own idle user.
    pub fn new_crawler(&self, count: usize) -> Result<Vec<CrawlerSession>, CrawlerError> {
        let leases = self.users.lease(count)?;
        let mut started = Vec::with_capacity(leases.len());

        for lease in leases {
            let user_id = lease.id().to_string();
            // Plain concatenation: the root carries its own trailing separator.
            let profile_dir = PathBuf::from(format!("{}{}", self.user_root_dir, user_id));
            let mailbox = Arc::new(Mailbox::new());

            let body = BrowserSession::new(
                lease,
                profile_dir,
                self.options.clone(),
                Arc::clone(&self.driver),
                Arc::clone(&mailbox),
            );
            let task = Task::new_async("CrawlerBrowserTask", body);
            tracing::info!(user = %user_id, task_id = %task.id(), "Starting browser session");

            let session = CrawlerSession::new(user_id, task.clone(), mailbox);
            self.service.deliver(task);
            started.push(session);
        }

        let mut sessions = self.lock_sessions();
        sessions.retain(|s| !s.task().state().is_terminal());
        sessions.extend(started.iter().cloned());
        Ok(started)
    }

    /// Sessions that have not ended yet.
    pub fn sessions(&self) -> Vec<CrawlerSession> {
        let mut sessions = self.lock_sessions();
        sessions.retain(|s| !s.task().state().is_terminal());
        sessions.clone()
    }

    pub fn idle_users(&self) -> Vec<String> {
        self.users.idle_ids()
    }

    pub fn active_users(&self) -> Vec<String> {
        self.users.active_ids()
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    pub async fn shutdown(&self) {
        self.service.shutdown().await;
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, Vec<CrawlerSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TaskService for CrawlerService {
    fn name(&self) -> &str {
        self.service.name()
    }

    fn deliver(&self, task: Task) {
        self.service.deliver(task);
    }

    fn cancel_task(&self, task: &Task) {
        self.service.cancel_task(task);
    }

    fn cancel_all(&self) {
        self.service.cancel_all();
    }

    fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.service.subscribe()
    }
}
