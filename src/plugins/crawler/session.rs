//! Long-lived browser sessions pinned to an IO event loop.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use rand::Rng;
use serde_json::{Value, json};
use tokio::sync::oneshot;

use crate::error::CrawlerError;
use crate::plugins::crawler::driver::{BrowserDriver, BrowserOptions, BrowserPage};
use crate::worker::{AsyncExecute, Mailbox, Task, TaskContext};

#[derive(Default)]
struct Users {
    idle: Vec<String>,
    active: Vec<String>,
}

/// Browser profiles available to the crawler.
pub struct UserPool {
    users: Mutex<Users>,
}

impl UserPool {
    pub fn new(ids: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            users: Mutex::new(Users {
                idle: ids,
                active: Vec::new(),
            }),
        })
    }

    /// Check out `count` random idle ids. Nothing is leased on error.
    pub fn lease(self: &Arc<Self>, count: usize) -> Result<Vec<UserLease>, CrawlerError> {
        let mut users = self.lock();
        if count == 0 || users.idle.len() < count {
            return Err(CrawlerError::NoIdleUser);
        }

        let mut rng = rand::thread_rng();
        let mut leases = Vec::with_capacity(count);
        for _ in 0..count {
            let index = rng.gen_range(0..users.idle.len());
            let id = users.idle.swap_remove(index);
            users.active.push(id.clone());
            leases.push(UserLease {
                id,
                pool: Arc::clone(self),
            });
        }
        Ok(leases)
    }

    pub fn idle_ids(&self) -> Vec<String> {
        self.lock().idle.clone()
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.lock().active.clone()
    }

    fn release(&self, id: &str) {
        let mut users = self.lock();
        if let Some(pos) = users.active.iter().position(|a| a == id) {
            let id = users.active.swap_remove(pos);
            tracing::debug!(user = %id, "Crawler user released");
            users.idle.push(id);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Users> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A checked-out user id. Returned to the idle pool on drop.
pub struct UserLease {
    id: String,
    pool: Arc<UserPool>,
}

impl UserLease {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for UserLease {
    fn drop(&mut self) {
        self.pool.release(&self.id);
    }
}

/// Reply to a page request: page content or an error message.
pub type PageReply = Result<String, String>;

/// Load a URL in the session's page and return its content.
pub struct PageRequest {
    url: String,
    reply: oneshot::Sender<PageReply>,
}

impl PageRequest {
    pub fn new(url: impl Into<String>) -> (Self, oneshot::Receiver<PageReply>) {
        let (reply, rx) = oneshot::channel();
        (
            Self {
                url: url.into(),
                reply,
            },
            rx,
        )
    }

    async fn serve(self, page: &dyn BrowserPage) {
        let outcome = async {
            page.goto(&self.url).await?;
            Ok::<_, anyhow::Error>(page.content().await?)
        }
        .await
        .map_err(|e| format!("{e:#}"));

        if let Err(message) = &outcome {
            tracing::warn!(url = %self.url, "Page request failed: {message}");
        }
        let _ = self.reply.send(outcome);
    }

    fn reject(self, reason: &str) {
        let _ = self.reply.send(Err(reason.to_string()));
    }
}

/// Async task body: launch a browser, then serve page requests until
/// cancelled.
pub struct BrowserSession {
    lease: UserLease,
    profile_dir: PathBuf,
    options: BrowserOptions,
    driver: Arc<dyn BrowserDriver>,
    mailbox: Arc<Mailbox<PageRequest>>,
}

impl BrowserSession {
    pub fn new(
        lease: UserLease,
        profile_dir: PathBuf,
        options: BrowserOptions,
        driver: Arc<dyn BrowserDriver>,
        mailbox: Arc<Mailbox<PageRequest>>,
    ) -> Self {
        Self {
            lease,
            profile_dir,
            options,
            driver,
            mailbox,
        }
    }

    async fn serve(&self, ctx: &TaskContext) -> anyhow::Result<usize> {
        let context = self
            .driver
            .launch_persistent_context(&self.profile_dir, &self.options)
            .await
            .map_err(|e| CrawlerError::LaunchFailed {
                profile: self.profile_dir.display().to_string(),
                reason: format!("{e:#}"),
            })?;
        tracing::info!(
            user = %self.lease.id(),
            browser = %self.options.browser_type,
            "Browser launched"
        );

        let page = match context.new_page().await {
            Ok(page) => page,
            Err(e) => {
                let _ = context.close().await;
                return Err(e.context("Failed to open page"));
            }
        };

        let mut served = 0;
        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                request = self.mailbox.recv() => match request {
                    Some(request) => {
                        request.serve(page.as_ref()).await;
                        served += 1;
                    }
                    None => break,
                },
            }
        }

        if let Err(e) = context.close().await {
            tracing::warn!(user = %self.lease.id(), "Failed to close browser: {e:#}");
        }
        Ok(served)
    }
}

#[async_trait]
impl AsyncExecute for BrowserSession {
    async fn execute(&mut self, ctx: TaskContext) -> anyhow::Result<Value> {
        let outcome = self.serve(&ctx).await;

        self.mailbox.close();
        while let Some(request) = self.mailbox.try_recv() {
            request.reject("browser session stopped");
        }

        let served = outcome?;
        tracing::info!(user = %self.lease.id(), served, "Browser session ended");
        Ok(json!({ "user_id": self.lease.id(), "served": served }))
    }
}

/// Caller-side handle to a running session.
#[derive(Clone)]
pub struct CrawlerSession {
    user_id: String,
    task: Task,
    mailbox: Arc<Mailbox<PageRequest>>,
}

impl CrawlerSession {
    pub(crate) fn new(user_id: String, task: Task, mailbox: Arc<Mailbox<PageRequest>>) -> Self {
        Self {
            user_id,
            task,
            mailbox,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    /// Queue a page load. Safe to call from any thread.
    pub fn fetch(
        &self,
        url: impl Into<String>,
    ) -> Result<oneshot::Receiver<PageReply>, CrawlerError> {
        let (request, rx) = PageRequest::new(url);
        self.post(vec![request])?;
        Ok(rx)
    }

    /// Queue several requests with a single wake-up.
    pub fn post(&self, requests: Vec<PageRequest>) -> Result<(), CrawlerError> {
        if self.mailbox.post_all(requests) {
            Ok(())
        } else {
            Err(CrawlerError::SessionClosed { id: self.task.id() })
        }
    }

    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_is_all_or_nothing() {
        let pool = UserPool::new(vec!["a".into(), "b".into()]);
        assert!(matches!(pool.lease(3), Err(CrawlerError::NoIdleUser)));
        assert_eq!(pool.idle_ids().len(), 2);

        let leases = pool.lease(2).unwrap();
        assert!(pool.idle_ids().is_empty());
        assert_eq!(pool.active_ids().len(), 2);
        assert!(matches!(pool.lease(1), Err(CrawlerError::NoIdleUser)));

        drop(leases);
        assert_eq!(pool.idle_ids().len(), 2);
        assert!(pool.active_ids().is_empty());
    }
}
