//! Browser crawler plugin.
//!
//! Each session is an async task pinned to an IO loop. Callers post page
//! requests to a running session through its mailbox.

pub mod driver;
pub mod service;
pub mod session;

pub use driver::{BrowserContext, BrowserDriver, BrowserOptions, BrowserPage};
pub use service::CrawlerService;
pub use session::{CrawlerSession, PageRequest, UserLease, UserPool};

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::error::PluginError;
use crate::plugin::{Menu, Plugin, PluginContext, View, ViewModel};
use crate::plugins::forward_events;
use crate::service::{ServiceEvent, TaskService};

pub const PLUGIN_NAME: &str = "crawler";

pub struct CrawlerPlugin {
    view: Arc<ViewModel>,
    service: CrawlerService,
    pump: JoinHandle<()>,
}

impl CrawlerPlugin {
    pub fn new(service: CrawlerService) -> Self {
        let view = Arc::new(ViewModel::new("Crawler"));
        let target = Arc::clone(&view);
        let pump = forward_events(service.subscribe(), move |event| match event {
            ServiceEvent::TaskStarted { .. } => target.show_message("Browser session started"),
            ServiceEvent::TaskCompleted { .. } => target.show_message("Browser session closed"),
            ServiceEvent::ErrorOccurred { message, .. } => target.show_error(message),
            ServiceEvent::ProgressUpdated { .. } | ServiceEvent::BatchFlushed { .. } => {}
        });
        Self {
            view,
            service,
            pump,
        }
    }

    pub fn service(&self) -> &CrawlerService {
        &self.service
    }
}

impl Drop for CrawlerPlugin {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Registry factory. Needs a browser driver in the context.
pub fn create(ctx: &PluginContext) -> Result<Box<dyn Plugin>, PluginError> {
    let driver = ctx.browser.clone().ok_or_else(|| PluginError::InitFailed {
        name: PLUGIN_NAME.to_string(),
        reason: "no browser driver configured".to_string(),
    })?;
    let service = CrawlerService::from_store(&ctx.config, Arc::new(ctx.io.clone()), driver);
    Ok(Box::new(CrawlerPlugin::new(service)))
}

#[async_trait]
impl Plugin for CrawlerPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn version(&self) -> &str {
        "1.0"
    }

    fn description(&self) -> &str {
        "Drive persistent browser sessions"
    }

    fn widget(&self) -> Arc<dyn View> {
        self.view.clone()
    }

    fn setup_menu(&self, menu: &mut Menu) {
        menu.add_action("Tools", "crawler.new", "New browser session");
    }

    async fn shutdown(&self) {
        self.service.cancel_all();
        self.service.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::thread::ThreadId;
    use std::time::Duration;

    use crate::error::CrawlerError;
    use crate::worker::{IoWorkerPool, Task, TaskState};

    #[derive(Default)]
    struct FakeDriver {
        launched: Mutex<Vec<PathBuf>>,
        launch_threads: Mutex<Vec<ThreadId>>,
        visit_threads: Arc<Mutex<Vec<ThreadId>>>,
        fail_launch: bool,
    }

    struct FakeContext {
        visit_threads: Arc<Mutex<Vec<ThreadId>>>,
    }

    struct FakePage {
        url: Mutex<String>,
        visit_threads: Arc<Mutex<Vec<ThreadId>>>,
    }

    #[async_trait]
    impl BrowserDriver for FakeDriver {
        async fn launch_persistent_context(
            &self,
            profile_dir: &Path,
            _options: &BrowserOptions,
        ) -> anyhow::Result<Box<dyn BrowserContext>> {
            if self.fail_launch {
                anyhow::bail!("executable not found");
            }
            self.launched.lock().unwrap().push(profile_dir.to_path_buf());
            self.launch_threads
                .lock()
                .unwrap()
                .push(std::thread::current().id());
            Ok(Box::new(FakeContext {
                visit_threads: Arc::clone(&self.visit_threads),
            }))
        }
    }

    #[async_trait]
    impl BrowserContext for FakeContext {
        async fn new_page(&self) -> anyhow::Result<Box<dyn BrowserPage>> {
            Ok(Box::new(FakePage {
                url: Mutex::new(String::new()),
                visit_threads: Arc::clone(&self.visit_threads),
            }))
        }

        async fn close(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl BrowserPage for FakePage {
        async fn goto(&self, url: &str) -> anyhow::Result<()> {
            self.visit_threads
                .lock()
                .unwrap()
                .push(std::thread::current().id());
            if url.contains("unreachable") {
                anyhow::bail!("net::ERR_NAME_NOT_RESOLVED");
            }
            *self.url.lock().unwrap() = url.to_string();
            Ok(())
        }

        async fn content(&self) -> anyhow::Result<String> {
            Ok(format!("<html>{}</html>", self.url.lock().unwrap()))
        }
    }

    fn service(io: &IoWorkerPool, driver: Arc<FakeDriver>) -> CrawlerService {
        CrawlerService::spawn(
            Arc::new(io.clone()),
            driver,
            BrowserOptions::default(),
            "/profiles/user_",
            vec!["1".into(), "2".into(), "3".into()],
        )
    }

    async fn settle(task: &Task) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !task.state().is_terminal() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn sessions_serve_requests_until_cancelled() {
        let io = IoWorkerPool::new(2).unwrap();
        let driver = Arc::new(FakeDriver::default());
        let service = service(&io, Arc::clone(&driver));

        let sessions = service.new_crawler(2).unwrap();
        assert_eq!(service.idle_users().len(), 1);
        assert_eq!(service.sessions().len(), 2);

        let page = tokio::time::timeout(
            Duration::from_secs(5),
            sessions[0].fetch("https://example.com").unwrap(),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(page.unwrap(), "<html>https://example.com</html>");

        let failed = tokio::time::timeout(
            Duration::from_secs(5),
            sessions[0].fetch("https://unreachable.test").unwrap(),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(failed.unwrap_err().contains("ERR_NAME_NOT_RESOLVED"));

        // Wait until both sessions have launched before cancelling.
        let reply = sessions[1].fetch("https://example.org").unwrap();
        tokio::time::timeout(Duration::from_secs(5), reply)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        service.cancel_all();
        for session in &sessions {
            settle(session.task()).await;
            assert_eq!(session.task().state(), TaskState::Cancelled);
            assert!(session.is_closed());
        }
        assert_eq!(service.idle_users().len(), 3);
        assert!(service.sessions().is_empty());
        assert!(matches!(
            sessions[0].fetch("https://late.example"),
            Err(CrawlerError::SessionClosed { .. })
        ));

        let launched = driver.launched.lock().unwrap().clone();
        assert_eq!(launched.len(), 2);
        assert!(
            launched
                .iter()
                .all(|p| p.to_string_lossy().starts_with("/profiles/user_"))
        );

        service.shutdown().await;
        io.shutdown();
    }

    #[tokio::test]
    async fn requests_from_other_threads_are_served_on_the_session_loop() {
        let io = IoWorkerPool::new(4).unwrap();
        let driver = Arc::new(FakeDriver::default());
        let service = service(&io, Arc::clone(&driver));
        let session = service.new_crawler(1).unwrap().remove(0);

        let remote = session.clone();
        let fetcher = std::thread::spawn(move || {
            ["https://a.test", "https://b.test", "https://c.test"]
                .into_iter()
                .map(|url| remote.fetch(url).unwrap().blocking_recv().unwrap())
                .collect::<Vec<_>>()
        });
        let pages = tokio::time::timeout(
            Duration::from_secs(5),
            tokio::task::spawn_blocking(move || fetcher.join().unwrap()),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(pages.iter().all(Result::is_ok), "{pages:?}");

        let launched_on = driver.launch_threads.lock().unwrap().clone();
        let visited_on = driver.visit_threads.lock().unwrap().clone();
        assert_eq!(launched_on.len(), 1);
        assert_eq!(visited_on.len(), 3);
        assert!(visited_on.iter().all(|id| *id == launched_on[0]));
        assert_ne!(launched_on[0], std::thread::current().id());

        service.cancel_all();
        settle(session.task()).await;
        assert_eq!(session.task().state(), TaskState::Cancelled);

        service.shutdown().await;
        io.shutdown();
    }

    #[tokio::test]
    async fn launch_failure_fails_the_task_and_releases_the_user() {
        let io = IoWorkerPool::new(1).unwrap();
        let driver = Arc::new(FakeDriver {
            fail_launch: true,
            ..FakeDriver::default()
        });
        let service = service(&io, driver);

        let sessions = service.new_crawler(1).unwrap();
        let task = sessions[0].task().clone();
        settle(&task).await;

        assert_eq!(task.state(), TaskState::Failed);
        let error = task.error().unwrap();
        assert!(error.contains("Browser launch failed"), "{error}");
        assert_eq!(service.idle_users().len(), 3);

        service.shutdown().await;
        io.shutdown();
    }

    #[tokio::test]
    async fn no_idle_user_is_an_error() {
        let io = IoWorkerPool::new(1).unwrap();
        let service = service(&io, Arc::new(FakeDriver::default()));

        assert!(matches!(
            service.new_crawler(4),
            Err(CrawlerError::NoIdleUser)
        ));
        assert_eq!(service.idle_users().len(), 3);
        assert!(service.active_users().is_empty());

        service.shutdown().await;
        io.shutdown();
    }
}
