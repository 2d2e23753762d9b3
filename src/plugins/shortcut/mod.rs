//! Batch shortcut creation plugin.

pub mod controller;
pub mod service;
pub mod task;

pub use controller::ShortcutCreatorController;
pub use service::ShortcutCreatorService;
pub use task::ShortcutCreationTask;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::PluginError;
use crate::plugin::{Menu, Plugin, PluginContext, View, ViewModel};
use crate::service::TaskService;

pub const PLUGIN_NAME: &str = "shortcut_creator";

pub struct ShortcutCreatorPlugin {
    view: Arc<ViewModel>,
    service: ShortcutCreatorService,
    controller: ShortcutCreatorController,
}

impl ShortcutCreatorPlugin {
    pub fn new(service: ShortcutCreatorService) -> Self {
        let view = Arc::new(ViewModel::new("Shortcut Creator"));
        let controller = ShortcutCreatorController::new(Arc::clone(&view), service.clone());
        Self {
            view,
            service,
            controller,
        }
    }

    pub fn controller(&self) -> &ShortcutCreatorController {
        &self.controller
    }
}

/// Registry factory.
pub fn create(ctx: &PluginContext) -> Result<Box<dyn Plugin>, PluginError> {
    let service = ShortcutCreatorService::spawn(Arc::new(ctx.compute.clone()));
    Ok(Box::new(ShortcutCreatorPlugin::new(service)))
}

#[async_trait]
impl Plugin for ShortcutCreatorPlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn version(&self) -> &str {
        "1.0"
    }

    fn description(&self) -> &str {
        "Create shortcuts for many files in one directory"
    }

    fn widget(&self) -> Arc<dyn View> {
        self.view.clone()
    }

    fn setup_menu(&self, menu: &mut Menu) {
        menu.add_action("Tools", "shortcut_creator.open", "Create shortcuts in bulk");
    }

    async fn shutdown(&self) {
        self.service.cancel_all();
        self.service.shutdown().await;
    }
}
