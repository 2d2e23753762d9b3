//! Plugin contract and host.
//!
//! A plugin bundles a view, a service and a controller. The shell only sees
//! the [`Plugin`] trait; everything else stays inside the plugin.

pub mod context;
pub mod host;
pub mod view;

pub use context::PluginContext;
pub use host::{PluginFactory, PluginHost, PluginRegistry};
pub use view::{View, ViewModel, ViewSnapshot};

use std::sync::Arc;

use async_trait::async_trait;

/// A self-contained feature module loaded by the host.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn description(&self) -> &str;

    /// The plugin's view. Called once per plugin; the shell caches it.
    fn widget(&self) -> Arc<dyn View>;

    /// Add entries to the main menu.
    fn setup_menu(&self, _menu: &mut Menu) {}

    /// Stop background work before the process exits.
    async fn shutdown(&self) {}
}

/// One clickable menu entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuAction {
    pub id: String,
    pub label: String,
}

/// A top-level menu and its entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submenu {
    pub title: String,
    pub actions: Vec<MenuAction>,
}

/// Main menu bar model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Menu {
    menus: Vec<Submenu>,
}

impl Menu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the submenu titled `title`, creating it at the end if missing.
    pub fn submenu(&mut self, title: &str) -> &mut Submenu {
        let index = match self.menus.iter().position(|m| m.title == title) {
            Some(index) => index,
            None => {
                self.menus.push(Submenu {
                    title: title.to_string(),
                    actions: Vec::new(),
                });
                self.menus.len() - 1
            }
        };
        &mut self.menus[index]
    }

    pub fn add_action(&mut self, menu: &str, id: impl Into<String>, label: impl Into<String>) {
        self.submenu(menu).actions.push(MenuAction {
            id: id.into(),
            label: label.into(),
        });
    }

    pub fn menus(&self) -> &[Submenu] {
        &self.menus
    }

    pub fn find(&self, title: &str) -> Option<&Submenu> {
        self.menus.iter().find(|m| m.title == title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submenus_keep_insertion_order() {
        let mut menu = Menu::new();
        menu.add_action("File", "open", "Open");
        menu.add_action("Tools", "encrypt", "Encrypt");
        menu.add_action("File", "quit", "Quit");

        let titles: Vec<_> = menu.menus().iter().map(|m| m.title.as_str()).collect();
        assert_eq!(titles, vec!["File", "Tools"]);
        assert_eq!(menu.find("File").unwrap().actions.len(), 2);
        assert!(menu.find("Help").is_none());
    }
}
