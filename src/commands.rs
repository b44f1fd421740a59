//! Command Bridge
//!
//! Routes page-level events to the controller:
//!
//! ```text
//! CustomEvent("reader-view-command", {command}) ──► ReaderCommand ──► controller
//! keydown "Escape" (while active) ─────────────────► deactivate
//! ```
//!
//! Both listeners are registered through the lifecycle manager and vanish
//! with the context.

use crate::content::ContentExtractor;
use crate::controller::ReaderViewController;
use crate::document::PageDocument;
use crate::error::UnknownCommand;
use crate::host::{HostEvent, ListenerOptions, ListenerTarget};
use crate::lifecycle::{ListenerHandle, ResourceLifecycleManager};
use crate::mount::ViewMounter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::rc::Rc;
use std::str::FromStr;
use tracing::{debug, warn};

/// Key that closes the overlay.
pub const ESCAPE_KEY: &str = "Escape";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReaderCommand {
    Toggle,
    Activate,
    Deactivate,
}

impl FromStr for ReaderCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "toggle" => Ok(Self::Toggle),
            "activate" => Ok(Self::Activate),
            "deactivate" => Ok(Self::Deactivate),
            _ => Err(UnknownCommand(s.to_string())),
        }
    }
}

impl ReaderCommand {
    /// Parse an event detail: `{"command": "toggle"}` or a bare `"toggle"`.
    pub fn from_detail(detail: &Value) -> Result<Self, UnknownCommand> {
        match detail {
            Value::String(command) => command.parse(),
            Value::Object(fields) => match fields.get("command") {
                Some(Value::String(command)) => command.parse(),
                other => Err(UnknownCommand(
                    other.map(Value::to_string).unwrap_or_default(),
                )),
            },
            other => Err(UnknownCommand(other.to_string())),
        }
    }

    /// Run the command. Returns whether the overlay is shown afterwards.
    pub async fn apply<D, X, M>(
        self,
        controller: &ReaderViewController<D, X, M>,
        document: &D,
    ) -> bool
    where
        D: PageDocument + Clone + 'static,
        D::Container: 'static,
        X: ContentExtractor<D> + 'static,
        M: ViewMounter<D::Container> + 'static,
        M::Handle: 'static,
    {
        match self {
            Self::Toggle => controller.toggle(document).await,
            Self::Activate => controller.activate(document).await || controller.is_active(),
            Self::Deactivate => {
                controller.deactivate(document).await;
                false
            }
        }
    }
}

/// Listeners installed by [`install_command_bridge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandBridge {
    pub command: ListenerHandle,
    pub escape: Option<ListenerHandle>,
}

impl CommandBridge {
    /// Detach both listeners before the context ends.
    pub fn uninstall(self, manager: &ResourceLifecycleManager) {
        manager.remove_listener(self.command);
        if let Some(escape) = self.escape {
            manager.remove_listener(escape);
        }
    }
}

/// Listen on the document for `config.command_event`, and for Escape when
/// `config.close_on_escape` is set.
pub fn install_command_bridge<D, X, M>(
    controller: &ReaderViewController<D, X, M>,
    document: &D,
) -> CommandBridge
where
    D: PageDocument + Clone + 'static,
    D::Container: 'static,
    X: ContentExtractor<D> + 'static,
    M: ViewMounter<D::Container> + 'static,
    M::Handle: 'static,
{
    let manager = controller.manager().clone();
    let config = controller.config().clone();

    let on_command = {
        let controller = controller.clone();
        let document = document.clone();
        Rc::new(move |event: &HostEvent| {
            let command = match ReaderCommand::from_detail(&event.detail) {
                Ok(command) => command,
                Err(e) => {
                    warn!(event_type = %event.event_type, error = %e, "ignoring reader command");
                    return;
                }
            };
            debug!(?command, "reader command received");
            let controller = controller.clone();
            let document = document.clone();
            let manager = controller.manager().clone();
            manager.spawn(async move {
                command.apply(&controller, &document).await;
            });
        })
    };
    let command = manager.register_listener(
        ListenerTarget::Document,
        &config.command_event,
        on_command,
        ListenerOptions::default(),
    );

    let escape = config.close_on_escape.then(|| {
        let controller = controller.clone();
        let document = document.clone();
        let on_key = Rc::new(move |event: &HostEvent| {
            if event.key.as_deref() != Some(ESCAPE_KEY) || !controller.is_active() {
                return;
            }
            debug!("escape pressed; closing reader view");
            let controller = controller.clone();
            let document = document.clone();
            let manager = controller.manager().clone();
            manager.spawn(async move {
                controller.deactivate(&document).await;
            });
        });
        manager.register_listener(
            ListenerTarget::Document,
            "keydown",
            on_key,
            ListenerOptions::default(),
        )
    });

    CommandBridge { command, escape }
}
