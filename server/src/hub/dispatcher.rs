use std::sync::Arc;

use tokio::sync::mpsc;

use super::{HubCommand, HubStats, Registry};
use crate::chat::render::DeliveryRenderer;
use crate::ws::protocol::render_delivery;

/// Dispatcher loop: the only code that touches the registry.
///
/// Runs until every [`super::HubHandle`] has been dropped.
pub async fn run_dispatcher(
    mut commands: mpsc::UnboundedReceiver<HubCommand>,
    renderer: Arc<dyn DeliveryRenderer>,
) {
    let mut registry = Registry::new();
    tracing::info!("Hub dispatcher started");

    while let Some(command) = commands.recv().await {
        handle_command(&mut registry, renderer.as_ref(), command);
    }

    tracing::info!(
        connections = registry.connection_count(),
        "Hub dispatcher stopped"
    );
}

pub(crate) fn handle_command(
    registry: &mut Registry,
    renderer: &dyn DeliveryRenderer,
    command: HubCommand,
) {
    match command {
        HubCommand::Register(handle) => registry.register(handle),
        HubCommand::Unregister { id, user_id } => {
            if !registry.unregister(id) {
                tracing::debug!(user_id, connection_id = %id, "Connection already removed");
            }
        }
        HubCommand::Route(message) => {
            let payload = render_delivery(renderer, &message);
            let outcome = registry.route(&message, &payload);
            tracing::debug!(
                sender_id = message.sender_id,
                recipient_id = message.recipient.as_id(),
                delivered = outcome.delivered.len(),
                evicted = outcome.evicted.len(),
                "Message routed"
            );
        }
        HubCommand::Stats(reply) => {
            let _ = reply.send(HubStats {
                connections: registry.connection_count(),
                users: registry.user_count(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::render::{MessageTemplate, RenderError};
    use crate::hub::{new_connection, HubHandle, Recipient, RoutedMessage};
    use chrono::Utc;
    use std::time::Duration;
    use tokio::sync::mpsc::error::TryRecvError;

    struct FailingRenderer;

    impl DeliveryRenderer for FailingRenderer {
        fn render(&self, _message: &RoutedMessage) -> Result<String, RenderError> {
            Err(RenderError::Format(std::fmt::Error))
        }
    }

    fn message(sender: u64, recipient: Recipient, text: &str) -> RoutedMessage {
        RoutedMessage {
            sender_id: sender,
            sender_name: "Sender".to_string(),
            recipient,
            text: text.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn route_renders_payload_through_template() {
        let mut registry = Registry::new();
        let renderer = MessageTemplate::default();
        let (handle, mut rx) = new_connection(1, 4);
        handle_command(&mut registry, &renderer, HubCommand::Register(handle));

        handle_command(
            &mut registry,
            &renderer,
            HubCommand::Route(message(1, Recipient::Broadcast, "hello")),
        );

        let payload = rx.try_recv().expect("payload delivered");
        assert!(payload.as_str().contains("hello"));
        assert!(payload.as_str().contains("Sender"));
    }

    #[test]
    fn render_failure_delivers_empty_payload() {
        let mut registry = Registry::new();
        let (handle, mut rx) = new_connection(1, 4);
        handle_command(&mut registry, &FailingRenderer, HubCommand::Register(handle));

        handle_command(
            &mut registry,
            &FailingRenderer,
            HubCommand::Route(message(1, Recipient::Broadcast, "hello")),
        );

        assert_eq!(rx.try_recv().expect("payload delivered").as_str(), "");
        assert_eq!(registry.connection_count(), 1);
    }

    #[tokio::test]
    async fn commands_are_applied_in_submission_order() {
        let hub = HubHandle::spawn(Arc::new(MessageTemplate::default()));
        let (handle, mut rx) = new_connection(1, 4);

        // Route right after register: the dispatcher must see the connection.
        let id = handle.id;
        let registration = hub.register(handle);
        assert_eq!(registration.id(), id);
        hub.route(message(2, Recipient::User(1), "ordered"));

        let payload = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("delivery in time")
            .expect("queue open");
        assert!(payload.as_str().contains("ordered"));

        let stats = hub.stats().await.expect("dispatcher alive");
        assert_eq!(stats, HubStats { connections: 1, users: 1 });

        // Dropping the guard unregisters and closes the queue.
        drop(registration);
        hub.route(message(2, Recipient::User(1), "too late"));
        let closed = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("close in time");
        assert!(closed.is_none());
        assert_eq!(rx.try_recv(), Err(TryRecvError::Disconnected));

        let stats = hub.stats().await.expect("dispatcher alive");
        assert_eq!(stats, HubStats { connections: 0, users: 0 });
    }
}
