pub mod error;
pub mod mapper;
pub mod sink;
pub mod types;

pub use error::*;
pub use mapper::*;
pub use sink::*;
pub use types::*;

#[cfg(test)]
mod tests {
    use super::{
        notification_for_alert, notification_for_fix, notification_for_session,
        NotificationDispatcher, NotificationMessage, NotificationSeverity, NotificationTopic,
        NotifyError, SlackSink, StdoutSink, WebhookSink,
    };
    use medic_core::{AlertEvent, FixRecord, SessionSummary};
    use std::any::TypeId;

    #[test]
    fn crate_root_reexports_types() {
        let _ = TypeId::of::<NotifyError>();
        let _ = TypeId::of::<NotificationMessage>();
        let _ = TypeId::of::<NotificationSeverity>();
        let _ = TypeId::of::<NotificationTopic>();
        let _ = TypeId::of::<StdoutSink>();
        let _ = TypeId::of::<WebhookSink>();
        let _ = TypeId::of::<SlackSink>();
        let _ = TypeId::of::<NotificationDispatcher>();
    }

    #[test]
    fn crate_root_reexports_mapper_helpers() {
        let _alert: fn(&AlertEvent) -> Option<NotificationMessage> = notification_for_alert;
        let _session: fn(&SessionSummary) -> Option<NotificationMessage> =
            notification_for_session;
        let _fix: fn(&FixRecord) -> Option<NotificationMessage> = notification_for_fix;
    }
}
