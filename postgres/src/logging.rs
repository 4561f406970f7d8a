use std::fmt::{self, Write as _};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::Registry;

/// Forwards `tracing` events to the server log. Errors are reported as
/// warnings: a finding never aborts the running check.
pub(crate) struct ServerLogLayer;

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.message, " {}={value:?}", field.name());
        }
    }
}

impl<S: Subscriber> Layer<S> for ServerLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let message = visitor.message;

        match *event.metadata().level() {
            Level::ERROR | Level::WARN => pgrx::warning!("{message}"),
            Level::INFO => pgrx::info!("{message}"),
            Level::DEBUG => pgrx::debug1!("{message}"),
            Level::TRACE => pgrx::debug2!("{message}"),
        }
    }
}

/// Run `f` with the check events routed to the server log.
pub(crate) fn with_server_log<R>(f: impl FnOnce() -> R) -> R {
    let subscriber = Registry::default().with(ServerLogLayer);
    tracing::subscriber::with_default(subscriber, f)
}
