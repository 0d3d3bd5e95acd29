//! HandlerListener port - interface for observing typed protocol events.

use crate::domain::foundation::EngineError;
use crate::domain::protocol::HandlerEvent;

/// Observer of published [`HandlerEvent`]s.
///
/// Listeners run synchronously inside the publish call; scheduling is
/// cooperative, so implementations must be quick and must not block.
/// A listener error is logged and isolated - it never interrupts sibling
/// listeners or the publisher.
pub trait HandlerListener: Send + Sync {
    /// Observe one event.
    fn on_event(&self, event: &HandlerEvent) -> Result<(), EngineError>;

    /// Listener name for logging.
    fn name(&self) -> &'static str;
}

/// Blanket adapter so plain closures can subscribe.
impl<F> HandlerListener for F
where
    F: Fn(&HandlerEvent) -> Result<(), EngineError> + Send + Sync,
{
    fn on_event(&self, event: &HandlerEvent) -> Result<(), EngineError> {
        self(event)
    }

    fn name(&self) -> &'static str {
        "closure"
    }
}
