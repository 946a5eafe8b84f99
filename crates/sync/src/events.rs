use metrics::counter;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Created,
    Updated,
    Replaced,
    Deleted,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Created => "created",
            Transition::Updated => "updated",
            Transition::Replaced => "replaced",
            Transition::Deleted => "deleted",
        }
    }
}

/// Receives every state transition a reconciler causes on a live resource.
pub trait EventSink: Send + Sync {
    fn record(&self, kind: &str, name: &str, transition: Transition, reason: &str);
}

/// Logs the transition and counts it in `keel_resource_transitions_total`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEvents;

impl EventSink for TracingEvents {
    fn record(&self, kind: &str, name: &str, transition: Transition, reason: &str) {
        info!(kind = %kind, name = %name, transition = transition.as_str(), reason = %reason, "resource transition");
        counter!("keel_resource_transitions_total", 1u64, "kind" => kind.to_string(), "transition" => transition.as_str());
    }
}
