use tokio::sync::mpsc;

use crate::types::Action;

/// Keyword-triggered dispatch of reasoning output to actuators.
#[derive(Debug, Clone)]
pub struct ActionBridge {
    triggers: Vec<(String, Action)>,
    tx: mpsc::UnboundedSender<Action>,
}

/// Receiving end of dispatched actions.
pub type ActionReceiver = mpsc::UnboundedReceiver<Action>;

impl ActionBridge {
    /// Bridge with the default trigger table: `move` starts the motor, `stop` halts it.
    pub fn new() -> (Self, ActionReceiver) {
        Self::with_triggers(vec![
            ("move".into(), Action::MotorOn),
            ("stop".into(), Action::MotorOff),
        ])
    }

    pub fn with_triggers(triggers: Vec<(String, Action)>) -> (Self, ActionReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let triggers = triggers
            .into_iter()
            .map(|(k, a)| (k.to_lowercase(), a))
            .collect();
        (Self { triggers, tx }, rx)
    }

    /// Actions whose keyword appears in `text`, in trigger-table order.
    pub fn match_actions(&self, text: &str) -> Vec<Action> {
        let lower = text.to_lowercase();
        self.triggers
            .iter()
            .filter(|(keyword, _)| lower.contains(keyword.as_str()))
            .map(|(_, action)| *action)
            .collect()
    }

    /// Scan reasoning output and dispatch every matched action.
    pub fn process(&self, text: &str) -> Vec<Action> {
        let actions = self.match_actions(text);
        for action in &actions {
            tracing::info!(command = action.command(), "bridge dispatching action");
            if self.tx.send(*action).is_err() {
                tracing::warn!(command = action.command(), "no actuator listening, action dropped");
            }
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_keyword_case_insensitive() {
        let (bridge, mut rx) = ActionBridge::new();
        assert_eq!(bridge.process("Door close. MOVE forward."), vec![Action::MotorOn]);
        assert_eq!(rx.try_recv().unwrap(), Action::MotorOn);
    }

    #[test]
    fn both_keywords_dispatch_in_table_order() {
        let (bridge, mut rx) = ActionBridge::new();
        let actions = bridge.process("stop, then move");
        assert_eq!(actions, vec![Action::MotorOn, Action::MotorOff]);
        assert_eq!(rx.try_recv().unwrap(), Action::MotorOn);
        assert_eq!(rx.try_recv().unwrap(), Action::MotorOff);
    }

    #[test]
    fn unmatched_text_triggers_nothing() {
        let (bridge, mut rx) = ActionBridge::new();
        assert!(bridge.process("temperature stable").is_empty());
        assert!(bridge.process("").is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_receiver_does_not_panic() {
        let (bridge, rx) = ActionBridge::new();
        drop(rx);
        assert_eq!(bridge.process("move"), vec![Action::MotorOn]);
    }

    #[test]
    fn custom_triggers() {
        let (bridge, _rx) =
            ActionBridge::with_triggers(vec![("HALT".into(), Action::MotorOff)]);
        assert_eq!(bridge.match_actions("please halt now"), vec![Action::MotorOff]);
        assert!(bridge.match_actions("stop").is_empty());
    }
}
