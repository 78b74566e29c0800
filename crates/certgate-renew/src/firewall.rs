//! Perimeter firewall window management
//!
//! The validation endpoint sits behind a perimeter rule that normally denies
//! inbound HTTP. The rule is relaxed just before challenge publication and
//! restored afterwards; the window guard makes the restore explicit on every
//! exit path and flags any path that forgot it.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::request::FirewallTarget;

/// Default wait after relaxing the rule. Rule propagation is not
/// synchronously confirmable, so the window blocks for a fixed interval
/// before validation traffic is expected.
pub const DEFAULT_PROPAGATION_WAIT: Duration = Duration::from_secs(30);

/// Errors from firewall rule management
#[derive(Debug, Error)]
pub enum FirewallUpdateError {
    #[error("Firewall rule not found: {0}")]
    RuleNotFound(String),

    #[error("Firewall API error: {0}")]
    Api(String),
}

/// Action carried by a perimeter rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    Allow,
    Deny,
}

/// Firewall capability: read and toggle the action of one named rule.
#[async_trait]
pub trait FirewallApi: Send + Sync {
    async fn rule_action(&self, target: &FirewallTarget) -> Result<RuleAction, FirewallUpdateError>;

    async fn set_rule_action(
        &self,
        target: &FirewallTarget,
        action: RuleAction,
    ) -> Result<(), FirewallUpdateError>;
}

enum WindowState<'a, F: FirewallApi> {
    /// No firewall target configured; open and close are no-ops
    Disengaged,
    /// Rule is set to allow and must be restored
    Armed {
        api: &'a F,
        target: FirewallTarget,
    },
    /// Already restored (or handed off); nothing left to do
    Released,
}

/// Scoped perimeter exposure. Obtained from [`FirewallWindow::open`] and
/// consumed by [`FirewallWindow::close`]; the caller must route every exit
/// path through `close`. Dropping an armed window cannot run the async
/// restore, so `Drop` only raises an error log marking the leak.
pub struct FirewallWindow<'a, F: FirewallApi> {
    state: WindowState<'a, F>,
}

impl<'a, F: FirewallApi> FirewallWindow<'a, F> {
    /// Relax the named rule and wait out propagation. With no target
    /// configured this returns a disengaged window without touching the
    /// firewall capability at all.
    pub async fn open(
        api: &'a F,
        target: Option<&FirewallTarget>,
        propagation_wait: Duration,
    ) -> Result<FirewallWindow<'a, F>, FirewallUpdateError> {
        let Some(target) = target else {
            return Ok(Self {
                state: WindowState::Disengaged,
            });
        };

        let prior = api.rule_action(target).await?;
        if prior == RuleAction::Allow {
            warn!(rule = %target.rule, "firewall rule already allows traffic before opening window");
        }

        api.set_rule_action(target, RuleAction::Allow).await?;
        info!(
            rule = %target.rule,
            group = %target.group,
            wait = ?propagation_wait,
            "firewall window opened, waiting for rule propagation"
        );
        tokio::time::sleep(propagation_wait).await;

        Ok(Self {
            state: WindowState::Armed {
                api,
                target: target.clone(),
            },
        })
    }

    /// Restore the rule to deny. Consumes the window so closure happens at
    /// most once.
    pub async fn close(mut self) -> Result<(), FirewallUpdateError> {
        let state = std::mem::replace(&mut self.state, WindowState::Released);
        match state {
            WindowState::Disengaged | WindowState::Released => Ok(()),
            WindowState::Armed { api, target } => {
                api.set_rule_action(&target, RuleAction::Deny).await?;
                info!(rule = %target.rule, group = %target.group, "firewall window closed");
                Ok(())
            }
        }
    }
}

impl<F: FirewallApi> Drop for FirewallWindow<'_, F> {
    fn drop(&mut self) {
        if let WindowState::Armed { target, .. } = &self.state {
            error!(
                rule = %target.rule,
                group = %target.group,
                "firewall window dropped while armed; perimeter rule may still allow traffic"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeFirewall {
        current: Mutex<RuleAction>,
        sets: Mutex<Vec<RuleAction>>,
        reads: Mutex<u32>,
        fail_set: bool,
    }

    impl FakeFirewall {
        fn new(current: RuleAction) -> Self {
            Self {
                current: Mutex::new(current),
                sets: Mutex::new(Vec::new()),
                reads: Mutex::new(0),
                fail_set: false,
            }
        }
    }

    #[async_trait]
    impl FirewallApi for FakeFirewall {
        async fn rule_action(
            &self,
            _target: &FirewallTarget,
        ) -> Result<RuleAction, FirewallUpdateError> {
            *self.reads.lock().unwrap() += 1;
            Ok(*self.current.lock().unwrap())
        }

        async fn set_rule_action(
            &self,
            _target: &FirewallTarget,
            action: RuleAction,
        ) -> Result<(), FirewallUpdateError> {
            if self.fail_set {
                return Err(FirewallUpdateError::Api("persist failed".to_string()));
            }
            self.sets.lock().unwrap().push(action);
            *self.current.lock().unwrap() = action;
            Ok(())
        }
    }

    fn target() -> FirewallTarget {
        FirewallTarget {
            resource_group: "rg".to_string(),
            group: "edge-nsg".to_string(),
            rule: "allow-acme-http".to_string(),
        }
    }

    #[tokio::test]
    async fn test_open_close_toggles_rule() {
        let api = FakeFirewall::new(RuleAction::Deny);
        let window = FirewallWindow::open(&api, Some(&target()), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(*api.current.lock().unwrap(), RuleAction::Allow);

        window.close().await.unwrap();
        assert_eq!(*api.current.lock().unwrap(), RuleAction::Deny);
        assert_eq!(
            api.sets.lock().unwrap().as_slice(),
            [RuleAction::Allow, RuleAction::Deny]
        );
    }

    #[tokio::test]
    async fn test_disengaged_window_makes_no_calls() {
        let api = FakeFirewall::new(RuleAction::Deny);
        let window = FirewallWindow::open(&api, None, Duration::ZERO)
            .await
            .unwrap();
        window.close().await.unwrap();

        assert_eq!(*api.reads.lock().unwrap(), 0);
        assert!(api.sets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_surfaces_persist_failure() {
        let api = FakeFirewall {
            fail_set: true,
            ..FakeFirewall::new(RuleAction::Deny)
        };
        let result = FirewallWindow::open(&api, Some(&target()), Duration::ZERO).await;
        assert!(matches!(result, Err(FirewallUpdateError::Api(_))));
    }

    #[tokio::test]
    async fn test_close_surfaces_persist_failure() {
        let api = FakeFirewall::new(RuleAction::Deny);
        let window = FirewallWindow::open(&api, Some(&target()), Duration::ZERO)
            .await
            .unwrap();

        // Break the API between open and close
        let broken = FakeFirewall {
            fail_set: true,
            ..FakeFirewall::new(RuleAction::Allow)
        };
        drop(window);
        let window = FirewallWindow {
            state: WindowState::Armed {
                api: &broken,
                target: target(),
            },
        };
        assert!(window.close().await.is_err());
    }
}
