//! Plugin lifecycle
//!
//! Unloaded -> Initializing -> Populating -> {Committed | RollingBack}
//! -> {Active | Failed} -> Destroyed

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info_span, warn, Instrument};

use ua_core::{Error, Result};
use ua_model::{rollback, AddressSpace, RollbackLedger};

use crate::plugin::{BoxedPlugin, ConstructContext, Plugin, Services};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginState {
    Unloaded,
    Initializing,
    Populating,
    Committed,
    RollingBack,
    Active,
    Failed,
    Destroyed,
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub fn allowed_transitions(from: PluginState) -> Vec<PluginState> {
    use PluginState::*;
    match from {
        Unloaded => vec![Initializing],
        Initializing => vec![Populating],
        Populating => vec![Committed, RollingBack],
        Committed => vec![Active],
        RollingBack => vec![Failed],
        Active => vec![Destroyed],
        Failed => vec![Destroyed],
        Destroyed => vec![],
    }
}

pub fn validate_transition(from: PluginState, to: PluginState) -> Result<()> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition(format!("{} -> {}", from, to)))
    }
}

/// One loaded plugin and the states it went through
pub struct PluginInstance {
    name: String,
    plugin: BoxedPlugin,
    state: PluginState,
    history: Vec<PluginState>,
    failure: Option<String>,
}

impl PluginInstance {
    pub fn new(name: impl Into<String>, plugin: BoxedPlugin) -> Self {
        Self {
            name: name.into(),
            plugin,
            state: PluginState::Unloaded,
            history: vec![PluginState::Unloaded],
            failure: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> PluginState {
        self.state
    }

    /// Every state entered, oldest first
    pub fn history(&self) -> &[PluginState] {
        &self.history
    }

    /// Why construction failed, if it did
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn plugin(&self) -> &dyn Plugin {
        self.plugin.as_ref()
    }

    fn transition(&mut self, to: PluginState) -> Result<()> {
        validate_transition(self.state, to)?;
        debug!("Plugin '{}': {} -> {}", self.name, self.state, to);
        self.state = to;
        self.history.push(to);
        Ok(())
    }
}

/// Drive `instance` from Unloaded to Active, or to Failed with its nodes
/// rolled back
///
/// The returned error is the construct failure itself, unless rollback also
/// failed, in which case the (fatal) rollback error is returned instead.
pub async fn construct(
    instance: &mut PluginInstance,
    engine: Arc<dyn AddressSpace>,
    services: &Services,
    params: Value,
) -> Result<()> {
    if engine.is_serving() {
        return Err(Error::plugin(format!(
            "cannot construct '{}': engine already serving",
            instance.name
        )));
    }

    instance.transition(PluginState::Initializing)?;
    let span = info_span!("plugin", name = %instance.name);
    let mut ledger = RollbackLedger::open();
    instance.transition(PluginState::Populating)?;

    let outcome = {
        let mut ctx = ConstructContext::new(engine.clone(), span.clone(), params, services.clone(), &mut ledger);
        instance.plugin.construct(&mut ctx).instrument(span.clone()).await
    };

    match outcome {
        Ok(()) => {
            instance.transition(PluginState::Committed)?;
            debug!("Plugin '{}' committed {} node(s)", instance.name, ledger.len());
            ledger.clear();
            instance.transition(PluginState::Active)?;
            Ok(())
        }
        Err(cause) => {
            instance.transition(PluginState::RollingBack)?;
            warn!("Plugin '{}' failed to construct: {}", instance.name, cause);

            let undo = rollback(engine.as_ref(), ledger);
            instance.plugin.destroy().instrument(span).await;
            instance.failure = Some(cause.to_string());
            instance.transition(PluginState::Failed)?;

            match undo {
                Ok(report) => {
                    debug!("Plugin '{}': removed {} node(s)", instance.name, report.deleted.len());
                    Err(cause)
                }
                Err(rollback_error) => {
                    error!("Plugin '{}' could not be rolled back: {}", instance.name, rollback_error);
                    Err(rollback_error)
                }
            }
        }
    }
}

/// Release an Active or Failed instance; a no-op once Destroyed
pub async fn destroy(instance: &mut PluginInstance) -> Result<()> {
    match instance.state {
        PluginState::Destroyed => Ok(()),
        PluginState::Active | PluginState::Failed => {
            instance.plugin.destroy().await;
            instance.transition(PluginState::Destroyed)
        }
        other => Err(Error::InvalidTransition(format!("{} -> {}", other, PluginState::Destroyed))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_path_is_allowed() {
        use PluginState::*;
        let path = [Unloaded, Initializing, Populating, Committed, Active, Destroyed];
        for pair in path.windows(2) {
            assert!(validate_transition(pair[0], pair[1]).is_ok());
        }
    }

    #[test]
    fn test_failure_path_is_allowed() {
        use PluginState::*;
        let path = [Unloaded, Initializing, Populating, RollingBack, Failed, Destroyed];
        for pair in path.windows(2) {
            assert!(validate_transition(pair[0], pair[1]).is_ok());
        }
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        use PluginState::*;
        assert!(validate_transition(Populating, Active).is_err());
        assert!(validate_transition(RollingBack, Active).is_err());
        assert!(validate_transition(Committed, RollingBack).is_err());
        assert!(validate_transition(Destroyed, Unloaded).is_err());

        let err = validate_transition(Failed, Active).unwrap_err();
        assert_eq!(err.to_string(), "Invalid lifecycle transition: Failed -> Active");
    }
}
