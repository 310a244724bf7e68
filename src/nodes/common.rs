use tracing::info;

use crate::graph::{GraphError, NodeData};
use crate::nodes::{forward_primary, interpolate};
use crate::present::NoticeSpec;
use crate::runtime::activation::NodeInfo;
use crate::runtime::behavior::{
    param_str, require_str, BehaviorRegistry, Flow, FlowOutcome, NodeBehavior, Scope,
};
use crate::runtime::EngineError;

pub fn install(registry: &mut BehaviorRegistry) {
    registry.register(Box::new(StartBehavior));
    registry.register(Box::new(EndBehavior));
    registry.register(Box::new(SuccessSchemeBehavior));
    registry.register(Box::new(FailSchemeBehavior));
    registry.register(Box::new(StartRuleBehavior));
    registry.register(Box::new(SuccessRuleBehavior));
    registry.register(Box::new(ErrorRuleBehavior));
    registry.register(Box::new(WarningRuleBehavior));
    registry.register(Box::new(LogBehavior));
    registry.register(Box::new(NotificationBehavior));
}

/// Unique scheme entry; no predecessor.
pub struct StartBehavior;

impl NodeBehavior for StartBehavior {
    fn kind(&self) -> &'static str {
        "Start"
    }

    fn run(
        &self,
        node: &NodeData,
        _info: &mut NodeInfo,
        flow: &mut Flow,
        _scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        forward_primary(node, flow);
        Ok(())
    }
}

/// Scheme terminal. Sets the end flag and never forwards.
pub struct EndBehavior;

impl NodeBehavior for EndBehavior {
    fn kind(&self) -> &'static str {
        "End"
    }

    fn run(
        &self,
        _node: &NodeData,
        _info: &mut NodeInfo,
        flow: &mut Flow,
        _scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        flow.finish(FlowOutcome::EndScheme);
        Ok(())
    }
}

pub struct SuccessSchemeBehavior;

impl NodeBehavior for SuccessSchemeBehavior {
    fn kind(&self) -> &'static str {
        "SuccessScheme"
    }

    fn run(
        &self,
        _node: &NodeData,
        _info: &mut NodeInfo,
        flow: &mut Flow,
        _scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        flow.finish(FlowOutcome::SuccessScheme);
        Ok(())
    }
}

pub struct FailSchemeBehavior;

impl NodeBehavior for FailSchemeBehavior {
    fn kind(&self) -> &'static str {
        "FailScheme"
    }

    fn run(
        &self,
        _node: &NodeData,
        _info: &mut NodeInfo,
        flow: &mut Flow,
        _scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        flow.finish(FlowOutcome::FailScheme);
        Ok(())
    }
}

/// Unique rule entry.
pub struct StartRuleBehavior;

impl NodeBehavior for StartRuleBehavior {
    fn kind(&self) -> &'static str {
        "StartRule"
    }

    fn run(
        &self,
        node: &NodeData,
        _info: &mut NodeInfo,
        flow: &mut Flow,
        _scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        forward_primary(node, flow);
        Ok(())
    }
}

pub struct SuccessRuleBehavior;

impl NodeBehavior for SuccessRuleBehavior {
    fn kind(&self) -> &'static str {
        "SuccessRule"
    }

    fn run(
        &self,
        _node: &NodeData,
        _info: &mut NodeInfo,
        flow: &mut Flow,
        _scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        flow.finish(FlowOutcome::SuccessRule);
        Ok(())
    }
}

/// Rule terminal reporting a named error. Any reached error fails the rule.
pub struct ErrorRuleBehavior;

impl NodeBehavior for ErrorRuleBehavior {
    fn kind(&self) -> &'static str {
        "ErrorRule"
    }

    fn validate(&self, node: &NodeData) -> Result<(), GraphError> {
        require_str(node, "name")
    }

    fn run(
        &self,
        node: &NodeData,
        _info: &mut NodeInfo,
        flow: &mut Flow,
        scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        let name = param_str(node, "name").unwrap_or_default().to_string();
        let message = interpolate(param_str(node, "message").unwrap_or_default(), scope);
        flow.finish(FlowOutcome::ErrorRule { name, message });
        Ok(())
    }
}

/// Rule terminal reporting a named warning; never fails the rule alone.
pub struct WarningRuleBehavior;

impl NodeBehavior for WarningRuleBehavior {
    fn kind(&self) -> &'static str {
        "WarningRule"
    }

    fn validate(&self, node: &NodeData) -> Result<(), GraphError> {
        require_str(node, "name")
    }

    fn run(
        &self,
        node: &NodeData,
        _info: &mut NodeInfo,
        flow: &mut Flow,
        scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        let name = param_str(node, "name").unwrap_or_default().to_string();
        let message = interpolate(param_str(node, "message").unwrap_or_default(), scope);
        flow.finish(FlowOutcome::WarningRule { name, message });
        Ok(())
    }
}

pub struct LogBehavior;

impl NodeBehavior for LogBehavior {
    fn kind(&self) -> &'static str {
        "Log"
    }

    fn run(
        &self,
        node: &NodeData,
        _info: &mut NodeInfo,
        flow: &mut Flow,
        scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        let message = interpolate(param_str(node, "message").unwrap_or_default(), scope);
        info!(node = %node.id, "{}", message);
        forward_primary(node, flow);
        Ok(())
    }
}

pub struct NotificationBehavior;

impl NodeBehavior for NotificationBehavior {
    fn kind(&self) -> &'static str {
        "Notification"
    }

    fn validate(&self, node: &NodeData) -> Result<(), GraphError> {
        require_str(node, "title")
    }

    fn run(
        &self,
        node: &NodeData,
        _info: &mut NodeInfo,
        flow: &mut Flow,
        scope: &mut dyn Scope,
    ) -> Result<(), EngineError> {
        flow.notify(NoticeSpec {
            title: interpolate(param_str(node, "title").unwrap_or_default(), scope),
            body: interpolate(param_str(node, "body").unwrap_or_default(), scope),
        });
        forward_primary(node, flow);
        Ok(())
    }
}
