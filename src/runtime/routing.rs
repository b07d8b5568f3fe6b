use evalexpr::{build_operator_tree, Node as EvalNode, ContextWithMutableVariables, HashMapContext, DefaultNumericTypes};
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;
use crate::error::{FlowError, FlowResult};
use crate::runtime::blueprint::{GraphNode, Successor};

/// Chooses which successors of a completed node become active.
pub trait Router: Send + Sync {
    fn select(&self, node: &GraphNode, variables: &HashMap<String, Value>) -> FlowResult<Vec<String>>;
}

/// Routes on edge conditions evaluated against instance variables.
///
/// A split activates every branch whose condition holds. Any other node takes
/// the first conditional edge that holds, falling back to its unconditional edge.
#[derive(Debug, Default)]
pub struct ConditionRouter;

impl Router for ConditionRouter {
    fn select(&self, node: &GraphNode, variables: &HashMap<String, Value>) -> FlowResult<Vec<String>> {
        if node.successors.is_empty() {
            return Ok(Vec::new());
        }
        if node.successors.len() == 1 && node.successors[0].condition.is_none() {
            return Ok(vec![node.successors[0].target.clone()]);
        }

        let ctx = eval_context(variables);

        if node.is_split() {
            let targets: Vec<String> = node.successors.iter()
                .filter(|s| holds(s, &ctx))
                .map(|s| s.target.clone())
                .collect();
            if targets.is_empty() {
                return Err(FlowError::validation(format!("no branch of split '{}' matched", node.id)));
            }
            return Ok(targets);
        }

        if let Some(hit) = node.successors.iter()
            .filter(|s| s.condition.is_some())
            .find(|s| holds(s, &ctx))
        {
            return Ok(vec![hit.target.clone()]);
        }

        node.successors.iter()
            .find(|s| s.condition.is_none())
            .map(|s| vec![s.target.clone()])
            .ok_or_else(|| FlowError::validation(format!("no route out of node '{}' matched", node.id)))
    }
}

fn clean(cond: &str) -> String {
    cond.replace("${", "").replace("}", "")
}

/// Parses a condition without evaluating it.
pub fn check_condition(cond: &str) -> Result<(), String> {
    let _: EvalNode = build_operator_tree(&clean(cond)).map_err(|e| e.to_string())?;
    Ok(())
}

fn eval_context(variables: &HashMap<String, Value>) -> HashMapContext<DefaultNumericTypes> {
    let mut eval_ctx = HashMapContext::<DefaultNumericTypes>::new();
    for (k, v) in variables {
        let eval_val = match v {
            Value::String(s) => Some(evalexpr::Value::String(s.clone())),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() { Some(evalexpr::Value::Int(i)) }
                else if let Some(f) = n.as_f64() { Some(evalexpr::Value::Float(f)) }
                else { None }
            },
            Value::Bool(b) => Some(evalexpr::Value::Boolean(*b)),
            _ => None,
        };
        if let Some(ev) = eval_val {
            let _ = eval_ctx.set_value(k.clone(), ev);
        }
    }
    eval_ctx
}

fn holds(successor: &Successor, ctx: &HashMapContext<DefaultNumericTypes>) -> bool {
    let Some(cond) = &successor.condition else {
        return true;
    };
    let raw = clean(cond);
    let tree: EvalNode = match build_operator_tree(&raw) {
        Ok(t) => t,
        Err(e) => {
            warn!(target_node = %successor.target, condition = %raw, error = %e, "Condition does not parse");
            return false;
        }
    };
    tree.eval_boolean_with_context(ctx).unwrap_or_else(|e| {
        warn!(target_node = %successor.target, condition = %raw, error = %e, "Condition evaluation failed");
        false
    })
}
