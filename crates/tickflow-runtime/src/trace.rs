//! Error enrichment: signatures, wiring paths, and activation back-traces.
//!
//! When a node fails and its signature does not capture the error, the
//! failure is decorated with the node's identity and a textual tree of the
//! nodes transitively feeding it — each line carrying the runtime path, the
//! arg names (active inputs marked `*arg*`), truncated current values,
//! delta values, and last-modified times.

use tickflow_common::{EngineTime, MIN_DT, NodeError};
use tickflow_types::TsInput;

use crate::node::Node;

/// Enrich `err` with the failing node's identity and an activation
/// back-trace walked through same-graph producers.
pub fn capture_error(
    mut err: NodeError,
    nodes: &[Node],
    failing: usize,
    context: &str,
    now: EngineTime,
    start_time: EngineTime,
) -> NodeError {
    let node = &nodes[failing];
    if err.has_signature() {
        // Already enriched further down (nested graphs); keep the original
        // identity and only extend the context.
        if err.additional_context.is_empty() {
            err.additional_context = context.to_string();
        }
        return err;
    }
    err.signature_name = node.signature.signature();
    err.label = node.signature.label.clone().unwrap_or_default();
    err.wiring_path = runtime_path(node);
    err.additional_context = context.to_string();
    err.activation_back_trace =
        back_trace(nodes, failing, node.signature.trace_back_depth, 0, now, start_time);
    err
}

/// The node's runtime path: graph id chain plus wiring path or name.
pub fn runtime_path(node: &Node) -> String {
    let graph = node
        .graph_id
        .iter()
        .map(|g| g.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let name = if node.signature.wiring_path_name.is_empty() {
        &node.signature.name
    } else {
        &node.signature.wiring_path_name
    };
    format!("[{graph}] {name}")
}

fn back_trace(
    nodes: &[Node],
    ndx: usize,
    depth: usize,
    level: usize,
    now: EngineTime,
    start_time: EngineTime,
) -> String {
    let node = &nodes[ndx];
    let indent = "  ".repeat(level);
    let mut out = format!(
        "{indent}{}<{}>: {}\n",
        runtime_path(node),
        ndx,
        node.signature.signature()
    );
    for input in &node.inputs {
        out.push_str(&format_input_line(input, &indent, now, start_time, node));
        if depth > 0 {
            if let Some(producer) = input.producer {
                if producer < nodes.len() && producer != ndx {
                    out.push_str(&back_trace(nodes, producer, depth - 1, level + 1, now, start_time));
                }
            }
        }
    }
    out
}

fn format_input_line(
    input: &TsInput,
    indent: &str,
    now: EngineTime,
    start_time: EngineTime,
    node: &Node,
) -> String {
    let marker = if input.is_active() {
        format!("*{}*", input.name)
    } else {
        input.name.clone()
    };
    let mut line = format!("{indent}  {marker}");
    if node.signature.capture_values {
        line.push_str(&format!("={}", short_value(input.snapshot(now, start_time))));
        if let Some(delta) = input.delta_snapshot(now, start_time) {
            line.push_str(&format!(" delta={}", short_value(Some(delta))));
        }
    }
    let lm = input.last_modified();
    if lm != MIN_DT {
        line.push_str(&format!(" last_modified={lm}"));
    }
    line.push('\n');
    line
}

fn short_value(value: Option<tickflow_types::Value>) -> String {
    use tickflow_types::Value;
    match value {
        None | Some(Value::Empty) => "<invalid>".to_string(),
        Some(Value::Scalar(v)) => v.truncated(32),
        Some(Value::Signal) => "signal".to_string(),
        Some(Value::Set(vs)) => format!(
            "{{{}}}",
            vs.iter().map(|v| v.truncated(16)).collect::<Vec<_>>().join(", ")
        ),
        Some(Value::Map(es)) => format!(
            "{{{}}}",
            es.iter()
                .map(|(k, v)| format!("{}: {}", k.truncated(16), short_value(Some(v.clone()))))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Some(Value::Composite(cs)) => format!(
            "({})",
            cs.iter()
                .map(|c| short_value(Some(c.clone())))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        Some(Value::Window(vs)) => format!("[{} samples]", vs.len()),
        Some(Value::Ref(r)) => format!("ref:{r}"),
    }
}
