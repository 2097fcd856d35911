//! Structured, printable call traces
//!
//! Walks a finished computation tree into a [`TraceFrame`] tree that knows
//! how to render itself: plain indented text, a JSON-serializable dict, or
//! a self-contained HTML page. Inputs and outputs are ABI-decoded against
//! the resolved function of each frame when the emitting contract is
//! registered; unknown contracts print as their address and selector.

use alloy::primitives::{Address, Bytes};
use serde_json::json;

use crate::abi::codec::abi_decode;
use crate::env::Env;
use crate::types::Computation;

/// Decoding info resolved for one frame's function
#[derive(Clone, Debug)]
pub struct TraceSourceInfo {
    /// `Contract.function` label
    pub label: String,
    /// Parenthesized argument schema
    pub args_schema: String,
    /// Declared argument names, aligned with the schema
    pub arg_names: Vec<String>,
    /// Parenthesized return schema
    pub return_schema: String,
}

impl TraceSourceInfo {
    fn format_input(&self, input: &[u8]) -> String {
        let payload = if input.len() >= 4 { &input[4..] } else { input };
        match abi_decode(&self.args_schema, payload) {
            Ok(values) => {
                let args = values
                    .iter()
                    .zip(&self.arg_names)
                    .map(|(value, name)| format!("{name} = {value}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({args})")
            }
            Err(_) => format!("(0x{})", alloy::primitives::hex::encode(payload)),
        }
    }

    fn format_output(&self, output: &[u8]) -> String {
        if output.is_empty() {
            return " => None".to_string();
        }
        match abi_decode(&self.return_schema, output) {
            Ok(values) => {
                let rendered = values
                    .iter()
                    .map(|value| value.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(" => ({rendered})")
            }
            Err(_) => format!(" => 0x{}", alloy::primitives::hex::encode(output)),
        }
    }

    /// Render the full `label(args) => (rets)` form
    pub fn format(&self, input: &[u8], output: &[u8]) -> String {
        format!(
            "{}{}{}",
            self.label,
            self.format_input(input),
            self.format_output(output)
        )
    }
}

/// One node of the rendered call tree
#[derive(Clone, Debug)]
pub struct TraceFrame {
    pub address: Address,
    pub depth: usize,
    pub gas_used: u64,
    pub source: Option<TraceSourceInfo>,
    pub input: Bytes,
    pub output: Bytes,
    pub children: Vec<TraceFrame>,
}

impl TraceFrame {
    /// The single-line text of this frame, without indentation
    pub fn text(&self) -> String {
        let body = match &self.source {
            Some(source) => source.format(&self.input, &self.output),
            None => {
                let mut text = format!("Unknown contract {}", self.address.to_checksum(None));
                if self.input.len() >= 4 {
                    text.push_str(&format!(
                        ".0x{}",
                        alloy::primitives::hex::encode(&self.input[..4])
                    ));
                }
                text
            }
        };
        format!("[{}] {}", self.gas_used, body)
    }

    /// A JSON-serializable tree of this trace
    pub fn to_dict(&self) -> serde_json::Value {
        json!({
            "address": self.address.to_checksum(None),
            "depth": self.depth,
            "gas_used": self.gas_used,
            "source": self.source.as_ref().map(|s| s.label.clone()),
            "input": format!("0x{}", alloy::primitives::hex::encode(&self.input)),
            "output": format!("0x{}", alloy::primitives::hex::encode(&self.output)),
            "children": self.children.iter().map(TraceFrame::to_dict).collect::<Vec<_>>(),
            "text": self.text(),
        })
    }

    /// A self-contained HTML page rendering this trace
    pub fn to_html(&self) -> String {
        let trace_json = self.to_dict().to_string().replace('\\', "\\\\");
        TRACE_TEMPLATE.replace("$$TRACE", &trace_json)
    }
}

impl std::fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", " ".repeat(self.depth * 4), self.text())?;
        for child in &self.children {
            write!(f, "\n{child}")?;
        }
        Ok(())
    }
}

/// Build the rendered call tree for a finished computation
pub fn call_trace_for(env: &Env, computation: &Computation) -> TraceFrame {
    build_frame(env, computation, 0)
}

fn build_frame(env: &Env, computation: &Computation, depth: usize) -> TraceFrame {
    let source = env
        .lookup_contract(computation.msg.code_address)
        .and_then(|found| {
            let selector = computation.selector()?;
            let function = found.reg.method_for(selector)?;
            Some(TraceSourceInfo {
                label: format!("{}.{}", found.reg.name, function.pretty_name()),
                args_schema: function.signature().to_string(),
                arg_names: function
                    .entry()
                    .inputs
                    .iter()
                    .map(|input| input.name.clone())
                    .collect(),
                return_schema: function.return_schema(),
            })
        });

    TraceFrame {
        address: computation.msg.to,
        depth,
        gas_used: computation.gas_used,
        source,
        input: computation.msg.data.clone(),
        output: computation.output.clone(),
        children: computation
            .children
            .iter()
            .map(|child| build_frame(env, child, depth + 1))
            .collect(),
    }
}

const TRACE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>call trace</title>
<style>
body { font-family: monospace; }
ul { list-style: none; border-left: 1px dotted #999; }
li { margin: 2px; }
</style>
</head>
<body>
<div id="trace"></div>
<script>
const trace = $$TRACE;
function render(frame) {
  const li = document.createElement("li");
  li.textContent = frame.text;
  const ul = document.createElement("ul");
  for (const child of frame.children) ul.appendChild(render(child));
  li.appendChild(ul);
  return li;
}
const root = document.createElement("ul");
root.appendChild(render(trace));
document.getElementById("trace").appendChild(root);
</script>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_contract_text() {
        let frame = TraceFrame {
            address: Address::repeat_byte(0x42),
            depth: 0,
            gas_used: 21000,
            source: None,
            input: vec![0xa9, 0x05, 0x9c, 0xbb, 0x00].into(),
            output: Bytes::new(),
            children: vec![],
        };
        let text = frame.text();
        assert!(text.starts_with("[21000] Unknown contract 0x4242"));
        assert!(text.ends_with(".0xa9059cbb"));
    }

    #[test]
    fn test_to_dict_shape() {
        let frame = TraceFrame {
            address: Address::ZERO,
            depth: 0,
            gas_used: 5,
            source: None,
            input: Bytes::new(),
            output: Bytes::new(),
            children: vec![TraceFrame {
                address: Address::ZERO,
                depth: 1,
                gas_used: 2,
                source: None,
                input: Bytes::new(),
                output: Bytes::new(),
                children: vec![],
            }],
        };
        let dict = frame.to_dict();
        assert_eq!(dict["gas_used"], 5);
        assert_eq!(dict["children"].as_array().unwrap().len(), 1);
        assert!(frame.to_html().contains("\"gas_used\":5"));
    }
}
