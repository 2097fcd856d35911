//! Stack traces and error translation
//!
//! When a call fails, the raw EVM error is a byte string and a PC. This
//! module turns that into something a developer can read: it walks the
//! child computations down to the innermost error, maps PCs back to source
//! locations and compiler error hints, extracts developer-supplied revert
//! reasons from source comments, and decodes frame-local variables from the
//! captured revert-site memory.
//!
//! A [`StackTrace`] is ordered outermost first; the *last* frame is always
//! the innermost error site.

use alloy::primitives::Address;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::contract::artifact::CompilerArtifact;
use crate::env::Env;
use crate::errors::RevertError;
use crate::types::Computation;
use crate::utils::proxy_utils::is_eip1167_contract;

/// Compiler hints that mean "the failure came from a child call"
pub const EXTERNAL_CALL_ERRORS: [&str; 2] = ["external call failed", "returndatasize too small"];

/// Compiler hints that mean "the failure came from a child creation"
pub const CREATE_ERRORS: [&str; 2] = ["create failed", "create2 failed"];

/// Compiler hints a user assert/raise produces
pub const DEV_REASON_ALLOWED: [&str; 2] = ["user raise", "user assert"];

/// A source span, 1-indexed lines
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SourceLocation {
    pub lineno: u32,
    pub col: u32,
    pub end_lineno: u32,
    pub end_col: u32,
}

// loosely, match `# @dev asdf...` or `# dev: asdf...`
static REASON_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#\s*@?(\w+):?\s+(.*)").expect("static pattern"));

/// A developer-supplied revert reason from a source comment
#[derive(Clone, Debug, PartialEq)]
pub struct DevReason {
    pub reason_type: String,
    pub reason_str: String,
}

impl DevReason {
    /// Extract the reason comment covering a source span, if one exists
    pub fn at_source_location(
        source_code: &str,
        lineno: u32,
        end_lineno: u32,
    ) -> Option<Self> {
        let lines: Vec<&str> = source_code.lines().collect();
        let start = lineno.saturating_sub(1) as usize;
        let end = (end_lineno as usize).min(lines.len());
        for line in lines.get(start..end)? {
            if let Some(captures) = REASON_PATTERN.captures(line) {
                return Some(Self {
                    reason_type: captures[1].to_string(),
                    reason_str: captures[2].trim_end().to_string(),
                });
            }
        }
        None
    }
}

impl std::fmt::Display for DevReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}: {}>", self.reason_type, self.reason_str)
    }
}

/// Decoded frame-local variables at the error site
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameDetail {
    pub fn_name: String,
    pub vars: Vec<(String, crate::abi::value::AbiValue)>,
}

impl std::fmt::Display for FrameDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let detail = self
            .vars
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "<{}: {}>", self.fn_name, detail)
    }
}

/// One frame of a stack trace for a known contract
#[derive(Clone, Debug)]
pub struct ErrorDetail {
    /// Contract repr captured before the revert unwound state
    pub contract_repr: String,
    /// The raw VM error of this frame
    pub vm_error: Option<crate::types::VmError>,
    /// Compiler-provided error hint at the failing PC
    pub error_detail: Option<String>,
    /// Developer-supplied reason from the failing source line's comment
    pub dev_reason: Option<DevReason>,
    /// Decoded frame locals, when the frame layout and memory allow
    pub frame_detail: Option<FrameDetail>,
    /// Source span of the failing statement
    pub source_location: Option<SourceLocation>,
    /// The failing source line itself
    pub source_line: Option<String>,
}

impl ErrorDetail {
    /// Human-readable reason of this frame's VM error
    pub fn pretty_vm_reason(&self) -> String {
        match &self.vm_error {
            Some(err) => err.pretty_reason(),
            None => "<no error>".to_string(),
        }
    }
}

impl std::fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.contract_repr)?;
        if let Some(detail) = &self.error_detail {
            write!(f, "\n <compiler: {detail}>")?;
        }
        if let Some(location) = &self.source_location {
            write!(f, "\n line {}:{}", location.lineno, location.col)?;
            if let Some(line) = &self.source_line {
                write!(f, "\n   {}", line.trim_end())?;
            }
        }
        if let Some(reason) = &self.dev_reason {
            write!(f, "\n {reason}")?;
        }
        if let Some(frame) = &self.frame_detail {
            if !frame.vars.is_empty() {
                let mut locals = frame.clone();
                locals.fn_name = "locals".to_string();
                write!(f, "\n {locals}")?;
            }
        }
        Ok(())
    }
}

/// One stack frame: a known contract's details, or a placeholder
#[derive(Clone, Debug)]
pub enum StackFrame {
    Known(Box<ErrorDetail>),
    Unknown { address: Address, message: String },
}

impl StackFrame {
    pub fn error_detail(&self) -> Option<&str> {
        match self {
            Self::Known(detail) => detail.error_detail.as_deref(),
            Self::Unknown { .. } => None,
        }
    }

    pub fn dev_reason(&self) -> Option<&DevReason> {
        match self {
            Self::Known(detail) => detail.dev_reason.as_ref(),
            Self::Unknown { .. } => None,
        }
    }

    pub fn pretty_vm_reason(&self) -> String {
        match self {
            Self::Known(detail) => detail.pretty_vm_reason(),
            Self::Unknown { message, .. } => message.clone(),
        }
    }
}

impl std::fmt::Display for StackFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Known(detail) => write!(f, "{detail}"),
            Self::Unknown { message, .. } => write!(f, "{message}"),
        }
    }
}

/// An ordered list of frames; the last frame is the innermost error
#[derive(Clone, Debug, Default)]
pub struct StackTrace(pub Vec<StackFrame>);

impl StackTrace {
    pub fn last_frame(&self) -> Option<&StackFrame> {
        self.0.last()
    }

    /// Pretty reason of the innermost frame
    pub fn pretty_reason(&self) -> Option<String> {
        self.last_frame().map(StackFrame::pretty_vm_reason)
    }
}

impl std::fmt::Display for StackTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let frames = self
            .0
            .iter()
            .map(|frame| frame.to_string())
            .collect::<Vec<_>>()
            .join("\n\n");
        write!(f, "{frames}")
    }
}

/// The compiler hint at the failing PC
///
/// Revert info supplied by an alternate executor takes precedence;
/// otherwise the PC trace is scanned in reverse for the most recent entry
/// in the error-hint map.
pub fn find_error_meta(artifact: &CompilerArtifact, computation: &Computation) -> Option<String> {
    if let Some(ir) = &computation.ir_revert {
        return Some(ir.error_msg.clone());
    }
    // creations map against the deploy-time source map
    let source_map = if computation.msg.is_create {
        &artifact.deploy_source_map
    } else {
        &artifact.source_map
    };
    computation
        .pc_trace
        .iter()
        .rev()
        .find_map(|pc| source_map.error_map.get(pc).cloned())
}

/// The source span of the failing statement
pub fn find_source_of(
    artifact: &CompilerArtifact,
    computation: &Computation,
) -> Option<SourceLocation> {
    if let Some(ir) = &computation.ir_revert {
        if let Some((lineno, col, end_lineno, end_col)) = ir.source_pos {
            return Some(SourceLocation {
                lineno,
                col,
                end_lineno,
                end_col,
            });
        }
    }
    let source_map = if computation.msg.is_create {
        &artifact.deploy_source_map
    } else {
        &artifact.source_map
    };
    let pos_map = &source_map.pc_pos_map;
    computation.pc_trace.iter().rev().find_map(|pc| {
        pos_map.get(pc).map(|(lineno, col, end_lineno, end_col)| SourceLocation {
            lineno: *lineno,
            col: *col,
            end_lineno: *end_lineno,
            end_col: *end_col,
        })
    })
}

/// Decode the failing function's frame locals from the revert-site memory
fn debug_frame(
    artifact: &CompilerArtifact,
    reg: &crate::env::registry::ContractRegistration,
    computation: &Computation,
) -> Option<FrameDetail> {
    let selector = computation.selector()?;
    let function = reg.method_for(selector)?;
    let fn_name = function.name()?.to_string();
    let frame_info = artifact.function_signatures.get(&fn_name)?;
    let mut memory = computation.memory.clone()?;

    memory.extend(frame_info.frame_start, frame_info.frame_size.max(32));
    let mut vars = Vec::new();
    for (name, var) in &frame_info.frame_vars {
        vars.push((name.clone(), var.typ.decode_memory(&mut memory, var.pos)));
    }
    Some(FrameDetail { fn_name, vars })
}

/// Build the frame for a compiled contract's failing computation
fn compiled_frame(
    artifact: &CompilerArtifact,
    reg: &crate::env::registry::ContractRegistration,
    computation: &Computation,
) -> ErrorDetail {
    let error_detail = find_error_meta(artifact, computation);
    let source_location = find_source_of(artifact, computation);
    let dev_reason = source_location.as_ref().and_then(|location| {
        artifact.source_code.as_deref().and_then(|source| {
            DevReason::at_source_location(source, location.lineno, location.end_lineno)
        })
    });
    let source_line = source_location
        .as_ref()
        .and_then(|location| artifact.source_line(location.lineno))
        .map(str::to_string);
    let contract_repr = computation
        .contract_repr_before_revert
        .clone()
        .unwrap_or_else(|| reg.repr(computation.msg.to));
    ErrorDetail {
        contract_repr,
        vm_error: computation.error.clone(),
        error_detail,
        dev_reason,
        frame_detail: debug_frame(artifact, reg, computation),
        source_location,
        source_line,
    }
}

/// Build the frame for an ABI-only contract
fn abi_frame(
    reg: &crate::env::registry::ContractRegistration,
    computation: &Computation,
) -> ErrorDetail {
    let repr = match computation.selector().and_then(|sel| reg.method_for(sel)) {
        Some(function) => format!(
            "  {}({}.{})",
            computation
                .error
                .as_ref()
                .map(|e| e.pretty_reason())
                .unwrap_or_default(),
            reg.repr(computation.msg.to),
            function.pretty_signature()
        ),
        None => format!(
            "  {}(unknown method id {}.0x{})",
            computation
                .error
                .as_ref()
                .map(|e| e.pretty_reason())
                .unwrap_or_default(),
            reg.repr(computation.msg.to),
            computation
                .selector()
                .map(|sel| alloy::primitives::hex::encode(sel))
                .unwrap_or_default()
        ),
    };
    ErrorDetail {
        contract_repr: repr,
        vm_error: computation.error.clone(),
        error_detail: None,
        dev_reason: None,
        frame_detail: None,
        source_location: None,
        source_line: None,
    }
}

/// Reconstruct the stack trace of a failed computation
///
/// Starts at the failing computation's own frame. When the compiler hint
/// says the failure came from a child call or creation, or the contract is
/// a minimal proxy, the last (erroring) child's trace is recursively
/// prepended. Unknown contracts produce a single placeholder frame.
pub fn stack_trace_for(env: &Env, computation: &Computation) -> StackTrace {
    match env.lookup_contract(computation.msg.code_address) {
        Some(found) => match &found.reg.artifact {
            Some(artifact) => {
                let frame = compiled_frame(artifact, &found.reg, computation);
                let is_minimal_proxy = is_eip1167_contract(&found.bytecode);
                let descend = frame
                    .error_detail
                    .as_deref()
                    .map(|detail| {
                        EXTERNAL_CALL_ERRORS.contains(&detail) || CREATE_ERRORS.contains(&detail)
                    })
                    .unwrap_or(false)
                    || is_minimal_proxy;
                let own = StackTrace(vec![StackFrame::Known(Box::new(frame))]);
                if descend {
                    handle_child_trace(env, computation, own)
                } else {
                    own
                }
            }
            None => {
                let own = StackTrace(vec![StackFrame::Known(Box::new(abi_frame(
                    &found.reg,
                    computation,
                )))]);
                handle_child_trace(env, computation, own)
            }
        },
        None => {
            let own = StackTrace(vec![StackFrame::Unknown {
                address: computation.msg.code_address,
                message: format!(
                    "<Unknown location in unknown contract {}>",
                    computation.msg.code_address.to_checksum(None)
                ),
            }]);
            handle_child_trace(env, computation, own)
        }
    }
}

/// Prepend the erroring last child's trace, when there is one
fn handle_child_trace(env: &Env, computation: &Computation, own: StackTrace) -> StackTrace {
    let Some(child) = computation.children.last() else {
        return own;
    };
    if !child.is_error() {
        return own;
    }
    let mut frames = stack_trace_for(env, child).0;
    frames.extend(own.0);
    StackTrace(frames)
}

/// A pattern [`check_error_matches`] matches a revert against
#[derive(Clone, Debug)]
pub enum ErrorPattern {
    /// Match any revert
    Any,
    /// Match the pretty VM reason, the compiler hint, or the dev reason
    Literal(String),
    /// Match the compiler hint exactly
    Compiler(String),
    /// Match a `user revert with reason` whose decoded reason equals this
    VmError(String),
    /// Match a dev-reason comment `# <reason_type>: <reason_str>`
    Dev {
        reason_type: String,
        reason_str: String,
    },
}

impl ErrorPattern {
    /// Shorthand for the common `# dev: <message>` form
    pub fn dev(message: impl Into<String>) -> Self {
        Self::Dev {
            reason_type: "dev".to_string(),
            reason_str: message.into(),
        }
    }

    /// Shorthand for `# reason: <message>` style comments
    pub fn reason(message: impl Into<String>) -> Self {
        Self::Dev {
            reason_type: "reason".to_string(),
            reason_str: message.into(),
        }
    }
}

/// Pattern-match a revert error against the supplied pattern
///
/// Returns a description of the mismatch on failure.
pub fn check_error_matches(error: &RevertError, pattern: &ErrorPattern) -> Result<(), String> {
    let Some(frame) = error.stack_trace.last_frame() else {
        return Err("empty stack trace".to_string());
    };

    match pattern {
        ErrorPattern::Any => Ok(()),

        ErrorPattern::Literal(expected) => match frame {
            StackFrame::Unknown { message, .. } => {
                if message.contains(expected.as_str()) {
                    Ok(())
                } else {
                    Err(format!("{message} does not match {expected:?}"))
                }
            }
            StackFrame::Known(_) => {
                let matches = frame.pretty_vm_reason() == *expected
                    || frame.error_detail() == Some(expected.as_str())
                    || frame
                        .dev_reason()
                        .is_some_and(|reason| reason.reason_str == *expected);
                if matches {
                    Ok(())
                } else {
                    Err(format!("does not match {expected:?}"))
                }
            }
        },

        ErrorPattern::Compiler(expected) => {
            if frame.error_detail() == Some(expected.as_str()) {
                Ok(())
            } else {
                Err(format!("{:?} != {expected:?}", frame.error_detail()))
            }
        }

        ErrorPattern::VmError(expected) => {
            let matches = frame.error_detail() == Some("user revert with reason")
                && frame.pretty_vm_reason() == *expected;
            if matches {
                Ok(())
            } else {
                Err(format!("{} != {expected}", frame.pretty_vm_reason()))
            }
        }

        ErrorPattern::Dev {
            reason_type,
            reason_str,
        } => {
            // a dev-reason match must come from the user's own assert or
            // raise, not from a failure that bubbled up from elsewhere on
            // the same line
            if let Some(detail) = frame.error_detail() {
                let user_level = DEV_REASON_ALLOWED.contains(&detail);
                let bubbled =
                    EXTERNAL_CALL_ERRORS.contains(&detail) || CREATE_ERRORS.contains(&detail);
                if !user_level && bubbled {
                    return Err(format!(
                        "expected <{reason_type}: {reason_str}> but got <compiler: {detail}>"
                    ));
                }
            }
            match frame.dev_reason() {
                Some(reason)
                    if reason.reason_type == *reason_type && reason.reason_str == *reason_str =>
                {
                    Ok(())
                }
                other => Err(format!(
                    "expected <{reason_type}: {reason_str}> but got {other:?}"
                )),
            }
        }
    }
}
