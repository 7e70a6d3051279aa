// ABOUTME: provides opsh helpers for building, validating, and rendering chat requests and results.
// ABOUTME: keeps client behavior deterministic by enforcing the same validation as the daemon.

use ops_common::{
    parse_chat_request, validate_chat_request, ChatRequest, ChatResult, ErrorCode, Mode,
    RequestError,
};

pub fn build_request(message: &str, mode: Mode) -> anyhow::Result<ChatRequest> {
    let request = ChatRequest {
        message: message.to_string(),
        mode,
    };
    validate_chat_request(&request).map_err(|e| anyhow::anyhow!(e.message))?;
    Ok(request)
}

pub fn parse_and_validate(input: &str) -> anyhow::Result<ChatRequest> {
    let request = parse_chat_request(input)?;
    validate_chat_request(&request).map_err(|e| anyhow::anyhow!(e.message))?;
    Ok(request)
}

#[derive(Debug, serde::Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ValidateVerdict {
    pub ok: bool,
    pub error: Option<RequestError>,
}

pub fn validate_verdict(input: &str) -> ValidateVerdict {
    match parse_chat_request(input) {
        Ok(request) => match validate_chat_request(&request) {
            Ok(()) => ValidateVerdict { ok: true, error: None },
            Err(err) => ValidateVerdict {
                ok: false,
                error: Some(RequestError {
                    code: ErrorCode::ValidationFailed,
                    message: err.message,
                }),
            },
        },
        Err(err) => ValidateVerdict {
            ok: false,
            error: Some(RequestError {
                code: ErrorCode::ParseFailed,
                message: err.to_string(),
            }),
        },
    }
}

/// Plain-text view of a daemon reply for terminal use.
pub fn render_summary(result: &ChatResult) -> String {
    if let Some(err) = &result.error {
        let code = serde_json::to_value(&err.code)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        return format!("error [{code}]: {}\n", err.message);
    }

    let Some(response) = &result.response else {
        return "error: empty response\n".to_string();
    };

    let mut out = format!("{}\n", response.answer);
    if !response.plan.is_empty() {
        out.push_str("\nPlan:\n");
        for (i, step) in response.plan.iter().enumerate() {
            let marker = if step.executed { "x" } else { " " };
            out.push_str(&format!(
                "  {}. [{marker}] {} - {}\n",
                i + 1,
                step.call.tool,
                step.reasoning
            ));
        }
    }
    if let Some(script) = &response.generated_script {
        out.push_str("\nScript (not executed):\n");
        out.push_str(script);
    }
    out.push_str(&format!(
        "\ntrace_id={} mode={}\n",
        response.audit.trace_id,
        response.audit.mode.as_str()
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_request_rejects_blank_message() {
        let err = build_request("   ", Mode::PlanOnly).unwrap_err();
        assert!(err.to_string().contains("non-empty"));

        let request = build_request("show status", Mode::ExecuteSafe).unwrap();
        assert_eq!(request.mode, Mode::ExecuteSafe);
    }

    #[test]
    fn parse_and_validate_accepts_both_modes() {
        parse_and_validate(r#"{"message":"show status","mode":"plan_only"}"#).unwrap();
        parse_and_validate(r#"{"message":"show status","mode":"execute_safe"}"#).unwrap();
    }

    #[test]
    fn verdict_reports_parse_failed_for_unknown_fields() {
        let input = r#"{"message":"show status","mode":"plan_only","unexpected":"x"}"#;

        let v = validate_verdict(input);
        assert!(!v.ok);
        assert_eq!(v.error.as_ref().unwrap().code, ErrorCode::ParseFailed);
    }

    #[test]
    fn verdict_reports_validation_failed_for_blank_message() {
        let v = validate_verdict(r#"{"message":"  ","mode":"execute_safe"}"#);
        assert!(!v.ok);
        assert_eq!(
            v.error.as_ref().unwrap().code,
            ErrorCode::ValidationFailed
        );
    }

    #[test]
    fn summary_renders_errors_and_plans() {
        let forbidden: ChatResult = serde_json::from_str(
            r#"{"response":null,"error":{"code":"mode_forbidden","message":"execute_safe is disabled"}}"#,
        )
        .unwrap();
        assert_eq!(
            render_summary(&forbidden),
            "error [mode_forbidden]: execute_safe is disabled\n"
        );

        let planned: ChatResult = serde_json::from_str(
            r##"{"response":{
                "answer":"I'll plan to execute: ls /sim/ (Plan only - no actions executed)",
                "plan":[{"tool":"run_command","args":{"command":"ls /sim/"},"reasoning":"list","executed":false}],
                "actions_taken":[],
                "generated_script":"#!/bin/sh\nls /sim/\n",
                "audit":{"trace_id":"t-1","mode":"plan_only","tool_count":1,"executed_count":0}
            },"error":null}"##,
        )
        .unwrap();
        let text = render_summary(&planned);
        assert!(text.contains("  1. [ ] run_command - list\n"));
        assert!(text.contains("Script (not executed):\n#!/bin/sh\nls /sim/\n"));
        assert!(text.ends_with("trace_id=t-1 mode=plan_only\n"));
    }
}
