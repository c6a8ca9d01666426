use serde::Serialize;
use serde_json::Value;

use crate::models::plan_models::PlanId;

/// Every screenshot is declared to the verification service as JPEG,
/// whatever the uploaded file actually was.
pub const DECLARED_MIME_TYPE: &str = "image/jpeg";

pub const SERVICE_UNAVAILABLE_MESSAGE: &str =
    "Verification service is currently unavailable. Please try again later.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationRequest {
    pub plan: PlanId,
    pub transaction_code: String,
    pub image_data: String,
    pub mime_type: &'static str,
}

impl VerificationRequest {
    pub fn new(plan: PlanId, transaction_code: &str, image_data: &str) -> Self {
        Self {
            plan,
            transaction_code: transaction_code.to_uppercase(),
            image_data: image_data.to_string(),
            mime_type: DECLARED_MIME_TYPE,
        }
    }

    pub fn image_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.image_data)
    }

    /// Instruction text sent alongside the screenshot.
    pub fn prompt(&self) -> String {
        let plan = self.plan.plan();
        format!(
            "You are verifying a mobile-money payment.\n\
             1. Extract the 10-character transaction code shown in the attached screenshot.\n\
             2. Compare it with the code the user entered: \"{code}\".\n\
             3. Check that the amount paid in the screenshot matches the price of the {name} plan: {price}.\n\
             Set `match` to true only when the codes are identical and the amount matches. \
             Always report the code you extracted in `extractedCode`. \
             When it does not match, explain why in `reason`. \
             Report the amount you saw in `verifiedAmount`.",
            code = self.transaction_code,
            name = plan.display_name,
            price = plan.price,
        )
    }
}

/// The service's verdict. Missing or oddly typed fields default, so a
/// partial answer is still a verdict and never an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationResult {
    pub is_match: bool,
    pub extracted_code: String,
    pub reason: Option<String>,
    pub verified_amount: Option<String>,
}

impl VerificationResult {
    /// Reads each field on its own; only the shape of `value` as a whole is
    /// never checked.
    pub fn from_value(value: &Value) -> Self {
        Self {
            is_match: value.get("match").map(truthy).unwrap_or(false),
            extracted_code: value.get("extractedCode").and_then(text_of).unwrap_or_default(),
            reason: value.get("reason").and_then(text_of),
            verified_amount: value.get("verifiedAmount").and_then(text_of),
        }
    }
}

// Models sometimes answer "true" or 1 instead of true.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |n| n != 0.0),
        Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        Value::Null | Value::Array(_) | Value::Object(_) => false,
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Schema field names and whether the service must always fill them.
pub const RESPONSE_FIELDS: [(&str, bool); 4] = [
    ("match", true),
    ("extractedCode", true),
    ("reason", false),
    ("verifiedAmount", false),
];

/// Parses the service's JSON text. Unparsable text folds into the default
/// (non-matching) result; `malformed` tells the caller it happened.
pub fn parse_verification_response(text: &str) -> ParsedResponse {
    let body = strip_code_fence(text.trim());
    if body.is_empty() {
        return ParsedResponse { result: VerificationResult::default(), malformed: true };
    }
    match serde_json::from_str::<Value>(body) {
        Ok(value) => ParsedResponse { result: VerificationResult::from_value(&value), malformed: false },
        Err(e) => {
            tracing::warn!("Verification response was not valid JSON: {}", e);
            ParsedResponse { result: VerificationResult::default(), malformed: true }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub result: VerificationResult,
    pub malformed: bool,
}

fn strip_code_fence(text: &str) -> &str {
    let Some(inner) = text.strip_prefix("```") else {
        return text;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// What the form should do with a finished attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Verified { extracted_code: String, verified_amount: Option<String> },
    Rejected { message: String },
}

pub fn interpret(result: &VerificationResult) -> VerificationOutcome {
    if result.is_match {
        return VerificationOutcome::Verified {
            extracted_code: result.extracted_code.clone(),
            verified_amount: result.verified_amount.clone(),
        };
    }
    let message = match result.reason.as_deref().map(str::trim) {
        Some(reason) if !reason.is_empty() => reason.to_string(),
        _ => mismatch_message(&result.extracted_code),
    };
    VerificationOutcome::Rejected { message }
}

fn mismatch_message(extracted_code: &str) -> String {
    let found = if extracted_code.trim().is_empty() {
        "no readable code"
    } else {
        extracted_code.trim()
    };
    format!(
        "Transaction code does not match. The screenshot shows {}. Check the code and try again.",
        found
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uppercases_code_and_declares_jpeg() {
        let request = VerificationRequest::new(PlanId::Weekly, "qwe12rty34", "QUJD");
        assert_eq!(request.transaction_code, "QWE12RTY34");
        assert_eq!(request.mime_type, "image/jpeg");
        assert_eq!(request.image_data_uri(), "data:image/jpeg;base64,QUJD");
    }

    #[test]
    fn prompt_names_code_and_plan_price() {
        let request = VerificationRequest::new(PlanId::Daily, "ABCDE12345", "QUJD");
        let prompt = request.prompt();
        assert!(prompt.contains("\"ABCDE12345\""));
        assert!(prompt.contains("KSh 50"));
        assert!(prompt.contains("10-character"));
    }

    #[test]
    fn parses_full_response() {
        let parsed = parse_verification_response(
            r#"{"match": true, "extractedCode": "ABC1234567", "reason": "", "verifiedAmount": "KSh 300"}"#,
        );
        assert!(!parsed.malformed);
        assert!(parsed.result.is_match);
        assert_eq!(parsed.result.extracted_code, "ABC1234567");
        assert_eq!(parsed.result.verified_amount.as_deref(), Some("KSh 300"));
    }

    #[test]
    fn missing_fields_default_to_non_match() {
        let parsed = parse_verification_response(r#"{"reason": "amount mismatch"}"#);
        assert!(!parsed.malformed);
        assert!(!parsed.result.is_match);
        assert_eq!(parsed.result.extracted_code, "");
    }

    #[test]
    fn unparsable_text_is_a_malformed_non_match() {
        for text in ["", "   ", "not json", "{\"match\": tru"] {
            let parsed = parse_verification_response(text);
            assert!(parsed.malformed, "{text:?}");
            assert_eq!(parsed.result, VerificationResult::default());
        }
    }

    #[test]
    fn string_booleans_are_accepted() {
        let parsed = parse_verification_response(r#"{"match": "TRUE", "extractedCode": "X"}"#);
        assert!(parsed.result.is_match);
    }

    #[test]
    fn numeric_amount_does_not_spoil_a_match() {
        let parsed = parse_verification_response(
            r#"{"match": true, "extractedCode": "ABC1234567", "verifiedAmount": 1000}"#,
        );
        assert!(!parsed.malformed);
        assert!(parsed.result.is_match);
        assert_eq!(parsed.result.extracted_code, "ABC1234567");
        assert_eq!(parsed.result.verified_amount.as_deref(), Some("1000"));
    }

    #[test]
    fn null_code_keeps_the_service_reason() {
        let parsed = parse_verification_response(
            r#"{"match": false, "extractedCode": null, "reason": "amount mismatch"}"#,
        );
        assert!(!parsed.malformed);
        assert_eq!(parsed.result.extracted_code, "");
        assert_eq!(
            interpret(&parsed.result),
            VerificationOutcome::Rejected { message: "amount mismatch".into() }
        );
    }

    #[test]
    fn match_follows_truthiness() {
        for (text, expected) in [
            (r#"{"match": 1}"#, true),
            (r#"{"match": 0}"#, false),
            (r#"{"match": null}"#, false),
            (r#"{"match": "false"}"#, false),
            (r#"{"match": [true]}"#, false),
        ] {
            let parsed = parse_verification_response(text);
            assert!(!parsed.malformed, "{text}");
            assert_eq!(parsed.result.is_match, expected, "{text}");
        }
    }

    #[test]
    fn non_object_json_is_a_plain_non_match() {
        let parsed = parse_verification_response("[1, 2, 3]");
        assert!(!parsed.malformed);
        assert_eq!(parsed.result, VerificationResult::default());
    }

    #[test]
    fn fenced_json_is_accepted() {
        let parsed = parse_verification_response("```json\n{\"match\": true, \"extractedCode\": \"X\"}\n```");
        assert!(parsed.result.is_match);
    }

    #[test]
    fn rejection_prefers_service_reason() {
        let result = VerificationResult {
            reason: Some("amount mismatch".into()),
            extracted_code: "ZZZ".into(),
            ..Default::default()
        };
        assert_eq!(
            interpret(&result),
            VerificationOutcome::Rejected { message: "amount mismatch".into() }
        );
    }

    #[test]
    fn rejection_without_reason_names_extracted_code() {
        let result = VerificationResult { extracted_code: "QWERTY1234".into(), ..Default::default() };
        match interpret(&result) {
            VerificationOutcome::Rejected { message } => assert!(message.contains("QWERTY1234")),
            other => panic!("unexpected outcome {other:?}"),
        }
        match interpret(&VerificationResult::default()) {
            VerificationOutcome::Rejected { message } => assert!(message.contains("no readable code")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
