use serde_json::Value;

use crate::gateway::Fields;

/// Why a user document is left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyMigrated,
    MissingCredentials,
}

impl SkipReason {
    pub fn label(self) -> &'static str {
        match self {
            SkipReason::AlreadyMigrated => "already migrated",
            SkipReason::MissingCredentials => "missing email or password",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordClass {
    Eligible { email: String, password: String },
    Skip(SkipReason),
    /// Credentials are present but unusable; counted as a failed record.
    Invalid(&'static str),
}

/// Decide what the job does with one user document.
///
/// The migration marker wins over everything else: a document with
/// `migrated == true` or any truthy `authUid` is never touched again.
pub fn classify(fields: &Fields) -> RecordClass {
    let migrated = fields.get("migrated") == Some(&Value::Bool(true));
    if migrated || fields.get("authUid").is_some_and(truthy) {
        return RecordClass::Skip(SkipReason::AlreadyMigrated);
    }

    let email = fields.get("email").filter(|email| truthy(email));
    let password = fields.get("password").and_then(password_text);

    match (email, password) {
        (Some(Value::String(email)), Some(password)) => RecordClass::Eligible {
            email: email.clone(),
            password,
        },
        (Some(_), Some(_)) => RecordClass::Invalid("email is not a string"),
        _ => RecordClass::Skip(SkipReason::MissingCredentials),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// Legacy records stored some passwords as numbers; those are used as their
// decimal text. Zero and empty strings count as missing.
fn password_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) if truthy(value) => Some(
            match (number.as_i64(), number.as_u64(), number.as_f64()) {
                (Some(signed), _, _) => signed.to_string(),
                (None, Some(unsigned), _) => unsigned.to_string(),
                (None, None, Some(float)) if float.fract() == 0.0 && float.abs() < 1e15 => {
                    format!("{float:.0}")
                }
                _ => number.to_string(),
            },
        ),
        _ => None,
    }
}
