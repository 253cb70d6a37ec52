//! Customer and custom-field validation.
//!
//! Pure and synchronous: it runs before any payment session is created so an
//! invalid cart never costs a network round trip.

use crate::models::{Answer, CustomQuestion, CustomerInfo};
use std::collections::HashMap;

/// Result of validating checkout details. `errors` maps field id (or the
/// custom question id) to a user-facing message.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: HashMap<String, String>,
}

impl ValidationReport {
    fn from_errors(errors: HashMap<String, String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Validates contact fields and organizer-defined questions.
///
/// Name and email are required unconditionally; phone is optional. A custom
/// question is invalid only when it is required and the trimmed string form
/// of its answer is empty (zero selections for checkbox groups).
pub fn validate_checkout_details(
    customer: &CustomerInfo,
    answers: &HashMap<String, Answer>,
    questions: &[CustomQuestion],
) -> ValidationReport {
    let mut errors = HashMap::new();

    if customer.name.trim().is_empty() {
        errors.insert("name".to_string(), "Full name is required".to_string());
    }

    let email = customer.email.trim();
    if email.is_empty() {
        errors.insert("email".to_string(), "Email address is required".to_string());
    } else if !validator::validate_email(email) {
        errors.insert(
            "email".to_string(),
            "Enter a valid email address".to_string(),
        );
    }

    for question in questions {
        if !question.required {
            continue;
        }
        let answered = answers
            .get(&question.id)
            .map(|answer| !answer.trimmed().is_empty())
            .unwrap_or(false);
        if !answered {
            errors.insert(
                question.id.clone(),
                format!("{} is required", question.label),
            );
        }
    }

    ValidationReport::from_errors(errors)
}
