use serde::Serialize;

use crate::models::plan_models::{PlanId, PLANS};

pub const VERIFY_LABEL: &str = "Verify Payment";
pub const VERIFYING_LABEL: &str = "Verifying...";
pub const VERIFIED_LABEL: &str = "Payment Verified";
pub const SUCCESS_MESSAGE: &str = "Payment verified! Activating your account...";

/// Phase of a payment form. Exactly one is active at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiState {
    Idle,
    Verifying,
    Success,
    Error(String),
}

impl UiState {
    pub fn status(&self) -> FormStatus {
        match self {
            UiState::Idle => FormStatus::Idle,
            UiState::Verifying => FormStatus::Verifying,
            UiState::Success => FormStatus::Success,
            UiState::Error(_) => FormStatus::Error,
        }
    }

    pub fn button_label(&self) -> &'static str {
        match self {
            UiState::Idle | UiState::Error(_) => VERIFY_LABEL,
            UiState::Verifying => VERIFYING_LABEL,
            UiState::Success => VERIFIED_LABEL,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            UiState::Error(message) => Some(message.as_str()),
            UiState::Success => Some(SUCCESS_MESSAGE),
            UiState::Idle | UiState::Verifying => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FormStatus {
    Idle,
    Verifying,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanView {
    pub id: PlanId,
    pub display_name: &'static str,
    pub price: &'static str,
    pub discount_tag: Option<&'static str>,
    pub selected: bool,
}

/// Everything a client needs to draw the payment screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormView {
    pub plans: Vec<PlanView>,
    pub transaction_code: String,
    pub has_screenshot: bool,
    pub status: FormStatus,
    pub message: Option<String>,
    pub button_label: &'static str,
    pub can_submit: bool,
}

pub fn plan_views(selected: PlanId) -> Vec<PlanView> {
    PLANS
        .iter()
        .map(|plan| PlanView {
            id: plan.id,
            display_name: plan.display_name,
            price: plan.price,
            discount_tag: plan.discount_tag,
            selected: plan.id == selected,
        })
        .collect()
}
