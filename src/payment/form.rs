use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::api::verifier::{PaymentVerifier, VerifierError};
use crate::models::payment_models::{plan_views, FormView, UiState};
use crate::models::plan_models::PlanId;
use crate::payment::verification::{
    interpret, parse_verification_response, VerificationOutcome, VerificationRequest,
    SERVICE_UNAVAILABLE_MESSAGE,
};
use crate::utils::data_uri::UploadedImage;

pub const MIN_CODE_LEN: usize = 5;
pub const MAX_CODE_LEN: usize = 10;
pub const COMPLETION_DELAY: Duration = Duration::from_millis(1500);

pub type CompletionCallback = Arc<dyn Fn() + Send + Sync>;

/// Why the verify action is closed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormError {
    #[error("Transaction code must be at least 5 characters")]
    CodeTooShort,
    #[error("Upload a screenshot of the payment first")]
    MissingScreenshot,
    #[error("Verification is already in progress")]
    AlreadyVerifying,
    #[error("Payment has already been verified")]
    AlreadyVerified,
}

/// State behind the payment confirmation screen.
///
/// The form owns the uploaded screenshot and the pending completion task.
/// Dropping the form aborts a completion that has not fired yet.
pub struct PaymentForm {
    selected_plan: PlanId,
    transaction_code: String,
    screenshot: Option<UploadedImage>,
    state: UiState,
    on_complete: CompletionCallback,
    completion: Option<JoinHandle<()>>,
}

impl PaymentForm {
    pub fn new(on_complete: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            selected_plan: PlanId::default(),
            transaction_code: String::new(),
            screenshot: None,
            state: UiState::Idle,
            on_complete: Arc::new(on_complete),
            completion: None,
        }
    }

    #[cfg(test)]
    pub fn selected_plan(&self) -> PlanId {
        self.selected_plan
    }

    #[cfg(test)]
    pub fn transaction_code(&self) -> &str {
        &self.transaction_code
    }

    #[cfg(test)]
    pub fn screenshot(&self) -> Option<&UploadedImage> {
        self.screenshot.as_ref()
    }

    pub fn state(&self) -> &UiState {
        &self.state
    }

    pub fn select_plan(&mut self, plan: PlanId) {
        self.selected_plan = plan;
    }

    pub fn set_transaction_code(&mut self, code: &str) {
        self.transaction_code = code
            .trim()
            .chars()
            .take(MAX_CODE_LEN)
            .collect::<String>()
            .to_uppercase();
    }

    /// Replaces the screenshot. A new image is a new attempt, so a previous
    /// verdict is cleared; an attempt already in flight is left alone.
    pub fn upload_screenshot(&mut self, image: UploadedImage) {
        self.screenshot = Some(image);
        if matches!(self.state, UiState::Error(_) | UiState::Success) {
            self.state = UiState::Idle;
        }
    }

    pub fn check_submit(&self) -> Result<(), FormError> {
        match self.state {
            UiState::Verifying => return Err(FormError::AlreadyVerifying),
            UiState::Success => return Err(FormError::AlreadyVerified),
            UiState::Idle | UiState::Error(_) => {}
        }
        if self.transaction_code.chars().count() < MIN_CODE_LEN {
            return Err(FormError::CodeTooShort);
        }
        if self.screenshot.is_none() {
            return Err(FormError::MissingScreenshot);
        }
        Ok(())
    }

    pub fn can_submit(&self) -> bool {
        self.check_submit().is_ok()
    }

    /// Opens an attempt: checks the gate, enters `Verifying` and returns
    /// the request to send. Must be paired with [`PaymentForm::finish_verification`].
    pub fn begin_verification(&mut self) -> Result<VerificationRequest, FormError> {
        self.check_submit()?;
        let screenshot = self.screenshot.as_ref().ok_or(FormError::MissingScreenshot)?;
        let request = VerificationRequest::new(
            self.selected_plan,
            &self.transaction_code,
            screenshot.base64_payload(),
        );
        self.state = UiState::Verifying;
        Ok(request)
    }

    /// Closes an attempt with the service's raw answer.
    pub fn finish_verification(&mut self, response: Result<String, VerifierError>) -> &UiState {
        self.state = match response {
            Ok(text) => {
                let parsed = parse_verification_response(&text);
                if parsed.malformed {
                    tracing::warn!("Unusable verification response, treating it as a mismatch");
                }
                match interpret(&parsed.result) {
                    VerificationOutcome::Verified { extracted_code, verified_amount } => {
                        tracing::info!(
                            plan = %self.selected_plan,
                            extracted_code = %extracted_code,
                            verified_amount = ?verified_amount,
                            "Payment verified"
                        );
                        self.schedule_completion();
                        UiState::Success
                    }
                    VerificationOutcome::Rejected { message } => {
                        tracing::info!(plan = %self.selected_plan, "Payment rejected: {}", message);
                        UiState::Error(message)
                    }
                }
            }
            Err(e) => {
                tracing::error!("Payment verification failed: {}", e);
                UiState::Error(SERVICE_UNAVAILABLE_MESSAGE.to_string())
            }
        };
        &self.state
    }

    /// Leaves `Verifying` without a verdict, for attempts that never reported back.
    pub fn abort_verification(&mut self) {
        if self.state == UiState::Verifying {
            self.state = UiState::Error(SERVICE_UNAVAILABLE_MESSAGE.to_string());
        }
    }

    #[cfg(test)]
    pub fn completion_scheduled(&self) -> bool {
        self.completion.is_some()
    }

    // Completion fires at most once per form, even if a later upload reopens it.
    fn schedule_completion(&mut self) {
        if self.completion.is_some() {
            return;
        }
        let on_complete = self.on_complete.clone();
        self.completion = Some(tokio::spawn(async move {
            tokio::time::sleep(COMPLETION_DELAY).await;
            on_complete();
        }));
    }

    pub fn view(&self) -> FormView {
        FormView {
            plans: plan_views(self.selected_plan),
            transaction_code: self.transaction_code.clone(),
            has_screenshot: self.screenshot.is_some(),
            status: self.state.status(),
            message: self.state.message().map(str::to_string),
            button_label: self.state.button_label(),
            can_submit: self.can_submit(),
        }
    }
}

impl Drop for PaymentForm {
    fn drop(&mut self) {
        if let Some(handle) = self.completion.take() {
            handle.abort();
        }
    }
}

pub fn lock_form(form: &Mutex<PaymentForm>) -> MutexGuard<'_, PaymentForm> {
    form.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Runs one verification attempt against a shared form. The lock is only
/// held to open and close the attempt, never across the service call.
pub async fn submit(
    form: &Mutex<PaymentForm>,
    verifier: &dyn PaymentVerifier,
) -> Result<UiState, FormError> {
    let request = lock_form(form).begin_verification()?;
    let response = verifier.verify(&request).await;
    let state = lock_form(form).finish_verification(response).clone();
    Ok(state)
}
