use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::models::payment_models::UiState;
use crate::payment::form::lock_form;
use crate::AppState;

pub const REAP_INTERVAL: Duration = Duration::from_secs(60);
/// Verified sessions only need to live long enough for the client to see completion.
pub const COMPLETED_SESSION_TTL: Duration = Duration::from_secs(60);

pub async fn start_session_reaper(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(REAP_INTERVAL);
    loop {
        interval.tick().await;
        let removed = reap_expired(&state, Instant::now());
        if removed > 0 {
            tracing::info!(removed, live = state.forms.len(), "Reaped expired payment forms");
        }
    }
}

/// Drops sessions idle past their TTL and returns how many went.
/// Forms with a verification in flight are left alone.
pub fn reap_expired(state: &AppState, now: Instant) -> usize {
    let before = state.forms.len();
    state.forms.retain(|id, session| {
        let idle = session.idle_for(now);
        let ttl = if session.completed.load(std::sync::atomic::Ordering::SeqCst) {
            COMPLETED_SESSION_TTL
        } else {
            state.config.session_ttl
        };
        if idle < ttl {
            return true;
        }
        if *lock_form(&session.form).state() == UiState::Verifying {
            return true;
        }
        tracing::debug!(form_id = %id, idle_secs = idle.as_secs(), "Dropping idle payment form");
        false
    });
    state.verify_limiter.retain_recent();
    state.verify_limiter.shrink_to_fit();
    before.saturating_sub(state.forms.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::verifier::MockPaymentVerifier;
    use crate::config::AppConfig;
    use crate::handlers::payment_handlers::FormSession;
    use std::sync::atomic::Ordering;
    use uuid::Uuid;

    fn state() -> AppState {
        let config = AppConfig::from_lookup(|var| match var {
            "SESSION_TTL_SECS" => Some("300".to_string()),
            _ => None,
        })
        .unwrap();
        AppState::new(config, Arc::new(MockPaymentVerifier::new()))
    }

    fn open_session(state: &AppState) -> (Uuid, Arc<FormSession>) {
        let id = Uuid::new_v4();
        let session = Arc::new(FormSession::new(id));
        state.forms.insert(id, session.clone());
        (id, session)
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_are_dropped_after_ttl() {
        let state = state();
        let (stale, _) = open_session(&state);
        tokio::time::advance(Duration::from_secs(200)).await;
        let (fresh, _) = open_session(&state);

        tokio::time::advance(Duration::from_secs(101)).await;
        assert_eq!(reap_expired(&state, Instant::now()), 1);
        assert!(!state.forms.contains_key(&stale));
        assert!(state.forms.contains_key(&fresh));
    }

    #[tokio::test(start_paused = true)]
    async fn touching_a_session_keeps_it_alive() {
        let state = state();
        let (id, session) = open_session(&state);
        tokio::time::advance(Duration::from_secs(250)).await;
        session.touch();
        tokio::time::advance(Duration::from_secs(250)).await;

        assert_eq!(reap_expired(&state, Instant::now()), 0);
        assert!(state.forms.contains_key(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn completed_sessions_go_sooner() {
        let state = state();
        let (done, session) = open_session(&state);
        session.completed.store(true, Ordering::SeqCst);
        let (open, _) = open_session(&state);

        tokio::time::advance(COMPLETED_SESSION_TTL).await;
        assert_eq!(reap_expired(&state, Instant::now()), 1);
        assert!(!state.forms.contains_key(&done));
        assert!(state.forms.contains_key(&open));
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_verification_is_not_reaped() {
        let state = state();
        let (id, session) = open_session(&state);
        {
            let mut form = lock_form(&session.form);
            form.set_transaction_code("ABC1234567");
            form.upload_screenshot(crate::utils::data_uri::UploadedImage::from_bytes(
                b"img",
                Some("image/jpeg"),
                None,
            ));
            form.begin_verification().unwrap();
        }

        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(reap_expired(&state, Instant::now()), 0);
        assert!(state.forms.contains_key(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn background_loop_reaps_on_its_interval() {
        let state = Arc::new(state());
        let (id, _) = open_session(&state);
        let reaper = tokio::spawn(start_session_reaper(state.clone()));

        tokio::time::sleep(Duration::from_secs(300) + REAP_INTERVAL + Duration::from_secs(1)).await;
        assert!(!state.forms.contains_key(&id));
        reaper.abort();
    }
}
