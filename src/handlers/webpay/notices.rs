use axum::extract::State;
use serde::Deserialize;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::Form;
use crate::jwt::{self, ValidatedNotice};
use crate::ledger::{self, Applied, NoticeOutcome};

#[derive(Debug, Deserialize)]
pub struct NoticeForm {
    #[serde(default)]
    pub notice: String,
}

/// Verify and validate a signed processor notice. Nothing is read from or
/// written to the ledger until this succeeds.
fn decode_notice(state: &AppState, token: &str) -> Result<ValidatedNotice> {
    if token.is_empty() {
        return Err(AppError::MalformedToken("empty notice".to_string()));
    }
    let claims = state.keys.decode(token)?;
    jwt::validate(claims, queries::now(), state.keys.config().expiry_secs)
}

async fn process_postback(state: &AppState, token: &str) -> Result<NoticeOutcome> {
    let notice = decode_notice(state, token)?;
    ledger::apply_postback(state, &notice).await
}

/// POST /webpay/postback
///
/// Responds 200 with the transaction id on success and on replays of an
/// already-applied notice. A handler that runs past the postback deadline
/// answers 503 so the processor re-delivers.
pub async fn postback(
    State(state): State<AppState>,
    Form(form): Form<NoticeForm>,
) -> Result<String> {
    let deadline = state.config.postback_deadline;
    let outcome = tokio::time::timeout(deadline, process_postback(&state, &form.notice))
        .await
        .map_err(|_| {
            AppError::DeadlineExceeded(format!("postback not applied within {:?}", deadline))
        })??;

    if outcome.applied == Applied::Replay {
        tracing::debug!(
            "Replayed postback for {} answered without changes",
            outcome.contribution.uuid
        );
    }
    Ok(outcome.transaction_id)
}

/// POST /webpay/chargeback
///
/// Records a refund or chargeback reversal against a confirmed purchase.
pub async fn chargeback(
    State(state): State<AppState>,
    Form(form): Form<NoticeForm>,
) -> Result<String> {
    let notice = decode_notice(&state, &form.notice)?;
    let outcome = ledger::apply_chargeback(&state, &notice)?;
    Ok(outcome.transaction_id)
}
