use std::sync::Arc;

use axum::http::HeaderMap;
use serde::Deserialize;
use serde_json::Value;

use mf_core::actor::ActorContext;
use mf_core::DomainError;
use mf_library::loans::{
    AssessFeeInput, CheckInInput, CheckoutInput, MarkLostInput, OverrideStatusInput,
};

use crate::state::ApiState;

use super::{parse, to_value};

#[derive(Debug, Deserialize, Default)]
struct ListMineInput {
    #[serde(default)]
    limit: Option<u32>,
}

fn header_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("x-idempotency-key")
        .and_then(|v| v.to_str().ok())
}

pub(crate) async fn dispatch(
    state: &Arc<ApiState>,
    actor: &ActorContext,
    request_id: &str,
    headers: &HeaderMap,
    op: &str,
    body: Value,
) -> Result<Value, DomainError> {
    let library = &state.library;
    match op {
        "library.loans.checkout" => {
            let input: CheckoutInput = parse(&body)?;
            library
                .checkout(actor, request_id, header_key(headers), input)
                .await
        }
        "library.loans.checkIn" => {
            let input: CheckInInput = parse(&body)?;
            library
                .check_in(actor, request_id, header_key(headers), input)
                .await
        }
        "library.loans.markLost" => {
            let input: MarkLostInput = parse(&body)?;
            library
                .mark_lost(actor, request_id, header_key(headers), input)
                .await
        }
        "library.loans.assessReplacementFee" => {
            let input: AssessFeeInput = parse(&body)?;
            library
                .assess_replacement_fee(actor, request_id, header_key(headers), input)
                .await
        }
        "library.loans.listMine" => {
            let input: ListMineInput = parse(&body)?;
            to_value(library.list_mine(actor, input.limit).await?)
        }
        "library.items.overrideStatus" => {
            let input: OverrideStatusInput = parse(&body)?;
            to_value(library.override_item_status(actor, input).await?)
        }
        _ => Err(DomainError::not_found("unknown route")),
    }
}
