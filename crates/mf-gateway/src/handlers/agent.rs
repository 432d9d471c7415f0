use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use mf_commerce::pipeline::{AccountUpdateInput, PayInput, QuoteInput, ReserveInput};
use mf_commerce::requests::{CommissionCreateInput, RequestDecideInput, X1cCreateInput};
use mf_core::actor::ActorContext;
use mf_core::DomainError;

use crate::state::ApiState;

use super::{parse, to_value};

#[derive(Debug, Deserialize)]
struct StatusInput {
    reservation_id: String,
}

#[derive(Debug, Deserialize)]
struct OrderGetInput {
    order_id: String,
}

#[derive(Debug, Deserialize, Default)]
struct ListInput {
    #[serde(default)]
    limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RequestGetInput {
    request_id: String,
}

#[derive(Debug, Deserialize, Default)]
struct AccountGetInput {
    #[serde(default)]
    agent_client_id: Option<String>,
}

pub(crate) async fn dispatch(
    state: &Arc<ApiState>,
    actor: &ActorContext,
    request_id: &str,
    op: &str,
    body: Value,
) -> Result<Value, DomainError> {
    let commerce = &state.commerce;
    match op {
        "agent.catalog" => to_value(commerce.catalog_services().await?),
        "agent.quote" => {
            let input: QuoteInput = parse(&body)?;
            to_value(commerce.quote(actor, input).await?)
        }
        "agent.reserve" => {
            let input: ReserveInput = parse(&body)?;
            to_value(commerce.reserve(actor, input).await?)
        }
        "agent.pay" => {
            let input: PayInput = parse(&body)?;
            to_value(commerce.pay(actor, request_id, input).await?)
        }
        "agent.status" => {
            let input: StatusInput = parse(&body)?;
            commerce.status(actor, &input.reservation_id).await
        }
        "agent.order.get" => {
            let input: OrderGetInput = parse(&body)?;
            to_value(commerce.get_order(actor, &input.order_id).await?)
        }
        "agent.orders.list" => {
            let input: ListInput = parse(&body)?;
            to_value(commerce.list_orders(actor, input.limit).await?)
        }
        "agent.revenue.summary" => commerce.revenue_summary(actor).await,
        "agent.requests.commission.create" => {
            let input: CommissionCreateInput = parse(&body)?;
            to_value(commerce.commission_create(actor, input).await?)
        }
        "agent.requests.x1c.create" => {
            let input: X1cCreateInput = parse(&body)?;
            to_value(commerce.x1c_create(actor, input).await?)
        }
        "agent.requests.decide" => {
            let input: RequestDecideInput = parse(&body)?;
            to_value(commerce.request_decide(actor, input).await?)
        }
        "agent.requests.get" => {
            let input: RequestGetInput = parse(&body)?;
            to_value(commerce.request_get(actor, &input.request_id).await?)
        }
        "agent.requests.list" => {
            let input: ListInput = parse(&body)?;
            to_value(commerce.request_list(actor, input.limit).await?)
        }
        "agent.terms.get" => to_value(commerce.terms_get().await?),
        "agent.terms.accept" => to_value(commerce.terms_accept(actor).await?),
        "agent.account.get" => {
            let input: AccountGetInput = parse(&body)?;
            to_value(
                commerce
                    .account_get(actor, input.agent_client_id.as_deref())
                    .await?,
            )
        }
        "agent.account.update" => {
            let input: AccountUpdateInput = parse(&body)?;
            to_value(commerce.account_update(actor, input).await?)
        }
        _ => Err(DomainError::not_found("unknown route")),
    }
}
