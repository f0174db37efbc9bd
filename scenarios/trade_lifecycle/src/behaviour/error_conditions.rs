use crate::api::{self, ListItemRequest, SubmitBidRequest, ITEM_SOLD};
use crate::{TradeContext, SETTLE_POLICY};
use gale_http_runner::prelude::*;

const ITEM_TYPE: &str = "error-test-item";
const LIST_PRICE: u64 = 20;
const BID_PRICE: u64 = 25;
const NEW_PRICE: u64 = 30;

/// Get an item sold, then check that the API refuses to change its price.
pub fn entry(ctx: &mut TradeContext) -> BoxFuture<'_, HookResult> {
    async move {
        let Some(http) = http_client(ctx) else {
            return Ok(());
        };

        let listed = api::list_item(
            &http,
            &ListItemRequest {
                item_type: ITEM_TYPE.to_string(),
                seller_id: nanoid::nanoid!(),
                min_price: LIST_PRICE,
            },
        )
        .await;
        let item_id = if listed.status == 201 {
            api::listed_item_id(&listed)
        } else {
            None
        };

        // Only sent to buy the item, the response isn't checked
        api::submit_bid(
            &http,
            &SubmitBidRequest {
                item_type: ITEM_TYPE.to_string(),
                buyer_id: nanoid::nanoid!(),
                max_price: BID_PRICE,
            },
        )
        .await;

        let Some(item_id) = item_id else {
            log::debug!("vu {} has no listed item, waiting out the settle time", ctx.vu_id());
            ctx.sleep(SETTLE_POLICY.timeout).await;
            return Ok(());
        };

        let sold = {
            let http = &http;
            let item_id = item_id.as_str();
            ctx.poll_until(SETTLE_POLICY, move || async move {
                api::has_status(&api::item_status(http, item_id).await, ITEM_SOLD).then_some(())
            })
            .await
        };
        if sold.is_none() {
            log::info!(
                "Item {} was not sold within {:?}, trying the price update anyway",
                item_id,
                SETTLE_POLICY.timeout
            );
        }

        ctx.group(
            "Error Condition - 1. Try to update price of a SOLD item",
            move |ctx| {
                async move {
                    let Some(http) = http_client(ctx) else {
                        return;
                    };

                    // A conflict is the expected answer so it doesn't count as a failed request
                    let updated = api::update_price(
                        &http,
                        &item_id,
                        NEW_PRICE,
                        RequestParams::new().expect_status(409),
                    )
                    .await;
                    ctx.check(
                        &updated,
                        &[("Error: PUT on sold item returns 409", &|r: &HttpResponse| {
                            r.status == 409
                        })],
                    );
                }
                .boxed()
            },
        )
        .await;

        Ok(())
    }
    .boxed()
}
