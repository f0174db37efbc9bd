use crate::api::{self, ListItemRequest, SubmitBidRequest, BID_SUCCESSFUL, ITEM_SOLD};
use crate::{TradeContext, SETTLE_POLICY};
use gale_http_runner::prelude::*;

const SELL_PRICE: u64 = 50;
const BID_PRICE: u64 = 55;

/// List an item and bid above its price, wait for the backend to match them, then check that the
/// item was sold and the bid succeeded.
pub fn entry(ctx: &mut TradeContext) -> BoxFuture<'_, HookResult> {
    async move {
        if http_client(ctx).is_none() {
            return Ok(());
        }

        // VUs share item types in blocks of ten so that their bids compete
        let item_type = format!("trade-item-{}", ctx.vu_id() / 10);
        let seller_id = nanoid::nanoid!();
        let buyer_id = nanoid::nanoid!();

        let (item_id, bid_id) = ctx
            .group("Lifecycle - 1. List & Bid", move |ctx| {
                async move {
                    let Some(http) = http_client(ctx) else {
                        return (None, None);
                    };

                    let listed = api::list_item(
                        &http,
                        &ListItemRequest {
                            item_type: item_type.clone(),
                            seller_id,
                            min_price: SELL_PRICE,
                        },
                    )
                    .await;
                    let item_id = if ctx.check(
                        &listed,
                        &[("Lifecycle: POST /items status 201", &|r: &HttpResponse| {
                            r.status == 201
                        })],
                    ) {
                        api::listed_item_id(&listed)
                    } else {
                        None
                    };

                    let bid = api::submit_bid(
                        &http,
                        &SubmitBidRequest {
                            item_type,
                            buyer_id,
                            max_price: BID_PRICE,
                        },
                    )
                    .await;
                    let bid_id = if ctx.check(
                        &bid,
                        &[("Lifecycle: POST /bids status 201", &|r: &HttpResponse| {
                            r.status == 201
                        })],
                    ) {
                        api::submitted_bid_id(&bid)
                    } else {
                        None
                    };

                    (item_id, bid_id)
                }
                .boxed()
            })
            .await;

        let wait_item_id = item_id.clone();
        let wait_bid_id = bid_id.clone();
        ctx.group("Lifecycle - 2. Wait for backend", move |ctx| {
            async move {
                if wait_item_id.is_none() && wait_bid_id.is_none() {
                    // Nothing to poll, but the iteration keeps its pace
                    log::debug!("vu {} has nothing to poll this iteration", ctx.vu_id());
                    ctx.sleep(SETTLE_POLICY.timeout).await;
                    return;
                }

                let Some(http) = http_client(ctx) else {
                    return;
                };

                let http = &http;
                let item_id = wait_item_id.as_deref();
                let bid_id = wait_bid_id.as_deref();
                let settled = ctx
                    .poll_until(SETTLE_POLICY, move || async move {
                        let item_sold = match item_id {
                            Some(id) => api::has_status(&api::item_status(http, id).await, ITEM_SOLD),
                            None => true,
                        };
                        let bid_successful = match bid_id {
                            Some(id) => {
                                api::has_status(&api::bid_status(http, id).await, BID_SUCCESSFUL)
                            }
                            None => true,
                        };

                        (item_sold && bid_successful).then_some(())
                    })
                    .await;

                if settled.is_none() {
                    log::info!(
                        "Trade for vu {} did not settle within {:?}",
                        ctx.vu_id(),
                        SETTLE_POLICY.timeout
                    );
                }
            }
            .boxed()
        })
        .await;

        ctx.group("Lifecycle - 3. Verify Outcome", move |ctx| {
            async move {
                let Some(http) = http_client(ctx) else {
                    return;
                };

                if let Some(item_id) = item_id {
                    let status = api::item_status(&http, &item_id).await;
                    ctx.check(
                        &status,
                        &[("Lifecycle: Item status is SOLD", &|r: &HttpResponse| {
                            api::has_status(r, ITEM_SOLD)
                        })],
                    );
                }

                if let Some(bid_id) = bid_id {
                    let status = api::bid_status(&http, &bid_id).await;
                    ctx.check(
                        &status,
                        &[("Lifecycle: Bid status is SUCCESSFUL", &|r: &HttpResponse| {
                            api::has_status(r, BID_SUCCESSFUL)
                        })],
                    );
                }
            }
            .boxed()
        })
        .await;

        Ok(())
    }
    .boxed()
}
