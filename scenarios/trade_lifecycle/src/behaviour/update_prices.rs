use crate::api::{self, ListItemRequest};
use crate::TradeContext;
use gale_http_runner::prelude::*;
use std::time::Duration;

const LIST_PRICE: u64 = 100;
const NEW_PRICE: u64 = 110;
/// Pause between listing an item and repricing it.
pub const REPRICE_DELAY: Duration = Duration::from_secs(1);

/// List an item then raise its price while it is still listed.
pub fn entry(ctx: &mut TradeContext) -> BoxFuture<'_, HookResult> {
    async move {
        let Some(http) = http_client(ctx) else {
            return Ok(());
        };

        let listed = api::list_item(
            &http,
            &ListItemRequest {
                item_type: "price-update-item".to_string(),
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

        ctx.sleep(REPRICE_DELAY).await;

        let Some(item_id) = item_id else {
            return Ok(());
        };

        ctx.group("Update Price - 1. Update existing item price", move |ctx| {
            async move {
                let Some(http) = http_client(ctx) else {
                    return;
                };

                let updated =
                    api::update_price(&http, &item_id, NEW_PRICE, RequestParams::new()).await;
                ctx.check(
                    &updated,
                    &[(
                        "Update Price: PUT /items/{itemId}/price status 200",
                        &|r: &HttpResponse| r.status == 200,
                    )],
                );
            }
            .boxed()
        })
        .await;

        Ok(())
    }
    .boxed()
}
