//! Request and response bodies for the trading API, and the requests this scenario sends.

use gale_http_runner::prelude::*;
use serde::{Deserialize, Serialize};

/// Status reported for an item once a bid has bought it.
pub const ITEM_SOLD: &str = "SOLD";
/// Status reported for a bid once it has bought an item.
pub const BID_SUCCESSFUL: &str = "SUCCESSFUL";

/// Prices are whole currency units. The backend keys listings and bids on the price exactly as
/// sent, so they are serialised as integers.
#[derive(Debug, Clone, Serialize)]
pub struct ListItemRequest {
    pub item_type: String,
    pub seller_id: String,
    pub min_price: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListItemResponse {
    pub item_id: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitBidRequest {
    pub item_type: String,
    pub buyer_id: String,
    pub max_price: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitBidResponse {
    pub bid_id: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdatePriceRequest {
    pub new_price: u64,
}

/// Returned by both `GET /items/{id}/status` and `GET /bids/{id}/status`.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

pub async fn list_item(http: &VuHttpClient, request: &ListItemRequest) -> HttpResponse {
    http.post_json("/items", request, RequestParams::new()).await
}

pub async fn submit_bid(http: &VuHttpClient, request: &SubmitBidRequest) -> HttpResponse {
    http.post_json("/bids", request, RequestParams::new()).await
}

pub async fn item_status(http: &VuHttpClient, item_id: &str) -> HttpResponse {
    http.get(
        &format!("/items/{item_id}/status"),
        RequestParams::new().name("/items/{item_id}/status"),
    )
    .await
}

pub async fn bid_status(http: &VuHttpClient, bid_id: &str) -> HttpResponse {
    http.get(
        &format!("/bids/{bid_id}/status"),
        RequestParams::new().name("/bids/{bid_id}/status"),
    )
    .await
}

/// Change the price of a listed item. `params` lets callers expect a conflict for sold items.
pub async fn update_price(
    http: &VuHttpClient,
    item_id: &str,
    new_price: u64,
    params: RequestParams,
) -> HttpResponse {
    http.put_json(
        &format!("/items/{item_id}/price"),
        &UpdatePriceRequest { new_price },
        params.name("/items/{item_id}/price"),
    )
    .await
}

/// The `item_id` of a successful listing, or `None` if the body doesn't have one.
pub fn listed_item_id(response: &HttpResponse) -> Option<String> {
    match response.json::<ListItemResponse>() {
        Ok(listed) => Some(listed.item_id),
        Err(e) => {
            log::warn!("Listing response without an item id: {}", e);
            None
        }
    }
}

/// The `bid_id` of a successful bid, or `None` if the body doesn't have one.
pub fn submitted_bid_id(response: &HttpResponse) -> Option<String> {
    match response.json::<SubmitBidResponse>() {
        Ok(submitted) => Some(submitted.bid_id),
        Err(e) => {
            log::warn!("Bid response without a bid id: {}", e);
            None
        }
    }
}

/// True for a 200 response whose `status` field is `expected`.
pub fn has_status(response: &HttpResponse, expected: &str) -> bool {
    response.status == 200
        && response
            .json::<StatusResponse>()
            .is_ok_and(|s| s.status == expected)
}
