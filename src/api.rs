use std::sync::Arc;

use log::warn;
use serde::Deserialize;
use serde_json::json;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::auth;
use crate::store::{MessageStore, DEFAULT_PAGE_SIZE};

/// Handshake or request carried no acceptable credential.
#[derive(Debug)]
pub struct Unauthorized;
impl warp::reject::Reject for Unauthorized {}

#[derive(Debug)]
pub struct StoreFailure;
impl warp::reject::Reject for StoreFailure {}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    page: Option<u32>,
    limit: Option<u32>,
}

/// History and health endpoints. Pair with `handle_rejection` at the top of
/// the route tree.
pub fn routes(
    store: Arc<dyn MessageStore>,
    jwt_secret: String,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let with_store = warp::any().map(move || store.clone());
    let with_secret = warp::any().map(move || jwt_secret.clone());

    let messages = warp::path!("api" / "discussions" / String / "messages")
        .and(warp::get())
        .and(warp::query::<PageQuery>())
        .and(warp::header::optional::<String>("authorization"))
        .and(with_store)
        .and(with_secret)
        .and_then(list_messages);

    let health = warp::path!("health").and(warp::get()).map(|| {
        warp::reply::json(&json!({ "status": "ok", "message": "Server is healthy" }))
    });

    messages.or(health)
}

async fn list_messages(
    discussion_id: String,
    query: PageQuery,
    authorization: Option<String>,
    store: Arc<dyn MessageStore>,
    jwt_secret: String,
) -> Result<impl Reply, Rejection> {
    let token = authorization
        .as_deref()
        .and_then(|header| header.strip_prefix("Bearer "));
    auth::verify(&jwt_secret, token).map_err(|_| warp::reject::custom(Unauthorized))?;

    let page = query.page.filter(|p| *p >= 1).unwrap_or(1);
    let limit = query.limit.filter(|l| *l >= 1).unwrap_or(DEFAULT_PAGE_SIZE);

    let (messages, total) = store
        .list_page(&discussion_id, page, limit)
        .await
        .map_err(|e| {
            warn!("api: failed to load messages for {discussion_id}: {e}");
            warp::reject::custom(StoreFailure)
        })?;

    let pages = total.div_ceil(u64::from(limit));
    Ok(warp::reply::json(&json!({
        "success": true,
        "count": messages.len(),
        "total": total,
        "pagination": { "page": page, "limit": limit, "pages": pages },
        "data": messages,
    })))
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Rejection> {
    let (status, message) = if err.find::<Unauthorized>().is_some() {
        (
            StatusCode::UNAUTHORIZED,
            "Not authorized to access this resource",
        )
    } else if err.find::<StoreFailure>().is_some() {
        (StatusCode::INTERNAL_SERVER_ERROR, "Server error")
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Resource not found")
    } else {
        return Err(err);
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&json!({ "success": false, "error": message })),
        status,
    ))
}
