//! Image registry API routes.
//!
//! The v1 surface:
//!
//! - `GET /v1/images` — brief listings
//! - `GET /v1/images/detail` — detailed listings
//! - `POST /v1/images` — reserve a record (optionally with an external
//!   location or copy-from source)
//! - `GET /v1/images/:id` — record metadata
//! - `PUT /v1/images/:id` — metadata update
//! - `GET /v1/images/:id/file` — download content
//! - `PUT /v1/images/:id/file` — upload content
//! - `DELETE /v1/images/:id` — delete
//!
//! Responses never include the record's storage location.

use std::collections::HashMap;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::io::{ReaderStream, StreamReader};

use imagevault_common::{Error, ImageId};
use imagevault_db::{ImageRecord, ListQuery};

use crate::events::ImageEnvelope;
use crate::ingest::{Content, ReserveRequest, UpdateRequest};

use super::{principal_from_headers, ApiResult, AppContext};

/// Create image-related routes.
pub fn image_routes() -> Router<AppContext> {
    Router::new()
        .route("/images", get(list_images).post(create_image))
        .route("/images/detail", get(list_images_detail))
        .route(
            "/images/:image_id",
            get(get_image).put(update_image).delete(delete_image),
        )
        .route(
            "/images/:image_id/file",
            get(download_image).put(upload_image),
        )
}

// ============================================================================
// Request/response types
// ============================================================================

/// Build a [`ListQuery`] from raw query parameters. The pagination and
/// ordering keys are pulled out; everything else is treated as a filter.
fn build_query(mut params: HashMap<String, String>) -> Result<ListQuery, Error> {
    let mut query = ListQuery::default();
    if let Some(key) = params.remove("sort_key") {
        query.sort_key = key.parse()?;
    }
    if let Some(dir) = params.remove("sort_dir") {
        query.sort_dir = dir.parse()?;
    }
    if let Some(marker) = params.remove("marker") {
        query.marker = Some(parse_id(&marker)?);
    }
    if let Some(limit) = params.remove("limit") {
        query.limit = Some(
            limit
                .parse()
                .map_err(|_| Error::invalid(format!("invalid limit '{limit}'")))?,
        );
    }
    query.filters = params;
    Ok(query)
}

/// Brief image description returned by the index listing.
#[derive(Debug, Serialize)]
struct ImageSummary {
    id: ImageId,
    name: Option<String>,
    disk_format: Option<String>,
    container_format: Option<String>,
    checksum: Option<String>,
    size: Option<u64>,
    status: String,
}

impl From<&ImageRecord> for ImageSummary {
    fn from(record: &ImageRecord) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            disk_format: record.disk_format.map(|f| f.to_string()),
            container_format: record.container_format.map(|f| f.to_string()),
            checksum: record.checksum.clone(),
            size: record.size,
            status: record.status.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UpdateParams {
    /// Set to `false` to keep properties not named in the update.
    purge: Option<bool>,
}

fn parse_id(raw: &str) -> Result<ImageId, Error> {
    raw.parse()
        .map_err(|_| Error::invalid(format!("invalid image id '{raw}'")))
}

// ============================================================================
// Handlers
// ============================================================================

/// List brief metadata for visible images.
async fn list_images(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<impl IntoResponse> {
    let principal = principal_from_headers(&headers);
    let query = build_query(params)?;
    let records = ctx.service.list(&principal, &query)?;
    let images: Vec<ImageSummary> = records.iter().map(ImageSummary::from).collect();
    Ok(Json(serde_json::json!({ "images": images })))
}

/// List detailed metadata for visible images.
async fn list_images_detail(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<impl IntoResponse> {
    let principal = principal_from_headers(&headers);
    let query = build_query(params)?;
    let records = ctx.service.list(&principal, &query)?;
    let images: Vec<ImageEnvelope> = records.iter().map(ImageEnvelope::from).collect();
    Ok(Json(serde_json::json!({ "images": images })))
}

/// Reserve a new image record.
async fn create_image(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Json(req): Json<ReserveRequest>,
) -> ApiResult<impl IntoResponse> {
    let principal = principal_from_headers(&headers);
    let record = ctx.service.create(&principal, req, None).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "image": ImageEnvelope::from(&record) })),
    ))
}

/// Fetch a record's metadata.
async fn get_image(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Path(image_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let principal = principal_from_headers(&headers);
    let id = parse_id(&image_id)?;
    let record = ctx.service.metadata(&principal, id)?;
    Ok(Json(serde_json::json!({ "image": ImageEnvelope::from(&record) })))
}

/// Update a record's metadata.
async fn update_image(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Path(image_id): Path<String>,
    Query(params): Query<UpdateParams>,
    Json(req): Json<UpdateRequest>,
) -> ApiResult<impl IntoResponse> {
    let principal = principal_from_headers(&headers);
    let id = parse_id(&image_id)?;
    let record = ctx
        .service
        .update(&principal, id, req, None, params.purge)
        .await?;
    Ok(Json(serde_json::json!({ "image": ImageEnvelope::from(&record) })))
}

/// Upload content to a previously reserved record.
async fn upload_image(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Path(image_id): Path<String>,
    body: Body,
) -> ApiResult<impl IntoResponse> {
    let principal = principal_from_headers(&headers);
    let id = parse_id(&image_id)?;

    let declared_size = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let stream = Box::pin(body.into_data_stream().map_err(std::io::Error::other));
    let content = Content::new(Box::new(StreamReader::new(stream)), declared_size);

    let record = ctx
        .service
        .update(&principal, id, UpdateRequest::default(), Some(content), None)
        .await?;
    Ok(Json(serde_json::json!({ "image": ImageEnvelope::from(&record) })))
}

/// Download an active record's content.
async fn download_image(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Path(image_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let principal = principal_from_headers(&headers);
    let id = parse_id(&image_id)?;
    let (record, stream) = ctx.service.download(&principal, id).await?;

    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        header::CONTENT_TYPE,
        "application/octet-stream".parse().unwrap(),
    );
    if let Some(checksum) = &record.checksum {
        if let Ok(value) = checksum.parse() {
            response_headers.insert(header::ETAG, value);
        }
    }

    let body = match stream {
        Some((reader, size)) => {
            if let Ok(value) = size.to_string().parse() {
                response_headers.insert(header::CONTENT_LENGTH, value);
            }
            Body::from_stream(ReaderStream::new(reader))
        }
        None => Body::empty(),
    };

    Ok((response_headers, body))
}

/// Delete a record and schedule its bytes for removal.
async fn delete_image(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    Path(image_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let principal = principal_from_headers(&headers);
    let id = parse_id(&image_id)?;
    ctx.service.delete(&principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
