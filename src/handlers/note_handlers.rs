//! HTTP handlers for note CRUD and search. All work is delegated to the
//! coordinator and search engine held in `AppState`.

use crate::{
    errors::AppError,
    models::{
        note::{Note, NoteDraft},
        page::Page,
    },
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

/// Query params accepted by `GET /notes/search`.
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: Option<String>,
    pub skip: Option<usize>,
    #[serde(alias = "batchSize")]
    pub limit: Option<usize>,
}

/// `GET /notes` — list notes, supports ?skip=&limit=
pub async fn list_notes(
    State(state): State<AppState>,
    Query(page): Query<Page>,
) -> Result<Json<Vec<Note>>, AppError> {
    Ok(Json(state.coordinator.list_notes(page).await?))
}

/// `POST /notes` — create a note.
pub async fn create_note(
    State(state): State<AppState>,
    Json(draft): Json<NoteDraft>,
) -> Result<Response, AppError> {
    let note = state.coordinator.create_note(draft).await?;

    let mut response = (StatusCode::CREATED, Json(&note)).into_response();
    if let Ok(location) = HeaderValue::from_str(&format!("/notes/{}", note.id())) {
        response.headers_mut().insert(header::LOCATION, location);
    }
    Ok(response)
}

/// `GET /notes/{id}`
pub async fn get_note(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Note>, AppError> {
    Ok(Json(state.coordinator.get_note(&id).await?))
}

/// `PUT /notes/{id}` — replace title, content and tags.
pub async fn update_note(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(draft): Json<NoteDraft>,
) -> Result<Json<Note>, AppError> {
    Ok(Json(state.coordinator.update_note(&id, draft).await?))
}

/// `DELETE /notes/{id}` — delete the note and all of its attachments.
pub async fn delete_note(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.coordinator.delete_note(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /notes/search?query=` — substring search over title and content.
pub async fn search_notes(
    State(state): State<AppState>,
    Query(q): Query<SearchQuery>,
) -> Result<Json<Vec<Note>>, AppError> {
    let query = q.query.unwrap_or_default();
    let page = Page::new(q.skip, q.limit);
    Ok(Json(state.search.search(&query, page).await?))
}
