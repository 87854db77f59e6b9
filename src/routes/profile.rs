//! Profile settings: display name, theme, password change.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Extension, Json, Router};
use utoipa::OpenApi;

use crate::entities::UserStore;
use crate::error::ServerError;
use crate::middleware::auth::CurrentUser;
use crate::routes::auth::{hash_password, verify_password};
use crate::schemas::auth::{UpdateProfileRequest, UserResponse};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(update_profile),
    components(schemas(UpdateProfileRequest, UserResponse))
)]
pub struct ProfileApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/update_profile", post(update_profile))
}

#[utoipa::path(
    post,
    path = "/api/update_profile",
    tag = "profile",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = serde_json::Value),
        (status = 400, description = "Invalid update"),
        (status = 401, description = "No active session"),
    )
)]
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    if let Some(display_name) = req.display_name.as_deref().map(str::trim) {
        if !display_name.is_empty() {
            state.store.update_display_name(user.id, display_name).await?;
        }
    }

    if let Some(theme) = req.theme_preference.as_deref() {
        if theme == "light" || theme == "dark" {
            state.store.update_theme(user.id, theme).await?;
        }
    }

    if let Some(new_password) = req.new_password.as_deref().filter(|p| !p.is_empty()) {
        let current = req.current_password.as_deref().unwrap_or_default();
        if current.is_empty() {
            return Err(ServerError::Validation(
                "Current password required to change password".into(),
            ));
        }
        let current_ok = user
            .password_hash
            .as_deref()
            .is_some_and(|hash| verify_password(current, hash));
        if !current_ok {
            return Err(ServerError::Validation("Current password is incorrect".into()));
        }
        if new_password.len() < 6 {
            return Err(ServerError::Validation(
                "New password must be at least 6 characters long".into(),
            ));
        }
        state
            .store
            .update_password_hash(user.id, &hash_password(new_password)?)
            .await?;
    }

    let updated = state
        .store
        .get_user(user.id)
        .await?
        .ok_or_else(|| ServerError::Internal("current user vanished mid-request".into()))?;
    Ok(Json(serde_json::json!({
        "success": true,
        "user": updated.to_response(),
    })))
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing;
    use crate::testing::state as test_state;
    use axum::extract::State;

    async fn test_user(state: &AppState, password: Option<&str>) -> crate::entities::User {
        let hash = password.map(|p| hash_password(p).unwrap());
        testing::user(state, "ada", hash).await
    }

    fn empty_request() -> UpdateProfileRequest {
        UpdateProfileRequest {
            display_name: None,
            theme_preference: None,
            current_password: None,
            new_password: None,
        }
    }

    #[tokio::test]
    async fn theme_outside_the_whitelist_is_ignored() {
        let state = test_state().await;
        let user = test_user(&state, None).await;

        let req = UpdateProfileRequest {
            theme_preference: Some("purple".into()),
            ..empty_request()
        };
        update_profile(State(state.clone()), Extension(CurrentUser(user.clone())), Json(req))
            .await
            .unwrap();
        let reloaded = state.store.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(reloaded.theme_preference, "light");

        let req = UpdateProfileRequest {
            theme_preference: Some("dark".into()),
            ..empty_request()
        };
        update_profile(State(state.clone()), Extension(CurrentUser(user.clone())), Json(req))
            .await
            .unwrap();
        let reloaded = state.store.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(reloaded.theme_preference, "dark");
    }

    #[tokio::test]
    async fn password_change_requires_the_current_password() {
        let state = test_state().await;
        let user = test_user(&state, Some("old password")).await;

        let req = UpdateProfileRequest {
            current_password: Some("wrong".into()),
            new_password: Some("new password".into()),
            ..empty_request()
        };
        let err = update_profile(State(state.clone()), Extension(CurrentUser(user.clone())), Json(req))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));

        let req = UpdateProfileRequest {
            current_password: Some("old password".into()),
            new_password: Some("new password".into()),
            ..empty_request()
        };
        update_profile(State(state.clone()), Extension(CurrentUser(user.clone())), Json(req))
            .await
            .unwrap();
        let reloaded = state.store.get_user(user.id).await.unwrap().unwrap();
        assert!(verify_password("new password", reloaded.password_hash.as_deref().unwrap()));
    }

    #[tokio::test]
    async fn blank_display_name_is_not_applied() {
        let state = test_state().await;
        let user = test_user(&state, None).await;

        let req = UpdateProfileRequest {
            display_name: Some("   ".into()),
            ..empty_request()
        };
        update_profile(State(state.clone()), Extension(CurrentUser(user.clone())), Json(req))
            .await
            .unwrap();
        let reloaded = state.store.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(reloaded.display_name, None);
    }
}
