use axum::{
    extract::{FromRef, Query, State},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tracing::instrument;

use crate::{
    auth::{
        cookie,
        jwt::{AuthUser, JwtKeys},
    },
    state::AppState,
    users::{
        dto::{
            ConfirmParams, ForgotPasswordRequest, PublicUser, ResetParams,
            ResetPasswordRequest, SignInRequest, SignUpRequest, TokenFailure,
        },
        service::{UserError, UserService},
    },
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users/signin", post(sign_in))
        .route("/users/signup", post(sign_up))
        .route("/users/signout", post(sign_out))
        .route("/users/confirm", get(confirm_email))
        .route("/users/reset", get(reset_password).post(request_reset))
        .route("/users/me", get(me))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

#[instrument(skip(state, payload))]
pub async fn sign_in(
    State(state): State<AppState>,
    payload: Option<Json<SignInRequest>>,
) -> Result<Response, UserError> {
    let payload = payload.map(|Json(p)| p);
    let user_name = non_empty(payload.as_ref().and_then(|p| p.user_name.clone()));
    let password = non_empty(payload.and_then(|p| p.password));

    let (user_name, password) = match (user_name, password) {
        (Some(user_name), Some(password)) => (user_name, password),
        (None, None) => {
            return Err(UserError::Validation(
                "Username and password not provided".into(),
            ))
        }
        (None, Some(_)) => return Err(UserError::Validation("Username not provided".into())),
        (Some(_), None) => return Err(UserError::Validation("Password not provided".into())),
    };

    let service = UserService::from_ref(&state);
    let user = service.sign_in(&user_name, &password).await?;

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign_session(user.id, &user.user_name)?;
    let cookie = cookie::session_cookie(&token, keys.session_ttl, state.config.cookie_secure)
        .map_err(|e| UserError::Internal(e.into()))?;

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, cookie);
    Ok((StatusCode::OK, headers, Json(PublicUser::from(user))).into_response())
}

#[instrument(skip(state, payload))]
pub async fn sign_up(
    State(state): State<AppState>,
    payload: Option<Json<SignUpRequest>>,
) -> Result<impl IntoResponse, UserError> {
    let missing = || UserError::Validation("Missing values in request body".into());
    let Some(Json(payload)) = payload else {
        return Err(missing());
    };
    let (Some(email), Some(user_name), Some(password), Some(first_name), Some(last_name)) = (
        non_empty(payload.email),
        non_empty(payload.user_name),
        non_empty(payload.password),
        non_empty(payload.first_name),
        non_empty(payload.last_name),
    ) else {
        return Err(missing());
    };

    let service = UserService::from_ref(&state);
    let user = service
        .create_user(&email, &user_name, &password, &first_name, &last_name)
        .await?;

    Ok((StatusCode::CREATED, Json(PublicUser::from(user))))
}

#[instrument(skip(state))]
pub async fn sign_out(State(state): State<AppState>) -> Result<impl IntoResponse, UserError> {
    let cookie = cookie::clear_session_cookie(state.config.cookie_secure)
        .map_err(|e| UserError::Internal(e.into()))?;
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, cookie);
    Ok((StatusCode::NO_CONTENT, headers))
}

#[instrument(skip(state, params))]
pub async fn confirm_email(
    State(state): State<AppState>,
    Query(params): Query<ConfirmParams>,
) -> Response {
    let Some(token) = non_empty(params.c) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(TokenFailure {
                code: 400,
                message: "Missing token.",
            }),
        )
            .into_response();
    };

    if UserService::from_ref(&state).confirm_email(&token).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(TokenFailure {
                code: 400,
                message: "Token is invalid or expired.",
            }),
        )
            .into_response()
    }
}

#[instrument(skip(state, params, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Query(params): Query<ResetParams>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> Response {
    let token = non_empty(params.r);
    let (password, confirmation) = match payload {
        Some(Json(p)) => (non_empty(p.password), non_empty(p.password_confirmation)),
        None => (None, None),
    };

    let (Some(token), Some(password), Some(confirmation)) = (token, password, confirmation)
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(TokenFailure {
                code: 400,
                message: "Missing token or password.",
            }),
        )
            .into_response();
    };

    if UserService::from_ref(&state)
        .reset_password(&token, &password, &confirmation)
        .await
    {
        StatusCode::NO_CONTENT.into_response()
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(TokenFailure {
                code: 400,
                message: "Token is invalid or expired.",
            }),
        )
            .into_response()
    }
}

#[instrument(skip(state, payload))]
pub async fn request_reset(
    State(state): State<AppState>,
    payload: Option<Json<ForgotPasswordRequest>>,
) -> Result<StatusCode, UserError> {
    let Some(email) = non_empty(payload.and_then(|Json(p)| p.email)) else {
        return Err(UserError::Validation("Missing values in request body".into()));
    };

    UserService::from_ref(&state)
        .request_password_reset(&email)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn me(State(state): State<AppState>, AuthUser(user_id): AuthUser) -> Response {
    match UserService::from_ref(&state).get(user_id).await {
        Ok(Some(user)) => Json(PublicUser::from(user)).into_response(),
        Ok(None) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "User not found" })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http::{header::CONTENT_TYPE, Method, Request};
    use tower::ServiceExt;

    fn test_app() -> Router {
        user_routes().with_state(AppState::fake())
    }

    async fn send(
        app: Router,
        method: Method,
        uri: &str,
        body: Option<&str>,
    ) -> (StatusCode, HeaderMap, String) {
        let mut builder = Request::builder().method(method).uri(uri);
        if body.is_some() {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        let request = builder
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, String::from_utf8_lossy(&bytes).into_owned())
    }

    #[tokio::test]
    async fn signout_clears_cookie() {
        let (status, headers, _) =
            send(test_app(), Method::POST, "/users/signout", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let cookie = headers.get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with("token=;"));
        assert!(cookie.contains("Max-Age=0"));
        assert!(cookie.contains("HttpOnly"));
    }

    #[tokio::test]
    async fn signin_reports_missing_fields() {
        let (status, _, body) =
            send(test_app(), Method::POST, "/users/signin", Some("{}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("Username and password not provided"));

        let (status, _, body) = send(
            test_app(),
            Method::POST,
            "/users/signin",
            Some(r#"{"userName":"abc123"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("Password not provided"));

        let (status, _, body) = send(
            test_app(),
            Method::POST,
            "/users/signin",
            Some(r#"{"password":"longenough"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("Username not provided"));
    }

    #[tokio::test]
    async fn signup_rejects_missing_values() {
        let (status, _, body) = send(
            test_app(),
            Method::POST,
            "/users/signup",
            Some(r#"{"userName":"abc123","password":"longenough"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("Missing values in request body"));
    }

    #[tokio::test]
    async fn signup_rejects_foreign_email() {
        let (status, _, body) = send(
            test_app(),
            Method::POST,
            "/users/signup",
            Some(
                r#"{"email":"a@gmail.com","userName":"abc123","password":"longenough",
                    "firstName":"A","lastName":"B"}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("Invalid email"));
    }

    #[tokio::test]
    async fn confirm_without_token_is_bad_request() {
        let (status, _, body) =
            send(test_app(), Method::GET, "/users/confirm", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains(r#""code":400"#));
        assert!(body.contains("Missing token."));
    }

    #[tokio::test]
    async fn confirm_with_garbage_token_is_bad_request() {
        let (status, _, body) = send(
            test_app(),
            Method::GET,
            "/users/confirm?c=not-a-token",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("Token is invalid or expired."));
    }

    #[tokio::test]
    async fn reset_without_params_is_bad_request() {
        let (status, _, body) = send(test_app(), Method::GET, "/users/reset", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("Missing token or password."));

        let (status, _, body) = send(
            test_app(),
            Method::GET,
            "/users/reset?r=sometoken",
            Some(r#"{"password":"longenough"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("Missing token or password."));
    }

    #[tokio::test]
    async fn reset_with_mismatched_passwords_is_bad_request() {
        let (status, _, body) = send(
            test_app(),
            Method::GET,
            "/users/reset?r=sometoken",
            Some(r#"{"password":"longenough","password_confirmation":"different"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("Token is invalid or expired."));
    }

    #[tokio::test]
    async fn forgot_rejects_missing_email() {
        let (status, _, body) =
            send(test_app(), Method::POST, "/users/reset", Some("{}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("Missing values in request body"));
    }

    #[tokio::test]
    async fn me_requires_session_cookie() {
        let (status, _, _) = send(test_app(), Method::GET, "/users/me", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn me_rejects_garbage_cookie() {
        let request = Request::builder()
            .method(Method::GET)
            .uri("/users/me")
            .header(http::header::COOKIE, "token=not-a-jwt")
            .body(Body::empty())
            .unwrap();
        let response = test_app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
