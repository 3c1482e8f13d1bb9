use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use shared_config::AppConfig;
use shared_models::auth::{Role, User};
use shared_models::error::AppError;

use crate::jwt::validate_token;

fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| AppError::Auth("Missing authorization header".to_string()))?
        .to_str()
        .map_err(|_| AppError::Auth("Invalid authorization header format".to_string()))?;

    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::Auth("Invalid authorization header format".to_string()))
}

// Bearer token -> User in request extensions
pub async fn auth_middleware(
    State(config): State<Arc<AppConfig>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let user = {
        let token = bearer_token(request.headers())?;
        validate_token(token, &config.supabase_jwt_secret).map_err(|e| {
            debug!("Rejected token: {}", e);
            AppError::Auth(e.to_string())
        })?
    };

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Route-level role gate.
pub fn ensure_role(user: &User, allowed: &[Role]) -> Result<(), AppError> {
    if user.has_any_role(allowed) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "Role '{}' is not permitted to access this resource",
            user.role()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestUser;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_prefix_is_required() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_err());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(bearer_token(&headers).is_err());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn role_gate() {
        let desk = TestUser::receptionist("desk@clinic.test").to_user();
        assert!(ensure_role(&desk, &[Role::Centeradmin, Role::Receptionist]).is_ok());
        assert!(matches!(
            ensure_role(&desk, &[Role::Centeradmin]),
            Err(AppError::Forbidden(_))
        ));
    }
}
