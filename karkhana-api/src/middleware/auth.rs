use axum::{extract::Request, http::HeaderMap, middleware::Next, response::Response};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

pub const USER_HEADER: &str = "x-workshop-user";
pub const ROLE_HEADER: &str = "x-workshop-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Manager,
    Dispatcher,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Manager => "MANAGER",
            Role::Dispatcher => "DISPATCHER",
            Role::Viewer => "VIEWER",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ADMIN" => Ok(Role::Admin),
            "MANAGER" => Ok(Role::Manager),
            "DISPATCHER" => Ok(Role::Dispatcher),
            "VIEWER" => Ok(Role::Viewer),
            other => Err(format!("unknown role {}", other)),
        }
    }
}

/// Who is calling, as asserted by the gateway in front of the service.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user: String,
    pub role: Role,
}

impl Actor {
    pub fn require(&self, allowed: &[Role]) -> Result<(), AppError> {
        if allowed.contains(&self.role) {
            Ok(())
        } else {
            Err(AppError::AuthorizationError(format!(
                "role {} may not perform this action",
                self.role
            )))
        }
    }
}

// ============================================================================
// Identity Middleware
// ============================================================================

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Read the asserted identity. Missing or unknown values are an authentication failure.
pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, AppError> {
    let user = header_value(headers, USER_HEADER)
        .ok_or_else(|| AppError::AuthenticationError(format!("missing {} header", USER_HEADER)))?;
    let role = header_value(headers, ROLE_HEADER)
        .ok_or_else(|| AppError::AuthenticationError(format!("missing {} header", ROLE_HEADER)))?
        .parse::<Role>()
        .map_err(AppError::AuthenticationError)?;
    Ok(Actor { user, role })
}

pub async fn identity_middleware(mut req: Request, next: Next) -> Result<Response, AppError> {
    let actor = actor_from_headers(req.headers())?;
    req.extensions_mut().insert(actor);

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("manager".parse::<Role>().unwrap(), Role::Manager);
        assert_eq!(" DISPATCHER ".parse::<Role>().unwrap(), Role::Dispatcher);
        assert!("OWNER".parse::<Role>().is_err());
    }

    #[test]
    fn test_actor_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, "ravi".parse().unwrap());
        assert!(matches!(actor_from_headers(&headers), Err(AppError::AuthenticationError(_))));

        headers.insert(ROLE_HEADER, " dispatcher ".parse().unwrap());
        let actor = actor_from_headers(&headers).unwrap();
        assert_eq!(actor.user, "ravi");
        assert_eq!(actor.role, Role::Dispatcher);
    }

    #[test]
    fn test_require() {
        let viewer = Actor { user: "asha".into(), role: Role::Viewer };
        assert!(viewer.require(&[Role::Admin, Role::Manager]).is_err());
        assert!(viewer.require(&[Role::Viewer]).is_ok());
    }
}
