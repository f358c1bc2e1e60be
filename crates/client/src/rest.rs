//! REST client.
//!
//! Attaches the session's bearer token to every request. The first 401 of
//! a logical request triggers one token refresh and one retry; concurrent
//! 401s share a single refresh through the session's refresh gate.

use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::session::SessionContext;
use crate::telemetry;
use crate::transport::{ApiRequest, ApiResponse, Method, Transport};

pub const TOKEN_PATH: &str = "/token/";
pub const TOKEN_REFRESH_PATH: &str = "/token/refresh/";

/// Response of `POST /token/` and `POST /token/refresh/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

#[derive(Clone)]
pub struct RestClient {
    transport: Arc<dyn Transport>,
    session: Arc<SessionContext>,
}

impl RestClient {
    pub fn new(transport: Arc<dyn Transport>, session: Arc<SessionContext>) -> Self {
        Self { transport, session }
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    /// Sends an authenticated request and decodes the JSON response.
    ///
    /// An empty body decodes as JSON `null`, so `()` and `Value` work for
    /// endpoints that answer 204.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, ClientError> {
        let mut request = ApiRequest::new(method, path);
        request.body = body;
        let response = self.send(request).await?;
        decode(&response)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.request(Method::Get, path, None).await
    }

    pub async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T, ClientError> {
        self.request(Method::Post, path, Some(body)).await
    }

    pub async fn put<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T, ClientError> {
        self.request(Method::Put, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ClientError> {
        self.send(ApiRequest::new(Method::Delete, path)).await?;
        Ok(())
    }

    /// Sends an authenticated request, refreshing the token and retrying
    /// once on 401. Non-2xx responses become `ClientError::Api`.
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let snapshot = self.session.snapshot().await;
        request.bearer = snapshot.access;

        let response = self.dispatch(&request).await?;
        if response.status != 401 {
            return check(response);
        }

        debug!(
            method = %request.method,
            path = %request.path,
            "Unauthorized, refreshing token"
        );
        self.refresh_after_unauthorized(snapshot.epoch).await?;

        request.bearer = self.session.get_token().await;
        let retried = self.dispatch(&request).await?;
        check(retried)
    }

    /// Sends a request without a bearer token and without refresh handling.
    pub async fn send_unauthenticated(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let response = self.dispatch(&request).await?;
        check(response)
    }

    /// Exchanges credentials for a token pair and stores it in the session.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), ClientError> {
        let request = ApiRequest::new(Method::Post, TOKEN_PATH)
            .with_body(json!({ "username": username, "password": password }));
        let response = self.send_unauthenticated(request).await?;
        let tokens: TokenPair = decode(&response)?;
        self.session.set_tokens(tokens.access, tokens.refresh).await?;
        info!(username = %username, "Logged in");
        Ok(())
    }

    /// Refreshes the access token unless another request already did so
    /// after `seen_epoch`.
    async fn refresh_after_unauthorized(&self, seen_epoch: u64) -> Result<(), ClientError> {
        let _guard = self.session.refresh_guard().await;

        if self.session.is_expired() {
            return Err(ClientError::SessionExpired);
        }
        if self.session.epoch().await != seen_epoch {
            debug!("Token already refreshed by a concurrent request");
            return Ok(());
        }

        let Some(refresh) = self.session.refresh_token().await else {
            warn!("No refresh token available");
            telemetry::record_token_refresh(false);
            self.session.expire().await;
            return Err(ClientError::SessionExpired);
        };

        let request =
            ApiRequest::new(Method::Post, TOKEN_REFRESH_PATH).with_body(json!({ "refresh": refresh }));
        let tokens = match self.dispatch(&request).await.and_then(check) {
            Ok(response) => decode::<TokenPair>(&response),
            Err(e) => Err(e),
        };

        match tokens {
            Ok(tokens) => {
                telemetry::record_token_refresh(true);
                if let Err(e) = self.session.set_tokens(tokens.access, tokens.refresh).await {
                    warn!(error = %e, "Refreshed token not persisted");
                }
                info!("Access token refreshed");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                telemetry::record_token_refresh(false);
                self.session.expire().await;
                Err(ClientError::SessionExpired)
            }
        }
    }

    async fn dispatch(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError> {
        let start = Instant::now();
        let result = self.transport.send(request).await;
        let elapsed = start.elapsed().as_secs_f64();

        match &result {
            Ok(response) => telemetry::record_api_request(request.method, Some(response.status), elapsed),
            Err(e) => {
                telemetry::record_api_request(request.method, None, elapsed);
                debug!(
                    method = %request.method,
                    path = %request.path,
                    error = %e,
                    "Request failed without response"
                );
            }
        }
        result
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

fn check(response: ApiResponse) -> Result<ApiResponse, ClientError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(ClientError::from_response(response.status, &response.body))
    }
}

fn decode<T: DeserializeOwned>(response: &ApiResponse) -> Result<T, ClientError> {
    let body = if response.body.trim().is_empty() {
        "null"
    } else {
        response.body.as_str()
    };
    serde_json::from_str(body).map_err(|e| ClientError::InvalidResponse(e.to_string()))
}
