// src/services/api_server.rs
//! HTTP API of the DID lifecycle engine.
//!
//! Thin axum layer over [`DidFactory`]; every route maps to one library
//! operation. Errors are rendered as `{"error": <kind>, "message": <text>}`
//! with a status code per error kind, plus `transactionHash` when a
//! transaction was submitted but not confirmed.
//!
//! # Routes
//! - `POST   /create-did`
//! - `GET    /resolve-did/:did`
//! - `GET    /did-exists/:did`
//! - `POST   /register-did`
//! - `GET    /dids/:did` (stored document, 404 when not registered)
//! - `PUT    /dids/:did` (update to the given document)
//! - `POST   /dids/:did/verification-methods`
//! - `DELETE /dids/:did/verification-methods/:fragment`
//! - `POST   /dids/:did/services`
//! - `DELETE /dids/:did/services/:fragment`
//! - `POST   /key-agreement-keys`

use crate::error::DidError;
use crate::models::did::{DIDDocument, Service, VerificationMethod};
use crate::models::identifier::DidMethod;
use crate::models::transaction::{
    CreatedDid, CreationRequest, RegistrationOutcome, TransactionResult,
};
use crate::services::factory::{CreateDidOptions, DidFactory};
use crate::wallet::key_agreement::KeyAgreementKey;
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use log::{error, info};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

/// Request payload of `POST /create-did`
#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct CreateDidRequest {
    address: String,
    #[serde(default)]
    method: Option<DidMethod>,
    #[serde(default)]
    on_chain: bool,
    #[serde(default)]
    signer: Option<String>,
    #[serde(default)]
    include_document: bool,
    #[serde(default)]
    key_agreement: bool,
}

/// Request payload of `POST /register-did`
#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RegisterDidRequest {
    #[serde(flatten)]
    request: CreationRequest,
    /// Defaults to the address being registered
    #[serde(default)]
    signer: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
struct AddVerificationMethodRequest {
    method: VerificationMethod,
    signer: String,
}

#[derive(Serialize, Deserialize, Debug)]
struct AddServiceRequest {
    service: Service,
    signer: String,
}

#[derive(Serialize, Deserialize, Debug)]
struct UpdateDocumentRequest {
    document: DIDDocument,
    signer: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct DidExistsResponse {
    did: String,
    exists: bool,
}

/// A [`DidError`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(DidError);

impl From<DidError> for ApiError {
    fn from(error: DidError) -> Self {
        ApiError(error)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            DidError::Validation(_) => StatusCode::BAD_REQUEST,
            DidError::DuplicateDid(_) => StatusCode::CONFLICT,
            DidError::InsufficientBalance { .. } => StatusCode::PAYMENT_REQUIRED,
            DidError::ConfirmationTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            DidError::Network { .. } => StatusCode::BAD_GATEWAY,
            DidError::Registration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("request failed: {}", self.0);
        }
        let mut body = json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        });
        if let Some(hash) = self.0.transaction_hash() {
            body["transactionHash"] = json!(hash);
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// HTTP front of a [`DidFactory`].
#[derive(Clone)]
pub struct ApiServer {
    factory: Arc<DidFactory>,
}

impl ApiServer {
    pub fn new(factory: Arc<DidFactory>) -> Self {
        ApiServer { factory }
    }

    /// Router with every route, sharing the factory as state.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/create-did", post(Self::create_did_handler))
            .route("/resolve-did/:did", get(Self::resolve_did_handler))
            .route("/did-exists/:did", get(Self::did_exists_handler))
            .route("/register-did", post(Self::register_did_handler))
            .route(
                "/dids/:did",
                get(Self::query_document_handler).put(Self::update_document_handler),
            )
            .route(
                "/dids/:did/verification-methods",
                post(Self::add_verification_method_handler),
            )
            .route(
                "/dids/:did/verification-methods/:fragment",
                delete(Self::remove_verification_method_handler),
            )
            .route("/dids/:did/services", post(Self::add_service_handler))
            .route(
                "/dids/:did/services/:fragment",
                delete(Self::remove_service_handler),
            )
            .route("/key-agreement-keys", post(Self::key_agreement_key_handler))
            .with_state(self.factory.clone())
    }

    /// Serves the API on `addr` until `shutdown` resolves, then lets
    /// in-flight requests finish.
    pub async fn run<F>(&self, addr: SocketAddr, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("API server listening on http://{}", listener.local_addr()?);
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("API server stopped");
        Ok(())
    }

    async fn create_did_handler(
        State(factory): State<Arc<DidFactory>>,
        Json(payload): Json<CreateDidRequest>,
    ) -> ApiResult<CreatedDid> {
        let options = CreateDidOptions {
            method: payload.method,
            adapter: None,
            on_chain: payload.on_chain,
            signer: payload.signer,
            include_document: payload.include_document,
            key_agreement: payload.key_agreement,
        };
        Ok(Json(factory.create_did(&payload.address, options).await?))
    }

    async fn resolve_did_handler(
        State(factory): State<Arc<DidFactory>>,
        Path(did): Path<String>,
    ) -> ApiResult<DIDDocument> {
        Ok(Json(factory.resolve_did(&did).await?))
    }

    async fn did_exists_handler(
        State(factory): State<Arc<DidFactory>>,
        Path(did): Path<String>,
    ) -> ApiResult<DidExistsResponse> {
        let exists = factory.check_did_exists(&did).await?;
        Ok(Json(DidExistsResponse { did, exists }))
    }

    async fn register_did_handler(
        State(factory): State<Arc<DidFactory>>,
        Json(payload): Json<RegisterDidRequest>,
    ) -> ApiResult<RegistrationOutcome> {
        let signer = payload
            .signer
            .unwrap_or_else(|| payload.request.address.clone());
        Ok(Json(
            factory
                .register_did_onchain(&payload.request, &signer)
                .await?,
        ))
    }

    async fn query_document_handler(
        State(factory): State<Arc<DidFactory>>,
        Path(did): Path<String>,
    ) -> Result<Response, ApiError> {
        Ok(match factory.query_did_document(&did).await? {
            Some(document) => Json(document).into_response(),
            None => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "not_found", "message": format!("{did} is not registered") })),
            )
                .into_response(),
        })
    }

    async fn update_document_handler(
        State(factory): State<Arc<DidFactory>>,
        Path(did): Path<String>,
        Json(payload): Json<UpdateDocumentRequest>,
    ) -> ApiResult<TransactionResult> {
        Ok(Json(
            factory
                .update_did_document(&did, &payload.document, &payload.signer)
                .await?,
        ))
    }

    async fn add_verification_method_handler(
        State(factory): State<Arc<DidFactory>>,
        Path(did): Path<String>,
        Json(payload): Json<AddVerificationMethodRequest>,
    ) -> ApiResult<TransactionResult> {
        Ok(Json(
            factory
                .add_verification_method(&did, payload.method, &payload.signer)
                .await?,
        ))
    }

    async fn remove_verification_method_handler(
        State(factory): State<Arc<DidFactory>>,
        Path((did, fragment)): Path<(String, String)>,
    ) -> ApiResult<TransactionResult> {
        Ok(Json(
            factory
                .remove_verification_method(&did, &format!("#{fragment}"))
                .await?,
        ))
    }

    async fn add_service_handler(
        State(factory): State<Arc<DidFactory>>,
        Path(did): Path<String>,
        Json(payload): Json<AddServiceRequest>,
    ) -> ApiResult<TransactionResult> {
        Ok(Json(
            factory
                .add_service(&did, payload.service, &payload.signer)
                .await?,
        ))
    }

    async fn remove_service_handler(
        State(factory): State<Arc<DidFactory>>,
        Path((did, fragment)): Path<(String, String)>,
    ) -> ApiResult<TransactionResult> {
        Ok(Json(
            factory
                .remove_service(&did, &format!("#{fragment}"))
                .await?,
        ))
    }

    async fn key_agreement_key_handler(
        State(factory): State<Arc<DidFactory>>,
    ) -> Json<KeyAgreementKey> {
        Json(factory.generate_key_agreement_key())
    }
}
