//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. Harvest responses are
//! relayed from the store as byte streams, so the shared body type boxes
//! without a Sync bound.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::auth::JwtValidator;
use crate::authz::OwnershipAuthorizer;
use crate::config::Args;
use crate::harvest::HarvestConfig;
use crate::keyring::KeyRegistry;
use crate::lifecycle::LifecycleManager;
use crate::routes;
use crate::signer::SignerRegistry;
use crate::signing::SignatureService;
use crate::store::EnvelopeStore;
use crate::types::{ArchwayError, Result};
use crate::validate::{EnvelopeValidator, RequiredFieldsValidator};

pub type ArchBody = http_body_util::combinators::UnsyncBoxBody<Bytes, std::io::Error>;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub jwt: JwtValidator,
    /// Registered user keys, also served at /keys/{username}
    pub keys: Arc<dyn KeyRegistry>,
    pub store: Arc<dyn EnvelopeStore>,
    pub lifecycle: LifecycleManager,
    pub harvest: HarvestConfig,
}

impl AppState {
    /// Assemble the full pipeline over the given store and keyring.
    pub fn new(
        args: Args,
        store: Arc<dyn EnvelopeStore>,
        keys: Arc<dyn KeyRegistry>,
    ) -> Result<Self> {
        let jwt = if args.dev_mode {
            JwtValidator::new_dev()
        } else {
            let secret = args.jwt_secret().ok_or_else(|| {
                ArchwayError::Config("JWT_SECRET is required in production mode".into())
            })?;
            JwtValidator::new(secret, args.jwt_expiry_seconds)?
        };

        let signatures = Arc::new(SignatureService::new(
            Arc::new(SignerRegistry::with_default_schemes()),
            Arc::clone(&keys),
        ));
        let validator = Arc::new(EnvelopeValidator::new(
            Arc::new(RequiredFieldsValidator::default()),
            signatures,
            Arc::clone(&keys),
        ));
        let authz = Arc::new(OwnershipAuthorizer::new(Arc::clone(&keys)));
        let lifecycle = LifecycleManager::new(Arc::clone(&store), validator, authz);

        let harvest = HarvestConfig {
            page_size: args.page_size,
        };

        Ok(Self {
            args,
            jwt,
            keys,
            store,
            lifecycle,
            harvest,
        })
    }
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Archway listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - X-Remote-User header trusted as identity");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .preserve_header_case(true)
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<ArchBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    info!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        // Liveness probe - returns 200 if the gateway is running
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            to_boxed(routes::health_check(Arc::clone(&state)))
        }

        // Version info for deployment verification
        (Method::GET, "/version") => to_boxed(routes::version_info()),

        // CORS preflight
        (Method::OPTIONS, _) => to_boxed(preflight_response()),

        // Harvest listing over the whole collection
        (Method::GET, "/envelopes") | (Method::GET, "/envelopes/") => {
            let query = req.uri().query();
            routes::handle_harvest(Arc::clone(&state), query).await
        }

        // Create a new envelope
        (Method::PUT, "/envelopes") | (Method::PUT, "/envelopes/") => {
            to_boxed(routes::handle_create(Arc::clone(&state), req).await)
        }

        // Direct read of a single envelope
        (Method::GET, p) if p.starts_with("/envelopes/") => {
            let doc_id = p.strip_prefix("/envelopes/").unwrap_or("");
            to_boxed(routes::handle_read(Arc::clone(&state), doc_id).await)
        }

        // Update (retire-and-replace) an existing envelope
        (Method::POST, p) if p.starts_with("/envelopes/") => {
            let doc_id = p.strip_prefix("/envelopes/").unwrap_or("").to_string();
            to_boxed(routes::handle_update(Arc::clone(&state), &doc_id, req).await)
        }

        // Retire an envelope
        (Method::DELETE, p) if p.starts_with("/envelopes/") => {
            let doc_id = p.strip_prefix("/envelopes/").unwrap_or("").to_string();
            to_boxed(routes::handle_delete(Arc::clone(&state), &doc_id, req).await)
        }

        // Public key resource, dereference target of key_location URLs
        (Method::GET, p) if p.starts_with("/keys/") => {
            let username = p.strip_prefix("/keys/").unwrap_or("");
            to_boxed(routes::handle_user_keys(Arc::clone(&state), username).await)
        }

        // Not found
        _ => to_boxed(not_found_response(&path)),
    };

    Ok(response)
}

/// Convert a Full<Bytes> body to the shared boxed body type
pub(crate) fn to_boxed(response: Response<Full<Bytes>>) -> Response<ArchBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed_unsync())
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, PUT, POST, DELETE, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
    });

    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}
