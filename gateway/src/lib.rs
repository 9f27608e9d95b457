//! HTTP realization of a synthesized stack.
//!
//! Every declared method becomes an axum route wrapped in its authorizer.
//! Calls that pass the authorizer invoke the bound compute unit, which
//! reaches its tables only through its execution role.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, on, MethodFilter, MethodRouter},
    Router,
};
use identity::{TokenClaims, UserDirectory};
use stack::resources::{Authorizer, HttpMethod};
use stack::StackGraph;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod outcome;
pub mod runtime;
pub mod server;
pub mod store;

pub use error::{GatewayError, GatewayResult};
pub use outcome::{CallOutcome, CallState};
pub use runtime::{FunctionRuntime, Handler, InvocationContext, ScanHandler};
pub use server::{spawn_server, start_server, GatewayConfig};
pub use store::{Item, ItemKey, MemoryTableStore, TableStore};

/// Path of the unauthenticated health route
pub const HEALTH_PATH: &str = "/health";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub graph: Arc<StackGraph>,
    /// Directories whose tokens the gateway can resolve
    pub directories: Arc<Vec<Arc<UserDirectory>>>,
    pub runtime: Arc<FunctionRuntime>,
}

impl AppState {
    pub fn new(
        graph: StackGraph,
        directories: Vec<Arc<UserDirectory>>,
        runtime: FunctionRuntime,
    ) -> Self {
        Self {
            graph: Arc::new(graph),
            directories: Arc::new(directories),
            runtime: Arc::new(runtime),
        }
    }

    /// State backed by the graph's own user directory and an empty
    /// in-memory table store.
    pub fn in_memory(graph: StackGraph) -> GatewayResult<Self> {
        let directory = UserDirectory::from_graph(&graph)
            .map_err(|e| GatewayError::Configuration(e.to_string()))?;
        let store = Arc::new(MemoryTableStore::from_graph(&graph));
        let runtime = FunctionRuntime::from_graph(&graph, store)?;
        Ok(Self::new(graph, vec![Arc::new(directory)], runtime))
    }

    /// Resolve tokens from another directory as well
    pub fn with_directory(mut self, directory: Arc<UserDirectory>) -> Self {
        Arc::make_mut(&mut self.directories).push(directory);
        self
    }

    /// The stack's own directory
    pub fn directory(&self) -> Option<&Arc<UserDirectory>> {
        self.directories.first()
    }

    /// Claims of a live token from any known directory
    pub async fn resolve_token(&self, token: &str) -> Option<TokenClaims> {
        for directory in self.directories.iter() {
            if let Ok(claims) = directory.validate(token).await {
                return Some(claims);
            }
        }
        None
    }
}

/// A declared method as the router sees it
#[derive(Debug, Clone)]
pub struct RouteBinding {
    pub method: String,
    pub http_method: HttpMethod,
    pub path: String,
    /// Logical id of the compute unit
    pub function: String,
    pub authorizer: Authorizer,
    pub scopes: Vec<String>,
}

impl RouteBinding {
    pub fn label(&self) -> String {
        format!("{} {}", self.http_method, self.path)
    }
}

/// State of one route's authorizer
#[derive(Clone)]
pub struct RouteState {
    pub app: AppState,
    pub binding: Arc<RouteBinding>,
}

/// Methods of the graph joined with their authorizers
pub fn route_bindings(graph: &StackGraph) -> GatewayResult<Vec<RouteBinding>> {
    graph
        .methods()
        .map(|(resource, method)| {
            let (_, authorizer) = graph
                .authorizers()
                .find(|(r, _)| r.logical_id == method.authorizer)
                .ok_or_else(|| {
                    GatewayError::Configuration(format!(
                        "Method {} references missing authorizer {}",
                        resource.logical_id, method.authorizer
                    ))
                })?;
            Ok(RouteBinding {
                method: resource.logical_id.clone(),
                http_method: method.http_method,
                path: method.path.clone(),
                function: method.function.clone(),
                authorizer: authorizer.clone(),
                scopes: method.authorization_scopes.clone(),
            })
        })
        .collect()
}

fn method_filter(method: HttpMethod) -> MethodFilter {
    match method {
        HttpMethod::Get => MethodFilter::GET,
        HttpMethod::Post => MethodFilter::POST,
        HttpMethod::Put => MethodFilter::PUT,
        HttpMethod::Patch => MethodFilter::PATCH,
        HttpMethod::Delete => MethodFilter::DELETE,
        HttpMethod::Head => MethodFilter::HEAD,
        HttpMethod::Options => MethodFilter::OPTIONS,
    }
}

/// `/items/{id}` in axum's `/items/:id` syntax
fn axum_path(path: &str) -> String {
    path.split('/')
        .map(|segment| match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(param) => format!(":{}", param),
            None => segment.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn method_router(state: &AppState, binding: RouteBinding) -> MethodRouter<AppState> {
    let binding = Arc::new(binding);
    let route_state = RouteState {
        app: state.clone(),
        binding: binding.clone(),
    };
    on(
        method_filter(binding.http_method),
        move |State(app): State<AppState>, request: Request<Body>| {
            handlers::invoke::invoke_route(app, binding.clone(), request)
        },
    )
    .route_layer(from_fn_with_state(
        route_state,
        middleware::authorizer_middleware,
    ))
}

/// Create the router with one route per declared method
pub fn create_router(state: AppState) -> GatewayResult<Router> {
    let mut seen = BTreeSet::from([(HEALTH_PATH.to_string(), HttpMethod::Get)]);
    let mut routes: BTreeMap<String, MethodRouter<AppState>> = BTreeMap::new();

    for binding in route_bindings(&state.graph)? {
        if !seen.insert((binding.path.clone(), binding.http_method)) {
            return Err(GatewayError::Configuration(format!(
                "Route {} is declared more than once",
                binding.label()
            )));
        }
        info!(
            "Routing {} to {} through {}",
            binding.label(),
            binding.function,
            binding.authorizer.authorizer_id
        );
        let path = axum_path(&binding.path);
        let router = method_router(&state, binding);
        let merged = match routes.remove(&path) {
            Some(existing) => existing.merge(router),
            None => router,
        };
        routes.insert(path, merged);
    }

    let mut api = Router::new().route(HEALTH_PATH, get(handlers::health::health_check));
    for (path, router) in routes {
        api = api.route(&path, router);
    }

    Ok(api
        .fallback(handlers::not_found)
        .layer(from_fn(middleware::response_middleware))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state))
}
