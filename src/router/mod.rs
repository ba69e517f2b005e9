//! # Sistema de Routing
//! src/router/mod.rs
//!
//! Mapea método + path a handlers.
//!
//! ## Arquitectura
//!
//! ```text
//! Request → Router → Handler → Response
//! ```
//!
//! Cada ruta es un método y un patrón (path exacto o prefijo). Con prefijo,
//! el resto del path se pasa al handler como parámetro. El query string se
//! ignora al rutear.
//!
//! - Path conocido con otro método → 405 con header `Allow`
//! - Path desconocido → 404
//!
//! Las rutas que mueven archivos indican además el tipo de tarea con el que
//! el servidor las ejecuta.

pub mod filename;
pub mod handlers;

pub use filename::{validate_filename, FilenameError};
pub use handlers::AppState;

use crate::http::{Request, Response, StatusCode};
use crate::tasks::TaskKind;

/// Tipo de función handler
///
/// Recibe el estado, el request y el parámetro de path (vacío si la ruta
/// es exacta).
pub type Handler = fn(&AppState, &Request, &str) -> Response;

/// Patrón de path de una ruta
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathPattern {
    Exact(&'static str),
    Prefix(&'static str),
}

impl PathPattern {
    /// Retorna el parámetro si el path coincide
    fn matches<'p>(&self, path: &'p str) -> Option<&'p str> {
        match self {
            PathPattern::Exact(expected) => (path == *expected).then_some(""),
            PathPattern::Prefix(prefix) => path.strip_prefix(prefix),
        }
    }
}

/// Una ruta registrada
#[derive(Clone)]
pub struct Route {
    method: &'static str,
    pattern: PathPattern,
    handler: Handler,
    task: Option<TaskKind>,
}

impl Route {
    pub fn method(&self) -> &'static str {
        self.method
    }

    pub fn handler(&self) -> Handler {
        self.handler
    }

    /// Tipo de tarea con la que se ejecuta, si no corre en línea
    pub fn task_kind(&self) -> Option<TaskKind> {
        self.task
    }
}

/// Resultado de buscar una ruta
pub enum Resolution<'r, 'p> {
    Matched { route: &'r Route, param: &'p str },
    MethodNotAllowed { allow: String },
    NotFound { path: &'p str },
}

impl Resolution<'_, '_> {
    /// Respuesta para los casos sin handler
    pub fn unmatched_response(&self) -> Option<Response> {
        match self {
            Resolution::Matched { .. } => None,
            Resolution::MethodNotAllowed { allow } => Some(
                Response::error(StatusCode::MethodNotAllowed, "Method Not Allowed")
                    .with_header("Allow", allow),
            ),
            Resolution::NotFound { path } => Some(Response::error(
                StatusCode::NotFound,
                &format!("Route not found: {}", path),
            )),
        }
    }
}

/// Router que mapea rutas a handlers
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Crea un nuevo router vacío
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Router con los endpoints del servidor de archivos
    pub fn file_server() -> Self {
        let mut router = Self::new();
        router.register("GET", PathPattern::Exact("/files"), handlers::list_files, None);
        router.register(
            "GET",
            PathPattern::Prefix("/download/"),
            handlers::download_file,
            Some(TaskKind::DownloadFile),
        );
        router.register(
            "DELETE",
            PathPattern::Prefix("/delete/"),
            handlers::delete_file,
            Some(TaskKind::DeleteFile),
        );
        router.register(
            "POST",
            PathPattern::Exact("/upload"),
            handlers::upload_files,
            Some(TaskKind::UploadFile),
        );
        router.register("GET", PathPattern::Exact("/stats"), handlers::stats, None);
        router
    }

    /// Registra una ruta con su handler
    pub fn register(
        &mut self,
        method: &'static str,
        pattern: PathPattern,
        handler: Handler,
        task: Option<TaskKind>,
    ) {
        self.routes.push(Route {
            method,
            pattern,
            handler,
            task,
        });
    }

    /// Busca la ruta para `method` + `path` (path sin query string)
    pub fn resolve<'r, 'p>(&'r self, method: &str, path: &'p str) -> Resolution<'r, 'p> {
        let mut allowed: Vec<&'static str> = Vec::new();

        for route in &self.routes {
            if let Some(param) = route.pattern.matches(path) {
                if route.method == method {
                    return Resolution::Matched { route, param };
                }
                if !allowed.contains(&route.method) {
                    allowed.push(route.method);
                }
            }
        }

        if allowed.is_empty() {
            Resolution::NotFound { path }
        } else {
            Resolution::MethodNotAllowed {
                allow: allowed.join(", "),
            }
        }
    }

    /// Encuentra y ejecuta el handler apropiado para un request
    ///
    /// # Ejemplo
    /// ```
    /// use file_server::config::Config;
    /// use file_server::http::{Request, StatusCode};
    /// use file_server::router::{AppState, Router};
    /// use file_server::storage::MemoryStorage;
    /// use std::sync::Arc;
    ///
    /// let state = AppState::new(Arc::new(MemoryStorage::new()), &Config::default());
    /// let router = Router::file_server();
    ///
    /// let request = Request::parse(b"GET /files HTTP/1.1\r\n\r\n");
    /// assert_eq!(router.route(&state, &request).status(), StatusCode::Ok);
    /// ```
    pub fn route(&self, state: &AppState, request: &Request) -> Response {
        let resolution = self.resolve(request.method(), request.route_path());

        match resolution {
            Resolution::Matched { route, param } => (route.handler)(state, request, param),
            other => other
                .unmatched_response()
                .unwrap_or_else(|| Response::error(StatusCode::NotFound, "Not Found")),
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::file_server()
    }
}
