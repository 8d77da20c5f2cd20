use std::sync::Arc;
use tokio::sync::watch;

/// Application state the poller reads instead of reaching for globals: the
/// open project and the route the user is currently on.
#[derive(Debug, Clone)]
pub struct AppContext {
    project_id: String,
    route: Arc<watch::Sender<String>>,
}

impl AppContext {
    pub fn new(project_id: impl Into<String>, route: impl Into<String>) -> Self {
        let (tx, _rx) = watch::channel(route.into());
        Self {
            project_id: project_id.into(),
            route: Arc::new(tx),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn current_route(&self) -> String {
        self.route.borrow().clone()
    }

    pub fn is_on(&self, page: &str) -> bool {
        *self.route.borrow() == page
    }

    pub fn navigate(&self, route: impl Into<String>) {
        let route = route.into();
        log::debug!("Navigating to {}", route);
        self.route.send_replace(route);
    }

    /// Receiver that wakes on every navigation after this call.
    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.route.subscribe()
    }
}
