//! Resolving the current application from anywhere inside it.
//!
//! On the server many requests run concurrently in one process, so the
//! current app is carried by a tokio task-local: it is scoped to the future
//! passed to [`run_with_context`] and invisible to every other request.
//!
//! The client has one app per page. Each client app registers itself under
//! its id without keeping itself alive: the registry holds weak handles, so
//! an app is gone from it once its last [`App`] is dropped. An "active" slot names the app whose code is currently
//! running. [`run_with_context`] installs the app in that slot every time the
//! wrapped future is polled and puts the previous occupant back afterwards,
//! so nested calls compose and the right app is visible after every await.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};

use lazy_static::lazy_static;

use crate::app::{App, Platform, WeakApp};
use crate::error::{AppError, Result};

tokio::task_local! {
    static SERVER_APP: App;
}

thread_local! {
    static CLIENT_ACTIVE: RefCell<Option<App>> = const { RefCell::new(None) };
}

lazy_static! {
    static ref CLIENT_APPS: Mutex<HashMap<String, WeakApp>> = Mutex::new(HashMap::new());
}

/// Run `fut` with `app` as the current application.
pub async fn run_with_context<F>(app: &App, fut: F) -> F::Output
where
    F: Future + Send,
{
    match app.platform() {
        Platform::Server => SERVER_APP.scope(app.clone(), fut).await,
        Platform::Client => {
            ClientScope {
                app: app.clone(),
                fut: Box::pin(fut),
            }
            .await
        }
    }
}

/// The current application, if any.
pub fn try_current() -> Option<App> {
    if let Ok(app) = SERVER_APP.try_with(App::clone) {
        return Some(app);
    }
    CLIENT_ACTIVE.with(|slot| slot.borrow().clone())
}

/// The current application, or [`AppError::MissingContext`].
pub fn current() -> Result<App> {
    try_current().ok_or(AppError::MissingContext)
}

/// The current application if it has `app_id`, else the registered client
/// app with that id.
pub fn try_current_for(app_id: &str) -> Option<App> {
    match try_current() {
        Some(app) if app.id() == app_id => Some(app),
        _ => client_app(app_id),
    }
}

/// Register a client app under its id, replacing any previous one.
pub fn register_client(app: &App) {
    let mut apps = CLIENT_APPS.lock().unwrap_or_else(|p| p.into_inner());
    apps.retain(|_, weak| weak.upgrade().is_some());
    apps.insert(app.id().to_string(), app.downgrade());
}

/// Forget the client app registered under `app_id`.
pub fn unregister_client(app_id: &str) -> Option<App> {
    CLIENT_APPS
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .remove(app_id)
        .and_then(|weak| weak.upgrade())
}

/// The live client app registered under `app_id`.
pub fn client_app(app_id: &str) -> Option<App> {
    let mut apps = CLIENT_APPS.lock().unwrap_or_else(|p| p.into_inner());
    let app = apps.get(app_id).and_then(WeakApp::upgrade);
    if app.is_none() {
        apps.remove(app_id);
    }
    app
}

struct ClientScope<F: Future> {
    app: App,
    fut: Pin<Box<F>>,
}

/// Puts the previously active client app back when dropped.
struct Restore(Option<App>);

impl Drop for Restore {
    fn drop(&mut self) {
        let previous = self.0.take();
        CLIENT_ACTIVE.with(|slot| *slot.borrow_mut() = previous);
    }
}

impl<F: Future> Future for ClientScope<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<F::Output> {
        let this = self.get_mut();
        let previous = CLIENT_ACTIVE.with(|slot| slot.replace(Some(this.app.clone())));
        let _restore = Restore(previous);
        this.fut.as_mut().poll(cx)
    }
}
