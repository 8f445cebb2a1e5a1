//! The view layer collaborator.

use async_trait::async_trait;
use isle_payload::ErrorRecord;

use crate::app::App;
use crate::error::Result;

/// What the runtime needs from the UI rendering library.
///
/// Every method is called inside the app's context.
#[async_trait]
pub trait ViewLayer: Send + Sync {
    /// Render the component tree to HTML.
    async fn render_to_string(&self, app: &App) -> Result<String>;

    /// Render the error page for `error`, if the application has one.
    async fn render_error_page(&self, _app: &App, _error: &ErrorRecord) -> Option<Result<String>> {
        None
    }

    /// Mount the component tree, attaching to existing markup when
    /// `hydrate` is set.
    async fn mount(&self, app: &App, hydrate: bool) -> Result<()>;
}
