//! Server render and client mount.
//!
//! Server: plugins, `app:created`, render, `app:rendered`, then the payload
//! is embedded in the page. Client: the embedded payload seeds a new app,
//! plugins run again, the view mounts (hydrating when the page was server
//! rendered) and `app:suspense:resolve` fires once every hydration gate has
//! been released.

use std::time::{SystemTime, UNIX_EPOCH};

use isle_payload::{embed, to_value, ErrorRecord, PayloadCodec};
use tracing::{debug, info, warn};

use crate::app::{App, Platform};
use crate::config::AppConfig;
use crate::context;
use crate::error::{AppError, Result};
use crate::error_channel::handle_error;
use crate::executor::apply_plugins;
use crate::hooks::{
    HookArgs, RenderedContext, APP_BEFORE_MOUNT, APP_CREATED, APP_MOUNTED, APP_RENDERED,
    APP_SUSPENSE_RESOLVE, DEV_SSR_LOGS,
};
use crate::plugin::Plugin;
use crate::request::PRERENDER_HEADER;
use crate::view::ViewLayer;

/// Where an app is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Uninitialized,
    PluginsRunning,
    Created,
    /// Server only: the page has been rendered.
    Rendered,
    Mounting,
    Hydrating,
    Ready,
    Failed,
}

/// The output of one server render.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPage {
    pub html: String,
    /// Tags contributed by `app:rendered` callbacks.
    pub head: Vec<String>,
    /// The `<script>` element carrying the payload.
    pub payload_script: String,
    /// Data served separately when prerendering.
    pub extracted_payload: Option<String>,
    /// Set when the error page was rendered.
    pub error: Option<ErrorRecord>,
    pub status: u16,
}

impl RenderedPage {
    /// A minimal HTML document around the render.
    pub fn to_document(&self) -> String {
        format!(
            "<!DOCTYPE html><html><head>{}</head><body><div id=\"__isle\">{}</div>{}</body></html>",
            self.head.join(""),
            self.html,
            self.payload_script
        )
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Render `app` on the server.
///
/// Initialization errors are returned as-is. Other failures switch to the
/// error page; if the view has none, the error is returned.
pub async fn render_server(app: &App, plugins: Vec<Plugin>, view: &dyn ViewLayer) -> Result<RenderedPage> {
    if app.platform() != Platform::Server {
        return Err(AppError::other("render_server needs a server app"));
    }

    app.set_lifecycle_state(LifecycleState::PluginsRunning);
    let setup = app
        .run_with_context(async {
            apply_plugins(app, plugins).await?;
            app.call_hook(APP_CREATED, HookArgs::Empty).await
        })
        .await;
    match setup {
        Ok(()) => app.set_lifecycle_state(LifecycleState::Created),
        Err(err) if err.is_fatal() => {
            app.set_lifecycle_state(LifecycleState::Failed);
            return Err(err);
        }
        Err(err) => {
            handle_error(app, &err).await;
        }
    }

    let mut html = None;
    if app.payload().global_error().is_none() {
        match app.run_with_context(view.render_to_string(app)).await {
            Ok(rendered) => html = Some(rendered),
            Err(err) => {
                handle_error(app, &err).await;
            }
        }
    }

    let error = app.payload().global_error();
    let html = match (html, &error) {
        (Some(html), None) => html,
        (_, Some(record)) => render_error_page(app, view, record).await?,
        (None, None) => return Err(AppError::other("render produced no output")),
    };

    app.set_lifecycle_state(LifecycleState::Rendered);
    let rendered = RenderedContext::new(html);
    app.call_hook(APP_RENDERED, HookArgs::Rendered(rendered.clone()))
        .await?;

    if app.config().dev {
        app.dev_logs().attach(app.payload())?;
    }

    let payload = app.payload();
    payload.set_server_rendered(true);
    let mut prerendering = false;
    if let Some(request) = app.request() {
        payload.set_path(request.path());
        prerendering = request.header(PRERENDER_HEADER).is_some();
    }

    let (embedded, extracted_payload) = if prerendering {
        payload.set_prerendered_at(now_ms());
        let split = payload.snapshot().split();
        if let Some(request) = app.request() {
            let path = request.path();
            let route = path.split('?').next().unwrap_or_default().trim_end_matches('/');
            request.append_header(PRERENDER_HEADER, &format!("{}/_payload.json", route));
        }
        (split.initial, Some(split.extracted.encode(app.codec())?))
    } else {
        (payload.snapshot(), None)
    };

    let payload_script = embed::render_script(
        app.codec(),
        &embedded,
        app.id(),
        app.config().multi_app,
    )?;
    let status = error.as_ref().map_or(200, |record| record.status_code);
    info!(app_id = %app.id(), status, "page rendered");

    Ok(RenderedPage {
        html: rendered.html.clone(),
        head: rendered.head(),
        payload_script,
        extracted_payload,
        error,
        status,
    })
}

async fn render_error_page(app: &App, view: &dyn ViewLayer, record: &ErrorRecord) -> Result<String> {
    if let Some(request) = app.request() {
        request.set_status(record.status_code, record.status_message.as_deref());
    }
    match app.run_with_context(view.render_error_page(app, record)).await {
        Some(Ok(html)) => Ok(html),
        Some(Err(err)) => {
            app.set_lifecycle_state(LifecycleState::Failed);
            Err(err)
        }
        None => {
            app.set_lifecycle_state(LifecycleState::Failed);
            Err(AppError::Render(record.clone()))
        }
    }
}

/// Start the client app for a page.
///
/// `document` is the server-rendered HTML, if any; its embedded payload seeds
/// the new app. Failures are routed to the error channel and never escape.
/// The returned app reaches [`LifecycleState::Ready`] once hydration
/// completes.
pub async fn mount_client(
    config: AppConfig,
    codec: PayloadCodec,
    document: Option<&str>,
    plugins: Vec<Plugin>,
    view: &dyn ViewLayer,
) -> App {
    let mut extract_error = None;
    let embedded = match document {
        Some(html) => match embed::extract(&codec, html, &config.app_id, config.multi_app) {
            Ok(embedded) => embedded,
            Err(err) => {
                extract_error = Some(err);
                None
            }
        },
        None => None,
    };
    let hydrate = embedded.as_ref().is_some_and(|e| e.ssr);

    let mut builder = App::builder(Platform::Client).config(config).codec(codec);
    if let Some(embedded) = embedded {
        builder = builder.payload(embedded.payload);
    }
    let app = builder.build();
    context::register_client(&app);
    if hydrate {
        app.hydration().begin();
    }
    let mut mount_gate = app.defer_hydration();

    app.run_with_context(async {
        if let Some(err) = extract_error {
            handle_error(&app, &AppError::from(err)).await;
        }

        app.set_lifecycle_state(LifecycleState::PluginsRunning);
        if let Err(err) = apply_plugins(&app, plugins).await {
            let fatal = err.is_fatal();
            handle_error(&app, &err).await;
            if fatal {
                app.set_lifecycle_state(LifecycleState::Failed);
                return;
            }
        }
        app.set_lifecycle_state(LifecycleState::Created);
        report(&app, app.call_hook(APP_CREATED, HookArgs::Empty).await).await;

        if app.config().dev {
            forward_server_logs(&app).await;
        }

        app.set_lifecycle_state(LifecycleState::Mounting);
        report(&app, app.call_hook(APP_BEFORE_MOUNT, HookArgs::Empty).await).await;
        if hydrate {
            app.set_lifecycle_state(LifecycleState::Hydrating);
        }
        report(&app, view.mount(&app, hydrate).await).await;
        report(&app, app.call_hook(APP_MOUNTED, HookArgs::Empty).await).await;
    })
    .await;

    mount_gate.release();
    if app.lifecycle_state() != LifecycleState::Failed {
        tokio::spawn(settle_hydration(app.clone()));
    }
    app
}

async fn report(app: &App, result: Result<()>) {
    if let Err(err) = result {
        handle_error(app, &err).await;
    }
}

async fn forward_server_logs(app: &App) {
    match app.dev_logs().forward(app.payload()) {
        Ok(entries) if entries.is_empty() => {}
        Ok(entries) => match to_value(&entries) {
            Ok(value) => report(app, app.call_hook(DEV_SSR_LOGS, HookArgs::Value(value)).await).await,
            Err(err) => warn!(error = %err, "could not hand server logs to hooks"),
        },
        Err(err) => warn!(error = %err, "malformed server logs in payload"),
    }
}

/// Wait for every hydration gate, then announce the app as ready.
async fn settle_hydration(app: App) {
    let finished = app.hydration().finished();
    match app.config().hydration_timeout() {
        Some(limit) => {
            if tokio::time::timeout(limit, finished).await.is_err() {
                warn!(
                    app_id = %app.id(),
                    outstanding = app.hydration().outstanding(),
                    "hydration timed out"
                );
                app.hydration().force_release();
            }
        }
        None => finished.await,
    }

    debug!(app_id = %app.id(), "hydration settled");
    let resolved = app
        .run_with_context(app.call_hook(APP_SUSPENSE_RESOLVE, HookArgs::Empty))
        .await;
    app.run_with_context(report(&app, resolved)).await;
    app.set_lifecycle_state(LifecycleState::Ready);
}
