use std::{process, sync::Arc};

use specchio::{
    application::{
        error::AppError,
        preview::PreviewSession,
        render::{DocumentPipeline, RenderOptions},
        stats::PreviewStats,
    },
    config,
    infra::{
        error::InfraError,
        http::{self, PreviewState},
        telemetry,
    },
    presentation::views::PreviewShell,
};
use tokio::try_join;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Render(args) => run_render(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let stats = Arc::new(PreviewStats::default());
    let session = Arc::new(PreviewSession::new(
        settings.preview.base_dir.clone(),
        settings.preview.quiet_window,
        Arc::clone(&stats),
    ));
    let shell = Arc::new(PreviewShell::load(
        settings.preview.template.as_deref(),
        settings.server.push_addr.port(),
    ));

    let state = PreviewState { session, shell };
    let http_router = http::build_router(state.clone());
    let push_router = http::build_push_router(state);

    let http_listener = tokio::net::TcpListener::bind(settings.server.http_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let push_listener = tokio::net::TcpListener::bind(settings.server.push_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "specchio::serve",
        http = %settings.server.http_addr,
        push = %settings.server.push_addr,
        base_dir = %settings.preview.base_dir.display(),
        quiet_window_ms = settings.preview.quiet_window.as_millis() as u64,
        "Preview server listening"
    );

    let http_server = axum::serve(http_listener, http_router.into_make_service());
    let push_server = axum::serve(push_listener, push_router.into_make_service());

    try_join!(http_server, push_server)
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

async fn run_render(settings: config::Settings, args: config::RenderArgs) -> Result<(), AppError> {
    let markdown = tokio::fs::read_to_string(&args.file)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    let stats = Arc::new(PreviewStats::default());
    let mut pipeline = DocumentPipeline::new(settings.preview.base_dir.clone(), stats);
    let options = RenderOptions {
        wikilinks: !args.no_wikilinks,
        latex: !args.no_latex,
    };

    let rendered = pipeline.render(&markdown, options);
    info!(
        target = "specchio::render",
        file = %args.file.display(),
        bytes = rendered.bytes,
        duration_ms = rendered.duration.as_secs_f64() * 1000.0,
        backend = pipeline.backend_name(),
        "Rendered document"
    );

    println!("{}", rendered.html);
    Ok(())
}
