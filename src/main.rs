use std::{process, sync::Arc};

use apalis::{
    layers::WorkerBuilderExt,
    prelude::{Monitor, WorkerBuilder, WorkerFactoryFn},
};
use apalis_sql::{Config as ApalisSqlConfig, postgres::PostgresStorage};
use tokio::sync::watch;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use vellum::{
    application::{
        error::AppError,
        executor::{ExecutionProfile, JobExecutor},
        jobs::{RENDER_JOB_TYPE, RenderWorkerContext, process_render_job},
        renders::RenderService,
    },
    config,
    domain::renders::{RenderRecord, SourceRef},
    infra::{
        db::{PostgresRepositories, PostgresTaskQueue},
        docker::DockerExecutor,
        error::InfraError,
        http::{self, ApiState},
        telemetry,
    },
};

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
        config::Command::Worker(_) => run_worker(settings).await,
        config::Command::Execute(args) => run_execute(settings, args).await,
        config::Command::Migrate(_) => run_migrate(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let (http_repositories, job_repositories) = init_repositories(&settings).await?;
    let worker_context = build_worker_context(&settings, job_repositories.clone()).await?;

    let queue = PostgresTaskQueue::new(
        (*http_repositories).clone(),
        settings.jobs.max_attempts.get(),
    );
    let renders = Arc::new(RenderService::new(
        http_repositories.clone(),
        Arc::new(queue),
        settings.render_service_config(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_handle = spawn_job_monitor(
        job_repositories,
        worker_context,
        &settings.jobs,
        shutdown_rx,
    );

    let result = serve_http(&settings, ApiState::new(renders), http_repositories).await;

    let _ = shutdown_tx.send(true);
    match tokio::time::timeout(settings.server.graceful_shutdown, monitor_handle).await {
        Ok(_) => info!(target = "vellum::serve", "render workers stopped"),
        Err(_) => warn!(
            target = "vellum::serve",
            timeout_secs = settings.server.graceful_shutdown.as_secs(),
            "render workers did not stop before the shutdown deadline"
        ),
    }

    result
}

async fn run_worker(settings: config::Settings) -> Result<(), AppError> {
    let (_, job_repositories) = init_repositories(&settings).await?;
    let worker_context = build_worker_context(&settings, job_repositories.clone()).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_handle = spawn_job_monitor(
        job_repositories,
        worker_context,
        &settings.jobs,
        shutdown_rx,
    );

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
    monitor_handle
        .await
        .map_err(|err| AppError::unexpected(format!("job monitor task failed: {err}")))
}

/// Render one document synchronously and report the renderer's exit status.
async fn run_execute(settings: config::Settings, args: config::ExecuteArgs) -> Result<(), AppError> {
    let source = SourceRef::parse(&args.source_type, &args.source_id)?;
    let record = RenderRecord::new(source);

    let templates = settings.sources.templates();
    let layout = settings.storage.output_layout();
    let profile = settings.storage.execution_profile();
    ensure_media_root(&profile).await?;

    let source_location = record.resolve_source_location(&templates)?;
    let output_location = record.resolve_output_location(&layout);

    let executor = DockerExecutor::connect(&settings.renderer.image, &settings.renderer.command)?;
    info!(
        target = "vellum::execute",
        image = executor.image(),
        source = %source_location,
        output = %output_location,
        "rendering document"
    );

    let result = executor
        .execute(source_location.as_str(), &output_location, &profile)
        .await
        .map_err(|err| AppError::from(InfraError::container(err.to_string())))?;

    println!("{}", result.logs);
    println!("exit code: {}", result.exit_code);
    if !result.succeeded() {
        return Err(AppError::unexpected(format!(
            "renderer exited with status {}",
            result.exit_code
        )));
    }
    println!(
        "html: {}",
        profile.output_target(&record.html_location(&layout))
    );
    Ok(())
}

async fn run_migrate(settings: config::Settings) -> Result<(), AppError> {
    let _ = init_repositories(&settings).await?;
    info!(target = "vellum::migrate", "database schema is up to date");
    Ok(())
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<(Arc<PostgresRepositories>, Arc<PostgresRepositories>), AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let http_pool =
        PostgresRepositories::connect(database_url, settings.database.http_max_connections.get())
            .await
            .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&http_pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    let jobs_pool =
        PostgresRepositories::connect(database_url, settings.database.jobs_max_connections.get())
            .await
            .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok((
        Arc::new(PostgresRepositories::new(http_pool)),
        Arc::new(PostgresRepositories::new(jobs_pool)),
    ))
}

async fn build_worker_context(
    settings: &config::Settings,
    results: Arc<PostgresRepositories>,
) -> Result<RenderWorkerContext, AppError> {
    let profile = settings.storage.execution_profile();
    ensure_media_root(&profile).await?;

    let executor = DockerExecutor::connect(&settings.renderer.image, &settings.renderer.command)?;

    Ok(RenderWorkerContext {
        executor: Arc::new(executor),
        profile,
        results,
    })
}

/// Create the local media root up front so the bind mount is not created by the daemon.
async fn ensure_media_root(profile: &ExecutionProfile) -> Result<(), AppError> {
    if let ExecutionProfile::Local { media_root } = profile {
        tokio::fs::create_dir_all(media_root)
            .await
            .map_err(|err| AppError::from(InfraError::from(err)))?;
    }
    Ok(())
}

fn spawn_job_monitor(
    repositories: Arc<PostgresRepositories>,
    context: RenderWorkerContext,
    jobs: &config::JobsSettings,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let render_storage = PostgresStorage::new_with_config(
        repositories.pool().clone(),
        ApalisSqlConfig::new(RENDER_JOB_TYPE),
    );

    let render_worker = WorkerBuilder::new("render-worker")
        .concurrency(jobs.render_concurrency.get() as usize)
        .data(context)
        .backend(render_storage)
        .build_fn(process_render_job);

    let monitor = Monitor::new().register(render_worker);

    tokio::spawn(async move {
        let signal = async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
            Ok::<(), std::io::Error>(())
        };
        if let Err(err) = monitor.run_with_signal(signal).await {
            error!(error = %err, "job monitor stopped");
        }
    })
}

async fn serve_http(
    settings: &config::Settings,
    api_state: ApiState,
    repositories: Arc<PostgresRepositories>,
) -> Result<(), AppError> {
    let router = http::build_router(api_state, repositories);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(target = "vellum::serve", addr = %settings.server.addr, "listening");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!(target = "vellum::serve", "shutdown signal received");
}
