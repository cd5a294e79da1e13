use std::{io::Write, process, sync::Arc, time::Duration};

use pagewright::{
    application::{
        error::AppError,
        optimizer::{Optimizer, PassToggles},
        passes::{PassConfig, build_passes},
    },
    config,
    infra::{
        assets::{self, FsAssetStore},
        error::InfraError,
        http::{self, HttpState, OptimizerState, ProxyState, SessionCookieAuth},
        telemetry,
    },
};
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
        .map_err(|err| AppError::validation(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Optimize(args) => run_optimize(settings, args).await,
    }
}

fn build_optimizer(
    settings: &config::Settings,
) -> Result<(Arc<Optimizer>, Arc<FsAssetStore>), AppError> {
    let store = FsAssetStore::new(
        settings.combine.asset_root.clone(),
        settings.combine.output_dir.clone(),
        settings.combine.public_prefix.clone(),
    )
    .map_err(|err| AppError::from(InfraError::from(err)))?;
    let store = Arc::new(store);

    let passes = build_passes(&PassConfig::from(settings), store.clone());
    let flags = Arc::new(PassToggles::from(&settings.optimizer));
    Ok((Arc::new(Optimizer::new(flags, passes)), store))
}

/// Upper bound on the time between two bundle directory sweeps.
const PRUNE_INTERVAL: Duration = Duration::from_secs(60 * 60);

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let (optimizer, bundles) = build_optimizer(&settings)?;
    if let Some(max_age) = settings.combine.bundle_max_age {
        tokio::spawn(assets::prune_bundles_periodically(
            bundles.clone(),
            max_age,
            PRUNE_INTERVAL.min(max_age),
        ));
    }
    let max_body_bytes = settings.optimizer.max_body_bytes.get();

    let state = HttpState {
        optimizer: OptimizerState {
            optimizer,
            auth: Arc::new(SessionCookieAuth::new(
                settings.auth.session_cookie_prefixes.clone(),
            )),
            max_body_bytes,
        },
        proxy: ProxyState::new(
            settings.upstream.url.clone(),
            settings.upstream.timeout,
            max_body_bytes,
        )?,
        bundles,
    };

    serve_http(&settings, state).await
}

async fn serve_http(settings: &config::Settings, state: HttpState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "pagewright::serve",
        addr = %settings.server.addr,
        upstream = %settings.upstream.url,
        "listening"
    );

    axum::serve(listener, router.into_make_service())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

async fn run_optimize(
    settings: config::Settings,
    args: config::OptimizeArgs,
) -> Result<(), AppError> {
    let html = tokio::fs::read_to_string(&args.file)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let (optimizer, _) = build_optimizer(&settings)?;

    let optimized = tokio::task::spawn_blocking(move || optimizer.optimize(html))
        .await
        .map_err(|err| AppError::unexpected(format!("optimizer task failed: {err}")))??;

    match args.output.as_ref() {
        Some(path) => tokio::fs::write(path, optimized.html.as_bytes())
            .await
            .map_err(|err| AppError::from(InfraError::from(err)))?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(optimized.html.as_bytes())
                .and_then(|()| stdout.flush())
                .map_err(|err| AppError::from(InfraError::from(err)))?
        }
    }

    if args.report {
        let report = serde_json::to_string(&optimized)
            .map_err(|err| AppError::unexpected(format!("failed to encode report: {err}")))?;
        eprintln!("{report}");
    }

    info!(
        target = "pagewright::optimize",
        file = %args.file.display(),
        amp = optimized.amp,
        passes = optimized.applied.len(),
        "page optimized"
    );

    Ok(())
}
