use anyhow::{Context, Result};
use serde::Deserialize;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use warp::Filter;

use fleet_tracker::client::{HeaderHook, HttpClient};
use fleet_tracker::config::Config;
use fleet_tracker::gc::mark_stale_offline;
use fleet_tracker::geo::{DEFAULT_SPEED_KMH, LatLng};
use fleet_tracker::layer::TracingLayer;
use fleet_tracker::notifications::NotificationFeed;
use fleet_tracker::poller::Poller;
use fleet_tracker::processor::apply_snapshot;
use fleet_tracker::reporter::ThrottledReporter;
use fleet_tracker::sensor::{SimulatedSource, circular_path};
use fleet_tracker::state::FleetState;

#[derive(Debug, Deserialize)]
struct EtaQuery {
    lat: f64,
    lng: f64,
    speed: Option<f64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fleet_tracker=info")),
        )
        .init();

    // 1. Configuration & shared state
    let config = Config::from_env();
    tracing::info!(fleet = %config.fleet_url, "starting fleet tracker");

    let state = Arc::new(FleetState::new(Arc::new(TracingLayer)));
    let feed = Arc::new(NotificationFeed::new());

    let mut client = HttpClient::new(config.request_timeout).context("building HTTP client")?;
    if let Some(token) = config.csrf_token.clone() {
        let value = reqwest::header::HeaderValue::from_str(&token).context("invalid CSRF_TOKEN")?;
        let hook: HeaderHook = Arc::new(move || {
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert("X-CSRFToken", value.clone());
            headers
        });
        client = client.with_header_hook(hook);
    }
    let client = Arc::new(client);
    let poller = Poller::new(client.clone());

    // 2. Fleet poller
    let fleet_state = state.clone();
    let mut fleet_poll = poller.start(config.fleet_url.clone(), config.poll_interval, move |records| {
        apply_snapshot(&records, &fleet_state);
    });

    // 3. Notification poller
    let feed_apply = feed.clone();
    let mut notification_poll =
        poller.start(config.notifications_url.clone(), config.notification_interval, move |records| {
            feed_apply.apply(&records);
        });

    // 4. Staleness sweep (opt-in)
    let sweep = config.stale_after.map(|threshold| {
        let state = state.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(threshold.min(std::time::Duration::from_secs(60)));
            loop {
                ticker.tick().await;
                mark_stale_offline(&state, threshold);
            }
        })
    });

    // 5. Own-position reporter (simulated sensor)
    let mut reporter = config.report_bus_id.as_ref().map(|bus_id| {
        let sim = &config.simulation;
        let source = SimulatedSource::new(
            circular_path(sim.center, sim.radius_deg, 8),
            sim.speed_kmh,
            sim.period,
        );
        let mut reporter =
            ThrottledReporter::new(Arc::new(source), client.clone(), config.report_threshold());
        if let Err(e) = reporter.start(config.location_url.clone(), bus_id) {
            tracing::error!(code = e.code(), "could not start location reporting: {e}");
        }
        reporter
    });

    // 6. HTTP Server
    tokio::spawn(warp::serve(routes(state.clone(), feed)).run(([0, 0, 0, 0], config.port)));
    tracing::info!("Server running at http://localhost:{}", config.port);

    // 7. Shutdown
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("shutting down");

    fleet_poll.stop();
    notification_poll.stop();
    if let Some(reporter) = reporter.as_mut() {
        reporter.stop();
    }
    if let Some(sweep) = sweep {
        sweep.abort();
    }

    Ok(())
}

fn routes(
    state: Arc<FleetState>,
    feed: Arc<NotificationFeed>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let state_filter = warp::any().map(move || state.clone()).boxed();
    let feed_filter = warp::any().map(move || feed.clone()).boxed();

    // GET /vehicles
    let vehicles_route = warp::path("vehicles")
        .and(warp::path::end())
        .and(warp::get())
        .and(state_filter.clone())
        .map(|state: Arc<FleetState>| warp::reply::json(&state.vehicles()));

    // GET /bounds
    let bounds_route = warp::path("bounds")
        .and(warp::path::end())
        .and(warp::get())
        .and(state_filter.clone())
        .map(|state: Arc<FleetState>| warp::reply::json(&state.compute_bounds()));

    // GET /eta?lat=..&lng=..[&speed=..]
    let eta_route = warp::path("eta")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<EtaQuery>())
        .and(state_filter.clone())
        .map(|query: EtaQuery, state: Arc<FleetState>| {
            let speed = query.speed.unwrap_or(DEFAULT_SPEED_KMH);
            warp::reply::json(&state.eta_to(LatLng::new(query.lat, query.lng), speed))
        });

    // GET /notifications
    let notifications_route = warp::path("notifications")
        .and(warp::path::end())
        .and(warp::get())
        .and(feed_filter)
        .map(|feed: Arc<NotificationFeed>| {
            warp::reply::json(&serde_json::json!({
                "count": feed.count(),
                "preview": feed.preview(),
            }))
        });

    vehicles_route
        .or(bounds_route)
        .or(eta_route)
        .or(notifications_route)
        .boxed()
}
