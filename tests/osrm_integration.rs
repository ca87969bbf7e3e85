//! Live OSRM checks against a containerized `osrm-routed`.
//!
//! Needs Docker and a pre-processed MLD extract at
//! `$OSRM_DATA_DIR/nevada-latest.osrm*` (default `osrm-data/`). Run with
//! `cargo test --test osrm_integration -- --ignored`.

use std::env;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use testcontainers::ReuseDirective;
use testcontainers::core::{IntoContainerPort, Mount};
use testcontainers::runners::SyncRunner;
use testcontainers::{Container, GenericImage, ImageExt, TestcontainersError};

use delivery_planner::matrix::{MatrixResponse, MatrixSource};
use delivery_planner::osrm::{OsrmClient, OsrmConfig};
use delivery_planner::traits::{DurationMatrixProvider, RouteOptimizer};

const DATASET: &str = "nevada-latest.osrm";

const LAS_VEGAS: &[(f64, f64)] = &[
    (36.1147, -115.1728),
    (36.1727, -115.1580),
    (36.1215, -115.1739),
    (36.0395, -114.9817),
];

fn data_dir() -> Option<PathBuf> {
    let dir = PathBuf::from(env::var("OSRM_DATA_DIR").unwrap_or_else(|_| "osrm-data".to_string()));
    let partition = dir.join(format!("{DATASET}.partition"));
    if partition.exists() {
        Some(dir)
    } else {
        eprintln!("skipping: {} not found", partition.display());
        None
    }
}

fn osrm_container(dir: &Path) -> Result<(Container<GenericImage>, String), TestcontainersError> {
    let dir = dir
        .canonicalize()
        .map_err(|err| TestcontainersError::other(format!("bad data dir: {err}")))?;

    let image = GenericImage::new("osrm/osrm-backend", "latest")
        .with_exposed_port(5000.tcp())
        .with_mount(Mount::bind_mount(dir.to_string_lossy().to_string(), "/data"))
        .with_cmd(vec!["osrm-routed", "--algorithm", "mld", "/data/nevada-latest.osrm"])
        .with_container_name("delivery-planner-osrm-nevada")
        .with_startup_timeout(Duration::from_secs(30))
        .with_reuse(ReuseDirective::Always);

    let container = image.start()?;
    let port = container.get_host_port_ipv4(5000.tcp())?;
    Ok((container, format!("http://127.0.0.1:{port}")))
}

fn client(base_url: &str) -> OsrmClient {
    let config = OsrmConfig {
        timeout_secs: 10,
        ..OsrmConfig::with_base_url(base_url)
    };
    OsrmClient::new(config).expect("build OSRM client")
}

/// The server may still be loading the extract when the port opens.
fn wait_for_matrix(client: &OsrmClient, locations: &[(f64, f64)]) -> MatrixResponse {
    let start = Instant::now();
    loop {
        let response = client.matrix_for(locations);
        if !response.is_empty() || start.elapsed() > Duration::from_secs(15) {
            return response;
        }
        std::thread::sleep(Duration::from_millis(500));
    }
}

#[test]
#[ignore = "needs Docker and an OSRM extract"]
fn osrm_table_returns_matrix() {
    let Some(dir) = data_dir() else {
        return;
    };
    let (container, base_url) = osrm_container(&dir).expect("start OSRM container");
    let client = client(&base_url);

    let response = wait_for_matrix(&client, LAS_VEGAS);
    if response.is_empty() {
        if let Ok(stderr) = container.stderr_to_vec() {
            eprintln!("OSRM stderr:\n{}", String::from_utf8_lossy(&stderr));
        }
    }

    assert_eq!(response.source, MatrixSource::Provider);
    assert_eq!(response.seconds.len(), LAS_VEGAS.len());
    for (i, row) in response.seconds.iter().enumerate() {
        assert_eq!(row.len(), LAS_VEGAS.len());
        assert_eq!(row[i], 0.0);
        assert!(row.iter().all(|&cell| cell >= 0.0));
    }
    assert!(response.failed_pairs.is_empty());
}

#[test]
#[ignore = "needs Docker and an OSRM extract"]
fn osrm_trip_returns_permutation() {
    let Some(dir) = data_dir() else {
        return;
    };
    let (_container, base_url) = osrm_container(&dir).expect("start OSRM container");
    let client = client(&base_url);
    // Warm up before asking for a trip.
    wait_for_matrix(&client, LAS_VEGAS);

    let depot = LAS_VEGAS[3];
    let order = client.optimize(depot, &LAS_VEGAS[..3]).expect("trip order");

    let mut sorted = order.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, vec![0, 1, 2]);
}
